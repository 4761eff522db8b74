use deno_core::{OpState, op2};
use deno_error::JsErrorBox;
use engine::{Dispatcher, Row, TaskContext};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use super::error::to_js_error;

fn bound(state: &Rc<RefCell<OpState>>) -> (Arc<Dispatcher>, TaskContext) {
    let state = state.borrow();
    (
        state.borrow::<Arc<Dispatcher>>().clone(),
        state.borrow::<TaskContext>().clone(),
    )
}

/// Affected row count for a statement with no row set.
#[op2(async)]
#[number]
pub async fn op_sql_execute(
    state: Rc<RefCell<OpState>>,
    #[string] sql: String,
) -> Result<u64, JsErrorBox> {
    let (dispatcher, task) = bound(&state);
    dispatcher.sql_execute(&task, sql).await.map_err(to_js_error)
}

#[op2(async)]
#[serde]
pub async fn op_sql_query(
    state: Rc<RefCell<OpState>>,
    #[string] sql: String,
) -> Result<Vec<Row>, JsErrorBox> {
    let (dispatcher, task) = bound(&state);
    dispatcher.sql_query(&task, sql).await.map_err(to_js_error)
}
