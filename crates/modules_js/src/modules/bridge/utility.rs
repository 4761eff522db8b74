use deno_core::{OpState, op2};
use deno_error::JsErrorBox;
use engine::{Dispatcher, TaskContext};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use super::error::to_js_error;

#[op2(fast)]
pub fn op_log(state: &mut OpState, #[string] message: &str) -> Result<(), JsErrorBox> {
    let dispatcher = state.borrow::<Arc<Dispatcher>>();
    let task = state.borrow::<TaskContext>();
    dispatcher.log(task, message).map_err(to_js_error)
}

/// Suspends only the calling task.
#[op2(async)]
pub async fn op_delay(state: Rc<RefCell<OpState>>, #[number] ms: u64) -> Result<(), JsErrorBox> {
    let (dispatcher, task) = {
        let state = state.borrow();
        (
            state.borrow::<Arc<Dispatcher>>().clone(),
            state.borrow::<TaskContext>().clone(),
        )
    };
    dispatcher.delay(&task, ms).await.map_err(to_js_error)
}
