use deno_core::{OpState, op2};
use engine::{Dispatcher, Handle, OpOutcome, TaskContext};
use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

/// Generic entry point. Never throws: failures come back as
/// `{ status: "failure", kind, message }`.
#[op2(async)]
#[serde]
pub async fn op_dispatch(
    state: Rc<RefCell<OpState>>,
    #[string] name: String,
    #[serde] args: Vec<Value>,
    #[serde] handle: Option<Handle>,
) -> OpOutcome {
    let (dispatcher, task) = {
        let state = state.borrow();
        (
            state.borrow::<Arc<Dispatcher>>().clone(),
            state.borrow::<TaskContext>().clone(),
        )
    };
    dispatcher.dispatch_raw(&task, &name, args, handle).await
}
