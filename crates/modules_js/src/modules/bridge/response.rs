use deno_core::{OpState, op2};
use deno_error::JsErrorBox;
use engine::{Dispatcher, ResponseDescriptor, TaskContext};
use std::sync::Arc;

use super::error::to_js_error;

/// Terminal for the task: accepted once, then `ProtocolViolation`.
#[op2]
pub fn op_send_response(
    state: &mut OpState,
    #[serde] response: serde_json::Value,
) -> Result<(), JsErrorBox> {
    let response = ResponseDescriptor::from_script(response).map_err(to_js_error)?;
    let dispatcher = state.borrow::<Arc<Dispatcher>>();
    let task = state.borrow::<TaskContext>();
    dispatcher
        .send_response(task, response)
        .map_err(to_js_error)
}
