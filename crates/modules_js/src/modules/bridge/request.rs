//! Request accessors. Each call looks the handle up again, so a released
//! handle fails with `InvalidHandle` instead of returning stale data. Only
//! the calling task's own handle resolves.

use deno_core::{OpState, op2};
use deno_error::JsErrorBox;
use engine::{Dispatcher, Handle, TaskContext};
use std::collections::HashMap;
use std::sync::Arc;

use super::error::to_js_error;

fn bound(state: &OpState) -> (&Arc<Dispatcher>, &TaskContext) {
    (state.borrow::<Arc<Dispatcher>>(), state.borrow::<TaskContext>())
}

#[op2]
#[string]
pub fn op_req_method(state: &mut OpState, #[smi] rid: u32) -> Result<String, JsErrorBox> {
    let (dispatcher, task) = bound(state);
    dispatcher
        .req_method(task, Handle::from_raw(rid))
        .map_err(to_js_error)
}

#[op2]
#[string]
pub fn op_req_path(state: &mut OpState, #[smi] rid: u32) -> Result<String, JsErrorBox> {
    let (dispatcher, task) = bound(state);
    dispatcher
        .req_path(task, Handle::from_raw(rid))
        .map_err(to_js_error)
}

#[op2]
#[serde]
pub fn op_req_headers(
    state: &mut OpState,
    #[smi] rid: u32,
) -> Result<HashMap<String, String>, JsErrorBox> {
    let (dispatcher, task) = bound(state);
    dispatcher
        .req_headers(task, Handle::from_raw(rid))
        .map_err(to_js_error)
}

#[op2]
#[string]
pub fn op_req_body(state: &mut OpState, #[smi] rid: u32) -> Result<String, JsErrorBox> {
    let (dispatcher, task) = bound(state);
    dispatcher
        .req_body(task, Handle::from_raw(rid))
        .map_err(to_js_error)
}

#[op2]
#[string]
pub fn op_req_get_header(
    state: &mut OpState,
    #[smi] rid: u32,
    #[string] name: String,
) -> Result<Option<String>, JsErrorBox> {
    let (dispatcher, task) = bound(state);
    dispatcher
        .req_get_header(task, Handle::from_raw(rid), &name)
        .map_err(to_js_error)
}

#[op2(fast)]
pub fn op_req_close(state: &mut OpState, #[smi] rid: u32) -> Result<(), JsErrorBox> {
    let (dispatcher, task) = bound(state);
    dispatcher
        .req_close(task, Handle::from_raw(rid))
        .map_err(to_js_error)
}
