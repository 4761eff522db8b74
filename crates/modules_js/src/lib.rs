use deno_core::{Extension, JsRuntime, ModuleCodeString};
use engine::{Dispatcher, TaskContext};
use std::sync::Arc;

pub mod modules;

/// Global the request handle is published under before handler code runs.
pub const HANDLE_GLOBAL: &str = "__bridgeRequestHandle";

pub fn extensions() -> Vec<Extension> {
    vec![modules::bridge::init()]
}

/// Bind a runtime to one task: the ops find the dispatcher and task state in
/// `OpState`, and script code finds the handle on `globalThis`.
pub fn install(
    runtime: &mut JsRuntime,
    dispatcher: Arc<Dispatcher>,
    task: TaskContext,
) -> Result<(), String> {
    let handle = task.handle();
    let task_id = task.task_id();
    {
        let op_state = runtime.op_state();
        let mut state = op_state.borrow_mut();
        state.put(dispatcher);
        state.put(task);
    }
    let script = format!("globalThis.{HANDLE_GLOBAL} = {};", handle.id());
    runtime
        .execute_script("bridge:install.js", ModuleCodeString::from(script))
        .map_err(|err| format!("failed to bind request handle: {err}"))?;
    tracing::debug!(task_id, handle = handle.id(), "request handle bound");
    Ok(())
}
