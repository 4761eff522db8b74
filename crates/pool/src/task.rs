//! One task: a dedicated thread, a current-thread tokio runtime, and a fresh
//! `JsRuntime` that lives exactly as long as the request.

use deno_core::{JsRuntime, ModuleCodeString, ModuleSpecifier, PollEventLoopOptions, RuntimeOptions};
use engine::{Dispatcher, TaskContext};
use std::sync::Arc;

use crate::executor::{HandlerScript, ScriptKind};

/// How the script side of a task ended. Only consulted when no response was
/// emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TaskReport {
    Completed,
    Failed(String),
}

pub(crate) fn run_task(
    script: &HandlerScript,
    dispatcher: Arc<Dispatcher>,
    task: TaskContext,
) -> TaskReport {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => return TaskReport::Failed(format!("failed to start task runtime: {err}")),
    };

    let task_id = task.task_id();
    let report = runtime.block_on(async move {
        match evaluate(script, dispatcher, task).await {
            Ok(()) => TaskReport::Completed,
            Err(err) => TaskReport::Failed(err),
        }
    });
    if let TaskReport::Failed(err) = &report {
        tracing::debug!(task_id, handler = script.name(), "handler failed: {}", err);
    }
    report
}

async fn evaluate(
    script: &HandlerScript,
    dispatcher: Arc<Dispatcher>,
    task: TaskContext,
) -> Result<(), String> {
    let mut runtime = JsRuntime::new(RuntimeOptions {
        extensions: modules_js::extensions(),
        ..Default::default()
    });
    modules_js::install(&mut runtime, dispatcher, task)?;

    match script.kind() {
        ScriptKind::Classic => {
            runtime
                .execute_script(
                    "bridge:handler.js",
                    ModuleCodeString::from(script.source().to_string()),
                )
                .map_err(|err| format!("{}: {}", script.name(), err))?;
            runtime
                .run_event_loop(PollEventLoopOptions::default())
                .await
                .map_err(|err| format!("{}: {}", script.name(), err))?;
        }
        ScriptKind::Module => {
            let specifier = ModuleSpecifier::parse(&format!(
                "file:///bridge/handlers/{}",
                script.name()
            ))
            .map_err(|err| format!("invalid handler name {}: {}", script.name(), err))?;
            let module_id = runtime
                .load_main_es_module_from_code(
                    &specifier,
                    ModuleCodeString::from(script.source().to_string()),
                )
                .await
                .map_err(|err| format!("failed to load module {}: {}", script.name(), err))?;
            let eval = runtime.mod_evaluate(module_id);
            runtime
                .run_event_loop(PollEventLoopOptions::default())
                .await
                .map_err(|err| format!("{}: {}", script.name(), err))?;
            eval.await
                .map_err(|err| format!("module evaluation failed for {}: {}", script.name(), err))?;
        }
    }
    Ok(())
}
