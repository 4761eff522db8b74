//! Task executor
//!
//! Runs one handler script per request. Each request gets its own handle,
//! responder and OS thread; a semaphore bounds how many run at once. The
//! executor returns as soon as the handler emits, and synthesizes the
//! response itself when the handler never does.

use engine::{
    BridgeConfig, BridgeResult, Database, Dispatcher, ExecutorSettings, HandleRegistry,
    RequestContext, Responder, ResponseDescriptor, TaskContext,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, oneshot};

use crate::task::{TaskReport, run_task};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    /// Evaluated as a classic script
    Classic,
    /// Evaluated as an ES module (allows top-level await)
    Module,
}

/// Handler source plus the name it is reported under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerScript {
    name: String,
    source: String,
    kind: ScriptKind,
}

impl HandlerScript {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            kind: ScriptKind::Classic,
        }
    }

    pub fn module(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            kind: ScriptKind::Module,
            ..Self::new(name, source)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn kind(&self) -> ScriptKind {
        self.kind
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// Script ran to completion without emitting
    NoResponse,
    /// Compile error, uncaught exception or event loop failure
    ScriptFailed(String),
    TimedOut,
    BodyTooLarge,
    /// The task could not be started
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Emitted,
    Fallback(FallbackReason),
}

#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task_id: u64,
    pub response: ResponseDescriptor,
    pub completion: Completion,
    pub elapsed: Duration,
}

impl TaskOutcome {
    pub fn emitted(&self) -> bool {
        self.completion == Completion::Emitted
    }
}

pub struct TaskExecutor {
    config: ExecutorSettings,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<HandleRegistry>,
    permits: Arc<Semaphore>,
    task_seq: AtomicU64,
}

impl TaskExecutor {
    pub fn new(config: ExecutorSettings, database: Arc<dyn Database>) -> Self {
        let registry = Arc::new(HandleRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry), database));
        let permits = Arc::new(Semaphore::new(config.max_concurrent_tasks.max(1)));
        tracing::debug!(
            max_concurrent_tasks = config.max_concurrent_tasks,
            request_timeout_ms = config.request_timeout_ms,
            "task executor ready"
        );
        Self {
            config,
            dispatcher,
            registry,
            permits,
            task_seq: AtomicU64::new(0),
        }
    }

    /// Open the configured database and build an executor around it.
    pub fn from_config(config: &BridgeConfig) -> BridgeResult<Self> {
        let database = config.database.open()?;
        Ok(Self::new(config.executor.clone(), Arc::new(database)))
    }

    pub fn registry(&self) -> &Arc<HandleRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Wait until no task is running, including tasks that already
    /// responded and are still finishing in the background.
    pub async fn wait_idle(&self) {
        let total = u32::try_from(self.config.max_concurrent_tasks.max(1)).unwrap_or(u32::MAX);
        if let Ok(permits) = self.permits.acquire_many(total).await {
            drop(permits);
        }
    }

    pub async fn execute(&self, script: &HandlerScript, request: RequestContext) -> TaskOutcome {
        let started = Instant::now();
        let task_id = self.task_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let finish = |response, completion| TaskOutcome {
            task_id,
            response,
            completion,
            elapsed: started.elapsed(),
        };

        if request.body().len() > self.config.max_body_bytes {
            tracing::warn!(
                task_id,
                size = request.body().len(),
                limit = self.config.max_body_bytes,
                "request body too large"
            );
            return finish(
                ResponseDescriptor::error(
                    413,
                    format!(
                        "request body exceeds {} bytes",
                        self.config.max_body_bytes
                    ),
                ),
                Completion::Fallback(FallbackReason::BodyTooLarge),
            );
        }

        let permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                let message = "task executor is shut down".to_string();
                return finish(
                    ResponseDescriptor::error(503, message.clone()),
                    Completion::Fallback(FallbackReason::Unavailable(message)),
                );
            }
        };

        let handle = self.registry.allocate(request);
        let (responder, mut response_rx) = Responder::channel();
        let responder = Arc::new(responder);
        let task = TaskContext::new(task_id, handle, Arc::clone(&responder));
        let watch = task.clone();
        let (report_tx, report_rx) = oneshot::channel();

        let spawned = {
            let script = script.clone();
            let dispatcher = Arc::clone(&self.dispatcher);
            let registry = Arc::clone(&self.registry);
            thread::Builder::new()
                .name(format!("bridge-task-{task_id}"))
                .spawn(move || {
                    let report = run_task(&script, dispatcher, task.clone());
                    // Host-driven cleanup; both are no-ops if already done.
                    task.responder().close();
                    registry.release(task.handle());
                    drop(permit);
                    let _ = report_tx.send(report);
                })
        };
        if let Err(err) = spawned {
            self.registry.release(handle);
            responder.close();
            let message = format!("failed to spawn task thread: {err}");
            tracing::warn!(task_id, "{}", message);
            return finish(
                ResponseDescriptor::error(503, message.clone()),
                Completion::Fallback(FallbackReason::Unavailable(message)),
            );
        }
        tracing::debug!(task_id, handle = handle.id(), handler = script.name(), "task started");

        let received = match self.config.request_timeout() {
            Some(limit) => match tokio::time::timeout(limit, &mut response_rx).await {
                Ok(received) => received.ok(),
                Err(_) => {
                    // Forced release: every later op sees InvalidHandle, except
                    // send_response, which sees ProtocolViolation.
                    watch.revoke();
                    self.registry.release(handle);
                    match response_rx.try_recv() {
                        Ok(response) => Some(response),
                        Err(_) => {
                            tracing::warn!(
                                task_id,
                                handler = script.name(),
                                timeout_ms = self.config.request_timeout_ms,
                                "handler timed out; handle released"
                            );
                            return finish(
                                ResponseDescriptor::error(
                                    504,
                                    format!(
                                        "handler did not respond within {} ms",
                                        self.config.request_timeout_ms
                                    ),
                                ),
                                Completion::Fallback(FallbackReason::TimedOut),
                            );
                        }
                    }
                }
            },
            None => response_rx.await.ok(),
        };

        if let Some(response) = received {
            tracing::debug!(task_id, status = response.status, "task responded");
            return finish(response, Completion::Emitted);
        }

        let reason = match report_rx.await {
            Ok(TaskReport::Completed) => FallbackReason::NoResponse,
            Ok(TaskReport::Failed(err)) => FallbackReason::ScriptFailed(err),
            Err(_) => FallbackReason::ScriptFailed("task thread exited unexpectedly".to_string()),
        };
        let message = match &reason {
            FallbackReason::ScriptFailed(err) => err.clone(),
            _ => "handler completed without sending a response".to_string(),
        };
        tracing::warn!(task_id, handler = script.name(), "fallback response: {}", message);
        finish(
            ResponseDescriptor::error(500, message),
            Completion::Fallback(reason),
        )
    }
}
