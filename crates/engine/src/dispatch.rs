//! Host Op Dispatcher
//!
//! Every primitive a handler script can reach goes through here. Calls are
//! parsed into a fixed per-op schema (`OpCall`) before anything runs, and
//! results cross back as an `OpValue` or, at the generic boundary, as a
//! tagged `OpOutcome`.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::database::{Database, Row};
use crate::envelope::{RequestContext, ResponseDescriptor};
use crate::error::{BridgeError, BridgeResult, ErrorKind};
use crate::registry::{Handle, HandleRegistry};
use crate::response::Responder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpName {
    Log,
    SendResponse,
    Delay,
    ReqMethod,
    ReqPath,
    ReqHeaders,
    ReqBody,
    ReqGetHeader,
    ReqClose,
    SqlExecute,
    SqlQuery,
}

impl OpName {
    pub const ALL: [OpName; 11] = [
        OpName::Log,
        OpName::SendResponse,
        OpName::Delay,
        OpName::ReqMethod,
        OpName::ReqPath,
        OpName::ReqHeaders,
        OpName::ReqBody,
        OpName::ReqGetHeader,
        OpName::ReqClose,
        OpName::SqlExecute,
        OpName::SqlQuery,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OpName::Log => "log",
            OpName::SendResponse => "send_response",
            OpName::Delay => "delay",
            OpName::ReqMethod => "req_method",
            OpName::ReqPath => "req_path",
            OpName::ReqHeaders => "req_headers",
            OpName::ReqBody => "req_body",
            OpName::ReqGetHeader => "req_get_header",
            OpName::ReqClose => "req_close",
            OpName::SqlExecute => "sql_execute",
            OpName::SqlQuery => "sql_query",
        }
    }

    /// Resolve a wire name. The `op_` prefix used by the script-side op table
    /// is accepted too.
    pub fn parse(name: &str) -> BridgeResult<Self> {
        let bare = name.strip_prefix("op_").unwrap_or(name);
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == bare)
            .ok_or_else(|| BridgeError::NotFound(name.to_string()))
    }
}

impl fmt::Display for OpName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpName {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A validated op call: one variant per op, arguments already shaped.
#[derive(Debug, Clone, PartialEq)]
pub enum OpCall {
    Log { message: String },
    SendResponse(ResponseDescriptor),
    Delay { millis: u64 },
    ReqMethod(Handle),
    ReqPath(Handle),
    ReqHeaders(Handle),
    ReqBody(Handle),
    ReqGetHeader { handle: Handle, name: String },
    ReqClose(Handle),
    SqlExecute { sql: String },
    SqlQuery { sql: String },
}

impl OpCall {
    /// Build a call from its wire parts. Handle-scoped ops take the handle
    /// from `handle`, or from the first positional argument when absent.
    pub fn parse(name: &str, args: Vec<Value>, handle: Option<Handle>) -> BridgeResult<Self> {
        let op = OpName::parse(name)?;
        let mut args = Args::new(op, args);

        let call = match op {
            OpName::Log => OpCall::Log {
                message: args.string()?,
            },
            OpName::SendResponse => OpCall::SendResponse(args.response()?),
            OpName::Delay => OpCall::Delay {
                millis: args.millis()?,
            },
            OpName::ReqMethod => OpCall::ReqMethod(args.handle(handle)?),
            OpName::ReqPath => OpCall::ReqPath(args.handle(handle)?),
            OpName::ReqHeaders => OpCall::ReqHeaders(args.handle(handle)?),
            OpName::ReqBody => OpCall::ReqBody(args.handle(handle)?),
            OpName::ReqGetHeader => OpCall::ReqGetHeader {
                handle: args.handle(handle)?,
                name: args.string()?,
            },
            OpName::ReqClose => OpCall::ReqClose(args.handle(handle)?),
            OpName::SqlExecute => OpCall::SqlExecute { sql: args.string()? },
            OpName::SqlQuery => OpCall::SqlQuery { sql: args.string()? },
        };
        args.finish()?;
        Ok(call)
    }

    pub fn name(&self) -> OpName {
        match self {
            OpCall::Log { .. } => OpName::Log,
            OpCall::SendResponse(_) => OpName::SendResponse,
            OpCall::Delay { .. } => OpName::Delay,
            OpCall::ReqMethod(_) => OpName::ReqMethod,
            OpCall::ReqPath(_) => OpName::ReqPath,
            OpCall::ReqHeaders(_) => OpName::ReqHeaders,
            OpCall::ReqBody(_) => OpName::ReqBody,
            OpCall::ReqGetHeader { .. } => OpName::ReqGetHeader,
            OpCall::ReqClose(_) => OpName::ReqClose,
            OpCall::SqlExecute { .. } => OpName::SqlExecute,
            OpCall::SqlQuery { .. } => OpName::SqlQuery,
        }
    }
}

/// Positional argument cursor with shape checks. No coercion: a number is
/// never accepted where a string is expected, and vice versa.
struct Args {
    op: OpName,
    values: std::vec::IntoIter<Value>,
    position: usize,
}

impl Args {
    fn new(op: OpName, values: Vec<Value>) -> Self {
        Self {
            op,
            values: values.into_iter(),
            position: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> BridgeError {
        BridgeError::invalid_argument(self.op.as_str(), message)
    }

    fn next(&mut self, expected: &str) -> BridgeResult<Value> {
        let position = self.position;
        self.position += 1;
        self.values
            .next()
            .ok_or_else(|| self.error(format!("missing argument {position} ({expected})")))
    }

    fn string(&mut self) -> BridgeResult<String> {
        match self.next("string")? {
            Value::String(s) => Ok(s),
            other => Err(self.error(format!(
                "argument {} must be a string, got {}",
                self.position - 1,
                type_name(&other)
            ))),
        }
    }

    fn millis(&mut self) -> BridgeResult<u64> {
        let value = self.next("milliseconds")?;
        value
            .as_u64()
            .ok_or_else(|| self.error("milliseconds must be a non-negative integer"))
    }

    fn handle(&mut self, explicit: Option<Handle>) -> BridgeResult<Handle> {
        if let Some(handle) = explicit {
            return Ok(handle);
        }
        let value = self.next("handle")?;
        value
            .as_u64()
            .and_then(|id| u32::try_from(id).ok())
            .map(Handle::from_raw)
            .ok_or_else(|| self.error("handle must be an unsigned 32-bit integer"))
    }

    /// Either one `{ status, headers?, body? }` object or the positional
    /// `(status, headers, body)` triple.
    fn response(&mut self) -> BridgeResult<ResponseDescriptor> {
        let first = self.next("response")?;
        let descriptor = if first.is_object() {
            first
        } else {
            let headers = self.next("headers")?;
            let body = self.next("body")?;
            let mut object = Map::new();
            object.insert("status".to_string(), first);
            object.insert("headers".to_string(), headers);
            object.insert("body".to_string(), body);
            Value::Object(object)
        };
        ResponseDescriptor::from_script(descriptor)
    }

    fn finish(mut self) -> BridgeResult<()> {
        let extra = self.values.by_ref().count();
        if extra > 0 {
            return Err(self.error(format!("{extra} unexpected extra argument(s)")));
        }
        Ok(())
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Result of a single dispatched op.
#[derive(Debug, Clone, PartialEq)]
pub enum OpValue {
    Unit,
    Text(String),
    MaybeText(Option<String>),
    Headers(HashMap<String, String>),
    Count(u64),
    Rows(Vec<Row>),
}

impl OpValue {
    pub fn into_json(self) -> Value {
        match self {
            OpValue::Unit => Value::Null,
            OpValue::Text(text) => Value::String(text),
            OpValue::MaybeText(text) => text.map(Value::String).unwrap_or(Value::Null),
            OpValue::Headers(headers) => Value::Object(
                headers
                    .into_iter()
                    .map(|(name, value)| (name, Value::String(value)))
                    .collect(),
            ),
            OpValue::Count(count) => Value::from(count),
            OpValue::Rows(rows) => {
                Value::Array(rows.into_iter().map(|row| Value::Object(row.into_inner())).collect())
            }
        }
    }
}

/// Tagged result of the generic dispatch entry point.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum OpOutcome {
    Success { value: Value },
    Failure { kind: ErrorKind, message: String },
}

impl From<BridgeResult<OpValue>> for OpOutcome {
    fn from(result: BridgeResult<OpValue>) -> Self {
        match result {
            Ok(value) => OpOutcome::Success {
                value: value.into_json(),
            },
            Err(err) => OpOutcome::Failure {
                kind: err.kind(),
                message: err.to_string(),
            },
        }
    }
}

/// Per-task state the ops need: who is calling, which handle the task was
/// given, and where its single response goes.
///
/// A task may only reach its own handle. Once the host revokes the task,
/// every op it issues fails with `InvalidHandle`.
#[derive(Clone)]
pub struct TaskContext {
    task_id: u64,
    handle: Handle,
    responder: Arc<Responder>,
    revoked: Arc<AtomicBool>,
}

impl TaskContext {
    pub fn new(task_id: u64, handle: Handle, responder: Arc<Responder>) -> Self {
        Self {
            task_id,
            handle,
            responder,
            revoked: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn task_id(&self) -> u64 {
        self.task_id
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn responder(&self) -> &Arc<Responder> {
        &self.responder
    }

    /// Host-side cut-off for a task that outlived its deadline. Closes the
    /// responder too. Returns `true` if the task was not revoked before.
    pub fn revoke(&self) -> bool {
        let first = !self.revoked.swap(true, Ordering::AcqRel);
        self.responder.close();
        first
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::Acquire)
    }

    fn ensure_active(&self) -> BridgeResult<()> {
        if self.is_revoked() {
            return Err(BridgeError::InvalidHandle(self.handle));
        }
        Ok(())
    }

    /// Handles other than the task's own are reported exactly like released
    /// ones.
    fn ensure_owns(&self, handle: Handle) -> BridgeResult<()> {
        self.ensure_active()?;
        if handle != self.handle {
            return Err(BridgeError::InvalidHandle(handle));
        }
        Ok(())
    }
}

pub struct Dispatcher {
    registry: Arc<HandleRegistry>,
    database: Arc<dyn Database>,
}

impl Dispatcher {
    pub fn new(registry: Arc<HandleRegistry>, database: Arc<dyn Database>) -> Self {
        Self { registry, database }
    }

    pub fn registry(&self) -> &Arc<HandleRegistry> {
        &self.registry
    }

    pub fn log(&self, task: &TaskContext, message: &str) -> BridgeResult<()> {
        task.ensure_active()?;
        tracing::info!(target: "bridge::script", task_id = task.task_id, "{}", message);
        Ok(())
    }

    /// Terminal: hands the response to the host and releases the task's
    /// handle. A second call fails with `ProtocolViolation`, as does a call
    /// after the host closed the responder.
    pub fn send_response(&self, task: &TaskContext, response: ResponseDescriptor) -> BridgeResult<()> {
        response.validate()?;
        // Released first so the host never sees a response while the handle
        // is still live. Any rejection below means it was released already.
        self.registry.release(task.handle);
        task.responder.emit(response)?;
        tracing::debug!(task_id = task.task_id, "response emitted");
        Ok(())
    }

    /// Checked on issue and again on resumption, so a delay that spans a
    /// revocation fails.
    pub async fn delay(&self, task: &TaskContext, millis: u64) -> BridgeResult<()> {
        task.ensure_active()?;
        tokio::time::sleep(Duration::from_millis(millis)).await;
        task.ensure_active()
    }

    fn context(&self, task: &TaskContext, handle: Handle) -> BridgeResult<Arc<RequestContext>> {
        task.ensure_owns(handle)?;
        self.registry.lookup(handle)
    }

    pub fn req_method(&self, task: &TaskContext, handle: Handle) -> BridgeResult<String> {
        Ok(self.context(task, handle)?.method().to_string())
    }

    pub fn req_path(&self, task: &TaskContext, handle: Handle) -> BridgeResult<String> {
        Ok(self.context(task, handle)?.path().to_string())
    }

    pub fn req_headers(
        &self,
        task: &TaskContext,
        handle: Handle,
    ) -> BridgeResult<HashMap<String, String>> {
        Ok(self.context(task, handle)?.headers().clone())
    }

    pub fn req_body(&self, task: &TaskContext, handle: Handle) -> BridgeResult<String> {
        Ok(self.context(task, handle)?.body().to_string())
    }

    pub fn req_get_header(
        &self,
        task: &TaskContext,
        handle: Handle,
        name: &str,
    ) -> BridgeResult<Option<String>> {
        Ok(self.context(task, handle)?.header(name).map(str::to_string))
    }

    /// Closing the task's own, already-released handle is a no-op.
    pub fn req_close(&self, task: &TaskContext, handle: Handle) -> BridgeResult<()> {
        task.ensure_owns(handle)?;
        self.registry.release(handle);
        Ok(())
    }

    pub async fn sql_execute(&self, task: &TaskContext, sql: String) -> BridgeResult<u64> {
        task.ensure_active()?;
        let database = Arc::clone(&self.database);
        tokio::task::spawn_blocking(move || database.execute(&sql))
            .await
            .map_err(|err| BridgeError::OperationFailed(format!("database task failed: {err}")))?
    }

    pub async fn sql_query(&self, task: &TaskContext, sql: String) -> BridgeResult<Vec<Row>> {
        task.ensure_active()?;
        let database = Arc::clone(&self.database);
        tokio::task::spawn_blocking(move || database.query(&sql))
            .await
            .map_err(|err| BridgeError::OperationFailed(format!("database task failed: {err}")))?
    }

    pub async fn dispatch(&self, task: &TaskContext, call: OpCall) -> BridgeResult<OpValue> {
        match call {
            OpCall::Log { message } => self.log(task, &message).map(|()| OpValue::Unit),
            OpCall::SendResponse(response) => {
                self.send_response(task, response).map(|()| OpValue::Unit)
            }
            OpCall::Delay { millis } => self.delay(task, millis).await.map(|()| OpValue::Unit),
            OpCall::ReqMethod(handle) => self.req_method(task, handle).map(OpValue::Text),
            OpCall::ReqPath(handle) => self.req_path(task, handle).map(OpValue::Text),
            OpCall::ReqHeaders(handle) => self.req_headers(task, handle).map(OpValue::Headers),
            OpCall::ReqBody(handle) => self.req_body(task, handle).map(OpValue::Text),
            OpCall::ReqGetHeader { handle, name } => self
                .req_get_header(task, handle, &name)
                .map(OpValue::MaybeText),
            OpCall::ReqClose(handle) => self.req_close(task, handle).map(|()| OpValue::Unit),
            OpCall::SqlExecute { sql } => self.sql_execute(task, sql).await.map(OpValue::Count),
            OpCall::SqlQuery { sql } => self.sql_query(task, sql).await.map(OpValue::Rows),
        }
    }

    /// Generic entry point: parse and run, folding every failure into the
    /// tagged outcome.
    pub async fn dispatch_raw(
        &self,
        task: &TaskContext,
        name: &str,
        args: Vec<Value>,
        handle: Option<Handle>,
    ) -> OpOutcome {
        let result = match OpCall::parse(name, args, handle) {
            Ok(call) => self.dispatch(task, call).await,
            Err(err) => Err(err),
        };
        if let Err(err) = &result {
            tracing::debug!(task_id = task.task_id, op = name, kind = %err.kind(), "op failed");
        }
        OpOutcome::from(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SqliteDatabase;
    use crate::envelope::RequestContext;
    use serde_json::json;
    use tokio::sync::oneshot;

    struct Fixture {
        dispatcher: Dispatcher,
        database: Arc<SqliteDatabase>,
        task: TaskContext,
        rx: oneshot::Receiver<ResponseDescriptor>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(HandleRegistry::new());
        let database = Arc::new(SqliteDatabase::open_in_memory().unwrap());
        let handle = registry.allocate(RequestContext::new(
            "POST",
            "/calc",
            [("X-Test", "yes")],
            r#"{"a":2}"#,
        ));
        let (responder, rx) = Responder::channel();
        Fixture {
            dispatcher: Dispatcher::new(registry, Arc::clone(&database) as Arc<dyn Database>),
            database,
            task: TaskContext::new(1, handle, Arc::new(responder)),
            rx,
        }
    }

    #[test]
    fn op_names_resolve_with_or_without_prefix() {
        assert_eq!(OpName::parse("req_get_header").unwrap(), OpName::ReqGetHeader);
        assert_eq!("op_sql_query".parse::<OpName>().unwrap(), OpName::SqlQuery);
        assert_eq!(
            OpName::parse("op_exec_shell").unwrap_err(),
            BridgeError::NotFound("op_exec_shell".to_string())
        );
    }

    #[test]
    fn shape_validation_rejects_without_coercion() {
        let err = OpCall::parse("sql_query", vec![json!(42)], None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = OpCall::parse("delay", vec![json!(-5)], None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = OpCall::parse("log", vec![json!("a"), json!("b")], None).unwrap_err();
        assert!(err.to_string().contains("extra"));

        let err = OpCall::parse("req_method", vec![], None).unwrap_err();
        assert!(err.to_string().contains("handle"));
    }

    #[test]
    fn send_response_accepts_object_or_positional_form() {
        let object = OpCall::parse(
            "send_response",
            vec![json!({ "status": 201, "body": "made" })],
            None,
        )
        .unwrap();
        let positional = OpCall::parse(
            "send_response",
            vec![json!(201), json!({}), json!("made")],
            None,
        )
        .unwrap();
        assert_eq!(object, positional);

        let err = OpCall::parse("send_response", vec![json!({ "status": 700 })], None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn accessors_read_the_bound_context() {
        let f = fixture();
        let h = f.task.handle();
        let t = &f.task;
        assert_eq!(f.dispatcher.req_method(t, h).unwrap(), "POST");
        assert_eq!(f.dispatcher.req_path(t, h).unwrap(), "/calc");
        assert_eq!(f.dispatcher.req_body(t, h).unwrap(), r#"{"a":2}"#);
        assert_eq!(
            f.dispatcher.req_get_header(t, h, "x-test").unwrap().as_deref(),
            Some("yes")
        );
        assert_eq!(f.dispatcher.req_get_header(t, h, "non-existent").unwrap(), None);

        let outcome = f
            .dispatcher
            .dispatch_raw(&f.task, "req_headers", vec![], Some(h))
            .await;
        assert_eq!(
            serde_json::to_value(outcome).unwrap(),
            json!({ "status": "success", "value": { "x-test": "yes" } })
        );
    }

    #[tokio::test]
    async fn every_handle_op_fails_after_release() {
        let f = fixture();
        let h = f.task.handle();
        f.dispatcher.req_close(&f.task, h).unwrap();
        f.dispatcher.req_close(&f.task, h).unwrap();

        for op in ["req_method", "req_path", "req_headers", "req_body"] {
            let outcome = f.dispatcher.dispatch_raw(&f.task, op, vec![], Some(h)).await;
            assert_eq!(
                outcome,
                OpOutcome::Failure {
                    kind: ErrorKind::InvalidHandle,
                    message: format!("resource handle {h} is not live"),
                }
            );
        }
        let err = f.dispatcher.req_get_header(&f.task, h, "x-test").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidHandle);
    }

    #[tokio::test]
    async fn second_emission_is_a_protocol_violation() {
        let mut f = fixture();
        f.dispatcher
            .send_response(&f.task, ResponseDescriptor::new(200, "ok"))
            .unwrap();
        assert!(!f.dispatcher.registry().is_live(f.task.handle()));

        let err = f
            .dispatcher
            .send_response(&f.task, ResponseDescriptor::new(200, "again"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
        assert_eq!(f.rx.try_recv().unwrap().body, "ok");
    }

    #[tokio::test]
    async fn unknown_op_is_a_tagged_not_found() {
        let f = fixture();
        let outcome = f.dispatcher.dispatch_raw(&f.task, "fork_bomb", vec![], None).await;
        assert_eq!(
            serde_json::to_value(outcome).unwrap(),
            json!({ "status": "failure", "kind": "NotFound", "message": "unknown op: fork_bomb" })
        );
    }

    #[tokio::test]
    async fn database_ops_round_trip_through_dispatch() {
        let f = fixture();
        let run = |sql: &str| OpCall::SqlExecute { sql: sql.to_string() };
        f.dispatcher
            .dispatch(&f.task, run("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)"))
            .await
            .unwrap();
        let inserted = f
            .dispatcher
            .dispatch(&f.task, run("INSERT INTO t (name) VALUES ('a'), ('b')"))
            .await
            .unwrap();
        assert_eq!(inserted, OpValue::Count(2));

        let rows = f
            .dispatcher
            .dispatch(
                &f.task,
                OpCall::SqlQuery {
                    sql: "SELECT name FROM t ORDER BY id".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(rows.into_json(), json!([{ "name": "a" }, { "name": "b" }]));

        let err = f
            .dispatcher
            .sql_execute(&f.task, "NOT SQL".to_string())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OperationFailed);
        assert!(err.to_string().contains("syntax error"));
    }

    #[tokio::test]
    async fn delay_waits_at_least_the_requested_time() {
        let f = fixture();
        let started = std::time::Instant::now();
        f.dispatcher.dispatch(&f.task, OpCall::Delay { millis: 50 }).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn revoked_task_is_cut_off_from_every_op() {
        let f = fixture();
        assert!(f.task.revoke());
        assert!(!f.task.revoke());
        f.dispatcher.registry().release(f.task.handle());

        let calls = [
            OpCall::Log {
                message: "late".to_string(),
            },
            OpCall::Delay { millis: 1 },
            OpCall::SqlExecute {
                sql: "CREATE TABLE late (x)".to_string(),
            },
            OpCall::SqlQuery {
                sql: "SELECT 1".to_string(),
            },
            OpCall::ReqMethod(f.task.handle()),
            OpCall::ReqClose(f.task.handle()),
        ];
        for call in calls {
            let name = call.name();
            let err = f.dispatcher.dispatch(&f.task, call).await.unwrap_err();
            assert_eq!(err, BridgeError::InvalidHandle(f.task.handle()), "{name}");
        }

        let err = f
            .dispatcher
            .send_response(&f.task, ResponseDescriptor::new(200, "late"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);

        let tables = f.database.query("SELECT name FROM sqlite_master").unwrap();
        assert!(tables.is_empty());
    }

    #[tokio::test]
    async fn delay_spanning_a_revocation_fails_on_resume() {
        let f = fixture();
        let task = f.task.clone();
        let revoker = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            task.revoke();
        };
        let (result, ()) = tokio::join!(f.dispatcher.delay(&f.task, 100), revoker);
        assert_eq!(result, Err(BridgeError::InvalidHandle(f.task.handle())));
    }

    #[tokio::test]
    async fn tasks_cannot_reach_each_others_handles() {
        let registry = Arc::new(HandleRegistry::new());
        let database = Arc::new(SqliteDatabase::open_in_memory().unwrap());
        let dispatcher = Dispatcher::new(Arc::clone(&registry), database);
        let empty = Vec::<(String, String)>::new;
        let a = TaskContext::new(
            1,
            registry.allocate(RequestContext::new("GET", "/a", empty(), "secret-a")),
            Arc::new(Responder::channel().0),
        );
        let b = TaskContext::new(
            2,
            registry.allocate(RequestContext::new("GET", "/b", empty(), "secret-b")),
            Arc::new(Responder::channel().0),
        );

        let err = dispatcher.req_body(&a, b.handle()).unwrap_err();
        assert_eq!(err, BridgeError::InvalidHandle(b.handle()));
        let outcome = dispatcher
            .dispatch_raw(&a, "req_headers", vec![json!(b.handle().id())], None)
            .await;
        assert!(matches!(
            outcome,
            OpOutcome::Failure {
                kind: ErrorKind::InvalidHandle,
                ..
            }
        ));

        let err = dispatcher.req_close(&a, b.handle()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidHandle);
        assert!(registry.is_live(b.handle()));
        assert_eq!(dispatcher.req_body(&b, b.handle()).unwrap(), "secret-b");
    }
}
