//! bridge_runtime Module
//!
//! The op table handler scripts run against, plus the script-side façades
//! built on it:
//! - `request`: handle-bound accessors, rebuilt on every read
//! - `db`: `execute` / `query`
//! - `console`, `delay`, `sendResponse`, `serve`
//! - `bridge.dispatch`: generic entry point returning tagged outcomes

mod db;
mod dispatch;
mod error;
mod request;
mod response;
mod utility;

pub use error::to_js_error;

deno_core::extension!(
    bridge_runtime,
    ops = [
        utility::op_log,
        utility::op_delay,
        response::op_send_response,
        request::op_req_method,
        request::op_req_path,
        request::op_req_headers,
        request::op_req_body,
        request::op_req_get_header,
        request::op_req_close,
        db::op_sql_execute,
        db::op_sql_query,
        dispatch::op_dispatch,
    ],
    esm_entry_point = "ext:bridge_runtime/bridge.js",
    esm = [ dir "src/modules/bridge", "bridge.js" ],
);

pub fn init() -> deno_core::Extension {
    bridge_runtime::init()
}
