use deno_error::JsErrorBox;
use engine::BridgeError;

/// The JS error class is the error kind name; `bridge.js` registers a class
/// for each one.
pub fn to_js_error(err: BridgeError) -> JsErrorBox {
    JsErrorBox::new(err.kind().as_str(), err.to_string())
}
