pub mod config;
pub mod database;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod registry;
pub mod response;

pub use config::{BridgeConfig, ConfigError, DatabaseSettings, ExecutorSettings};
pub use database::{Database, DatabaseOptions, Row, SqliteDatabase};
pub use dispatch::{Dispatcher, OpCall, OpName, OpOutcome, OpValue, TaskContext};
pub use envelope::{RequestContext, RequestEnvelope, ResponseDescriptor};
pub use error::{BridgeError, BridgeResult, ErrorKind};
pub use registry::{Handle, HandleRegistry};
pub use response::Responder;
