pub mod backend;
pub mod cache;
pub mod classify;
pub mod config;
pub mod driver;
pub mod dsn;
pub mod error;
pub mod frame;
pub mod http;
pub mod instance;
pub mod metrics;
pub mod query;
pub mod secrets;
pub mod telemetry;

pub use backend::{CheckHealthHandler, QueryDataHandler, SnowflakeBackend};
pub use error::QueryError;
pub use frame::Frame;
pub use instance::{Instance, InstanceManager};
