pub mod app_server;
pub mod error;
pub mod handlers;
pub mod models;

pub use app_server::AppServer;
pub use error::ApiError;
