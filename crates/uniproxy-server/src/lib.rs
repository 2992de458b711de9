pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod server;
pub mod upstream;
pub mod validation;

pub use config::{AppConfig, Environment, RedisConfig, ServerConfig};
pub use error::ApiError;
pub use observability::{init_metrics, init_tracing, render_metrics};
pub use server::{AppState, ServerBuilder, UniproxyServer, build_app, build_router};
