//! Common utilities and types shared across tabletmaster

pub mod config;
pub mod error;
pub mod tracing_middleware;
pub mod utils;

pub use config::{Config, MasterConfig, TServerConfig};
pub use error::{Error, Result};
pub use utils::{generate_permanent_uuid, parse_duration, timestamp_now_millis};
