#![forbid(unsafe_code)]

pub mod config;
pub mod errors;
pub mod net;
pub mod notify;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
