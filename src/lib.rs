// Portfolio Gateway - Library root

pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;

pub use error::{GatewayError, Result};
pub use gateway::{ApiClient, GatewayOptions};
