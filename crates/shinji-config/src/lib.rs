//! # Shinji Config
//!
//! Layered configuration for Shinji: TOML files, a `.env` file and
//! `SHINJI_`-prefixed environment variables, validated on every load.

mod app_config;
mod loader;
mod validation;

pub use app_config::*;
pub use loader::*;
pub use validation::*;
