//! # civtrack Common Library
//!
//! Shared code for the civtrack synchronization services:
//! - Error type used across crates
//! - Configuration loading (root folder, TOML file, environment overrides)
//! - Logging initialisation
//! - Sync event types and the broadcast EventBus

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
