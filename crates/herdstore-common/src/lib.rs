//! Herdstore Common - shared types and utilities
//!
//! This crate provides the types, error definitions, configuration
//! structures, and placement hashing used across all herdstore components.

pub mod config;
pub mod error;
pub mod hash;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::ObjectId;
