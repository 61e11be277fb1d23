//! shmlink Common Library
//!
//! This crate provides shared constants and configuration loading utilities
//! for all shmlink workspace crates.
//!
//! # Module Structure
//!
//! - [`consts`] - Segment key, permission, timeout and motion limits
//! - [`config`] - Configuration loading traits and types
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use shmlink_common::consts::*;
//! use shmlink_common::config::{ConfigLoader, SharedConfig};
//! ```

pub mod config;
pub mod consts;
pub mod prelude;
