//! Common types, traits, configuration and error definitions for kino_replanner
//!
//! This module provides the foundational building blocks shared by the
//! mapping, search and replanning components.

pub mod types;
pub mod traits;
pub mod error;
pub mod config;

pub use types::*;
pub use traits::*;
pub use error::*;
pub use config::*;
