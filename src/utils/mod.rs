//! Shared utility functions.
//!
//! - `format`: Human-readable formatting (sizes, counts)
//! - `redact`: Scrubbing secrets from text before it is logged

mod format;
pub mod redact;

pub use format::{format_count, format_size};
