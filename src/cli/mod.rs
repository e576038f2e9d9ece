//! Command-line interface for wikicounts.

mod commands;
pub mod icons;
mod menu;
pub mod progress;

pub use commands::{run, Cli};
