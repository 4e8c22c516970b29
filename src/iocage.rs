//! iocage command-line protocol
//!
//! This module provides:
//! - Process invocation behind the `Runner` trait
//! - Parsers for listings, property dumps and update output
//! - Word splitting for caller-supplied argument strings

pub mod listing;
pub mod properties;
pub mod runner;
pub mod update;
pub mod words;

// Re-exports
pub use properties::PropertyStore;
pub use runner::{CommandOutput, Runner, SystemRunner};
pub use update::{UpdateOutcome, parse_update_output};
pub use words::split_words;
