//! kg-features command line
//!
//! Argument parsing and command execution for the `kg-features` binary.

pub mod args;
pub mod commands;

pub use args::{Cli, Command, EmbeddingKind};
pub use commands::run;
