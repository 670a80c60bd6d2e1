//! SmartMark Interface
//!
//! Command line front end over `smartmark-core`:
//! - cli: argument parsing and command execution
//! - document_io: loading and saving file-backed documents

pub mod cli;
mod document_io;

#[cfg(test)]
mod cli_tests;

pub use cli::{CliConfig, CliError, OutputFormat, run_cli};
