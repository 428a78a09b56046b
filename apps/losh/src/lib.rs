//! # losh
//!
//! Library half of the catalog command-line tool: CLI definitions, command
//! implementations and configuration. The binary in `main.rs` wires them to
//! logging and the process exit code.

pub mod cli;
pub mod config;
