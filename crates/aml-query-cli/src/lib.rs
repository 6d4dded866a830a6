//! Library side of the `amlq` binary: argument parsing, configuration
//! loading and command handlers.

pub mod cli;
pub mod commands;
pub mod config;
