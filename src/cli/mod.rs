//! CLI module for ghdash - command-line interface and subcommands.

pub mod commands;

pub use commands::Cli;
