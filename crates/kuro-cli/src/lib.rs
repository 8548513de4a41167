//! Kuro CLI - command-line trigger surface for the kuro indexer.

pub mod config;

pub use config::{Command, Config};
