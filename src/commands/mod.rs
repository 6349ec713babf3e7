//! CLI commands

pub mod exec;
