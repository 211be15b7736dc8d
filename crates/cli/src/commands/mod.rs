//! Subcommand implementations

pub mod config;
pub mod doctor;
pub mod extract;
pub mod run;
