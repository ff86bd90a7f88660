//! Subcommand implementations for the `vex` operator CLI.

pub mod approve;
pub mod export;
pub mod info;
pub mod reject;
pub mod verify;
