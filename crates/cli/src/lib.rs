//! Process wiring shared by the stockflow binaries.

pub mod args;
pub mod connect;
pub mod generator;
pub mod runtime;
