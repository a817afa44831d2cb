//! `stockflow-core`: shared primitives for the inventory pipeline.
//!
//! This crate contains **pure** building blocks (no IO, no broker concerns).

pub mod error;
pub mod id;
pub mod name;
pub mod revision;

pub use error::DomainError;
pub use id::MessageId;
pub use name::{ProductName, WarehouseId};
pub use revision::ExpectedRevision;
