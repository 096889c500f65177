//! Data models for the repository.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod entity;
pub mod query;
pub mod shape;

// Re-export commonly used types
pub use connection::{ConnectionTarget, DatabaseType, Product};
pub use entity::{
    ColumnDescriptor, ColumnRole, Entity, EntityDescriptor, EntityDescriptorBuilder, EntityType,
    Stamp,
};
pub use query::{
    CommandKind, CommandSpec, DEFAULT_COMMAND_TIMEOUT_SECS, DEFAULT_CONNECT_TIMEOUT_SECS,
    ExecOutcome, QueryParam, ValueKind,
};
pub use shape::{ResultShape, ShapeSlot, SlotKind};
