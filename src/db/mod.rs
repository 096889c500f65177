//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Product → connection resolution
//! - Entity mapping metadata
//! - Per-backend connections and parameter binding
//! - Scoped execution with timeouts and cancellation
//! - Row decoding into database-agnostic values

pub mod connection;
pub mod executor;
#[macro_use]
pub mod macros;
pub mod params;
pub mod registry;
pub mod resolver;
pub mod types;

pub use connection::DbConnection;
pub use executor::{
    CallContext, CancelHandle, ExecutorSettings, ExecutorStats, ScopedConnection, ScopedExecutor,
};
pub use registry::{MappingRegistry, MetadataProvider};
pub use resolver::{ConnectionResolver, StaticResolver};
pub use types::{DecodeRow, Row};
