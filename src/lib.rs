//! Multi-database repository library.
//!
//! Generic CRUD, upsert and raw-command access to SQL databases
//! (SQLite, PostgreSQL, MySQL) where the physical database is chosen per
//! call from a product discriminator. Each operation opens one scoped
//! connection, runs, and releases it.

pub mod config;
pub mod db;
pub mod error;
pub mod materialize;
pub mod models;
pub mod repository;
pub mod sql;

pub use config::Config;
pub use db::{
    CallContext, CancelHandle, ConnectionResolver, ExecutorSettings, ExecutorStats,
    MappingRegistry, MetadataProvider, Row, ScopedExecutor, StaticResolver,
};
pub use error::{DbError, DbResult, ErrorKind};
pub use materialize::{ResultSets, RowSegments};
pub use models::{
    CommandKind, CommandSpec, ConnectionTarget, DatabaseType, Entity, EntityDescriptor, Product,
    QueryParam, ResultShape, ShapeSlot, SlotKind,
};
pub use repository::{Repository, Upserted};
pub use sql::Filter;
