//! Dynamic SQL synthesis.
//!
//! - Dialect-specific quoting, placeholders and procedure calls
//! - `@name` parameter compilation
//! - Equality filters
//! - Mapped CRUD statements built from entity descriptors

pub mod builder;
pub mod dialect;
pub mod filter;
pub mod params;

pub use builder::SqlBuilder;
pub use dialect::{CallStyle, Dialect};
pub use filter::Filter;
pub use params::{CompiledCommand, compile, compile_named};
