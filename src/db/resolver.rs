//! Product → connection target resolution.

use crate::error::{DbError, DbResult};
use crate::models::{ConnectionTarget, Product};
use std::collections::HashMap;

/// Maps a product discriminator to the database it lives in.
///
/// Resolution is a pure lookup; implementations must not open connections.
pub trait ConnectionResolver: Send + Sync {
    fn resolve(&self, product: &Product) -> DbResult<ConnectionTarget>;
}

/// Immutable product map built once at startup.
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    targets: HashMap<Product, ConnectionTarget>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a target. A product may only be registered once.
    pub fn with_target(mut self, target: ConnectionTarget) -> DbResult<Self> {
        self.insert(target)?;
        Ok(self)
    }

    pub fn insert(&mut self, target: ConnectionTarget) -> DbResult<()> {
        if self.targets.contains_key(&target.product) {
            return Err(DbError::configuration(
                target.product.as_str(),
                "Product is configured more than once",
            ));
        }
        self.targets.insert(target.product.clone(), target);
        Ok(())
    }

    /// Register `product` at `connection_string`, inferring the backend.
    pub fn with_url(self, product: impl Into<Product>, connection_string: &str) -> DbResult<Self> {
        let product = product.into();
        let target = ConnectionTarget::new(product.clone(), connection_string).ok_or_else(|| {
            DbError::configuration(
                product.as_str(),
                "Unsupported connection string scheme (expected postgres://, mysql:// or sqlite:)",
            )
        })?;
        self.with_target(target)
    }

    pub fn products(&self) -> impl Iterator<Item = &Product> {
        self.targets.keys()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl ConnectionResolver for StaticResolver {
    fn resolve(&self, product: &Product) -> DbResult<ConnectionTarget> {
        self.targets.get(product).cloned().ok_or_else(|| {
            DbError::configuration(product.as_str(), "No connection configured for product")
        })
    }
}
