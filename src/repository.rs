//! CRUD and upsert operations over any mapped entity.
//!
//! Every public operation resolves the call's product, opens exactly one
//! connection through the [`ScopedExecutor`], and releases it before
//! returning. Operations that read back what they wrote (insert, upsert)
//! do so on that same connection.
//!
//! Failures are logged with the operation name, product and entity type,
//! then returned unchanged.

use crate::db::executor::{CallContext, ExecutorSettings, ExecutorStats, ScopedConnection, ScopedExecutor};
use crate::db::registry::MetadataProvider;
use crate::db::resolver::ConnectionResolver;
use crate::error::{DbError, DbResult};
use crate::materialize::{ResultSets, RowSegments, from_row, materialize_shape, row_to_entity, split_row};
use crate::models::entity::{apply_stamps, from_property_map, identity_value, property_map};
use crate::models::{CommandKind, CommandSpec, Entity, EntityDescriptor, EntityType, ResultShape, Stamp};
use crate::sql::{Filter, SqlBuilder};
use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use tracing::{debug, error};

/// Outcome of [`Repository::upsert`].
///
/// `Updated` carries the caller's entity as supplied (with its modification
/// stamp applied); `Inserted` carries the row read back after the insert,
/// so generated identity and defaults are populated.
#[derive(Debug, Clone, PartialEq)]
pub enum Upserted<T> {
    Updated(T),
    Inserted(T),
}

impl<T> Upserted<T> {
    pub fn into_inner(self) -> T {
        match self {
            Upserted::Updated(entity) | Upserted::Inserted(entity) => entity,
        }
    }

    pub fn entity(&self) -> &T {
        match self {
            Upserted::Updated(entity) | Upserted::Inserted(entity) => entity,
        }
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, Upserted::Inserted(_))
    }
}

/// Generic data access over the products known to a resolver.
#[derive(Clone)]
pub struct Repository {
    executor: ScopedExecutor,
    provider: Arc<dyn MetadataProvider>,
}

impl Repository {
    pub fn new(
        resolver: Arc<dyn ConnectionResolver>,
        provider: Arc<dyn MetadataProvider>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            executor: ScopedExecutor::new(resolver, settings),
            provider,
        }
    }

    pub fn executor(&self) -> &ScopedExecutor {
        &self.executor
    }

    /// Connection counters for this repository's executor.
    pub fn stats(&self) -> ExecutorStats {
        self.executor.stats()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Fetch one entity by identity value.
    pub async fn get<T: Entity>(&self, ctx: &CallContext, id: i64) -> DbResult<Option<T>> {
        let result = async {
            let desc = self.describe::<T>()?;
            desc.require_identity("get by id")?;
            self.executor
                .with_connection(ctx, move |conn| {
                    Box::pin(async move { fetch_by_key::<T>(conn, &desc, id).await })
                })
                .await
        }
        .await;
        self.report::<T, _>("get", ctx, result)
    }

    /// First entity matching `filter`, if any.
    pub async fn get_by<T: Entity>(&self, ctx: &CallContext, filter: &Filter) -> DbResult<Option<T>> {
        let result = async {
            let rows = self.select_filtered::<T>(ctx, filter).await?;
            Ok::<_, DbError>(rows.into_iter().next())
        }
        .await;
        self.report::<T, _>("get_by", ctx, result)
    }

    /// Every entity matching `filter`. An empty filter returns the whole table.
    pub async fn get_list<T: Entity>(&self, ctx: &CallContext, filter: &Filter) -> DbResult<Vec<T>> {
        let result = self.select_filtered::<T>(ctx, filter).await;
        self.report::<T, _>("get_list", ctx, result)
    }

    pub async fn get_all<T: Entity>(&self, ctx: &CallContext) -> DbResult<Vec<T>> {
        let result = self.select_filtered::<T>(ctx, &Filter::new()).await;
        self.report::<T, _>("get_all", ctx, result)
    }

    async fn select_filtered<T: Entity>(&self, ctx: &CallContext, filter: &Filter) -> DbResult<Vec<T>> {
        let desc = self.describe::<T>()?;
        let filter = filter.clone();
        self.executor
            .with_connection(ctx, move |conn| {
                Box::pin(async move {
                    let spec = SqlBuilder::new(conn.dialect()).select_filtered(&desc, &filter);
                    let rows = conn.fetch_rows(&spec).await?;
                    rows.iter()
                        .map(|row| row_to_entity(row, &desc))
                        .collect::<DbResult<Vec<T>>>()
                })
            })
            .await
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert `entity` and return the stored row.
    ///
    /// `CreatedOn` and `ModifiedOn` properties are stamped on the caller's
    /// entity before it is written. Types without an identity key cannot be
    /// read back, so the stamped entity itself is returned.
    pub async fn insert<T: Entity>(&self, ctx: &CallContext, entity: &mut T) -> DbResult<T> {
        let result = async {
            let desc = self.describe::<T>()?;
            apply_stamps(entity, &desc, &[Stamp::CreatedOn, Stamp::ModifiedOn], Utc::now())?;
            let values = property_map(entity)?;
            self.executor
                .with_connection(ctx, move |conn| {
                    Box::pin(async move { insert_and_refetch::<T>(conn, &desc, values).await })
                })
                .await
        }
        .await;
        self.report::<T, _>("insert", ctx, result)
    }

    /// Insert every entity with one statement and return the generated
    /// identity values in input order.
    ///
    /// An empty input returns an empty list without touching the database.
    /// Types without an identity key return an empty list.
    pub async fn insert_multiple<T: Entity>(&self, ctx: &CallContext, entities: &[T]) -> DbResult<Vec<i64>> {
        if entities.is_empty() {
            return Ok(Vec::new());
        }
        let result = async {
            let desc = self.describe::<T>()?;
            let now = Utc::now();
            let rows = entities
                .iter()
                .map(|e| {
                    property_map(e).map(|mut values| {
                        stamp_values(&mut values, &desc, &[Stamp::CreatedOn, Stamp::ModifiedOn], now);
                        values
                    })
                })
                .collect::<DbResult<Vec<_>>>()?;

            self.executor
                .with_connection(ctx, move |conn| {
                    Box::pin(async move {
                        let builder = SqlBuilder::new(conn.dialect());
                        let Some(spec) = builder.insert_batch(&desc, &rows)? else {
                            return Ok(Vec::new());
                        };
                        if desc.identity().is_none() {
                            conn.execute(&spec).await?;
                            return Ok::<_, DbError>(Vec::new());
                        }
                        if builder.dialect().supports_returning() {
                            let returned = conn.fetch_rows(&spec).await?;
                            let mut ids = returned
                                .iter()
                                .map(|row| {
                                    row.first_value().and_then(json_to_id).ok_or_else(|| {
                                        DbError::conversion("Generated identity is not an integer", desc.table.clone())
                                    })
                                })
                                .collect::<DbResult<Vec<i64>>>()?;
                            // RETURNING row order is unspecified; identities
                            // of one statement ascend in VALUES order.
                            ids.sort_unstable();
                            return Ok(ids);
                        }
                        // MySQL reports the first id of a multi-row insert;
                        // the rest follow consecutively.
                        let outcome = conn.execute(&spec).await?;
                        let first = outcome.last_insert_id.ok_or_else(|| {
                            DbError::internal(format!("Insert into '{}' did not report an identity", desc.table))
                        })?;
                        Ok((0..rows.len() as i64).map(|i| first + i).collect::<Vec<i64>>())
                    })
                })
                .await
        }
        .await;
        self.report::<T, _>("insert_multiple", ctx, result)
    }

    /// Update the row identified by the entity's key. Stamps `ModifiedOn`.
    /// Returns whether a row was updated.
    pub async fn update<T: Entity>(&self, ctx: &CallContext, entity: &mut T) -> DbResult<bool> {
        let result = async {
            let desc = self.describe::<T>()?;
            desc.require_identity("update")?;
            apply_stamps(entity, &desc, &[Stamp::ModifiedOn], Utc::now())?;
            let values = property_map(entity)?;
            self.executor
                .with_connection(ctx, move |conn| {
                    Box::pin(async move { Ok::<_, DbError>(update_values(conn, &desc, &values).await? > 0) })
                })
                .await
        }
        .await;
        self.report::<T, _>("update", ctx, result)
    }

    /// Apply one UPDATE template to every entity on a single connection.
    /// Returns the total number of rows updated.
    ///
    /// Fails with a schema error, before any connection is opened, when the
    /// type has no identity key.
    pub async fn update_multiple<T: Entity>(&self, ctx: &CallContext, entities: &[T]) -> DbResult<u64> {
        let result = async {
            let desc = self.describe::<T>()?;
            desc.require_identity("batched update")?;
            if entities.is_empty() {
                return Ok(0);
            }
            let now = Utc::now();
            let rows = entities
                .iter()
                .map(|e| {
                    property_map(e).map(|mut values| {
                        stamp_values(&mut values, &desc, &[Stamp::ModifiedOn], now);
                        values
                    })
                })
                .collect::<DbResult<Vec<_>>>()?;

            self.executor
                .with_connection(ctx, move |conn| {
                    Box::pin(async move {
                        let builder = SqlBuilder::new(conn.dialect());
                        let template = builder.update_template(&desc)?;
                        let mut updated: u64 = 0;
                        for values in &rows {
                            let spec = CommandSpec {
                                text: template.clone(),
                                kind: CommandKind::RawText,
                                params: builder.update_params(&desc, values)?,
                            };
                            updated += conn.execute(&spec).await?.rows_affected;
                        }
                        Ok::<_, DbError>(updated)
                    })
                })
                .await
        }
        .await;
        self.report::<T, _>("update_multiple", ctx, result)
    }

    /// Delete the row identified by the entity's key. Returns whether a row
    /// was deleted.
    pub async fn delete<T: Entity>(&self, ctx: &CallContext, entity: &T) -> DbResult<bool> {
        let result = async {
            let desc = self.describe::<T>()?;
            desc.require_identity("delete")?;
            let values = property_map(entity)?;
            self.executor
                .with_connection(ctx, move |conn| {
                    Box::pin(async move {
                        let spec = SqlBuilder::new(conn.dialect()).delete_by_key(&desc, &values)?;
                        Ok::<_, DbError>(conn.execute(&spec).await?.rows_affected > 0)
                    })
                })
                .await
        }
        .await;
        self.report::<T, _>("delete", ctx, result)
    }

    /// Update the entity if a row with its identity exists, insert it
    /// otherwise.
    ///
    /// An entity without a positive identity value goes straight to insert
    /// without an existence check. Both paths share one connection.
    pub async fn upsert<T: Entity>(&self, ctx: &CallContext, entity: T) -> DbResult<Upserted<T>> {
        let result = async {
            let desc = self.describe::<T>()?;
            let id = identity_value(&entity, &desc)?.filter(|id| *id > 0);
            self.executor
                .with_connection(ctx, move |conn| {
                    Box::pin(async move {
                        let mut entity = entity;
                        if let Some(id) = id {
                            if fetch_by_key::<T>(conn, &desc, id).await?.is_some() {
                                debug!(table = %desc.table, id, "Upsert: row exists, updating");
                                apply_stamps(&mut entity, &desc, &[Stamp::ModifiedOn], Utc::now())?;
                                update_values(conn, &desc, &property_map(&entity)?).await?;
                                return Ok(Upserted::Updated(entity));
                            }
                        }
                        debug!(table = %desc.table, "Upsert: inserting");
                        apply_stamps(&mut entity, &desc, &[Stamp::CreatedOn, Stamp::ModifiedOn], Utc::now())?;
                        let values = property_map(&entity)?;
                        let stored = insert_and_refetch::<T>(conn, &desc, values).await?;
                        Ok::<_, DbError>(Upserted::Inserted(stored))
                    })
                })
                .await
        }
        .await;
        self.report::<T, _>("upsert", ctx, result)
    }

    // =========================================================================
    // Caller-authored commands
    // =========================================================================

    /// Run a command that returns no rows. Returns rows affected.
    pub async fn execute(&self, ctx: &CallContext, spec: &CommandSpec) -> DbResult<u64> {
        let spec = spec.clone();
        let result = self
            .executor
            .with_connection(ctx, move |conn| {
                Box::pin(async move { Ok::<_, DbError>(conn.execute(&spec).await?.rows_affected) })
            })
            .await;
        self.report_command("execute", ctx, result)
    }

    /// Run a command and deserialize every row as `T`.
    pub async fn query<T>(&self, ctx: &CallContext, spec: &CommandSpec) -> DbResult<Vec<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let spec = spec.clone();
        let result = self
            .executor
            .with_connection(ctx, move |conn| {
                Box::pin(async move {
                    let rows = conn.fetch_rows(&spec).await?;
                    rows.iter().map(from_row).collect::<DbResult<Vec<T>>>()
                })
            })
            .await;
        self.report_command("query", ctx, result)
    }

    /// Run a batch or procedure and buffer all of its result sets.
    pub async fn get_multiple_data(&self, ctx: &CallContext, spec: &CommandSpec) -> DbResult<ResultSets> {
        let result = self.fetch_result_sets(ctx, spec).await.map(ResultSets::new);
        self.report_command("get_multiple_data", ctx, result)
    }

    /// Fill a [`ResultShape`] from the command's result sets.
    ///
    /// The command must produce its result sets in the order the shape
    /// declares its slots.
    pub async fn get_complex<S: ResultShape>(&self, ctx: &CallContext, spec: &CommandSpec) -> DbResult<S> {
        let result = match self.fetch_result_sets(ctx, spec).await {
            Ok(sets) => materialize_shape::<S>(sets),
            Err(e) => Err(e),
        };
        self.report_command("get_complex", ctx, result)
    }

    /// Map each row to several types by cutting it at the `split_on`
    /// columns; `map` combines the segments into one result.
    pub async fn query_multi_map<R, F>(
        &self,
        ctx: &CallContext,
        spec: &CommandSpec,
        split_on: &[&str],
        mut map: F,
    ) -> DbResult<Vec<R>>
    where
        F: FnMut(RowSegments) -> DbResult<R>,
    {
        let spec = spec.clone();
        let result = match self
            .executor
            .with_connection(ctx, move |conn| Box::pin(async move { conn.fetch_rows(&spec).await }))
            .await
        {
            Ok(rows) => rows
                .iter()
                .map(|row| split_row(row, split_on).and_then(&mut map))
                .collect(),
            Err(e) => Err(e),
        };
        self.report_command("query_multi_map", ctx, result)
    }

    async fn fetch_result_sets(&self, ctx: &CallContext, spec: &CommandSpec) -> DbResult<Vec<Vec<crate::db::Row>>> {
        let spec = spec.clone();
        self.executor
            .with_connection(ctx, move |conn| {
                Box::pin(async move { conn.fetch_result_sets(&spec).await })
            })
            .await
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn describe<T: Entity>(&self) -> DbResult<Arc<EntityDescriptor>> {
        self.provider.describe(EntityType::of::<T>())
    }

    fn report<T: Entity, R>(&self, operation: &'static str, ctx: &CallContext, result: DbResult<R>) -> DbResult<R> {
        if let Err(e) = &result {
            error!(
                operation,
                product = %ctx.product(),
                entity = EntityType::of::<T>().short_name(),
                error = %e,
                "Repository operation failed"
            );
        }
        result
    }

    fn report_command<R>(&self, operation: &'static str, ctx: &CallContext, result: DbResult<R>) -> DbResult<R> {
        if let Err(e) = &result {
            error!(
                operation,
                product = %ctx.product(),
                error = %e,
                "Repository command failed"
            );
        }
        result
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("executor", &self.executor)
            .finish()
    }
}

// =============================================================================
// Single-connection building blocks
// =============================================================================

async fn fetch_by_key<T: Entity>(
    conn: &mut ScopedConnection,
    desc: &EntityDescriptor,
    id: i64,
) -> DbResult<Option<T>> {
    let spec = SqlBuilder::new(conn.dialect()).select_by_key(desc, id)?;
    let rows = conn.fetch_rows(&spec).await?;
    rows.first().map(|row| row_to_entity(row, desc)).transpose()
}

async fn update_values(
    conn: &mut ScopedConnection,
    desc: &EntityDescriptor,
    values: &Map<String, JsonValue>,
) -> DbResult<u64> {
    let spec = SqlBuilder::new(conn.dialect()).update_by_key(desc, values)?;
    Ok(conn.execute(&spec).await?.rows_affected)
}

/// Insert one row and read it back by its generated identity.
async fn insert_and_refetch<T: Entity>(
    conn: &mut ScopedConnection,
    desc: &EntityDescriptor,
    values: Map<String, JsonValue>,
) -> DbResult<T> {
    let builder = SqlBuilder::new(conn.dialect());
    let spec = builder.insert(desc, &values);

    if desc.identity().is_none() {
        conn.execute(&spec).await?;
        return from_property_map(values);
    }

    let id = if builder.dialect().supports_returning() {
        let rows = conn.fetch_rows(&spec).await?;
        rows.first().and_then(|row| row.first_value()).and_then(json_to_id)
    } else {
        conn.execute(&spec).await?.last_insert_id
    };
    let id = id.ok_or_else(|| {
        DbError::internal(format!("Insert into '{}' did not report an identity", desc.table))
    })?;

    fetch_by_key::<T>(conn, desc, id).await?.ok_or_else(|| {
        DbError::internal(format!("Row {} inserted into '{}' could not be read back", id, desc.table))
    })
}

fn stamp_values(
    values: &mut Map<String, JsonValue>,
    desc: &EntityDescriptor,
    stamps: &[Stamp],
    now: chrono::DateTime<Utc>,
) {
    let text = now.to_rfc3339_opts(SecondsFormat::Micros, true);
    for col in stamps.iter().filter_map(|s| desc.stamped(*s)) {
        values.insert(col.property.clone(), JsonValue::String(text.clone()));
    }
}

fn json_to_id(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_upserted_accessors() {
        let updated = Upserted::Updated(1);
        assert!(!updated.is_inserted());
        assert_eq!(*updated.entity(), 1);
        assert_eq!(Upserted::Inserted(2).into_inner(), 2);
    }

    #[test]
    fn test_json_to_id() {
        assert_eq!(json_to_id(&json!(42)), Some(42));
        assert_eq!(json_to_id(&json!("7")), Some(7));
        assert_eq!(json_to_id(&json!(1.5)), None);
        assert_eq!(json_to_id(&JsonValue::Null), None);
    }

    #[test]
    fn test_stamp_values_only_declared_columns() {
        let desc = EntityDescriptor::builder("t")
            .identity("id")
            .column("name")
            .column("ModifiedOn")
            .build();
        let mut values = Map::new();
        values.insert("name".into(), json!("x"));
        let now = Utc::now();
        stamp_values(&mut values, &desc, &[Stamp::CreatedOn, Stamp::ModifiedOn], now);
        assert!(values.contains_key("ModifiedOn"));
        assert!(!values.contains_key("CreatedOn"));
        assert_eq!(values["name"], json!("x"));
    }
}
