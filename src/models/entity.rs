//! Entity mapping models.
//!
//! An entity is any serde-serializable struct with a static mapping table.
//! Properties are read and written through the entity's serde representation,
//! so the serde field names are the property names used by the mapping.

use crate::error::{DbError, DbResult};
use crate::models::query::ValueKind;
use crate::sql::builder::param_name;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value as JsonValue};
use std::any::TypeId;

/// Role of a mapped column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    Ordinary,
    /// Server-assigned primary key; excluded from INSERT and UPDATE column lists.
    IdentityKey,
}

/// Audit timestamps written by insert and update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stamp {
    CreatedOn,
    ModifiedOn,
}

impl Stamp {
    /// Detect a stamp from a conventional property name.
    pub fn from_property(property: &str) -> Option<Self> {
        match property {
            "created_on" | "CreatedOn" | "createdOn" => Some(Self::CreatedOn),
            "modified_on" | "ModifiedOn" | "modifiedOn" => Some(Self::ModifiedOn),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    /// Serde field name on the entity.
    pub property: String,
    /// Physical column name.
    pub column: String,
    pub role: ColumnRole,
    pub value_kind: ValueKind,
    pub stamp: Option<Stamp>,
}

impl ColumnDescriptor {
    fn new(property: &str, column: &str, role: ColumnRole) -> Self {
        let stamp = Stamp::from_property(property);
        Self {
            property: property.to_string(),
            column: column.to_string(),
            role,
            value_kind: if stamp.is_some() {
                ValueKind::Timestamp
            } else {
                ValueKind::Plain
            },
            stamp,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.role == ColumnRole::IdentityKey
    }
}

/// Table name and ordered column list for one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    pub table: String,
    pub columns: Vec<ColumnDescriptor>,
}

impl EntityDescriptor {
    pub fn builder(table: impl Into<String>) -> EntityDescriptorBuilder {
        EntityDescriptorBuilder {
            table: table.into(),
            columns: Vec::new(),
        }
    }

    /// The single identity column, if the type declares one.
    pub fn identity(&self) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.is_identity())
    }

    /// The identity column, or a schema error naming the operation that needed it.
    pub fn require_identity(&self, operation: &str) -> DbResult<&ColumnDescriptor> {
        self.identity().ok_or_else(|| {
            DbError::schema(
                format!("{} requires an identity key column", operation),
                self.table.clone(),
            )
        })
    }

    /// Columns written by INSERT and UPDATE.
    pub fn writable_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter().filter(|c| !c.is_identity())
    }

    pub fn column_for_property(&self, property: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.property == property)
    }

    pub fn property_for_column(&self, column: &str) -> Option<&ColumnDescriptor> {
        self.columns
            .iter()
            .find(|c| c.column.eq_ignore_ascii_case(column))
    }

    pub fn stamped(&self, stamp: Stamp) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.stamp == Some(stamp))
    }

    /// Check the invariants every mapping must satisfy.
    pub fn validate(&self) -> DbResult<()> {
        if self.table.trim().is_empty() {
            return Err(DbError::schema("Table name cannot be empty", "<unnamed>"));
        }
        if self.columns.is_empty() {
            return Err(DbError::schema("Mapping has no columns", self.table.clone()));
        }
        if self.columns.iter().filter(|c| c.is_identity()).count() > 1 {
            return Err(DbError::schema(
                "At most one identity key column is supported",
                self.table.clone(),
            ));
        }
        for (i, col) in self.columns.iter().enumerate() {
            if col.property.is_empty() || col.column.is_empty() {
                return Err(DbError::schema(
                    "Column and property names cannot be empty",
                    self.table.clone(),
                ));
            }
            if self.columns[..i].iter().any(|c| c.property == col.property) {
                return Err(DbError::schema(
                    format!("Duplicate property '{}'", col.property),
                    self.table.clone(),
                ));
            }
            // Placeholders match case-insensitively after sanitizing.
            let placeholder = param_name(&col.property);
            if let Some(other) = self.columns[..i]
                .iter()
                .find(|c| param_name(&c.property).eq_ignore_ascii_case(&placeholder))
            {
                return Err(DbError::schema(
                    format!(
                        "Properties '{}' and '{}' share the parameter name '@{}'",
                        other.property, col.property, placeholder
                    ),
                    self.table.clone(),
                ));
            }
        }
        Ok(())
    }
}

pub struct EntityDescriptorBuilder {
    table: String,
    columns: Vec<ColumnDescriptor>,
}

impl EntityDescriptorBuilder {
    /// Identity key whose column name equals the property name.
    pub fn identity(self, property: &str) -> Self {
        self.identity_as(property, property)
    }

    pub fn identity_as(mut self, property: &str, column: &str) -> Self {
        self.columns
            .push(ColumnDescriptor::new(property, column, ColumnRole::IdentityKey));
        self
    }

    /// Ordinary column whose column name equals the property name.
    pub fn column(self, property: &str) -> Self {
        self.column_as(property, property)
    }

    pub fn column_as(mut self, property: &str, column: &str) -> Self {
        self.columns
            .push(ColumnDescriptor::new(property, column, ColumnRole::Ordinary));
        self
    }

    /// Bind the most recently added column as a timestamp.
    pub fn timestamp(mut self) -> Self {
        if let Some(last) = self.columns.last_mut() {
            last.value_kind = ValueKind::Timestamp;
        }
        self
    }

    pub fn build(self) -> EntityDescriptor {
        EntityDescriptor {
            table: self.table,
            columns: self.columns,
        }
    }
}

/// A type persisted through the repository.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Static mapping for this type. Called once per type and cached by the
    /// metadata provider.
    fn mapping() -> EntityDescriptor;
}

/// Stable identifier for an entity type, used as the registry key.
#[derive(Clone, Copy)]
pub struct EntityType {
    pub id: TypeId,
    pub name: &'static str,
    pub mapping: fn() -> EntityDescriptor,
}

impl EntityType {
    pub fn of<T: Entity>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            mapping: T::mapping,
        }
    }

    /// Type name without its module path.
    pub fn short_name(&self) -> &'static str {
        self.name.rsplit("::").next().unwrap_or(self.name)
    }
}

impl std::fmt::Debug for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityType").field("name", &self.name).finish()
    }
}

/// Serialize an entity into its property map.
pub fn property_map<T: Serialize>(entity: &T) -> DbResult<Map<String, JsonValue>> {
    match serde_json::to_value(entity) {
        Ok(JsonValue::Object(map)) => Ok(map),
        Ok(other) => Err(DbError::invalid_input(format!(
            "Entity must serialize to an object, got {}",
            json_type_name(&other)
        ))),
        Err(e) => Err(DbError::conversion(e.to_string(), "<entity>")),
    }
}

/// Rebuild an entity from a property map.
pub fn from_property_map<T: DeserializeOwned>(map: Map<String, JsonValue>) -> DbResult<T> {
    serde_json::from_value(JsonValue::Object(map))
        .map_err(|e| DbError::conversion(e.to_string(), std::any::type_name::<T>()))
}

/// Read the identity value of an entity. Non-integer values count as absent.
pub fn identity_value<T: Serialize>(entity: &T, descriptor: &EntityDescriptor) -> DbResult<Option<i64>> {
    let Some(key) = descriptor.identity() else {
        return Ok(None);
    };
    let map = property_map(entity)?;
    Ok(map.get(&key.property).and_then(json_as_i64))
}

fn json_as_i64(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Write the audit timestamps the descriptor declares onto the entity.
pub fn apply_stamps<T: Entity>(
    entity: &mut T,
    descriptor: &EntityDescriptor,
    stamps: &[Stamp],
    now: chrono::DateTime<chrono::Utc>,
) -> DbResult<()> {
    let targets: Vec<&ColumnDescriptor> = stamps
        .iter()
        .filter_map(|s| descriptor.stamped(*s))
        .collect();
    if targets.is_empty() {
        return Ok(());
    }

    let mut map = property_map(entity)?;
    let rfc3339 = JsonValue::String(now.to_rfc3339_opts(chrono::SecondsFormat::Micros, true));
    for col in &targets {
        map.insert(col.property.clone(), rfc3339.clone());
    }
    match from_property_map::<T>(map.clone()) {
        Ok(stamped) => {
            *entity = stamped;
            Ok(())
        }
        Err(_) => {
            // Naive timestamp fields reject an offset.
            let naive = JsonValue::String(now.naive_utc().format("%Y-%m-%dT%H:%M:%S%.6f").to_string());
            for col in &targets {
                map.insert(col.property.clone(), naive.clone());
            }
            *entity = from_property_map::<T>(map)?;
            Ok(())
        }
    }
}

pub(crate) fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// Write an [`Entity`] impl from a static mapping table.
///
/// ```ignore
/// impl_entity!(Employee, table = "employees", key = "id", columns = ["name", "created_on"]);
/// impl_entity!(AuditLine, table = "audit_lines", columns = ["message"]);
/// ```
#[macro_export]
macro_rules! impl_entity {
    ($ty:ty, table = $table:expr, key = $key:expr, columns = [$($col:expr),* $(,)?]) => {
        impl $crate::models::Entity for $ty {
            fn mapping() -> $crate::models::EntityDescriptor {
                $crate::models::EntityDescriptor::builder($table)
                    .identity($key)
                    $(.column($col))*
                    .build()
            }
        }
    };
    ($ty:ty, table = $table:expr, columns = [$($col:expr),* $(,)?]) => {
        impl $crate::models::Entity for $ty {
            fn mapping() -> $crate::models::EntityDescriptor {
                $crate::models::EntityDescriptor::builder($table)
                    $(.column($col))*
                    .build()
            }
        }
    };
}
