//! Equality filters compiled to WHERE clauses.
//!
//! A filter is a list of property/value pairs joined with AND. A null value
//! compiles to `IS NULL`, anything else to `= @param`. Inequalities, ranges
//! and OR are not supported; write a raw text command for those.

use crate::error::{DbError, DbResult};
use crate::models::entity::json_type_name;
use crate::models::{EntityDescriptor, QueryParam, ValueKind};
use crate::sql::builder::param_name;
use crate::sql::dialect::Dialect;
use serde::Serialize;
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    terms: Vec<(String, QueryParam)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Match `property = value`; a null value matches `IS NULL`.
    /// Setting the same property twice keeps the last value.
    pub fn eq(mut self, property: impl Into<String>, value: impl Into<QueryParam>) -> Self {
        let property = property.into();
        let value = value.into();
        match self.terms.iter_mut().find(|(p, _)| *p == property) {
            Some(term) => term.1 = value,
            None => self.terms.push((property, value)),
        }
        self
    }

    /// Match `property IS NULL`.
    pub fn is_null(self, property: impl Into<String>) -> Self {
        self.eq(property, QueryParam::Null)
    }

    /// Build a filter from the top-level fields of a serializable value.
    pub fn from_serialize<T: Serialize>(value: &T) -> DbResult<Self> {
        match serde_json::to_value(value) {
            Ok(JsonValue::Object(map)) => Ok(map.iter().fold(Self::new(), |f, (k, v)| {
                f.eq(k.clone(), QueryParam::from_json(v, ValueKind::Plain))
            })),
            Ok(JsonValue::Null) => Ok(Self::new()),
            Ok(other) => Err(DbError::invalid_input(format!(
                "Filter must serialize to an object, got {}",
                json_type_name(&other)
            ))),
            Err(e) => Err(DbError::invalid_input(format!("Invalid filter: {}", e))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// The WHERE clause (without the keyword) and its parameters, or `None`
    /// for an empty filter.
    pub fn to_where_clause(
        &self,
        dialect: Dialect,
        descriptor: Option<&EntityDescriptor>,
    ) -> Option<(String, Vec<(String, QueryParam)>)> {
        if self.terms.is_empty() {
            return None;
        }

        let mut predicates = Vec::with_capacity(self.terms.len());
        let mut params: Vec<(String, QueryParam)> = Vec::new();
        for (i, (property, value)) in self.terms.iter().enumerate() {
            let column = descriptor
                .and_then(|d| d.column_for_property(property))
                .map(|c| c.column.as_str())
                .unwrap_or(property);
            let column = dialect.quote_ident(column);

            if value.is_null() {
                predicates.push(format!("{} IS NULL", column));
                continue;
            }

            let mut name = param_name(property);
            if params.iter().any(|(n, _)| n.eq_ignore_ascii_case(&name)) {
                name = format!("{}_{}", name, i);
            }
            predicates.push(format!("{} = @{}", column, name));
            params.push((name, value.clone()));
        }
        Some((predicates.join(" AND "), params))
    }
}
