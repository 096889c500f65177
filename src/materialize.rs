//! Result materialization.
//!
//! Rows become typed values through serde: a row is turned into a JSON
//! object (column names renamed to property names when a mapping is known)
//! and deserialized into the target type.
//!
//! Three result forms are supported:
//! - single rows and lists ([`row_to_entity`], [`from_row`])
//! - buffered multi-result-set reads ([`ResultSets`], [`materialize_shape`])
//! - several types per row ([`split_row`], [`RowSegments`])

use crate::db::types::Row;
use crate::error::{DbError, DbResult};
use crate::models::entity::json_type_name;
use crate::models::query::parse_timestamp;
use crate::models::{Entity, EntityDescriptor, ResultShape, SlotKind, ValueKind};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value as JsonValue};
use std::collections::VecDeque;
use tracing::{debug, warn};

// =============================================================================
// Single Rows
// =============================================================================

/// Row as a property map. Mapped columns take their property name; other
/// columns keep their own. The first column wins on duplicate names.
pub fn row_to_properties(row: &Row, descriptor: Option<&EntityDescriptor>) -> Map<String, JsonValue> {
    let mut map = Map::with_capacity(row.len());
    for (column, value) in row.iter() {
        let key = descriptor
            .and_then(|d| d.property_for_column(column))
            .map(|c| c.property.as_str())
            .unwrap_or(column);
        if !map.contains_key(key) {
            map.insert(key.to_string(), value.clone());
        }
    }
    map
}

/// Deserialize an entity from a row using its mapping.
pub fn row_to_entity<T: Entity>(row: &Row, descriptor: &EntityDescriptor) -> DbResult<T> {
    let map = row_to_properties(row, Some(descriptor));
    match serde_json::from_value(JsonValue::Object(map.clone())) {
        Ok(entity) => Ok(entity),
        Err(first) => {
            // Timestamps may come back with or without an offset depending on
            // the backend; retry with the other form before giving up.
            let toggled = toggle_timestamp_form(map, descriptor);
            serde_json::from_value(JsonValue::Object(toggled))
                .map_err(|_| DbError::conversion(first.to_string(), std::any::type_name::<T>()))
        }
    }
}

/// Deserialize any type from a row. A single-column row whose object form
/// does not fit is retried as the bare column value, so `i64`, `String` and
/// similar scalars read naturally.
pub fn from_row<T: DeserializeOwned>(row: &Row) -> DbResult<T> {
    let object = JsonValue::Object(row_to_properties(row, None));
    match serde_json::from_value(object) {
        Ok(value) => Ok(value),
        Err(e) => match (row.len(), row.first_value()) {
            (1, Some(bare)) => serde_json::from_value(bare.clone())
                .map_err(|_| DbError::conversion(e.to_string(), std::any::type_name::<T>())),
            _ => Err(DbError::conversion(e.to_string(), std::any::type_name::<T>())),
        },
    }
}

fn toggle_timestamp_form(
    mut map: Map<String, JsonValue>,
    descriptor: &EntityDescriptor,
) -> Map<String, JsonValue> {
    for col in descriptor
        .columns
        .iter()
        .filter(|c| c.value_kind == ValueKind::Timestamp)
    {
        let Some(JsonValue::String(text)) = map.get(&col.property) else {
            continue;
        };
        let has_offset = chrono::DateTime::parse_from_rfc3339(text).is_ok();
        if let Some(ts) = parse_timestamp(text) {
            let toggled = if has_offset {
                ts.naive_utc().format("%Y-%m-%dT%H:%M:%S%.f").to_string()
            } else {
                ts.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true)
            };
            map.insert(col.property.clone(), JsonValue::String(toggled));
        }
    }
    map
}

// =============================================================================
// Multiple Result Sets
// =============================================================================

/// Fully buffered result sets, read front to back.
#[derive(Debug, Clone, Default)]
pub struct ResultSets {
    sets: VecDeque<Vec<Row>>,
    consumed: usize,
}

impl ResultSets {
    pub fn new(sets: Vec<Vec<Row>>) -> Self {
        Self {
            sets: sets.into(),
            consumed: 0,
        }
    }

    /// Result sets not yet read.
    pub fn remaining(&self) -> usize {
        self.sets.len()
    }

    pub fn is_consumed(&self) -> bool {
        self.sets.is_empty()
    }

    /// Next result set as raw rows.
    pub fn read_rows(&mut self) -> DbResult<Vec<Row>> {
        let rows = self.sets.pop_front().ok_or_else(|| {
            DbError::invalid_input(format!(
                "No more result sets (already read {})",
                self.consumed
            ))
        })?;
        self.consumed += 1;
        Ok(rows)
    }

    /// Next result set, every row deserialized as `T`.
    pub fn read<T: DeserializeOwned>(&mut self) -> DbResult<Vec<T>> {
        self.read_rows()?.iter().map(from_row).collect()
    }

    /// First row of the next result set, if it has one. The set is consumed
    /// either way.
    pub fn read_first<T: DeserializeOwned>(&mut self) -> DbResult<Option<T>> {
        self.read_rows()?.first().map(from_row).transpose()
    }

    /// Next result set as entities mapped through `descriptor`.
    pub fn read_entities<T: Entity>(&mut self, descriptor: &EntityDescriptor) -> DbResult<Vec<T>> {
        self.read_rows()?
            .iter()
            .map(|row| row_to_entity(row, descriptor))
            .collect()
    }
}

/// Fill a [`ResultShape`] from result sets in slot order.
///
/// Each `Scalar` or `List` slot consumes the next result set; `Ignore` slots
/// consume nothing. A slot whose set is empty or missing keeps its default.
/// A slot whose values do not convert is logged and keeps its default; the
/// other slots are still filled.
pub fn materialize_shape<S: ResultShape>(sets: Vec<Vec<Row>>) -> DbResult<S> {
    let mut target = match serde_json::to_value(S::default()) {
        Ok(JsonValue::Object(map)) => map,
        Ok(other) => {
            return Err(DbError::invalid_input(format!(
                "Result shape must serialize to an object, got {}",
                json_type_name(&other)
            )));
        }
        Err(e) => return Err(DbError::conversion(e.to_string(), std::any::type_name::<S>())),
    };

    let mut sets = sets.into_iter();
    for slot in S::slots() {
        if slot.kind == SlotKind::Ignore {
            continue;
        }
        let Some(rows) = sets.next() else {
            debug!(property = slot.property, "No result set left for property");
            continue;
        };
        if rows.is_empty() {
            continue;
        }

        let candidates = match slot.kind {
            SlotKind::Scalar => scalar_candidates(&rows[0]),
            SlotKind::List => list_candidates(&rows),
            SlotKind::Ignore => continue,
        };

        let previous = target.get(slot.property).cloned();
        let mut last_error = None;
        let mut accepted = false;
        for candidate in candidates {
            target.insert(slot.property.to_string(), candidate);
            match serde_json::from_value::<S>(JsonValue::Object(target.clone())) {
                Ok(_) => {
                    accepted = true;
                    break;
                }
                Err(e) => last_error = Some(e),
            }
        }

        if !accepted {
            match previous {
                Some(value) => target.insert(slot.property.to_string(), value),
                None => target.remove(slot.property),
            };
            warn!(
                property = slot.property,
                shape = std::any::type_name::<S>(),
                error = %last_error.map(|e| e.to_string()).unwrap_or_default(),
                "Skipping result set that does not convert to property"
            );
        }
    }

    serde_json::from_value(JsonValue::Object(target))
        .map_err(|e| DbError::conversion(e.to_string(), std::any::type_name::<S>()))
}

fn scalar_candidates(row: &Row) -> Vec<JsonValue> {
    let mut candidates = vec![JsonValue::Object(row.to_object())];
    if let (1, Some(bare)) = (row.len(), row.first_value()) {
        candidates.push(bare.clone());
    }
    candidates
}

fn list_candidates(rows: &[Row]) -> Vec<JsonValue> {
    let mut candidates = vec![JsonValue::Array(
        rows.iter().map(|r| JsonValue::Object(r.to_object())).collect(),
    )];
    if rows.iter().all(|r| r.len() == 1) {
        candidates.push(JsonValue::Array(
            rows.iter()
                .filter_map(|r| r.first_value().cloned())
                .collect(),
        ));
    }
    candidates
}

// =============================================================================
// Multi-Type Rows
// =============================================================================

/// One row cut into consecutive column ranges.
#[derive(Debug, Clone)]
pub struct RowSegments {
    segments: Vec<Row>,
}

impl RowSegments {
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segment(&self, index: usize) -> Option<&Row> {
        self.segments.get(index)
    }

    /// Deserialize segment `index` as `T`.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> DbResult<T> {
        let row = self.segments.get(index).ok_or_else(|| {
            DbError::invalid_input(format!(
                "Row has {} segments, segment {} requested",
                self.segments.len(),
                index
            ))
        })?;
        from_row(row)
    }

    /// Like [`get`](Self::get), but an all-NULL segment (an outer join miss)
    /// yields `None`.
    pub fn get_opt<T: DeserializeOwned>(&self, index: usize) -> DbResult<Option<T>> {
        match self.segments.get(index) {
            Some(row) if row.iter().all(|(_, v)| v.is_null()) => Ok(None),
            _ => self.get(index).map(Some),
        }
    }
}

/// Cut `row` at each column named in `split_on`, in order.
///
/// The first segment starts at column 0; each split name starts a new
/// segment at the next matching column (case-insensitive) after the
/// previous split point.
pub fn split_row(row: &Row, split_on: &[&str]) -> DbResult<RowSegments> {
    let mut starts = vec![0usize];
    for name in split_on {
        let from = starts.last().copied().unwrap_or(0) + 1;
        let position = row
            .columns()
            .iter()
            .enumerate()
            .skip(from)
            .find(|(_, c)| c.eq_ignore_ascii_case(name))
            .map(|(i, _)| i)
            .ok_or_else(|| {
                DbError::invalid_input(format!(
                    "Split column '{}' not found after column {} (columns: {})",
                    name,
                    from - 1,
                    row.columns().join(", ")
                ))
            })?;
        starts.push(position);
    }

    let mut segments = Vec::with_capacity(starts.len());
    for (i, start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(row.len());
        segments.push(row.slice(*start, end));
    }
    Ok(RowSegments { segments })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impl_entity;
    use crate::models::ShapeSlot;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    fn row(pairs: &[(&str, JsonValue)]) -> Row {
        pairs
            .iter()
            .map(|(c, v)| (c.to_string(), v.clone()))
            .collect()
    }

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Employee {
        id: i64,
        name: String,
        email: Option<String>,
        created_on: Option<DateTime<Utc>>,
    }

    impl crate::models::Entity for Employee {
        fn mapping() -> EntityDescriptor {
            EntityDescriptor::builder("employees")
                .identity_as("id", "employee_id")
                .column("name")
                .column_as("email", "email_address")
                .column("created_on")
                .build()
        }
    }

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Dept {
        id: i64,
        title: String,
    }

    impl_entity!(Dept, table = "departments", key = "id", columns = ["title"]);

    #[test]
    fn test_row_to_entity_renames_columns() {
        let r = row(&[
            ("employee_id", json!(7)),
            ("name", json!("Ada")),
            ("email_address", json!("ada@example.com")),
            ("created_on", JsonValue::Null),
            ("extra", json!(true)),
        ]);
        let e: Employee = row_to_entity(&r, &Employee::mapping()).unwrap();
        assert_eq!(e.id, 7);
        assert_eq!(e.email.as_deref(), Some("ada@example.com"));
    }

    #[test]
    fn test_row_to_entity_accepts_naive_timestamp() {
        let r = row(&[
            ("employee_id", json!(1)),
            ("name", json!("Ada")),
            ("created_on", json!("2024-03-01T10:20:30.5")),
        ]);
        let e: Employee = row_to_entity(&r, &Employee::mapping()).unwrap();
        assert_eq!(
            e.created_on.unwrap().to_rfc3339(),
            "2024-03-01T10:20:30.500+00:00"
        );
    }

    #[test]
    fn test_row_to_entity_conversion_error() {
        let r = row(&[("employee_id", json!("x")), ("name", json!("Ada"))]);
        let err = row_to_entity::<Employee>(&r, &Employee::mapping()).unwrap_err();
        assert!(matches!(err, DbError::Conversion { .. }));
    }

    #[test]
    fn test_from_row_scalar_fallback() {
        let r = row(&[("count(*)", json!(3))]);
        assert_eq!(from_row::<i64>(&r).unwrap(), 3);
        let d: Dept = from_row(&row(&[("id", json!(1)), ("title", json!("R&D"))])).unwrap();
        assert_eq!(d.title, "R&D");
    }

    #[test]
    fn test_result_sets_read_in_order() {
        let mut sets = ResultSets::new(vec![
            vec![row(&[("n", json!(1))]), row(&[("n", json!(2))])],
            vec![],
        ]);
        assert_eq!(sets.remaining(), 2);
        assert_eq!(sets.read::<i64>().unwrap(), vec![1, 2]);
        assert_eq!(sets.read_first::<i64>().unwrap(), None);
        assert!(sets.is_consumed());
        assert!(sets.read_rows().is_err());
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Dashboard {
        total: i64,
        depts: Vec<Dept>,
        #[serde(default)]
        note: Option<String>,
        head: Option<Dept>,
    }

    impl ResultShape for Dashboard {
        fn slots() -> &'static [ShapeSlot] {
            const SLOTS: &[ShapeSlot] = &[
                ShapeSlot::scalar("total"),
                ShapeSlot::list("depts"),
                ShapeSlot::ignore("note"),
                ShapeSlot::scalar("head"),
            ];
            SLOTS
        }
    }

    fn dept_row(id: i64, title: &str) -> Row {
        row(&[("id", json!(id)), ("title", json!(title))])
    }

    #[test]
    fn test_shape_slots_follow_declared_order() {
        let sets = vec![
            vec![row(&[("total", json!(2))])],
            vec![dept_row(1, "a"), dept_row(2, "b")],
            vec![dept_row(9, "head"), dept_row(10, "ignored")],
            vec![row(&[("never", json!("read"))])],
        ];
        let shape: Dashboard = materialize_shape(sets).unwrap();
        assert_eq!(shape.total, 2);
        assert_eq!(shape.depts.len(), 2);
        assert!(shape.note.is_none());
        assert_eq!(shape.head, Some(Dept { id: 9, title: "head".into() }));
    }

    #[test]
    fn test_shape_empty_and_missing_sets_keep_defaults() {
        let shape: Dashboard = materialize_shape(vec![vec![], vec![dept_row(1, "a")]]).unwrap();
        assert_eq!(shape.total, 0);
        assert_eq!(shape.depts.len(), 1);
        assert!(shape.head.is_none());
    }

    #[test]
    fn test_shape_conversion_failure_is_isolated() {
        let sets = vec![
            vec![row(&[("total", json!("not a number"))])],
            vec![dept_row(1, "a")],
            vec![dept_row(2, "b")],
        ];
        let shape: Dashboard = materialize_shape(sets).unwrap();
        assert_eq!(shape.total, 0);
        assert_eq!(shape.depts, vec![Dept { id: 1, title: "a".into() }]);
        assert_eq!(shape.head.map(|d| d.id), Some(2));
    }

    #[test]
    fn test_split_row_segments() {
        let r = row(&[
            ("id", json!(1)),
            ("name", json!("Ada")),
            ("id", json!(5)),
            ("title", json!("R&D")),
        ]);
        let parts = split_row(&r, &["id"]).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts.segment(0).unwrap().columns(), &["id", "name"]);
        let dept: Dept = parts.get(1).unwrap();
        assert_eq!(dept.id, 5);
        assert!(parts.get::<Dept>(2).is_err());
    }

    #[test]
    fn test_split_row_null_segment() {
        let r = row(&[
            ("id", json!(1)),
            ("title", json!("x")),
            ("id", JsonValue::Null),
            ("title", JsonValue::Null),
        ]);
        let parts = split_row(&r, &["id"]).unwrap();
        assert_eq!(parts.get_opt::<Dept>(1).unwrap(), None);
        assert!(parts.get_opt::<Dept>(0).unwrap().is_some());
    }

    #[test]
    fn test_split_row_missing_column() {
        let r = row(&[("id", json!(1)), ("name", json!("Ada"))]);
        assert!(split_row(&r, &["dept_id"]).is_err());
    }
}
