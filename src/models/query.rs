//! Command-related data models.
//!
//! This module defines parameter values and the command description consumed
//! by the executor.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

/// Default command timeout in seconds.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

/// Default connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// How a column value should be bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueKind {
    #[default]
    Plain,
    /// Bound as a native timestamp where the backend has one.
    Timestamp,
}

/// A parameter value for parameterized commands.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// UTC timestamp
    Timestamp(DateTime<Utc>),
    /// Structured value stored as JSON
    Json(JsonValue),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Timestamp(_) => "timestamp",
            Self::Json(_) => "json",
        }
    }

    /// Convert a serialized property value into a bindable parameter.
    pub fn from_json(value: &JsonValue, kind: ValueKind) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            JsonValue::String(s) => {
                if kind == ValueKind::Timestamp {
                    if let Some(ts) = parse_timestamp(s) {
                        return Self::Timestamp(ts);
                    }
                }
                Self::String(s.clone())
            }
            JsonValue::Array(_) | JsonValue::Object(_) => Self::Json(value.clone()),
        }
    }
}

/// Parse an RFC 3339 timestamp, or a naive one interpreted as UTC.
pub(crate) fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| chrono::NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for QueryParam {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for QueryParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<DateTime<Utc>> for QueryParam {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Whether the command text is SQL or the name of a stored procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    RawText,
    StoredProcedure,
}

/// A command ready for execution.
///
/// Raw text addresses its parameters as `@name`. A stored procedure receives
/// its parameters positionally, in the order they were added.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub text: String,
    pub kind: CommandKind,
    pub params: Vec<(String, QueryParam)>,
}

impl CommandSpec {
    /// Create a raw SQL command.
    pub fn text(sql: impl Into<String>) -> Self {
        Self {
            text: sql.into(),
            kind: CommandKind::RawText,
            params: Vec::new(),
        }
    }

    /// Create a stored procedure call.
    pub fn procedure(name: impl Into<String>) -> Self {
        Self {
            text: name.into(),
            kind: CommandKind::StoredProcedure,
            params: Vec::new(),
        }
    }

    /// Create a command of the given kind.
    pub fn new(text: impl Into<String>, kind: CommandKind) -> Self {
        Self {
            text: text.into(),
            kind,
            params: Vec::new(),
        }
    }

    /// Add a parameter to this command.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<QueryParam>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Add a parameter in place.
    pub fn push_param(&mut self, name: impl Into<String>, value: QueryParam) {
        self.params.push((name.into(), value));
    }

    /// Look up a parameter by name (case-insensitive, first match).
    pub fn get_param(&self, name: &str) -> Option<&QueryParam> {
        self.params
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }
}

/// Outcome of a command that returns no rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOutcome {
    pub rows_affected: u64,
    /// Last generated identity, where the backend reports one.
    pub last_insert_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_param_types() {
        assert!(QueryParam::Null.is_null());
        assert!(!QueryParam::Bool(true).is_null());
        assert_eq!(QueryParam::Int(42).type_name(), "int");
        assert_eq!(QueryParam::from("hello").type_name(), "string");
        assert_eq!(QueryParam::from(None::<i64>), QueryParam::Null);
    }

    #[test]
    fn test_from_json_numbers() {
        assert_eq!(QueryParam::from_json(&json!(5), ValueKind::Plain), QueryParam::Int(5));
        assert_eq!(
            QueryParam::from_json(&json!(2.5), ValueKind::Plain),
            QueryParam::Float(2.5)
        );
    }

    #[test]
    fn test_from_json_timestamp_hint() {
        let value = json!("2024-03-01T10:00:00Z");
        assert!(matches!(
            QueryParam::from_json(&value, ValueKind::Timestamp),
            QueryParam::Timestamp(_)
        ));
        assert!(matches!(
            QueryParam::from_json(&value, ValueKind::Plain),
            QueryParam::String(_)
        ));
        // Not a timestamp: keep the text
        assert_eq!(
            QueryParam::from_json(&json!("soon"), ValueKind::Timestamp),
            QueryParam::String("soon".to_string())
        );
    }

    #[test]
    fn test_from_json_structured_values() {
        assert!(matches!(
            QueryParam::from_json(&json!({"a": 1}), ValueKind::Plain),
            QueryParam::Json(_)
        ));
    }

    #[test]
    fn test_parse_naive_timestamp_as_utc() {
        let ts = parse_timestamp("2024-03-01 10:00:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-03-01T10:00:00+00:00");
    }

    #[test]
    fn test_command_spec_builders() {
        let spec = CommandSpec::procedure("usp_GetEmployee")
            .param("EmployeeId", 7)
            .param("Active", true);
        assert_eq!(spec.kind, CommandKind::StoredProcedure);
        assert_eq!(spec.params.len(), 2);
        assert_eq!(spec.get_param("employeeid"), Some(&QueryParam::Int(7)));
    }
}
