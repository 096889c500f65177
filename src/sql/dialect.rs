//! Backend-specific SQL spelling.

use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;

/// Whether a stored procedure call is expected to return rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStyle {
    Query,
    Execute,
}

/// SQL dialect for one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    db_type: DatabaseType,
}

impl Dialect {
    pub fn new(db_type: DatabaseType) -> Self {
        Self { db_type }
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    /// Quote a possibly schema-qualified identifier.
    pub fn quote_ident(&self, name: &str) -> String {
        let quote = match self.db_type {
            DatabaseType::MySQL => '`',
            DatabaseType::PostgreSQL | DatabaseType::SQLite => '"',
        };
        name.split('.')
            .map(|part| {
                let escaped = part.replace(quote, &format!("{quote}{quote}"));
                format!("{quote}{escaped}{quote}")
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Positional placeholder for the 1-based parameter `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self.db_type {
            DatabaseType::PostgreSQL => format!("${}", index),
            DatabaseType::MySQL | DatabaseType::SQLite => "?".to_string(),
        }
    }

    /// Whether INSERT can hand back generated keys with `RETURNING`.
    pub fn supports_returning(&self) -> bool {
        matches!(self.db_type, DatabaseType::PostgreSQL | DatabaseType::SQLite)
    }

    /// INSERT for a row where every column takes its default.
    pub fn default_values_insert(&self, table: &str) -> String {
        match self.db_type {
            DatabaseType::MySQL => format!("INSERT INTO {} () VALUES ()", self.quote_ident(table)),
            DatabaseType::PostgreSQL | DatabaseType::SQLite => {
                format!("INSERT INTO {} DEFAULT VALUES", self.quote_ident(table))
            }
        }
    }

    /// Statement text invoking a stored procedure with `arg_count` positional arguments.
    pub fn procedure_call(&self, name: &str, arg_count: usize, style: CallStyle) -> DbResult<String> {
        validate_procedure_name(name)?;
        let args = (1..=arg_count)
            .map(|i| self.placeholder(i))
            .collect::<Vec<_>>()
            .join(", ");
        match (self.db_type, style) {
            (DatabaseType::MySQL, _) => Ok(format!("CALL {}({})", name, args)),
            (DatabaseType::PostgreSQL, CallStyle::Query) => {
                Ok(format!("SELECT * FROM {}({})", name, args))
            }
            (DatabaseType::PostgreSQL, CallStyle::Execute) => Ok(format!("CALL {}({})", name, args)),
            (DatabaseType::SQLite, _) => Err(DbError::invalid_input(
                "SQLite does not support stored procedures; use a raw text command",
            )),
        }
    }
}

/// Procedure names are interpolated into SQL, so only plain (optionally
/// schema-qualified) identifiers are accepted.
fn validate_procedure_name(name: &str) -> DbResult<()> {
    let valid = !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        });
    if valid {
        Ok(())
    } else {
        Err(DbError::invalid_input(format!(
            "Invalid stored procedure name: '{}'",
            name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(Dialect::new(DatabaseType::PostgreSQL).quote_ident("users"), "\"users\"");
        assert_eq!(Dialect::new(DatabaseType::MySQL).quote_ident("hr.users"), "`hr`.`users`");
        assert_eq!(
            Dialect::new(DatabaseType::SQLite).quote_ident("we\"ird"),
            "\"we\"\"ird\""
        );
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(Dialect::new(DatabaseType::PostgreSQL).placeholder(3), "$3");
        assert_eq!(Dialect::new(DatabaseType::MySQL).placeholder(3), "?");
    }

    #[test]
    fn test_procedure_call_per_backend() {
        let mysql = Dialect::new(DatabaseType::MySQL);
        assert_eq!(
            mysql.procedure_call("usp_list", 2, CallStyle::Query).unwrap(),
            "CALL usp_list(?, ?)"
        );
        let pg = Dialect::new(DatabaseType::PostgreSQL);
        assert_eq!(
            pg.procedure_call("hr.list_staff", 1, CallStyle::Query).unwrap(),
            "SELECT * FROM hr.list_staff($1)"
        );
        assert_eq!(
            pg.procedure_call("purge", 0, CallStyle::Execute).unwrap(),
            "CALL purge()"
        );
    }

    #[test]
    fn test_procedure_call_sqlite_unsupported() {
        let err = Dialect::new(DatabaseType::SQLite)
            .procedure_call("anything", 0, CallStyle::Query)
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
    }

    #[test]
    fn test_procedure_name_rejects_injection() {
        let mysql = Dialect::new(DatabaseType::MySQL);
        assert!(mysql.procedure_call("p(); DROP TABLE x", 0, CallStyle::Execute).is_err());
        assert!(mysql.procedure_call("", 0, CallStyle::Execute).is_err());
    }
}
