//! Statement synthesis from entity mappings.
//!
//! Every statement is produced as a raw-text [`CommandSpec`] with `@name`
//! parameters; [`compile`](crate::sql::compile) turns it into the driver's
//! positional form.

use crate::error::{DbError, DbResult};
use crate::models::{ColumnDescriptor, CommandSpec, EntityDescriptor, QueryParam};
use crate::sql::dialect::Dialect;
use crate::sql::filter::Filter;
use serde_json::{Map, Value as JsonValue};

/// Parameter name for a property: non-identifier characters become `_`.
pub fn param_name(property: &str) -> String {
    let mut name: String = property
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if !name.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        name.insert(0, 'p');
    }
    name
}

/// Builds statements for one dialect.
#[derive(Debug, Clone, Copy)]
pub struct SqlBuilder {
    dialect: Dialect,
}

impl SqlBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// `SELECT *` over the whole table.
    pub fn select_all(&self, desc: &EntityDescriptor) -> CommandSpec {
        CommandSpec::text(format!("SELECT * FROM {}", self.dialect.quote_ident(&desc.table)))
    }

    /// `SELECT *` for one identity value.
    pub fn select_by_key(&self, desc: &EntityDescriptor, id: i64) -> DbResult<CommandSpec> {
        let key = desc.require_identity("get by id")?;
        let name = param_name(&key.property);
        Ok(CommandSpec::text(format!(
            "SELECT * FROM {} WHERE {} = @{}",
            self.dialect.quote_ident(&desc.table),
            self.dialect.quote_ident(&key.column),
            name
        ))
        .param(name, id))
    }

    /// `SELECT *` restricted by an equality filter.
    pub fn select_filtered(&self, desc: &EntityDescriptor, filter: &Filter) -> CommandSpec {
        let mut spec = self.select_all(desc);
        if let Some((clause, params)) = filter.to_where_clause(self.dialect, Some(desc)) {
            spec.text.push_str(" WHERE ");
            spec.text.push_str(&clause);
            spec.params = params;
        }
        spec
    }

    /// Single-row INSERT of every non-identity column. Appends `RETURNING`
    /// of the identity column when the dialect supports it.
    pub fn insert(&self, desc: &EntityDescriptor, values: &Map<String, JsonValue>) -> CommandSpec {
        let columns: Vec<&ColumnDescriptor> = desc.writable_columns().collect();
        let mut spec = if columns.is_empty() {
            CommandSpec::text(self.dialect.default_values_insert(&desc.table))
        } else {
            let mut spec = CommandSpec::text(String::new());
            let placeholders = columns
                .iter()
                .map(|c| {
                    let name = param_name(&c.property);
                    spec.push_param(name.clone(), column_value(c, values));
                    format!("@{}", name)
                })
                .collect::<Vec<_>>()
                .join(", ");
            spec.text = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.dialect.quote_ident(&desc.table),
                self.column_list(&columns),
                placeholders
            );
            spec
        };
        self.append_returning(desc, &mut spec);
        spec
    }

    /// One INSERT carrying every row. Row `i` binds its values as
    /// `@<property>_<i>`, so names never collide across rows.
    ///
    /// Returns `Ok(None)` for an empty batch.
    pub fn insert_batch(
        &self,
        desc: &EntityDescriptor,
        rows: &[Map<String, JsonValue>],
    ) -> DbResult<Option<CommandSpec>> {
        if rows.is_empty() {
            return Ok(None);
        }
        let columns: Vec<&ColumnDescriptor> = desc.writable_columns().collect();
        if columns.is_empty() {
            return Err(DbError::schema(
                "Batched insert requires at least one non-identity column",
                desc.table.clone(),
            ));
        }

        let mut spec = CommandSpec::text(String::new());
        let mut tuples = Vec::with_capacity(rows.len());
        for (row_index, values) in rows.iter().enumerate() {
            let placeholders = columns
                .iter()
                .map(|c| {
                    let name = format!("{}_{}", param_name(&c.property), row_index);
                    spec.push_param(name.clone(), column_value(c, values));
                    format!("@{}", name)
                })
                .collect::<Vec<_>>()
                .join(", ");
            tuples.push(format!("({})", placeholders));
        }
        spec.text = format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.dialect.quote_ident(&desc.table),
            self.column_list(&columns),
            tuples.join(", ")
        );
        self.append_returning(desc, &mut spec);
        Ok(Some(spec))
    }

    /// `UPDATE ... SET col = @prop, ... WHERE key = @key` without values.
    pub fn update_template(&self, desc: &EntityDescriptor) -> DbResult<String> {
        let key = desc.require_identity("update")?;
        let assignments = desc
            .writable_columns()
            .map(|c| format!("{} = @{}", self.dialect.quote_ident(&c.column), param_name(&c.property)))
            .collect::<Vec<_>>();
        if assignments.is_empty() {
            return Err(DbError::schema(
                "Update requires at least one non-identity column",
                desc.table.clone(),
            ));
        }
        Ok(format!(
            "UPDATE {} SET {} WHERE {} = @{}",
            self.dialect.quote_ident(&desc.table),
            assignments.join(", "),
            self.dialect.quote_ident(&key.column),
            param_name(&key.property)
        ))
    }

    /// Parameter set binding one entity's values to [`Self::update_template`].
    pub fn update_params(
        &self,
        desc: &EntityDescriptor,
        values: &Map<String, JsonValue>,
    ) -> DbResult<Vec<(String, QueryParam)>> {
        let key = desc.require_identity("update")?;
        let mut params: Vec<(String, QueryParam)> = desc
            .writable_columns()
            .map(|c| (param_name(&c.property), column_value(c, values)))
            .collect();
        params.push((param_name(&key.property), column_value(key, values)));
        Ok(params)
    }

    /// UPDATE of one entity by its identity value.
    pub fn update_by_key(
        &self,
        desc: &EntityDescriptor,
        values: &Map<String, JsonValue>,
    ) -> DbResult<CommandSpec> {
        let mut spec = CommandSpec::text(self.update_template(desc)?);
        spec.params = self.update_params(desc, values)?;
        Ok(spec)
    }

    /// DELETE of one entity by its identity value.
    pub fn delete_by_key(
        &self,
        desc: &EntityDescriptor,
        values: &Map<String, JsonValue>,
    ) -> DbResult<CommandSpec> {
        let key = desc.require_identity("delete")?;
        let name = param_name(&key.property);
        let mut spec = CommandSpec::text(format!(
            "DELETE FROM {} WHERE {} = @{}",
            self.dialect.quote_ident(&desc.table),
            self.dialect.quote_ident(&key.column),
            name
        ));
        spec.push_param(name, column_value(key, values));
        Ok(spec)
    }

    fn column_list(&self, columns: &[&ColumnDescriptor]) -> String {
        columns
            .iter()
            .map(|c| self.dialect.quote_ident(&c.column))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn append_returning(&self, desc: &EntityDescriptor, spec: &mut CommandSpec) {
        if let Some(key) = desc.identity() {
            if self.dialect.supports_returning() {
                spec.text.push_str(" RETURNING ");
                spec.text.push_str(&self.dialect.quote_ident(&key.column));
            }
        }
    }
}

fn column_value(col: &ColumnDescriptor, values: &Map<String, JsonValue>) -> QueryParam {
    values
        .get(&col.property)
        .map(|v| QueryParam::from_json(v, col.value_kind))
        .unwrap_or(QueryParam::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DatabaseType;
    use crate::sql::{CallStyle, compile};
    use serde_json::json;
    use std::collections::HashSet;

    fn desc() -> EntityDescriptor {
        EntityDescriptor::builder("employees")
            .identity("id")
            .column("name")
            .column_as("email", "email_address")
            .build()
    }

    fn row(name: &str, email: &str) -> Map<String, JsonValue> {
        match json!({"id": 0, "name": name, "email": email}) {
            JsonValue::Object(m) => m,
            _ => unreachable!(),
        }
    }

    fn sqlite() -> SqlBuilder {
        SqlBuilder::new(Dialect::new(DatabaseType::SQLite))
    }

    fn mysql() -> SqlBuilder {
        SqlBuilder::new(Dialect::new(DatabaseType::MySQL))
    }

    #[test]
    fn test_param_name() {
        assert_eq!(param_name("CreatedOn"), "CreatedOn");
        assert_eq!(param_name("first-name"), "first_name");
        assert_eq!(param_name("1st"), "p1st");
    }

    #[test]
    fn test_insert_excludes_identity() {
        let spec = mysql().insert(&desc(), &row("Ada", "ada@example.com"));
        assert_eq!(
            spec.text,
            "INSERT INTO `employees` (`name`, `email_address`) VALUES (@name, @email)"
        );
        assert_eq!(spec.params.len(), 2);
        assert!(spec.get_param("id").is_none());
    }

    #[test]
    fn test_insert_returning_when_supported() {
        let spec = sqlite().insert(&desc(), &row("Ada", "ada@example.com"));
        assert!(spec.text.ends_with("RETURNING \"id\""));
    }

    #[test]
    fn test_insert_default_values() {
        let d = EntityDescriptor::builder("ticks").identity("id").build();
        let spec = mysql().insert(&d, &Map::new());
        assert_eq!(spec.text, "INSERT INTO `ticks` () VALUES ()");
    }

    #[test]
    fn test_insert_batch_empty_issues_nothing() {
        assert!(sqlite().insert_batch(&desc(), &[]).unwrap().is_none());
    }

    #[test]
    fn test_insert_batch_unique_params() {
        let rows = vec![row("a", "a@x"), row("b", "b@x"), row("c", "c@x")];
        let spec = sqlite().insert_batch(&desc(), &rows).unwrap().unwrap();

        let names: HashSet<&str> = spec.params.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names.len(), 6);
        assert_eq!(spec.params.len(), 6);
        assert!(spec.text.contains("(@name_0, @email_0), (@name_1, @email_1), (@name_2, @email_2)"));
        assert_eq!(spec.get_param("name_2"), Some(&QueryParam::String("c".into())));

        let compiled = compile(&spec, Dialect::new(DatabaseType::SQLite), CallStyle::Query).unwrap();
        assert_eq!(compiled.params.len(), 6);
        assert_eq!(compiled.sql.matches('?').count(), 6);
    }

    #[test]
    fn test_update_template() {
        let text = mysql().update_template(&desc()).unwrap();
        assert_eq!(
            text,
            "UPDATE `employees` SET `name` = @name, `email_address` = @email WHERE `id` = @id"
        );
    }

    #[test]
    fn test_update_without_identity_is_schema_error() {
        let d = EntityDescriptor::builder("log").column("message").build();
        let err = sqlite().update_template(&d).unwrap_err();
        assert!(matches!(err, DbError::Schema { .. }));
        assert!(sqlite().delete_by_key(&d, &Map::new()).is_err());
        assert!(sqlite().select_by_key(&d, 1).is_err());
    }

    #[test]
    fn test_filtered_select_uses_mapped_table() {
        let filter = Filter::new().eq("email", "ada@example.com").is_null("name");
        let spec = sqlite().select_filtered(&desc(), &filter);
        assert_eq!(
            spec.text,
            "SELECT * FROM \"employees\" WHERE \"email_address\" = @email AND \"name\" IS NULL"
        );
    }
}
