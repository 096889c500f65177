//! Named parameter compilation.
//!
//! Commands address parameters as `@name`. Drivers want positional
//! placeholders, so the text is rewritten per dialect and the values are
//! ordered by appearance.

use crate::error::{DbError, DbResult};
use crate::models::{CommandKind, CommandSpec, DatabaseType, QueryParam};
use crate::sql::dialect::{CallStyle, Dialect};

/// A command in the driver's positional form.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledCommand {
    pub sql: String,
    pub params: Vec<QueryParam>,
}

/// Compile a command for `dialect`.
pub fn compile(spec: &CommandSpec, dialect: Dialect, style: CallStyle) -> DbResult<CompiledCommand> {
    match spec.kind {
        CommandKind::RawText => {
            if spec.text.trim().is_empty() {
                return Err(DbError::invalid_input("Command text cannot be empty"));
            }
            Ok(compile_named(&spec.text, &spec.params, dialect))
        }
        CommandKind::StoredProcedure => {
            let sql = dialect.procedure_call(spec.text.trim(), spec.params.len(), style)?;
            Ok(CompiledCommand {
                sql,
                params: spec.params.iter().map(|(_, v)| v.clone()).collect(),
            })
        }
    }
}

/// Rewrite `@name` placeholders outside quotes and comments.
///
/// Names match case-insensitively and may repeat. `@@` and an `@name` with no
/// matching parameter are copied verbatim.
pub fn compile_named(sql: &str, params: &[(String, QueryParam)], dialect: Dialect) -> CompiledCommand {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut bound = Vec::new();
    let backslash_escapes = dialect.db_type() == DatabaseType::MySQL;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' | '`' => {
                let end = skip_quoted(&chars, i, c, backslash_escapes && c != '`');
                out.extend(&chars[i..end]);
                i = end;
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                let end = chars[i..]
                    .iter()
                    .position(|&ch| ch == '\n')
                    .map(|p| i + p)
                    .unwrap_or(chars.len());
                out.extend(&chars[i..end]);
                i = end;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                let end = find_block_comment_end(&chars, i + 2);
                out.extend(&chars[i..end]);
                i = end;
            }
            '@' if chars.get(i + 1) == Some(&'@') => {
                out.push_str("@@");
                i += 2;
            }
            '@' if chars.get(i + 1).is_some_and(|&n| is_ident_start(n)) => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && is_ident_char(chars[end]) {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                match params.iter().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
                    Some((_, value)) => {
                        bound.push(value.clone());
                        out.push_str(&dialect.placeholder(bound.len()));
                    }
                    None => {
                        out.push('@');
                        out.push_str(&name);
                    }
                }
                i = end;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    CompiledCommand { sql: out, params: bound }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Index just past the closing quote. A doubled quote is an escape, and so
/// is a backslash when `backslash_escapes` is set (MySQL string literals).
fn skip_quoted(chars: &[char], start: usize, quote: char, backslash_escapes: bool) -> usize {
    let mut i = start + 1;
    while i < chars.len() {
        if backslash_escapes && chars[i] == '\\' {
            i += 2;
            continue;
        }
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}

fn find_block_comment_end(chars: &[char], from: usize) -> usize {
    let mut i = from;
    while i + 1 < chars.len() {
        if chars[i] == '*' && chars[i + 1] == '/' {
            return i + 2;
        }
        i += 1;
    }
    chars.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DatabaseType;

    fn params(pairs: &[(&str, i64)]) -> Vec<(String, QueryParam)> {
        pairs
            .iter()
            .map(|(n, v)| (n.to_string(), QueryParam::Int(*v)))
            .collect()
    }

    #[test]
    fn test_named_to_positional_postgres() {
        let compiled = compile_named(
            "SELECT * FROM t WHERE a = @a AND b = @B",
            &params(&[("a", 1), ("b", 2)]),
            Dialect::new(DatabaseType::PostgreSQL),
        );
        assert_eq!(compiled.sql, "SELECT * FROM t WHERE a = $1 AND b = $2");
        assert_eq!(compiled.params, vec![QueryParam::Int(1), QueryParam::Int(2)]);
    }

    #[test]
    fn test_order_follows_appearance_and_repeats() {
        let compiled = compile_named(
            "UPDATE t SET x = @b WHERE y = @a OR z = @b",
            &params(&[("a", 1), ("b", 2)]),
            Dialect::new(DatabaseType::SQLite),
        );
        assert_eq!(compiled.sql, "UPDATE t SET x = ? WHERE y = ? OR z = ?");
        assert_eq!(
            compiled.params,
            vec![QueryParam::Int(2), QueryParam::Int(1), QueryParam::Int(2)]
        );
    }

    #[test]
    fn test_quotes_and_comments_untouched() {
        let compiled = compile_named(
            "SELECT '@a', \"@a\" -- @a\n FROM t /* @a */ WHERE c = @a",
            &params(&[("a", 9)]),
            Dialect::new(DatabaseType::PostgreSQL),
        );
        assert_eq!(
            compiled.sql,
            "SELECT '@a', \"@a\" -- @a\n FROM t /* @a */ WHERE c = $1"
        );
        assert_eq!(compiled.params.len(), 1);
    }

    #[test]
    fn test_escaped_quote_inside_literal() {
        let compiled = compile_named(
            "SELECT 'it''s @a' WHERE c = @a",
            &params(&[("a", 9)]),
            Dialect::new(DatabaseType::MySQL),
        );
        assert_eq!(compiled.sql, "SELECT 'it''s @a' WHERE c = ?");
    }

    #[test]
    fn test_mysql_backslash_escaped_quote() {
        let compiled = compile_named(
            r"SELECT 'it\'s @a' AS s, 'c:\\' AS p, @a AS a",
            &params(&[("a", 1)]),
            Dialect::new(DatabaseType::MySQL),
        );
        assert_eq!(compiled.sql, r"SELECT 'it\'s @a' AS s, 'c:\\' AS p, ? AS a");
        assert_eq!(compiled.params, vec![QueryParam::Int(1)]);
    }

    #[test]
    fn test_backslash_is_literal_outside_mysql() {
        let compiled = compile_named(
            r"SELECT 'c:\' AS p, @a AS a",
            &params(&[("a", 1)]),
            Dialect::new(DatabaseType::PostgreSQL),
        );
        assert_eq!(compiled.sql, r"SELECT 'c:\' AS p, $1 AS a");
        assert_eq!(compiled.params.len(), 1);
    }

    #[test]
    fn test_unknown_and_system_variables_verbatim() {
        let compiled = compile_named(
            "SELECT @@version, @session_var, @a",
            &params(&[("a", 1)]),
            Dialect::new(DatabaseType::MySQL),
        );
        assert_eq!(compiled.sql, "SELECT @@version, @session_var, ?");
        assert_eq!(compiled.params.len(), 1);
    }

    #[test]
    fn test_postgres_operators_untouched() {
        let compiled = compile_named(
            "SELECT * FROM t WHERE doc @> @filter",
            &[("filter".to_string(), QueryParam::String("{}".into()))],
            Dialect::new(DatabaseType::PostgreSQL),
        );
        assert_eq!(compiled.sql, "SELECT * FROM t WHERE doc @> $1");
    }

    #[test]
    fn test_compile_stored_procedure_keeps_param_order() {
        let spec = CommandSpec::procedure("usp_report").param("to", 2).param("from", 1);
        let compiled = compile(
            &spec,
            Dialect::new(DatabaseType::MySQL),
            CallStyle::Query,
        )
        .unwrap();
        assert_eq!(compiled.sql, "CALL usp_report(?, ?)");
        assert_eq!(compiled.params, vec![QueryParam::Int(2), QueryParam::Int(1)]);
    }

    #[test]
    fn test_compile_rejects_empty_text() {
        let err = compile(
            &CommandSpec::text("  "),
            Dialect::new(DatabaseType::SQLite),
            CallStyle::Execute,
        )
        .unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
    }
}
