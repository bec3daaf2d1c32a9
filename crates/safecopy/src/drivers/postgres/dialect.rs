//! PostgreSQL SQL dialect.

use crate::core::value::TIMESTAMP_FORMAT;
use crate::core::{Dialect, Value};

/// PostgreSQL quoting rules.
///
/// Assumes `standard_conforming_strings = on`, the default since 9.1, so
/// backslashes in string literals are not escapes.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &str {
        "postgres"
    }

    fn quote_ident(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn quote_literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Integer(v) => v.to_string(),
            Value::Float(v) if v.is_nan() => "'NaN'::float8".to_string(),
            Value::Float(v) if v.is_infinite() => {
                if v.is_sign_positive() {
                    "'Infinity'::float8".to_string()
                } else {
                    "'-Infinity'::float8".to_string()
                }
            }
            Value::Float(v) => v.to_string(),
            Value::Bool(true) => "TRUE".to_string(),
            Value::Bool(false) => "FALSE".to_string(),
            Value::Text(s) => quote_string(s),
            Value::Bytes(b) => format!("'\\x{}'::bytea", hex::encode(b)),
            Value::Timestamp(ts) => quote_string(&ts.format(TIMESTAMP_FORMAT).to_string()),
        }
    }
}

fn quote_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}
