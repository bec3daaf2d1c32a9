//! MySQL/MariaDB SQL dialect.

use crate::core::value::TIMESTAMP_FORMAT;
use crate::core::{Dialect, Value};

/// MySQL quoting rules for the default `sql_mode` (backslash escapes on).
#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlDialect;

impl Dialect for MysqlDialect {
    fn name(&self) -> &str {
        "mysql"
    }

    fn quote_ident(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn quote_literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Integer(v) => v.to_string(),
            // MySQL has no representation for NaN or infinities.
            Value::Float(v) if !v.is_finite() => "NULL".to_string(),
            Value::Float(v) => v.to_string(),
            Value::Bool(true) => "TRUE".to_string(),
            Value::Bool(false) => "FALSE".to_string(),
            Value::Text(s) => quote_string(s),
            Value::Bytes(b) => format!("X'{}'", hex::encode(b)),
            Value::Timestamp(ts) => quote_string(&ts.format(TIMESTAMP_FORMAT).to_string()),
        }
    }
}

fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x1a' => out.push_str("\\Z"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}
