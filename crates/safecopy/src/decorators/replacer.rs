//! Substring replacement in column values.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::{transform, RelationshipGraph};
use crate::config::{ReplaceRule, Spec};
use crate::core::{ReadTableOptions, Reader, Row, Value};
use crate::error::Result;

type Rules = HashMap<String, Vec<ReplaceRule>>;

/// Replaces the first occurrence of `before` with `after` in configured columns.
pub struct Replacer {
    inner: Arc<dyn Reader>,
    rules: Arc<Rules>,
    graph: RelationshipGraph,
}

impl Replacer {
    pub fn new(inner: Arc<dyn Reader>, spec: &Spec) -> Self {
        let rules = spec
            .tables
            .iter()
            .filter(|t| !t.replace.is_empty())
            .map(|t| (t.name.clone(), t.replace.clone()))
            .collect();

        Self {
            inner,
            rules: Arc::new(rules),
            graph: RelationshipGraph::new(spec),
        }
    }

    fn intercepts(&self, table: &str) -> bool {
        self.graph
            .reachable(table)
            .iter()
            .any(|t| self.rules.contains_key(t))
    }
}

/// Apply one rule to a value. Returns `None` when nothing changes.
fn replace_value(value: &Value, rule: &ReplaceRule) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Text(s) => s
            .contains(&rule.before)
            .then(|| Value::Text(s.replacen(&rule.before, &rule.after, 1))),
        Value::Bytes(b) => match std::str::from_utf8(b) {
            Ok(s) if s.contains(&rule.before) => Some(Value::Bytes(
                s.replacen(&rule.before, &rule.after, 1).into_bytes(),
            )),
            _ => None,
        },
        other => {
            let text = other.as_text()?;
            text.contains(&rule.before)
                .then(|| Value::Text(text.replacen(&rule.before, &rule.after, 1)))
        }
    }
}

fn replace(rules: &Rules, table: &str, mut row: Row) -> Row {
    if let Some(rules) = rules.get(row.table(table)) {
        for rule in rules {
            if let Some(value) = row.get_mut(&rule.column) {
                if let Some(replaced) = replace_value(value, rule) {
                    *value = replaced;
                }
            }
        }
    }
    row
}

#[async_trait]
impl Reader for Replacer {
    async fn get_structure(&self) -> Result<String> {
        self.inner.get_structure().await
    }

    async fn get_tables(&self) -> Result<Vec<String>> {
        self.inner.get_tables().await
    }

    async fn get_columns(&self, table: &str) -> Result<Vec<String>> {
        self.inner.get_columns(table).await
    }

    fn format_column(&self, table: &str, column: &str) -> String {
        self.inner.format_column(table, column)
    }

    async fn read_table(
        &self,
        table: &str,
        rows: mpsc::Sender<Row>,
        opts: ReadTableOptions,
    ) -> Result<()> {
        if !self.intercepts(table) {
            return self.inner.read_table(table, rows, opts).await;
        }

        debug!("{}: replacing values", table);
        let rules = self.rules.clone();
        let stream_table = table.to_string();
        transform(self.inner.as_ref(), table, rows, opts, move |row| {
            replace(&rules, &stream_table, row)
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableConfig;
    use crate::core::read_all;
    use crate::drivers::MemoryReader;

    fn rule(column: &str, before: &str, after: &str) -> ReplaceRule {
        ReplaceRule {
            column: column.into(),
            before: before.into(),
            after: after.into(),
        }
    }

    #[test]
    fn test_first_occurrence_only() {
        let replaced = replace_value(&Value::from("a-a-a"), &rule("c", "a", "b"));
        assert_eq!(replaced, Some(Value::from("b-a-a")));
    }

    #[test]
    fn test_no_match_and_null_untouched() {
        assert_eq!(replace_value(&Value::from("xyz"), &rule("c", "a", "b")), None);
        assert_eq!(replace_value(&Value::Null, &rule("c", "a", "b")), None);
    }

    #[test]
    fn test_bytes_stay_bytes() {
        let replaced = replace_value(&Value::Bytes(b"secret-key".to_vec()), &rule("c", "secret", "public"));
        assert_eq!(replaced, Some(Value::Bytes(b"public-key".to_vec())));

        let binary = Value::Bytes(vec![0xff, 0xfe]);
        assert_eq!(replace_value(&binary, &rule("c", "a", "b")), None);
    }

    #[test]
    fn test_non_text_uses_string_form() {
        let replaced = replace_value(&Value::Integer(5551234), &rule("c", "555", "000"));
        assert_eq!(replaced, Some(Value::from("0001234")));
        assert_eq!(replace_value(&Value::Integer(42), &rule("c", "9", "0")), None);
    }

    #[tokio::test]
    async fn test_replacer_over_reader() {
        let reader = MemoryReader::new();
        reader.insert_rows(
            "users",
            vec![
                [("id", Value::Integer(1)), ("email", Value::from("ann@corp.com"))]
                    .into_iter()
                    .collect(),
                [("id", Value::Integer(2)), ("email", Value::Null)]
                    .into_iter()
                    .collect(),
                [("id", Value::Integer(3)), ("email", Value::from("bob@home.net"))]
                    .into_iter()
                    .collect(),
            ],
        );
        let mut users = TableConfig::new("users");
        users.replace.push(rule("email", "@corp.com", "@example.com"));
        let spec = Spec {
            tables: vec![users],
            ..Default::default()
        };

        let replacer = Replacer::new(Arc::new(reader), &spec);
        let rows = read_all(&replacer, "users", ReadTableOptions::default())
            .await
            .unwrap();

        let emails: Vec<_> = rows.iter().map(|r| r.get("email").cloned()).collect();
        assert_eq!(
            emails,
            vec![
                Some(Value::from("ann@example.com")),
                Some(Value::Null),
                Some(Value::from("bob@home.net")),
            ]
        );
    }
}
