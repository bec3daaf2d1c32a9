//! Column anonymisation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::{transform, Generator, RelationshipGraph};
use crate::config::{Spec, LITERAL_PREFIX};
use crate::core::{ReadTableOptions, Reader, Row, Value};
use crate::error::{CopyError, Result};

/// What to put in an anonymised column.
#[derive(Debug, Clone, PartialEq)]
enum Directive {
    Literal(String),
    Generate(Generator),
}

impl Directive {
    fn parse(table: &str, column: &str, raw: &str) -> Result<Self> {
        if let Some(literal) = raw.strip_prefix(LITERAL_PREFIX) {
            return Ok(Directive::Literal(literal.to_string()));
        }
        Generator::lookup(raw).map(Directive::Generate).ok_or_else(|| {
            CopyError::Config(format!(
                "{}: unknown generator '{}' for column '{}'",
                table, raw, column
            ))
        })
    }

    fn value(&self) -> Value {
        match self {
            Directive::Literal(s) => Value::Text(s.clone()),
            Directive::Generate(g) => g.generate(),
        }
    }
}

type Rules = HashMap<String, Vec<(String, Directive)>>;

/// Replaces configured columns with literals or generated fake data.
pub struct Anonymiser {
    inner: Arc<dyn Reader>,
    rules: Arc<Rules>,
    graph: RelationshipGraph,
}

impl Anonymiser {
    /// Wrap `inner`. Fails if the configuration names an unknown generator.
    pub fn new(inner: Arc<dyn Reader>, spec: &Spec) -> Result<Self> {
        let mut rules = Rules::new();
        for table in &spec.tables {
            if table.anonymise.is_empty() {
                continue;
            }
            let directives = table
                .anonymise
                .iter()
                .map(|(column, raw)| Ok((column.clone(), Directive::parse(&table.name, column, raw)?)))
                .collect::<Result<Vec<_>>>()?;
            rules.insert(table.name.clone(), directives);
        }

        Ok(Self {
            inner,
            rules: Arc::new(rules),
            graph: RelationshipGraph::new(spec),
        })
    }

    fn intercepts(&self, table: &str) -> bool {
        self.graph
            .reachable(table)
            .iter()
            .any(|t| self.rules.contains_key(t))
    }
}

fn anonymise(rules: &Rules, table: &str, mut row: Row) -> Row {
    if let Some(directives) = rules.get(row.table(table)) {
        for (column, directive) in directives {
            if let Some(value) = row.get_mut(column) {
                *value = directive.value();
            }
        }
    }
    row
}

#[async_trait]
impl Reader for Anonymiser {
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

        debug!("{}: anonymising rows", table);
        let rules = self.rules.clone();
        let stream_table = table.to_string();
        transform(self.inner.as_ref(), table, rows, opts, move |row| {
            anonymise(&rules, &stream_table, row)
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}
