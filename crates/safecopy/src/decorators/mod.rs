//! Reader decorators that rewrite or expand row streams.
//!
//! Each decorator wraps an inner [`Reader`] and exposes the same contract.
//! When a table has nothing to do it delegates untouched; otherwise it reads
//! the inner stream through an internal channel drained by exactly one
//! transformation task, and joins that task before returning.
//!
//! [`decorate`] assembles the chain used for a copy run:
//!
//! ```text
//! Anonymiser -> Replacer -> SubsetResolver -> driver reader
//! ```
//!
//! The resolver sits innermost so rows it pulls in from other tables are
//! anonymised and rewritten according to their own table's rules.

mod anonymiser;
mod generators;
mod replacer;
mod subset;

pub use anonymiser::Anonymiser;
pub use generators::Generator;
pub use replacer::Replacer;
pub use subset::SubsetResolver;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::{Relationship, Spec};
use crate::core::{ReadTableOptions, Reader, Row};
use crate::error::{CopyError, Result};

/// Wrap `base` with every decorator `spec` configures.
pub fn decorate(base: Arc<dyn Reader>, spec: &Spec) -> Result<Arc<dyn Reader>> {
    let reader: Arc<dyn Reader> = Arc::new(SubsetResolver::new(base, spec));
    let reader: Arc<dyn Reader> = Arc::new(Replacer::new(reader, spec));
    let reader: Arc<dyn Reader> = Arc::new(Anonymiser::new(reader, spec)?);
    Ok(reader)
}

/// Relationships indexed by the table that owns the foreign key.
#[derive(Debug, Clone, Default)]
pub(crate) struct RelationshipGraph {
    edges: HashMap<String, Vec<Relationship>>,
}

impl RelationshipGraph {
    pub(crate) fn new(spec: &Spec) -> Self {
        let mut edges: HashMap<String, Vec<Relationship>> = HashMap::new();
        for rel in spec.relationships() {
            edges.entry(rel.table.clone()).or_default().push(rel);
        }
        Self { edges }
    }

    pub(crate) fn relationships_of(&self, table: &str) -> &[Relationship] {
        self.edges.get(table).map(Vec::as_slice).unwrap_or_default()
    }

    /// `table` and every table reachable from it through relationships.
    pub(crate) fn reachable(&self, table: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut stack = vec![table.to_string()];
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            for rel in self.relationships_of(&current) {
                stack.push(rel.referenced_table.clone());
            }
        }
        seen
    }
}

/// Read `table` from `inner`, passing every row through `f` on its way to `out`.
pub(crate) async fn transform<F>(
    inner: &dyn Reader,
    table: &str,
    out: mpsc::Sender<Row>,
    opts: ReadTableOptions,
    mut f: F,
) -> Result<()>
where
    F: FnMut(Row) -> Row + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Row>(1);
    let task = tokio::spawn(async move {
        while let Some(row) = rx.recv().await {
            if out.send(f(row)).await.is_err() {
                break;
            }
        }
    });

    let result = inner.read_table(table, tx, opts).await;
    task.await.map_err(|e| CopyError::table_read(table, e))?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RelationshipConfig, TableConfig};

    fn rel(foreign_key: &str, referenced_table: &str) -> RelationshipConfig {
        RelationshipConfig {
            table: None,
            foreign_key: foreign_key.into(),
            referenced_table: referenced_table.into(),
            referenced_key: "id".into(),
        }
    }

    #[test]
    fn test_reachable_is_transitive() {
        let mut items = TableConfig::new("order_items");
        items.relationships.push(rel("order_id", "orders"));
        let mut orders = TableConfig::new("orders");
        orders.relationships.push(rel("user_id", "users"));
        let spec = Spec {
            tables: vec![items, orders],
            ..Default::default()
        };

        let graph = RelationshipGraph::new(&spec);
        let reach = graph.reachable("order_items");
        assert_eq!(reach.len(), 3);
        assert!(reach.contains("users"));
        assert_eq!(graph.reachable("users").len(), 1);
        assert!(graph.relationships_of("users").is_empty());
    }

    #[test]
    fn test_reachable_terminates_on_cycles() {
        let mut a = TableConfig::new("a");
        a.relationships.push(rel("b_id", "b"));
        let mut b = TableConfig::new("b");
        b.relationships.push(rel("a_id", "a"));
        let spec = Spec {
            tables: vec![a, b],
            ..Default::default()
        };

        assert_eq!(RelationshipGraph::new(&spec).reachable("a").len(), 2);
    }
}
