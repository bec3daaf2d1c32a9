//! Relationship-driven subsetting.
//!
//! When a table is limited or filtered, the rows it references in other
//! tables must come along or the copy breaks its foreign keys. For every row
//! read from a table with relationships, the resolver fetches the referenced
//! rows and publishes them, tagged with their own table, ahead of the row
//! that needed them. Referenced tables are not read on their own: their
//! content is exactly what the expansion pulls in.
//!
//! Self references (`employees.manager_id -> employees.id`) are expanded
//! too. The table is still read at the top level, and a row already
//! published as someone's parent is not forwarded again.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::RelationshipGraph;
use crate::config::Spec;
use crate::core::{read_all, ReadTableOptions, Reader, Row};
use crate::error::{CopyError, Result};

/// Key of an emitted row: table, key column and the key's text form.
type SeenKey = (String, String, String);

/// Pulls in rows referenced through configured relationships.
pub struct SubsetResolver {
    state: Arc<State>,
}

struct State {
    inner: Arc<dyn Reader>,
    graph: RelationshipGraph,
    referenced: BTreeSet<String>,
    /// Key columns other tables point at, per referenced table.
    referenced_keys: Vec<(String, String)>,
    seen: Mutex<HashSet<SeenKey>>,
}

impl SubsetResolver {
    pub fn new(inner: Arc<dyn Reader>, spec: &Spec) -> Self {
        let mut referenced_keys: Vec<(String, String)> = spec
            .relationships()
            .map(|r| (r.referenced_table, r.referenced_key))
            .collect();
        referenced_keys.sort();
        referenced_keys.dedup();

        Self {
            state: Arc::new(State {
                inner,
                graph: RelationshipGraph::new(spec),
                referenced: spec.referenced_tables(),
                referenced_keys,
                seen: Mutex::new(HashSet::new()),
            }),
        }
    }
}

/// Whether a row reached the consumer.
enum Sent {
    Delivered,
    ConsumerClosed,
}

impl State {
    /// Record the keys of `row` so later references to it are not fetched.
    ///
    /// Returns false when every key of the row had already been recorded.
    fn mark_emitted(&self, table: &str, row: &Row) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        let mut fresh = false;
        let mut any_key = false;
        for (_, key) in self.referenced_keys.iter().filter(|(t, _)| t == table) {
            if let Some(value) = row.get(key).and_then(|v| v.as_text()) {
                any_key = true;
                fresh |= seen.insert((table.to_string(), key.clone(), value.into_owned()));
            }
        }
        fresh || !any_key
    }

    fn is_seen(&self, key: &SeenKey) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(key)
    }

    /// Publish every row referenced by `row`, depth first, ahead of it.
    fn expand<'a>(
        &'a self,
        table: &'a str,
        row: &'a Row,
        out: &'a mpsc::Sender<Row>,
    ) -> BoxFuture<'a, Result<Sent>> {
        async move {
            for rel in self.graph.relationships_of(table) {
                let Some(value) = row.get(&rel.foreign_key).filter(|v| !v.is_null()) else {
                    continue;
                };
                let Some(text) = value.as_text() else {
                    continue;
                };
                let key = (
                    rel.referenced_table.clone(),
                    rel.referenced_key.clone(),
                    text.into_owned(),
                );
                if self.is_seen(&key) {
                    continue;
                }

                let parents = read_all(
                    self.inner.as_ref(),
                    &rel.referenced_table,
                    ReadTableOptions::by_key(&rel.referenced_key, vec![value.clone()]),
                )
                .await?;
                if parents.is_empty() {
                    warn!(
                        "{}: {} = {} references a missing {} row",
                        table, rel.foreign_key, key.2, rel.referenced_table
                    );
                }

                for parent in parents {
                    if !self.mark_emitted(&rel.referenced_table, &parent) {
                        continue;
                    }
                    if let Sent::ConsumerClosed =
                        self.expand(&rel.referenced_table, &parent, out).await?
                    {
                        return Ok(Sent::ConsumerClosed);
                    }
                    let parent = parent.with_origin(rel.referenced_table.clone());
                    if out.send(parent).await.is_err() {
                        return Ok(Sent::ConsumerClosed);
                    }
                }
            }
            Ok(Sent::Delivered)
        }
        .boxed()
    }
}

#[async_trait]
impl Reader for SubsetResolver {
    async fn get_structure(&self) -> Result<String> {
        self.state.inner.get_structure().await
    }

    async fn get_tables(&self) -> Result<Vec<String>> {
        self.state.inner.get_tables().await
    }

    async fn get_columns(&self, table: &str) -> Result<Vec<String>> {
        self.state.inner.get_columns(table).await
    }

    fn format_column(&self, table: &str, column: &str) -> String {
        self.state.inner.format_column(table, column)
    }

    async fn read_table(
        &self,
        table: &str,
        rows: mpsc::Sender<Row>,
        opts: ReadTableOptions,
    ) -> Result<()> {
        if self.state.referenced.contains(table) {
            debug!("{}: rows arrive through relationships only", table);
            return Ok(());
        }
        if self.state.graph.relationships_of(table).is_empty() {
            return self.state.inner.read_table(table, rows, opts).await;
        }

        debug!("{}: resolving relationships", table);
        let (tx, mut rx) = mpsc::channel::<Row>(1);
        let state = self.state.clone();
        let stream_table = table.to_string();
        let task = tokio::spawn(async move {
            while let Some(row) = rx.recv().await {
                let fresh = state.mark_emitted(&stream_table, &row);
                if let Sent::ConsumerClosed = state.expand(&stream_table, &row, &rows).await? {
                    break;
                }
                // Already published as the parent of an earlier row.
                if !fresh {
                    continue;
                }
                if rows.send(row).await.is_err() {
                    break;
                }
            }
            Ok::<_, CopyError>(())
        });

        let result = self.state.inner.read_table(table, tx, opts).await;
        let expanded = task.await.map_err(|e| CopyError::table_read(table, e))?;
        result.and(expanded)
    }

    async fn close(&self) -> Result<()> {
        self.state.inner.close().await
    }
}
