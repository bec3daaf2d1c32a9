//! In-process reader and dumper.
//!
//! [`MemoryReader`] serves rows inserted up front and [`MemoryDumper`] keeps
//! whatever it is sent. Together they run the whole pipeline without a
//! database, which is what the test suites and library embedders use them
//! for.
//!
//! The reader honours key filters, sorts, limits and column selections.
//! Raw `match` predicates are SQL and are ignored.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::SortDirection;
use crate::core::{Hooker, ReadTableOptions, Reader, Row, TableDumper, Value};
use crate::error::{CopyError, Result};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Source backed by in-memory tables.
#[derive(Debug, Default)]
pub struct MemoryReader {
    tables: Mutex<BTreeMap<String, Vec<Row>>>,
    failing: Mutex<HashSet<String>>,
}

impl MemoryReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append rows to `table`, creating it if needed.
    pub fn insert_rows(&self, table: &str, rows: impl IntoIterator<Item = Row>) {
        lock(&self.tables)
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    /// Make every read of `table` fail.
    pub fn fail_reads_of(&self, table: &str) {
        lock(&self.failing).insert(table.to_string());
    }

    fn select(&self, table: &str, opts: &ReadTableOptions) -> Result<Vec<Row>> {
        if lock(&self.failing).contains(table) {
            return Err(CopyError::table_read(table, "simulated read failure"));
        }

        let tables = lock(&self.tables);
        let Some(rows) = tables.get(table) else {
            return Err(CopyError::table_read(table, "no such table"));
        };

        let mut selected: Vec<Row> = rows
            .iter()
            .filter(|row| match &opts.key_filter {
                Some(filter) => row
                    .get(&filter.column)
                    .is_some_and(|v| filter.values.iter().any(|k| same_key(v, k))),
                None => true,
            })
            .cloned()
            .collect();

        if !opts.sorts.is_empty() {
            selected.sort_by(|a, b| {
                opts.sorts
                    .iter()
                    .map(|key| {
                        let ord = compare(a.get(&key.column), b.get(&key.column));
                        match key.direction {
                            SortDirection::Asc => ord,
                            SortDirection::Desc => ord.reverse(),
                        }
                    })
                    .find(|ord| ord.is_ne())
                    .unwrap_or(Ordering::Equal)
            });
        }

        if let Some(limit) = opts.limit {
            selected.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }

        if !opts.columns.is_empty() {
            selected = selected
                .into_iter()
                .map(|row| {
                    row.iter()
                        .filter(|(c, _)| opts.columns.iter().any(|w| w == c))
                        .map(|(c, v)| (c.to_string(), v.clone()))
                        .collect()
                })
                .collect();
        }

        Ok(selected)
    }
}

fn same_key(a: &Value, b: &Value) -> bool {
    a == b || (!a.is_null() && a.as_text() == b.as_text())
}

/// Order for sorting: NULLs first, numbers numerically, the rest as text.
fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.unwrap_or(&Value::Null);
    let b = b.unwrap_or(&Value::Null);
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Integer(x), Value::Integer(y)) => x.cmp(y),
        (Value::Float(x), Value::Float(y)) => x.total_cmp(y),
        (Value::Timestamp(x), Value::Timestamp(y)) => x.cmp(y),
        _ => a.as_text().cmp(&b.as_text()),
    }
}

#[async_trait]
impl Reader for MemoryReader {
    async fn get_structure(&self) -> Result<String> {
        let tables = lock(&self.tables);
        Ok(tables
            .keys()
            .map(|t| format!("-- table {}", t))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    async fn get_tables(&self) -> Result<Vec<String>> {
        Ok(lock(&self.tables).keys().cloned().collect())
    }

    async fn get_columns(&self, table: &str) -> Result<Vec<String>> {
        let tables = lock(&self.tables);
        let rows = tables
            .get(table)
            .ok_or_else(|| CopyError::table_read(table, "no such table"))?;
        let columns: BTreeSet<&str> = rows.iter().flat_map(Row::columns).collect();
        Ok(columns.into_iter().map(str::to_string).collect())
    }

    fn format_column(&self, table: &str, column: &str) -> String {
        format!("{}.{}", table, column)
    }

    async fn read_table(
        &self,
        table: &str,
        rows: mpsc::Sender<Row>,
        opts: ReadTableOptions,
    ) -> Result<()> {
        let selected = self.select(table, &opts)?;
        for row in selected {
            if rows.send(row).await.is_err() {
                debug!("{}: row consumer closed the stream", table);
                break;
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Store {
    structure: Option<String>,
    tables: BTreeMap<String, Vec<Row>>,
    events: Vec<String>,
}

/// Destination that keeps every row it receives.
///
/// Tracks how many `dump_table` calls run at once, and can hold each table
/// open for a fixed delay so tests can observe the concurrency bound.
#[derive(Debug, Default)]
pub struct MemoryDumper {
    store: Mutex<Store>,
    fail_structure: AtomicBool,
    table_delay: Duration,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl MemoryDumper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep each table open for `delay` before consuming its rows.
    #[must_use]
    pub fn with_table_delay(mut self, delay: Duration) -> Self {
        self.table_delay = delay;
        self
    }

    /// Make `dump_structure` fail.
    pub fn fail_structure(&self) {
        self.fail_structure.store(true, AtomicOrdering::SeqCst);
    }

    /// Rows written to `table`, pulled-in rows included.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        lock(&self.store).tables.get(table).cloned().unwrap_or_default()
    }

    /// Structure received, if any.
    pub fn structure(&self) -> Option<String> {
        lock(&self.store).structure.clone()
    }

    /// Calls received, in order: `structure`, hooks and `table:<name>`.
    pub fn events(&self) -> Vec<String> {
        lock(&self.store).events.clone()
    }

    /// Highest number of tables that were being written at the same time.
    pub fn max_active_tables(&self) -> usize {
        self.max_active.load(AtomicOrdering::SeqCst)
    }

    fn record(&self, event: String) {
        lock(&self.store).events.push(event);
    }
}

#[async_trait]
impl TableDumper for MemoryDumper {
    async fn dump_structure(&self, sql: &str) -> Result<()> {
        if self.fail_structure.load(AtomicOrdering::SeqCst) {
            return Err(CopyError::Structure("simulated structure failure".into()));
        }
        let mut store = lock(&self.store);
        store.structure = Some(sql.to_string());
        store.events.push("structure".into());
        Ok(())
    }

    async fn dump_table(&self, table: &str, mut rows: mpsc::Receiver<Row>) -> Result<u64> {
        self.record(format!("table:{}", table));
        let active = self.active.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        self.max_active.fetch_max(active, AtomicOrdering::SeqCst);

        if !self.table_delay.is_zero() {
            tokio::time::sleep(self.table_delay).await;
        }

        let mut written = 0u64;
        while let Some(row) = rows.recv().await {
            let target = row.table(table).to_string();
            lock(&self.store).tables.entry(target).or_default().push(row);
            written += 1;
        }

        self.active.fetch_sub(1, AtomicOrdering::SeqCst);
        Ok(written)
    }

    fn hooker(&self) -> Option<&dyn Hooker> {
        Some(self)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Hooker for MemoryDumper {
    async fn pre_dump_tables(&self, _tables: &[String]) -> Result<()> {
        self.record("pre_dump_tables".into());
        Ok(())
    }

    async fn post_dump_tables(&self, _tables: &[String]) -> Result<()> {
        self.record("post_dump_tables".into());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SortKey;
    use crate::core::read_all;

    fn people() -> MemoryReader {
        let reader = MemoryReader::new();
        reader.insert_rows(
            "people",
            [(3, "cy"), (1, "al"), (2, "bo")].into_iter().map(|(id, name)| -> Row {
                [("id", Value::Integer(id)), ("name", Value::from(name))]
                    .into_iter()
                    .collect()
            }),
        );
        reader
    }

    fn ids(rows: &[Row]) -> Vec<i64> {
        rows.iter()
            .filter_map(|r| match r.get("id") {
                Some(Value::Integer(id)) => Some(*id),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_sort_and_limit() {
        let opts = ReadTableOptions {
            sorts: vec![SortKey::desc("id")],
            limit: Some(2),
            ..Default::default()
        };
        let rows = read_all(&people(), "people", opts).await.unwrap();
        assert_eq!(ids(&rows), vec![3, 2]);
    }

    #[tokio::test]
    async fn test_key_filter_matches_text_form() {
        let opts = ReadTableOptions::by_key("id", vec![Value::from("2"), Value::Integer(3)]);
        let rows = read_all(&people(), "people", opts).await.unwrap();
        assert_eq!(ids(&rows), vec![3, 2]);
    }

    #[tokio::test]
    async fn test_column_selection() {
        let opts = ReadTableOptions {
            columns: vec!["name".into()],
            ..Default::default()
        };
        let rows = read_all(&people(), "people", opts).await.unwrap();
        assert!(rows.iter().all(|r| r.len() == 1 && r.contains("name")));
    }

    #[tokio::test]
    async fn test_failing_and_missing_tables() {
        let reader = people();
        reader.fail_reads_of("people");
        let err = read_all(&reader, "people", ReadTableOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("people"));
        assert!(read_all(&reader, "ghosts", ReadTableOptions::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_dumper_routes_by_origin() {
        let dumper = MemoryDumper::new();
        let (tx, rx) = mpsc::channel(4);
        tx.send([("id", Value::Integer(1))].into_iter().collect::<Row>().with_origin("users"))
            .await
            .unwrap();
        tx.send([("id", Value::Integer(9))].into_iter().collect()).await.unwrap();
        drop(tx);

        assert_eq!(dumper.dump_table("orders", rx).await.unwrap(), 2);
        assert_eq!(dumper.rows("users").len(), 1);
        assert_eq!(dumper.rows("orders").len(), 1);
        assert_eq!(dumper.max_active_tables(), 1);
    }
}
