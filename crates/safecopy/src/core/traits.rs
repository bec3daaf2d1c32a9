//! Core traits for streaming a dataset from a source to a destination.
//!
//! - [`Reader`]: structure, table metadata and row streams of a source
//! - [`Dumper`]: drives a whole copy run into a destination
//! - [`TableDumper`]: the per-table half a destination driver implements
//! - [`Hooker`]: optional callbacks around the table phase
//! - [`Dialect`]: identifier and literal quoting for SQL engines

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::{Relationship, SortKey, Spec};
use crate::error::Result;
use crate::orchestrator::DumpReport;

use super::value::{Row, Value};

/// Restrict a read to rows whose `column` is one of `values`.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyFilter {
    pub column: String,
    pub values: Vec<Value>,
}

impl KeyFilter {
    pub fn new(column: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            column: column.into(),
            values,
        }
    }
}

/// Options for one `read_table` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadTableOptions {
    /// Columns to select. Empty selects every column of the table.
    pub columns: Vec<String>,
    /// Raw predicate for the WHERE clause.
    pub match_: Option<String>,
    pub sorts: Vec<SortKey>,
    pub limit: Option<u64>,
    /// Relationships joined into the select.
    pub relationships: Vec<Relationship>,
    pub key_filter: Option<KeyFilter>,
}

impl ReadTableOptions {
    /// Options selecting rows of a table by key only.
    pub fn by_key(column: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            key_filter: Some(KeyFilter::new(column, values)),
            ..Default::default()
        }
    }
}

/// Read structure and rows from a source.
///
/// # Streaming
///
/// [`read_table`](Reader::read_table) pushes rows into a bounded channel, so a
/// slow consumer applies backpressure all the way to the query. The sender is
/// consumed by the call and the channel closes when it returns, whatever the
/// outcome.
#[async_trait]
pub trait Reader: Send + Sync {
    /// Schema DDL of the source.
    async fn get_structure(&self) -> Result<String>;

    /// Names of the tables in the source.
    async fn get_tables(&self) -> Result<Vec<String>>;

    /// Column names of a table.
    async fn get_columns(&self, table: &str) -> Result<Vec<String>>;

    /// Quote and qualify a column for use in a select.
    fn format_column(&self, table: &str, column: &str) -> String;

    /// Stream the rows of `table` into `rows`.
    async fn read_table(
        &self,
        table: &str,
        rows: mpsc::Sender<Row>,
        opts: ReadTableOptions,
    ) -> Result<()>;

    /// Release the underlying connections.
    async fn close(&self) -> Result<()>;
}

/// Read a whole table into memory.
///
/// Only meant for small key-filtered reads; full tables should be streamed.
pub async fn read_all(
    reader: &dyn Reader,
    table: &str,
    opts: ReadTableOptions,
) -> Result<Vec<Row>> {
    let (tx, mut rx) = mpsc::channel(1);
    let collect = async {
        let mut rows = Vec::new();
        while let Some(row) = rx.recv().await {
            rows.push(row);
        }
        rows
    };
    let (result, rows) = tokio::join!(reader.read_table(table, tx, opts), collect);
    result.map(|_| rows)
}

/// Copy a dataset into a destination.
#[async_trait]
pub trait Dumper: Send + Sync {
    /// Run a full copy: structure first, then every table.
    async fn dump(&self, spec: &Spec, cancel: CancellationToken) -> Result<DumpReport>;

    async fn close(&self) -> Result<()>;
}

/// Destination side of a copy, one table at a time.
#[async_trait]
pub trait TableDumper: Send + Sync + 'static {
    /// Apply the source structure to the destination.
    async fn dump_structure(&self, sql: &str) -> Result<()>;

    /// Consume the row stream of `table` and persist it.
    ///
    /// Rows carrying an origin are written to that table instead. Returns the
    /// number of rows written.
    async fn dump_table(&self, table: &str, rows: mpsc::Receiver<Row>) -> Result<u64>;

    /// Hooks run around the table phase, if the destination needs them.
    fn hooker(&self) -> Option<&dyn Hooker> {
        None
    }

    async fn close(&self) -> Result<()>;
}

/// Callbacks around the table phase of a dump.
#[async_trait]
pub trait Hooker: Send + Sync {
    /// Called once with every table name before any table is copied.
    async fn pre_dump_tables(&self, tables: &[String]) -> Result<()>;

    /// Called once after every table task has finished.
    async fn post_dump_tables(&self, tables: &[String]) -> Result<()>;
}

/// SQL syntax strategy for different database engines.
pub trait Dialect: Send + Sync {
    /// Dialect identifier (e.g. "postgres", "mysql").
    fn name(&self) -> &str;

    /// Quote an identifier (table name, column name, etc.).
    ///
    /// - PostgreSQL: `"identifier"`
    /// - MySQL: `` `identifier` ``
    fn quote_ident(&self, name: &str) -> String;

    /// Render a value as an SQL literal.
    fn quote_literal(&self, value: &Value) -> String;

    /// `table.column`, both quoted.
    fn qualify(&self, table: &str, column: &str) -> String {
        format!("{}.{}", self.quote_ident(table), self.quote_ident(column))
    }
}
