//! Generic table-read engine shared by the SQL source drivers.
//!
//! Drivers implement the small [`SqlConnection`] trait (catalog queries,
//! structure dump and a raw row stream). [`ReadEngine`] turns that into a
//! full [`Reader`]: it caches the table list and column lists, builds the
//! select for each read and enforces the read timeout.

pub mod query;

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::{mpsc, OnceCell, RwLock};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::core::{Dialect, ReadTableOptions, Reader, Row};
use crate::error::{CopyError, Result};

pub use query::build_select;

/// Stream of decoded rows.
///
/// A row that cannot be decoded is yielded as [`CopyError::RowDecode`] and
/// skipped by the engine; any other error ends the read.
pub type RowStream<'a> = BoxStream<'a, Result<Row>>;

/// Driver-level access to a SQL source.
#[async_trait]
pub trait SqlConnection: Send + Sync + 'static {
    fn dialect(&self) -> &dyn Dialect;

    async fn list_tables(&self) -> Result<Vec<String>>;

    async fn list_columns(&self, table: &str) -> Result<Vec<String>>;

    /// Schema DDL for `tables`.
    async fn structure(&self, tables: &[String]) -> Result<String>;

    /// Run a select and stream its rows.
    async fn query<'a>(&'a self, sql: &'a str) -> Result<RowStream<'a>>;

    async fn close(&self) -> Result<()>;
}

/// [`Reader`] over any [`SqlConnection`].
pub struct ReadEngine<C: SqlConnection> {
    conn: C,
    timeout: Option<Duration>,
    tables: OnceCell<Vec<String>>,
    columns: RwLock<HashMap<String, Vec<String>>>,
}

impl<C: SqlConnection> ReadEngine<C> {
    /// Create an engine. `timeout` bounds each `read_table` call.
    pub fn new(conn: C, timeout: Option<Duration>) -> Self {
        Self {
            conn,
            timeout,
            tables: OnceCell::new(),
            columns: RwLock::new(HashMap::new()),
        }
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }

    /// Await `fut`, failing with `ReadTimeout` once `deadline` passes.
    async fn bounded<T>(
        &self,
        table: &str,
        deadline: Option<Instant>,
        fut: impl Future<Output = T>,
    ) -> Result<T> {
        match (deadline, self.timeout) {
            (Some(deadline), Some(timeout)) => {
                timeout_at(deadline, fut)
                    .await
                    .map_err(|_| CopyError::ReadTimeout {
                        table: table.to_string(),
                        timeout,
                    })
            }
            _ => Ok(fut.await),
        }
    }
}

#[async_trait]
impl<C: SqlConnection> Reader for ReadEngine<C> {
    async fn get_structure(&self) -> Result<String> {
        let tables = self.get_tables().await?;
        self.conn.structure(&tables).await
    }

    async fn get_tables(&self) -> Result<Vec<String>> {
        let tables = self
            .tables
            .get_or_try_init(|| async {
                let tables = self.conn.list_tables().await?;
                debug!("Found {} tables", tables.len());
                Ok::<_, CopyError>(tables)
            })
            .await?;
        Ok(tables.clone())
    }

    async fn get_columns(&self, table: &str) -> Result<Vec<String>> {
        if let Some(columns) = self.columns.read().await.get(table) {
            return Ok(columns.clone());
        }

        let columns = self.conn.list_columns(table).await?;
        self.columns
            .write()
            .await
            .entry(table.to_string())
            .or_insert_with(|| columns.clone());
        Ok(columns)
    }

    fn format_column(&self, table: &str, column: &str) -> String {
        self.conn.dialect().qualify(table, column)
    }

    async fn read_table(
        &self,
        table: &str,
        rows: mpsc::Sender<Row>,
        opts: ReadTableOptions,
    ) -> Result<()> {
        let columns = if opts.columns.is_empty() {
            self.get_columns(table).await?
        } else {
            opts.columns.clone()
        };
        let sql = build_select(self.conn.dialect(), table, &columns, &opts);
        debug!("{}: {}", table, sql);

        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut stream = self
            .bounded(table, deadline, self.conn.query(&sql))
            .await?
            .map_err(|e| CopyError::table_read(table, e))?;

        let mut published = 0u64;
        let mut skipped = 0u64;
        while let Some(item) = self.bounded(table, deadline, stream.next()).await? {
            match item {
                Ok(row) => {
                    if rows.send(row).await.is_err() {
                        debug!("{}: row consumer closed the stream", table);
                        break;
                    }
                    published += 1;
                }
                Err(CopyError::RowDecode(message)) => {
                    warn!("{}: skipping row - {}", table, message);
                    skipped += 1;
                }
                Err(e) => return Err(CopyError::table_read(table, e)),
            }
        }

        debug!("{}: read {} rows ({} skipped)", table, published, skipped);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.conn.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;
    use crate::drivers::PostgresDialect;
    use futures::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted connection: fixed rows, optional delays and failures.
    struct FakeConn {
        rows: Vec<Result<Row>>,
        first_row_delay: Duration,
        row_delay: Duration,
        fail_list_tables: AtomicUsize,
        list_tables_calls: AtomicUsize,
        list_columns_calls: AtomicUsize,
        queries: Mutex<Vec<String>>,
    }

    impl FakeConn {
        fn new(rows: Vec<Result<Row>>) -> Self {
            Self {
                rows,
                first_row_delay: Duration::ZERO,
                row_delay: Duration::ZERO,
                fail_list_tables: AtomicUsize::new(0),
                list_tables_calls: AtomicUsize::new(0),
                list_columns_calls: AtomicUsize::new(0),
                queries: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SqlConnection for FakeConn {
        fn dialect(&self) -> &dyn Dialect {
            &PostgresDialect
        }

        async fn list_tables(&self) -> Result<Vec<String>> {
            self.list_tables_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_list_tables.load(Ordering::SeqCst) > 0 {
                self.fail_list_tables.fetch_sub(1, Ordering::SeqCst);
                return Err(CopyError::pool("connection refused", "list tables"));
            }
            Ok(vec!["users".into()])
        }

        async fn list_columns(&self, _table: &str) -> Result<Vec<String>> {
            self.list_columns_calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec!["id".into(), "email".into()])
        }

        async fn structure(&self, tables: &[String]) -> Result<String> {
            Ok(format!("-- {}", tables.join(",")))
        }

        async fn query<'a>(&'a self, sql: &'a str) -> Result<RowStream<'a>> {
            self.queries.lock().unwrap().push(sql.to_string());
            tokio::time::sleep(self.first_row_delay).await;
            let row_delay = self.row_delay;
            let rows: Vec<Result<Row>> = self
                .rows
                .iter()
                .map(|r| match r {
                    Ok(row) => Ok(row.clone()),
                    Err(e) => Err(CopyError::RowDecode(e.to_string())),
                })
                .collect();
            Ok(stream::iter(rows)
                .then(move |r| async move {
                    tokio::time::sleep(row_delay).await;
                    r
                })
                .boxed())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn user(id: i64) -> Result<Row> {
        Ok([("id", Value::Integer(id)), ("email", Value::from("a@b.c"))]
            .into_iter()
            .collect())
    }

    async fn drain(mut rx: mpsc::Receiver<Row>) -> Vec<Row> {
        let mut out = Vec::new();
        while let Some(row) = rx.recv().await {
            out.push(row);
        }
        out
    }

    #[tokio::test]
    async fn test_tables_cached_but_errors_are_not() {
        let conn = FakeConn::new(vec![]);
        conn.fail_list_tables.store(1, Ordering::SeqCst);
        let engine = ReadEngine::new(conn, None);

        assert!(engine.get_tables().await.is_err());
        assert_eq!(engine.get_tables().await.unwrap(), vec!["users"]);
        assert_eq!(engine.get_tables().await.unwrap(), vec!["users"]);
        assert_eq!(engine.connection().list_tables_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_columns_memoized() {
        let engine = ReadEngine::new(FakeConn::new(vec![]), None);
        engine.get_columns("users").await.unwrap();
        engine.get_columns("users").await.unwrap();
        assert_eq!(
            engine.connection().list_columns_calls.load(Ordering::SeqCst),
            1
        );
    }

    #[tokio::test]
    async fn test_read_table_streams_rows_and_closes() {
        let engine = ReadEngine::new(FakeConn::new(vec![user(1), user(2)]), None);
        let (tx, rx) = mpsc::channel(1);

        let (res, rows) = tokio::join!(
            engine.read_table("users", tx, ReadTableOptions::default()),
            drain(rx)
        );
        res.unwrap();
        assert_eq!(rows.len(), 2);

        let queries = engine.connection().queries.lock().unwrap().clone();
        assert_eq!(
            queries,
            vec![r#"SELECT "users"."id", "users"."email" FROM "users""#.to_string()]
        );
    }

    #[tokio::test]
    async fn test_decode_errors_skip_row() {
        let bad = Err(CopyError::RowDecode("bad bytes".into()));
        let engine = ReadEngine::new(FakeConn::new(vec![user(1), bad, user(3)]), None);
        let (tx, rx) = mpsc::channel(1);

        let (res, rows) = tokio::join!(
            engine.read_table("users", tx, ReadTableOptions::default()),
            drain(rx)
        );
        res.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.get("id").cloned()).collect();
        assert_eq!(ids, vec![Some(Value::Integer(1)), Some(Value::Integer(3))]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_before_first_row() {
        let mut conn = FakeConn::new(vec![user(1)]);
        conn.first_row_delay = Duration::from_secs(10);
        let engine = ReadEngine::new(conn, Some(Duration::from_secs(1)));
        let (tx, rx) = mpsc::channel(1);

        let (res, rows) = tokio::join!(
            engine.read_table("users", tx, ReadTableOptions::default()),
            drain(rx)
        );
        assert!(matches!(res, Err(CopyError::ReadTimeout { .. })));
        assert!(rows.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_while_streaming_keeps_published_rows() {
        let mut conn = FakeConn::new(vec![user(1), user(2), user(3), user(4)]);
        conn.row_delay = Duration::from_millis(400);
        let engine = ReadEngine::new(conn, Some(Duration::from_secs(1)));
        let (tx, rx) = mpsc::channel(1);

        let (res, rows) = tokio::join!(
            engine.read_table("users", tx, ReadTableOptions::default()),
            drain(rx)
        );
        assert!(matches!(res, Err(CopyError::ReadTimeout { .. })));
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_structure_covers_all_tables() {
        let engine = ReadEngine::new(FakeConn::new(vec![]), None);
        assert_eq!(engine.get_structure().await.unwrap(), "-- users");
    }
}
