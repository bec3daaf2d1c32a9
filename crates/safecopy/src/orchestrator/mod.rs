//! Dump orchestrator - main workflow coordinator.
//!
//! A run goes through four phases:
//!
//! 1. copy the source structure to the destination (errors abort the run)
//! 2. list the source tables and check configured relationships against them
//! 3. run the destination's pre-dump hook with every table name
//! 4. copy each table through its own reader/writer task pair, at most
//!    `concurrency` tables at a time, then run the post-dump hook
//!
//! A table that fails is logged and recorded in the [`DumpReport`]; the other
//! tables carry on.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::Spec;
use crate::core::{Dumper, Reader, TableDumper};
use crate::error::{CopyError, Result};

/// Result of a copy run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DumpReport {
    /// Unique run identifier.
    pub run_id: String,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the last table finished.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Tables found in the source.
    pub tables_total: usize,

    /// Tables whose data was skipped (`ignore_data`).
    pub tables_skipped: usize,

    /// Tables copied successfully.
    pub tables_success: usize,

    /// Tables that failed.
    pub tables_failed: usize,

    /// Total rows written, pulled-in rows included.
    pub rows_written: u64,

    /// Rows written per table stream.
    #[serde(default)]
    pub table_rows: BTreeMap<String, u64>,

    /// List of failed table names.
    pub failed_tables: Vec<String>,

    /// Error message per failed table.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
}

impl DumpReport {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Fail when any table failed. Used in strict mode.
    pub fn ensure_success(&self) -> Result<()> {
        if self.failed_tables.is_empty() {
            return Ok(());
        }
        Err(CopyError::TablesFailed {
            count: self.failed_tables.len(),
            tables: self.failed_tables.join(", "),
        })
    }

    fn record_success(&mut self, table: &str, rows: u64) {
        self.tables_success += 1;
        self.rows_written += rows;
        self.table_rows.insert(table.to_string(), rows);
    }

    fn record_failure(&mut self, table: &str, err: String) {
        self.tables_failed += 1;
        self.failed_tables.push(table.to_string());
        self.errors.insert(table.to_string(), err);
    }
}

/// Generic [`Dumper`] driving a [`TableDumper`] from a [`Reader`].
pub struct DumpEngine<D: TableDumper> {
    reader: Arc<dyn Reader>,
    dumper: Arc<D>,
    concurrency: usize,
}

impl<D: TableDumper> DumpEngine<D> {
    /// Create an engine copying up to `concurrency` tables at once.
    pub fn new(reader: Arc<dyn Reader>, dumper: D, concurrency: usize) -> Self {
        Self {
            reader,
            dumper: Arc::new(dumper),
            concurrency: concurrency.max(1),
        }
    }

    pub fn table_dumper(&self) -> &D {
        &self.dumper
    }

    /// Phase 1: copy the structure.
    async fn dump_structure(&self) -> Result<()> {
        let structure = self.reader.get_structure().await.map_err(into_structure)?;
        debug!("Structure is {} bytes", structure.len());
        self.dumper
            .dump_structure(&structure)
            .await
            .map_err(into_structure)
    }

    /// Spawn the reader and writer tasks of one table.
    ///
    /// The writer task releases `permit` once the table is written.
    fn spawn_table(
        &self,
        spec: &Spec,
        table: &str,
        permit: tokio::sync::OwnedSemaphorePermit,
    ) -> JoinHandle<Result<u64>> {
        let (tx, rx) = mpsc::channel(1);

        let reader = self.reader.clone();
        let opts = spec.read_options(table);
        let read_table = table.to_string();
        let read_handle =
            tokio::spawn(async move { reader.read_table(&read_table, tx, opts).await });

        let dumper = self.dumper.clone();
        let table = table.to_string();
        tokio::spawn(async move {
            let written = dumper.dump_table(&table, rx).await;
            drop(permit);

            let read = match read_handle.await {
                Ok(result) => result,
                Err(e) => Err(CopyError::table_read(&table, format!("task panicked: {}", e))),
            };
            let rows = written?;
            read?;
            Ok(rows)
        })
    }
}

/// Keep structure-phase errors in the structure category.
fn into_structure(err: CopyError) -> CopyError {
    match err {
        CopyError::Structure(_) | CopyError::Cancelled => err,
        other => CopyError::Structure(other.to_string()),
    }
}

fn hook_error(hook: &'static str) -> impl FnOnce(CopyError) -> CopyError {
    move |err| CopyError::Hook {
        hook,
        message: err.to_string(),
    }
}

#[async_trait]
impl<D: TableDumper> Dumper for DumpEngine<D> {
    async fn dump(&self, spec: &Spec, cancel: CancellationToken) -> Result<DumpReport> {
        let started_at = Utc::now();
        let mut report = DumpReport {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at,
            ..Default::default()
        };

        info!("Starting copy run: {}", report.run_id);

        info!("Phase 1: Copying structure");
        self.dump_structure().await?;

        info!("Phase 2: Listing tables");
        let tables = self.reader.get_tables().await?;
        spec.check_relationships(&tables)?;
        report.tables_total = tables.len();

        let (skipped, to_copy): (Vec<&String>, Vec<&String>) = tables
            .iter()
            .partition(|t| spec.table(t).is_some_and(|c| c.ignore_data));
        for table in &skipped {
            info!("{}: skipping data", table);
        }
        report.tables_skipped = skipped.len();

        if let Some(hooker) = self.dumper.hooker() {
            hooker
                .pre_dump_tables(&tables)
                .await
                .map_err(hook_error("pre_dump_tables"))?;
        }

        info!(
            "Phase 3: Copying {} tables with concurrency {}",
            to_copy.len(),
            self.concurrency
        );
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(to_copy.len());

        for table in to_copy {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Cancellation requested, stopping new tables");
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            debug!("{}: starting", table);
            handles.push((table.clone(), self.spawn_table(spec, table, permit)));
        }

        for (table, handle) in handles {
            match handle.await {
                Ok(Ok(rows)) => {
                    info!("{}: completed ({} rows)", table, rows);
                    report.record_success(&table, rows);
                }
                Ok(Err(e)) => {
                    error!("{}: failed - {}", table, e);
                    report.record_failure(&table, e.to_string());
                }
                Err(e) => {
                    error!("{}: task panicked - {}", table, e);
                    report.record_failure(&table, format!("Task panicked: {}", e));
                }
            }
        }

        if let Some(hooker) = self.dumper.hooker() {
            hooker
                .post_dump_tables(&tables)
                .await
                .map_err(hook_error("post_dump_tables"))?;
        }

        let completed_at = Utc::now();
        report.completed_at = completed_at;
        report.duration_seconds = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;

        info!(
            "Copy finished: {} tables ({} skipped, {} failed), {} rows in {:.1}s",
            report.tables_total,
            report.tables_skipped,
            report.tables_failed,
            report.rows_written,
            report.duration_seconds
        );

        if cancel.is_cancelled() {
            return Err(CopyError::Cancelled);
        }

        Ok(report)
    }

    async fn close(&self) -> Result<()> {
        self.dumper.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableConfig;
    use crate::core::{Row, Value};
    use crate::drivers::{MemoryDumper, MemoryReader};

    fn source(tables: &[(&str, i64)]) -> Arc<MemoryReader> {
        let reader = MemoryReader::new();
        for (table, count) in tables {
            reader.insert_rows(
                table,
                (1..=*count).map(|id| -> Row { [("id", Value::Integer(id))].into_iter().collect() }),
            );
        }
        Arc::new(reader)
    }

    #[tokio::test]
    async fn test_copies_every_table() {
        let engine = DumpEngine::new(
            source(&[("users", 10), ("orders", 25)]),
            MemoryDumper::new(),
            2,
        );

        let report = engine
            .dump(&Spec::default(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.tables_total, 2);
        assert_eq!(report.tables_success, 2);
        assert_eq!(report.rows_written, 35);
        assert_eq!(engine.table_dumper().rows("users").len(), 10);
        assert!(engine.table_dumper().structure().is_some());
    }

    #[tokio::test]
    async fn test_ignore_data_skips_table() {
        let engine = DumpEngine::new(
            source(&[("users", 10), ("audit", 5)]),
            MemoryDumper::new(),
            2,
        );
        let mut audit = TableConfig::new("audit");
        audit.ignore_data = true;
        let spec = Spec {
            tables: vec![audit],
            ..Default::default()
        };

        let report = engine.dump(&spec, CancellationToken::new()).await.unwrap();
        assert_eq!(report.tables_skipped, 1);
        assert_eq!(report.tables_success, 1);
        assert!(engine.table_dumper().rows("audit").is_empty());
    }

    #[tokio::test]
    async fn test_structure_failure_aborts() {
        let dumper = MemoryDumper::new();
        dumper.fail_structure();
        let engine = DumpEngine::new(source(&[("users", 1)]), dumper, 2);

        let err = engine
            .dump(&Spec::default(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CopyError::Structure(_)));
        assert!(engine.table_dumper().rows("users").is_empty());
    }

    #[tokio::test]
    async fn test_table_failure_is_recorded() {
        let reader = source(&[("users", 3), ("orders", 3)]);
        reader.fail_reads_of("orders");
        let engine = DumpEngine::new(reader, MemoryDumper::new(), 2);

        let report = engine
            .dump(&Spec::default(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.tables_success, 1);
        assert_eq!(report.failed_tables, vec!["orders".to_string()]);
        assert!(report.errors["orders"].contains("orders"));
        assert!(matches!(
            report.ensure_success(),
            Err(CopyError::TablesFailed { count: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_referenced_table_is_config_error() {
        let engine = DumpEngine::new(source(&[("orders", 3)]), MemoryDumper::new(), 2);
        let mut orders = TableConfig::new("orders");
        orders
            .relationships
            .push(crate::config::RelationshipConfig {
                table: None,
                foreign_key: "user_id".into(),
                referenced_table: "users".into(),
                referenced_key: "id".into(),
            });
        let spec = Spec {
            tables: vec![orders],
            ..Default::default()
        };

        let err = engine
            .dump(&spec, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CopyError::Config(_)));
        assert!(engine.table_dumper().rows("orders").is_empty());
    }

    #[tokio::test]
    async fn test_hooks_wrap_table_phase() {
        let engine = DumpEngine::new(source(&[("users", 2)]), MemoryDumper::new(), 1);
        engine
            .dump(&Spec::default(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            engine.table_dumper().events(),
            vec![
                "structure".to_string(),
                "pre_dump_tables".to_string(),
                "table:users".to_string(),
                "post_dump_tables".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let engine = DumpEngine::new(source(&[("users", 2)]), MemoryDumper::new(), 1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = engine.dump(&Spec::default(), cancel).await.unwrap_err();
        assert!(matches!(err, CopyError::Cancelled));
        assert!(engine.table_dumper().rows("users").is_empty());
        assert!(engine
            .table_dumper()
            .events()
            .contains(&"post_dump_tables".to_string()));
    }

    #[test]
    fn test_report_json() {
        let report = DumpReport {
            run_id: "abc".into(),
            tables_total: 1,
            ..Default::default()
        };
        let json = report.to_json().unwrap();
        assert!(json.contains("\"run_id\": \"abc\""));
        assert!(!json.contains("errors"));
    }
}
