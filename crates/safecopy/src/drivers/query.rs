//! SQL text destination.
//!
//! Renders the structure and batched INSERT statements instead of executing
//! them:
//!
//! ```text
//! os://stdout/
//! os://stderr/
//! file:///var/backups/shop.sql?dialect=mysql
//! ```
//!
//! Literals follow the `dialect` parameter (`postgres` or `mysql`, default
//! `postgres`), which should match the source.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use super::{MysqlDialect, PostgresDialect};
use crate::config::ConnOpts;
use crate::core::{Dialect, Driver, Dumper, DumperDriver, Reader, Row, TableDumper};
use crate::dsn::Dsn;
use crate::error::{CopyError, Result};
use crate::orchestrator::DumpEngine;

use super::common::InsertBatcher;

type Output = Box<dyn AsyncWrite + Send + Unpin>;

/// Accepts `os://stdout/`, `os://stderr/` and `file:///path` DSNs.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryDriver;

impl Driver for QueryDriver {
    fn is_supported(&self, dsn: &Dsn) -> bool {
        match dsn.scheme.as_str() {
            "os" => matches!(dsn.host.as_str(), "stdout" | "stderr"),
            "file" => !dsn.datasource.is_empty(),
            _ => false,
        }
    }
}

#[async_trait]
impl DumperDriver for QueryDriver {
    async fn connect(
        &self,
        opts: &ConnOpts,
        reader: Arc<dyn Reader>,
        concurrency: usize,
    ) -> Result<Box<dyn Dumper>> {
        let dsn = Dsn::parse(&opts.dsn)?;
        let dumper = QueryDumper::open(&dsn).await?;
        Ok(Box::new(DumpEngine::new(reader, dumper, concurrency)))
    }
}

/// Writes SQL statements to a stream, one complete statement at a time.
pub struct QueryDumper {
    out: Mutex<Output>,
    dialect: Box<dyn Dialect>,
}

impl QueryDumper {
    /// Open the output named by `dsn`. Files are created or truncated.
    pub async fn open(dsn: &Dsn) -> Result<Self> {
        let dialect = dialect_for(dsn.param("dialect"))?;
        let out: Output = match (dsn.scheme.as_str(), dsn.host.as_str()) {
            ("os", "stdout") => Box::new(tokio::io::stdout()),
            ("os", "stderr") => Box::new(tokio::io::stderr()),
            ("file", _) => {
                let path = format!("/{}", dsn.datasource);
                info!("Writing SQL to {}", path);
                Box::new(tokio::fs::File::create(&path).await?)
            }
            _ => return Err(CopyError::NoSupportedDriver(dsn.to_string())),
        };
        Ok(Self::new(out, dialect))
    }

    pub fn new(out: Output, dialect: Box<dyn Dialect>) -> Self {
        Self {
            out: Mutex::new(out),
            dialect,
        }
    }

    async fn write(&self, text: &str) -> Result<()> {
        let mut out = self.out.lock().await;
        out.write_all(text.as_bytes()).await?;
        Ok(())
    }
}

fn dialect_for(name: Option<&str>) -> Result<Box<dyn Dialect>> {
    match name.unwrap_or("postgres").to_lowercase().as_str() {
        "postgres" | "postgresql" | "pg" => Ok(Box::new(PostgresDialect)),
        "mysql" | "mariadb" => Ok(Box::new(MysqlDialect)),
        other => Err(CopyError::Config(format!(
            "Unknown dialect '{}'. Supported dialects: postgres, mysql",
            other
        ))),
    }
}

#[async_trait]
impl TableDumper for QueryDumper {
    async fn dump_structure(&self, sql: &str) -> Result<()> {
        self.write(sql.trim_end()).await?;
        self.write("\n\n").await
    }

    async fn dump_table(&self, table: &str, mut rows: mpsc::Receiver<Row>) -> Result<u64> {
        let mut batcher = InsertBatcher::new(self.dialect.as_ref());
        let mut written = 0u64;

        while let Some(row) = rows.recv().await {
            if let Some(stmt) = batcher.push(table, &row) {
                self.write(&format!("{};\n", stmt.sql))
                    .await
                    .map_err(|e| CopyError::table_write(&stmt.table, e))?;
                written += stmt.rows;
            }
        }
        if let Some(stmt) = batcher.flush() {
            self.write(&format!("{};\n", stmt.sql))
                .await
                .map_err(|e| CopyError::table_write(&stmt.table, e))?;
            written += stmt.rows;
        }

        debug!("{}: rendered {} rows", table, written);
        Ok(written)
    }

    async fn close(&self) -> Result<()> {
        self.out.lock().await.flush().await?;
        Ok(())
    }
}
