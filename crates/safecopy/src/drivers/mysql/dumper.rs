//! MySQL destination.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnection, MySqlPool};
use sqlx::Executor;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::MysqlDialect;
use crate::core::{Row, TableDumper};
use crate::drivers::common::{InsertBatcher, Statement};
use crate::error::{CopyError, Result};

/// Writes rows as batched INSERTs over connections with foreign-key checks
/// turned off.
pub struct MysqlDumper {
    pool: MySqlPool,
    timeout: Option<Duration>,
}

impl MysqlDumper {
    pub fn new(pool: MySqlPool, timeout: Option<Duration>) -> Self {
        Self { pool, timeout }
    }

    async fn execute(&self, conn: &mut MySqlConnection, stmt: Statement) -> Result<u64> {
        let query = conn.execute(sqlx::raw_sql(&stmt.sql));
        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, query).await.map_err(|_| {
                CopyError::table_write(&stmt.table, format!("statement timed out after {:?}", limit))
            })?,
            None => query.await,
        };
        result.map_err(|e| CopyError::table_write(&stmt.table, e))?;
        Ok(stmt.rows)
    }
}

#[async_trait]
impl TableDumper for MysqlDumper {
    async fn dump_structure(&self, sql: &str) -> Result<()> {
        sqlx::raw_sql(sql)
            .execute(&self.pool)
            .await
            .map_err(|e| CopyError::Structure(e.to_string()))?;
        info!("Applied structure ({} bytes)", sql.len());
        Ok(())
    }

    async fn dump_table(&self, table: &str, mut rows: mpsc::Receiver<Row>) -> Result<u64> {
        let mut pooled = self
            .pool
            .acquire()
            .await
            .map_err(|e| CopyError::table_write(table, format!("getting connection: {}", e)))?;
        let conn: &mut MySqlConnection = &mut pooled;
        let mut batcher = InsertBatcher::new(&MysqlDialect);
        let mut written = 0u64;

        while let Some(row) = rows.recv().await {
            if let Some(stmt) = batcher.push(table, &row) {
                written += self.execute(conn, stmt).await?;
            }
        }
        if let Some(stmt) = batcher.flush() {
            written += self.execute(conn, stmt).await?;
        }

        debug!("{}: wrote {} rows", table, written);
        Ok(written)
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}
