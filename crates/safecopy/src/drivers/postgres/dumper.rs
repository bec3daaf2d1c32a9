//! PostgreSQL destination.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Object, Pool};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::PostgresDialect;
use crate::core::{Dialect, Hooker, Row, TableDumper};
use crate::drivers::common::{bounded_write, InsertBatcher, Statement};
use crate::error::{CopyError, Result};

/// Writes rows as batched INSERTs.
///
/// Triggers, foreign-key triggers included, are disabled for the duration of
/// the table phase so rows can arrive in any order. That needs a superuser or
/// the table owner on the destination.
pub struct PostgresDumper {
    pool: Pool,
    timeout: Option<Duration>,
}

impl PostgresDumper {
    pub fn new(pool: Pool, timeout: Option<Duration>) -> Self {
        Self { pool, timeout }
    }

    async fn client(&self, table: &str) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| CopyError::table_write(table, format!("getting connection: {}", e)))
    }

    async fn execute(&self, client: &Object, stmt: Statement) -> Result<u64> {
        bounded_write(&stmt.table, self.timeout, async {
            client
                .batch_execute(&stmt.sql)
                .await
                .map_err(|e| CopyError::table_write(&stmt.table, e))?;
            Ok(stmt.rows)
        })
        .await
    }

    async fn set_triggers(&self, tables: &[String], action: &str) -> Result<()> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| CopyError::pool(e, "getting PostgreSQL connection for triggers"))?;

        for table in tables {
            let sql = format!(
                "ALTER TABLE {} {} TRIGGER ALL",
                PostgresDialect.quote_ident(table),
                action
            );
            client.batch_execute(&sql).await?;
        }
        debug!("{} triggers on {} tables", action, tables.len());
        Ok(())
    }
}

#[async_trait]
impl TableDumper for PostgresDumper {
    async fn dump_structure(&self, sql: &str) -> Result<()> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| CopyError::pool(e, "getting PostgreSQL connection for structure"))?;
        client
            .batch_execute(sql)
            .await
            .map_err(|e| CopyError::Structure(e.to_string()))?;
        info!("Applied structure ({} bytes)", sql.len());
        Ok(())
    }

    async fn dump_table(&self, table: &str, mut rows: mpsc::Receiver<Row>) -> Result<u64> {
        let client = self.client(table).await?;
        let mut batcher = InsertBatcher::new(&PostgresDialect);
        let mut written = 0u64;

        while let Some(row) = rows.recv().await {
            if let Some(stmt) = batcher.push(table, &row) {
                written += self.execute(&client, stmt).await?;
            }
        }
        if let Some(stmt) = batcher.flush() {
            written += self.execute(&client, stmt).await?;
        }

        debug!("{}: wrote {} rows", table, written);
        Ok(written)
    }

    fn hooker(&self) -> Option<&dyn Hooker> {
        Some(self)
    }

    async fn close(&self) -> Result<()> {
        self.pool.close();
        Ok(())
    }
}

#[async_trait]
impl Hooker for PostgresDumper {
    async fn pre_dump_tables(&self, tables: &[String]) -> Result<()> {
        self.set_triggers(tables, "DISABLE").await
    }

    async fn post_dump_tables(&self, tables: &[String]) -> Result<()> {
        self.set_triggers(tables, "ENABLE").await
    }
}
