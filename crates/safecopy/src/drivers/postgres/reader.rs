//! PostgreSQL source connection.
//!
//! Tables and columns come from `information_schema` in the current schema.
//! The structure is produced by `pg_dump --schema-only`, which has to be on
//! the `PATH`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use deadpool_postgres::Pool;
use futures::StreamExt;
use tokio::process::Command;
use tokio_postgres::types::{FromSql, ToSql};
use tracing::debug;

use super::PostgresDialect;
use crate::core::{Dialect, Row, Value};
use crate::dsn::Dsn;
use crate::engine::{RowStream, SqlConnection};
use crate::error::{CopyError, Result};

/// Lines of `pg_dump` output that must not reach the destination.
///
/// Emptying `search_path` would stick to the pooled session that runs the
/// structure and break the unqualified INSERTs that follow.
const DROPPED_STRUCTURE_PREFIXES: &[&str] = &["\\", "SELECT pg_catalog.set_config('search_path'"];

/// PostgreSQL access for the [`ReadEngine`](crate::engine::ReadEngine).
pub struct PostgresConnection {
    pool: Pool,
    dsn: Dsn,
}

impl PostgresConnection {
    pub fn new(pool: Pool, dsn: Dsn) -> Self {
        Self { pool, dsn }
    }

    async fn client(&self, context: &str) -> Result<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .map_err(|e| CopyError::pool(e, context.to_string()))
    }
}

#[async_trait]
impl SqlConnection for PostgresConnection {
    fn dialect(&self) -> &dyn Dialect {
        &PostgresDialect
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let client = self.client("listing PostgreSQL tables").await?;
        let query = r#"
            SELECT table_name::text
            FROM information_schema.tables
            WHERE table_type = 'BASE TABLE'
              AND table_schema = current_schema()
            ORDER BY table_name
        "#;

        let rows = client.query(query, &[]).await?;
        Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
    }

    async fn list_columns(&self, table: &str) -> Result<Vec<String>> {
        let client = self.client("listing PostgreSQL columns").await?;
        let query = r#"
            SELECT column_name::text
            FROM information_schema.columns
            WHERE table_schema = current_schema() AND table_name = $1
            ORDER BY ordinal_position
        "#;

        let rows = client.query(query, &[&table]).await?;
        if rows.is_empty() {
            return Err(CopyError::table_read(table, "table has no columns or does not exist"));
        }
        Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
    }

    async fn structure(&self, tables: &[String]) -> Result<String> {
        if tables.is_empty() {
            return Ok(String::new());
        }

        let mut cmd = Command::new("pg_dump");
        cmd.args(pg_dump_args(&self.dsn, tables)).kill_on_drop(true);
        if !self.dsn.password.is_empty() {
            cmd.env("PGPASSWORD", &self.dsn.password);
        }
        if let Some(mode) = self.dsn.param("sslmode") {
            cmd.env("PGSSLMODE", mode);
        }

        debug!("Running pg_dump for {} tables", tables.len());
        let output = cmd
            .output()
            .await
            .map_err(|e| CopyError::Structure(format!("running pg_dump: {}", e)))?;
        if !output.status.success() {
            return Err(CopyError::Structure(format!(
                "pg_dump exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(clean_structure(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn query<'a>(&'a self, sql: &'a str) -> Result<RowStream<'a>> {
        let client = self.client("getting PostgreSQL connection").await?;
        let params: [&(dyn ToSql + Sync); 0] = [];
        let rows = client.query_raw(sql, params).await?;

        // The pooled client has to outlive the stream it feeds.
        Ok(rows
            .map(move |row| {
                let _client = &client;
                decode_row(&row?)
            })
            .boxed())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close();
        Ok(())
    }
}

fn pg_dump_args(dsn: &Dsn, tables: &[String]) -> Vec<String> {
    let mut args = vec![
        "--schema-only".to_string(),
        "--no-owner".to_string(),
        "--no-privileges".to_string(),
        "--host".to_string(),
        if dsn.host.is_empty() { "localhost".to_string() } else { dsn.host.clone() },
        "--dbname".to_string(),
        dsn.datasource.clone(),
    ];
    if !dsn.port.is_empty() {
        args.push("--port".to_string());
        args.push(dsn.port.clone());
    }
    if !dsn.username.is_empty() {
        args.push("--username".to_string());
        args.push(dsn.username.clone());
    }
    for table in tables {
        args.push("--table".to_string());
        args.push(PostgresDialect.quote_ident(table));
    }
    args
}

fn clean_structure(raw: &str) -> String {
    raw.lines()
        .filter(|line| !DROPPED_STRUCTURE_PREFIXES.iter().any(|p| line.starts_with(p)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn decode_row(row: &tokio_postgres::Row) -> Result<Row> {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = decode_value(row, idx, column.type_().name()).map_err(|e| {
            CopyError::RowDecode(format!(
                "column {} ({}): {}",
                column.name(),
                column.type_().name(),
                e
            ))
        })?;
        out.insert(column.name(), value);
    }
    Ok(out)
}

fn get<'a, T: FromSql<'a>>(
    row: &'a tokio_postgres::Row,
    idx: usize,
) -> std::result::Result<Option<T>, tokio_postgres::Error> {
    row.try_get::<_, Option<T>>(idx)
}

/// Convert one column by its PostgreSQL type name.
///
/// Types without a native [`Value`] variant travel as text.
fn decode_value(
    row: &tokio_postgres::Row,
    idx: usize,
    type_name: &str,
) -> std::result::Result<Value, tokio_postgres::Error> {
    let value = match type_name {
        "bool" => get::<bool>(row, idx)?.map(Value::Bool),
        "int2" => get::<i16>(row, idx)?.map(|v| Value::Integer(v.into())),
        "int4" => get::<i32>(row, idx)?.map(|v| Value::Integer(v.into())),
        "int8" => get::<i64>(row, idx)?.map(Value::Integer),
        "oid" => get::<u32>(row, idx)?.map(|v| Value::Integer(v.into())),
        "float4" => get::<f32>(row, idx)?.map(|v| Value::Float(v.into())),
        "float8" => get::<f64>(row, idx)?.map(Value::Float),
        "numeric" => get::<rust_decimal::Decimal>(row, idx)?.map(|v| Value::Text(v.to_string())),
        "uuid" => get::<uuid::Uuid>(row, idx)?.map(|v| Value::Text(v.to_string())),
        "timestamp" => get::<NaiveDateTime>(row, idx)?.map(Value::Timestamp),
        "timestamptz" => get::<DateTime<Utc>>(row, idx)?.map(|v| Value::Timestamp(v.naive_utc())),
        "date" => get::<NaiveDate>(row, idx)?.map(|v| Value::Text(v.format("%Y-%m-%d").to_string())),
        "time" => get::<NaiveTime>(row, idx)?.map(|v| Value::Text(v.format("%H:%M:%S%.f").to_string())),
        "bytea" => get::<Vec<u8>>(row, idx)?.map(Value::Bytes),
        "json" | "jsonb" => get::<serde_json::Value>(row, idx)?.map(|v| Value::Text(v.to_string())),
        _ => get::<String>(row, idx)?.map(Value::Text),
    };
    Ok(value.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pg_dump_args() {
        let dsn = Dsn::parse("postgres://bruce:secret@db:5433/shop").unwrap();
        let args = pg_dump_args(&dsn, &["users".to_string(), "Orders".to_string()]);

        assert!(args.starts_with(&["--schema-only".to_string()]));
        assert!(args.windows(2).any(|w| w == ["--port", "5433"]));
        assert!(args.windows(2).any(|w| w == ["--username", "bruce"]));
        assert!(args.windows(2).any(|w| w == ["--table", "\"Orders\""]));
        assert!(!args.iter().any(|a| a.contains("secret")));
    }

    #[test]
    fn test_clean_structure() {
        let raw = "\\restrict abc\nSET statement_timeout = 0;\nSELECT pg_catalog.set_config('search_path', '', false);\nCREATE TABLE public.users (id integer);\n\\unrestrict abc";
        assert_eq!(
            clean_structure(raw),
            "SET statement_timeout = 0;\nCREATE TABLE public.users (id integer);"
        );
    }
}
