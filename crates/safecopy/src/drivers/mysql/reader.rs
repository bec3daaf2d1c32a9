//! MySQL source connection.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use futures::StreamExt;
use sqlx::mysql::{MySqlPool, MySqlRow};
use sqlx::{Column, Row as _, TypeInfo, ValueRef};
use tracing::debug;

use super::MysqlDialect;
use crate::core::{Dialect, Row, Value};
use crate::engine::{RowStream, SqlConnection};
use crate::error::{CopyError, Result};

/// MySQL access for the [`ReadEngine`](crate::engine::ReadEngine).
pub struct MysqlConnection {
    pool: MySqlPool,
}

impl MysqlConnection {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SqlConnection for MysqlConnection {
    fn dialect(&self) -> &dyn Dialect {
        &MysqlDialect
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let query = r#"
            SELECT TABLE_NAME
            FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = DATABASE()
              AND TABLE_TYPE = 'BASE TABLE'
            ORDER BY TABLE_NAME
        "#;

        let rows = sqlx::query(query).fetch_all(&self.pool).await?;
        rows.iter().map(|r| text_column(r, 0)).collect()
    }

    async fn list_columns(&self, table: &str) -> Result<Vec<String>> {
        let query = r#"
            SELECT COLUMN_NAME
            FROM information_schema.COLUMNS
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION
        "#;

        let rows = sqlx::query(query).bind(table).fetch_all(&self.pool).await?;
        if rows.is_empty() {
            return Err(CopyError::table_read(table, "table has no columns or does not exist"));
        }
        rows.iter().map(|r| text_column(r, 0)).collect()
    }

    async fn structure(&self, tables: &[String]) -> Result<String> {
        let mut statements = Vec::with_capacity(tables.len());
        for table in tables {
            let sql = format!("SHOW CREATE TABLE {}", MysqlDialect.quote_ident(table));
            let row = sqlx::query(&sql)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| CopyError::Structure(format!("{}: {}", table, e)))?;
            statements.push(format!("{};", text_column(&row, 1)?));
        }
        debug!("Read structure of {} tables", statements.len());
        Ok(statements.join("\n\n"))
    }

    async fn query<'a>(&'a self, sql: &'a str) -> Result<RowStream<'a>> {
        let rows = sqlx::query(sql).fetch(&self.pool);
        Ok(rows.map(|row| decode_row(&row?)).boxed())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// Catalog and `SHOW` output may come back as binary strings.
fn text_column(row: &MySqlRow, idx: usize) -> Result<String> {
    match row.try_get::<String, _>(idx) {
        Ok(s) => Ok(s),
        Err(_) => {
            let bytes = row.try_get::<Vec<u8>, _>(idx)?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
    }
}

fn decode_row(row: &MySqlRow) -> Result<Row> {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let type_name = column.type_info().name();
        let value = decode_value(row, idx, type_name).map_err(|e| {
            CopyError::RowDecode(format!("column {} ({}): {}", column.name(), type_name, e))
        })?;
        out.insert(column.name(), value);
    }
    Ok(out)
}

/// Convert one column by its MySQL type name.
fn decode_value(row: &MySqlRow, idx: usize, type_name: &str) -> std::result::Result<Value, sqlx::Error> {
    if row.try_get_raw(idx)?.is_null() {
        return Ok(Value::Null);
    }

    let value = match type_name.to_ascii_uppercase().as_str() {
        "BOOLEAN" => Value::Bool(row.try_get::<bool, _>(idx)?),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            Value::Integer(row.try_get::<i64, _>(idx)?)
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => {
            let v = row.try_get::<u64, _>(idx)?;
            i64::try_from(v)
                .map(Value::Integer)
                .unwrap_or_else(|_| Value::Text(v.to_string()))
        }
        "FLOAT" => Value::Float(row.try_get::<f32, _>(idx)?.into()),
        "DOUBLE" => Value::Float(row.try_get::<f64, _>(idx)?),
        "DECIMAL" => Value::Text(row.try_get::<rust_decimal::Decimal, _>(idx)?.to_string()),
        "DATETIME" | "TIMESTAMP" => Value::Timestamp(row.try_get::<NaiveDateTime, _>(idx)?),
        "DATE" => Value::Text(row.try_get::<NaiveDate, _>(idx)?.format("%Y-%m-%d").to_string()),
        "TIME" => Value::Text(row.try_get::<NaiveTime, _>(idx)?.format("%H:%M:%S%.f").to_string()),
        "YEAR" => Value::Integer(row.try_get_unchecked::<u16, _>(idx)?.into()),
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT"
        | "GEOMETRY" => Value::Bytes(row.try_get::<Vec<u8>, _>(idx)?),
        // CHAR, VARCHAR, TEXT, ENUM, SET, JSON
        _ => match row.try_get::<String, _>(idx) {
            Ok(s) => Value::Text(s),
            Err(_) => {
                let bytes = row.try_get_unchecked::<Vec<u8>, _>(idx)?;
                match String::from_utf8(bytes) {
                    Ok(s) => Value::Text(s),
                    Err(e) => Value::Bytes(e.into_bytes()),
                }
            }
        },
    };
    Ok(value)
}
