//! Pieces shared by the SQL drivers.
//!
//! - [`tls`]: TLS configuration for PostgreSQL connections
//! - [`insert`]: batched INSERT rendering for the dumpers

pub mod insert;
pub mod tls;

use std::future::Future;
use std::time::Duration;

pub use insert::{render_insert, InsertBatcher, Statement, DEFAULT_BATCH_SIZE};
pub use tls::{SslMode, TlsBuilder};

use crate::error::{CopyError, Result};

/// Run a write against `table`, failing it once `timeout` elapses.
pub(crate) async fn bounded_write<T>(
    table: &str,
    timeout: Option<Duration>,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
            CopyError::table_write(table, format!("statement timed out after {:?}", limit))
        })?,
        None => fut.await,
    }
}
