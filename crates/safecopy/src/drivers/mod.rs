//! Database driver implementations.
//!
//! - [`postgres`]: PostgreSQL reader and dumper
//! - [`mysql`]: MySQL/MariaDB reader and dumper
//! - [`query`]: SQL text dumper (stdout, stderr or a file)
//! - [`memory`]: in-process reader and dumper
//! - [`common`]: TLS and INSERT rendering shared by the SQL drivers
//!
//! # Adding New Databases
//!
//! 1. Create a module under `drivers/` with a [`Dialect`](crate::core::Dialect)
//! 2. Implement [`SqlConnection`](crate::engine::SqlConnection) for the source
//!    side and [`TableDumper`](crate::core::TableDumper) for the destination
//! 3. Implement `ReaderDriver` / `DumperDriver` on a unit driver type and
//!    register it in the `with_builtins()` registries

pub mod common;
pub mod memory;
pub mod mysql;
pub mod postgres;
pub mod query;

pub use common::{SslMode, TlsBuilder};
pub use memory::{MemoryDumper, MemoryReader};
pub use mysql::{MysqlDialect, MysqlDriver};
pub use postgres::{PostgresDialect, PostgresDriver};
pub use query::{QueryDriver, QueryDumper};
