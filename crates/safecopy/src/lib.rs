//! # safecopy
//!
//! Stream a relational database into another one, table by table, rewriting
//! rows on the way.
//!
//! This library provides:
//!
//! - **Streaming copies** from PostgreSQL or MySQL into PostgreSQL, MySQL or
//!   SQL text, with bounded memory per table
//! - **Anonymisation** of configured columns with literals or fake data
//! - **Substring replacement** in configured columns
//! - **Subsetting** through filters, sorts and limits, with relationships
//!   pulling in the rows that limited tables reference
//! - **Bounded concurrency** across tables and a per-run [`DumpReport`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use safecopy::{decorate, ConnOpts, DumperRegistry, ReaderRegistry, Spec};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> safecopy::Result<()> {
//!     let spec = Spec::load(".safecopy.yaml")?;
//!     let readers = ReaderRegistry::with_builtins();
//!     let dumpers = DumperRegistry::with_builtins();
//!
//!     let source = readers.connect(&ConnOpts::new("postgres://app@prod/shop")).await?;
//!     let reader = decorate(source, &spec)?;
//!     let dumper = dumpers
//!         .connect(&ConnOpts::new("postgres://app@localhost/shop"), reader.clone(), 4)
//!         .await?;
//!
//!     let report = dumper.dump(&spec, CancellationToken::new()).await?;
//!     println!("Copied {} rows", report.rows_written);
//!     dumper.close().await?;
//!     reader.close().await
//! }
//! ```

pub mod config;
pub mod core;
pub mod decorators;
pub mod drivers;
pub mod dsn;
pub mod engine;
pub mod error;
pub mod orchestrator;

// Re-exports for convenient access
pub use config::{ConnOpts, RunOptions, Spec, SystemResources, TableConfig};
pub use crate::core::{
    Dialect, Dumper, DumperDriver, Hooker, ReadTableOptions, Reader, ReaderDriver, Registry, Row,
    TableDumper, Value,
};
pub use decorators::{decorate, Anonymiser, Generator, Replacer, SubsetResolver};
pub use dsn::Dsn;
pub use error::{CopyError, Result};
pub use orchestrator::{DumpEngine, DumpReport};

/// Registry of source drivers.
pub type ReaderRegistry = Registry<dyn ReaderDriver>;

/// Registry of destination drivers.
pub type DumperRegistry = Registry<dyn DumperDriver>;
