//! Core abstractions shared by drivers, decorators and the dump engine.
//!
//! - [`value`]: rows and the closed set of column values
//! - [`traits`]: reader, dumper, hook and dialect contracts
//! - [`registry`]: driver registries for dependency injection

pub mod registry;
pub mod traits;
pub mod value;

// Re-export commonly used types for convenience
pub use registry::{Driver, DumperDriver, ReaderDriver, Registry};
pub use traits::{
    read_all, Dialect, Dumper, Hooker, KeyFilter, ReadTableOptions, Reader, TableDumper,
};
pub use value::{Row, Value};
