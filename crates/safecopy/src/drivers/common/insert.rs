//! Batched multi-row INSERT rendering shared by the SQL dumpers.
//!
//! Rows are grouped while they go to the same table with the same column
//! set. A change of either closes the batch, so the statements come out in
//! stream order and parents pulled in by relationships are inserted before
//! the rows that reference them.

use crate::core::{Dialect, Row};

/// Rows per INSERT statement.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// A rendered INSERT and the number of rows it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub table: String,
    pub sql: String,
    pub rows: u64,
}

struct Pending {
    table: String,
    columns: Vec<String>,
    tuples: Vec<String>,
}

/// Accumulates rows of one table stream into INSERT statements.
pub struct InsertBatcher<'d> {
    dialect: &'d dyn Dialect,
    batch_size: usize,
    pending: Option<Pending>,
}

impl<'d> InsertBatcher<'d> {
    pub fn new(dialect: &'d dyn Dialect) -> Self {
        Self::with_batch_size(dialect, DEFAULT_BATCH_SIZE)
    }

    pub fn with_batch_size(dialect: &'d dyn Dialect, batch_size: usize) -> Self {
        Self {
            dialect,
            batch_size: batch_size.max(1),
            pending: None,
        }
    }

    /// Add a row read from `stream_table`.
    ///
    /// Returns a finished statement when the row closed the previous batch or
    /// filled the current one.
    pub fn push(&mut self, stream_table: &str, row: &Row) -> Option<Statement> {
        if row.is_empty() {
            return None;
        }

        let table = row.table(stream_table);
        let same_batch = self
            .pending
            .as_ref()
            .is_some_and(|p| p.table == table && p.columns.iter().map(String::as_str).eq(row.columns()));

        let mut finished = None;
        if !same_batch {
            finished = self.flush();
            self.pending = Some(Pending {
                table: table.to_string(),
                columns: row.columns().map(str::to_string).collect(),
                tuples: Vec::with_capacity(self.batch_size),
            });
        }

        let tuple = render_tuple(self.dialect, row);
        if let Some(pending) = self.pending.as_mut() {
            pending.tuples.push(tuple);
            if pending.tuples.len() >= self.batch_size {
                return finished.or_else(|| self.flush());
            }
        }
        finished
    }

    /// Close the current batch, if any.
    pub fn flush(&mut self) -> Option<Statement> {
        let pending = self.pending.take()?;
        if pending.tuples.is_empty() {
            return None;
        }
        Some(Statement {
            sql: render_insert(self.dialect, &pending.table, &pending.columns, &pending.tuples),
            rows: pending.tuples.len() as u64,
            table: pending.table,
        })
    }
}

fn render_tuple(dialect: &dyn Dialect, row: &Row) -> String {
    let values: Vec<String> = row.iter().map(|(_, v)| dialect.quote_literal(v)).collect();
    format!("({})", values.join(", "))
}

/// `INSERT INTO t (c1, c2) VALUES (..), (..)` without a trailing semicolon.
pub fn render_insert(
    dialect: &dyn Dialect,
    table: &str,
    columns: &[String],
    tuples: &[String],
) -> String {
    let columns: Vec<String> = columns.iter().map(|c| dialect.quote_ident(c)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        dialect.quote_ident(table),
        columns.join(", "),
        tuples.join(", ")
    )
}
