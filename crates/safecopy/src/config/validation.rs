//! Configuration validation.

use std::collections::HashSet;

use super::{Spec, LITERAL_PREFIX};
use crate::decorators::Generator;
use crate::error::{CopyError, Result};

/// Validate the configuration.
pub fn validate(spec: &Spec) -> Result<()> {
    let mut names = HashSet::new();

    for table in &spec.tables {
        if table.name.is_empty() {
            return Err(CopyError::Config("tables[].name is required".into()));
        }
        if !names.insert(table.name.as_str()) {
            return Err(CopyError::Config(format!(
                "table '{}' is configured more than once",
                table.name
            )));
        }

        if let Some(0) = table.filter.limit {
            return Err(CopyError::Config(format!(
                "{}: filter.limit must be at least 1",
                table.name
            )));
        }
        if table.filter.sorts.iter().any(|s| s.column.is_empty()) {
            return Err(CopyError::Config(format!(
                "{}: filter.sorts[].column is required",
                table.name
            )));
        }

        for (column, directive) in &table.anonymise {
            if directive.starts_with(LITERAL_PREFIX) {
                continue;
            }
            if Generator::lookup(directive).is_none() {
                return Err(CopyError::Config(format!(
                    "{}: unknown generator '{}' for column '{}'",
                    table.name, directive, column
                )));
            }
        }

        for rule in &table.replace {
            if rule.column.is_empty() || rule.before.is_empty() {
                return Err(CopyError::Config(format!(
                    "{}: replace rules need a column and a non-empty 'before'",
                    table.name
                )));
            }
        }

        for rel in table.relationships() {
            if rel.table.is_empty()
                || rel.foreign_key.is_empty()
                || rel.referenced_table.is_empty()
                || rel.referenced_key.is_empty()
            {
                return Err(CopyError::Config(format!(
                    "{}: relationships need foreign_key, referenced_table and referenced_key",
                    table.name
                )));
            }
        }
    }

    Ok(())
}

/// Check that every referenced table exists in the source.
pub fn check_relationships(spec: &Spec, tables: &[String]) -> Result<()> {
    let known: HashSet<&str> = tables.iter().map(String::as_str).collect();
    let mut missing: Vec<String> = spec
        .relationships()
        .filter(|r| !known.contains(r.referenced_table.as_str()))
        .map(|r| format!("{}.{} -> {}", r.table, r.foreign_key, r.referenced_table))
        .collect();

    if missing.is_empty() {
        return Ok(());
    }
    missing.dedup();
    Err(CopyError::Config(format!(
        "relationships reference tables missing from the source: {}",
        missing.join(", ")
    )))
}
