//! SELECT construction for table reads.

use std::collections::HashSet;

use crate::core::{Dialect, ReadTableOptions};

/// Build the select for one `read_table` call.
///
/// Columns are qualified by `table`. Each table referenced by `table` is
/// `LEFT JOIN`ed once, on its first relationship, so that match predicates
/// may refer to it by name. Key filter values are rendered as literals of the
/// dialect.
pub fn build_select(
    dialect: &dyn Dialect,
    table: &str,
    columns: &[String],
    opts: &ReadTableOptions,
) -> String {
    let qtable = dialect.quote_ident(table);

    let select_list = if columns.is_empty() {
        format!("{}.*", qtable)
    } else {
        columns
            .iter()
            .map(|c| dialect.qualify(table, c))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut sql = format!("SELECT {} FROM {}", select_list, qtable);

    let mut joined = HashSet::new();
    for rel in &opts.relationships {
        if rel.table != table
            || rel.is_self_reference()
            || !joined.insert(rel.referenced_table.as_str())
        {
            continue;
        }
        sql.push_str(&format!(
            " LEFT JOIN {} ON {} = {}",
            dialect.quote_ident(&rel.referenced_table),
            dialect.qualify(table, &rel.foreign_key),
            dialect.qualify(&rel.referenced_table, &rel.referenced_key),
        ));
    }

    let mut conditions = Vec::new();
    if let Some(predicate) = opts.match_.as_deref().filter(|p| !p.trim().is_empty()) {
        conditions.push(format!("({})", predicate));
    }
    if let Some(filter) = &opts.key_filter {
        let column = dialect.qualify(table, &filter.column);
        if filter.values.is_empty() {
            conditions.push("1 = 0".to_string());
        } else {
            let values = filter
                .values
                .iter()
                .map(|v| dialect.quote_literal(v))
                .collect::<Vec<_>>()
                .join(", ");
            conditions.push(format!("{} IN ({})", column, values));
        }
    }
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }

    if !opts.sorts.is_empty() {
        let order = opts
            .sorts
            .iter()
            .map(|s| {
                let column = if s.column.contains('.') {
                    s.column.clone()
                } else {
                    dialect.qualify(table, &s.column)
                };
                format!("{} {}", column, s.direction)
            })
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(" ORDER BY ");
        sql.push_str(&order);
    }

    if let Some(limit) = opts.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    sql
}
