//! Configuration type definitions with auto-tuning based on system resources.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::{info, warn};

/// Prefix marking an anonymise value that is copied verbatim.
pub const LITERAL_PREFIX: &str = "literal:";

/// System resource information for auto-tuning.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total RAM in GB.
    pub total_memory_gb: f64,
    /// Number of CPU cores.
    pub cpu_cores: usize,
}

impl SystemResources {
    /// Detect system resources.
    pub fn detect() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        let total_memory_gb = sys.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0);
        let cpu_cores = sys.cpus().len();

        Self {
            total_memory_gb,
            cpu_cores,
        }
    }

    /// Log detected system resources.
    pub fn log(&self) {
        info!(
            "System resources: {:.1} GB RAM, {} CPU cores",
            self.total_memory_gb, self.cpu_cores
        );
    }
}

/// Root of the copy configuration: which tables get which treatment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Spec {
    /// Named predicates that filters may refer to by alias.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub matchers: BTreeMap<String, String>,

    /// Per-table configuration. Tables not listed are copied untouched.
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

impl Spec {
    /// Look up the configuration for a table.
    pub fn table(&self, name: &str) -> Option<&TableConfig> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// All relationships, with the owning table filled in.
    pub fn relationships(&self) -> impl Iterator<Item = Relationship> + '_ {
        self.tables.iter().flat_map(|t| t.relationships())
    }

    /// Tables whose rows only arrive through relationship expansion.
    ///
    /// Self references are excluded: a table pointing at itself is still read
    /// at the top level.
    pub fn referenced_tables(&self) -> BTreeSet<String> {
        self.relationships()
            .filter(|r| r.table != r.referenced_table)
            .map(|r| r.referenced_table)
            .collect()
    }

    /// Resolve a filter's `match` value against the global matchers.
    ///
    /// An unknown alias is used as a raw predicate.
    pub fn resolve_match<'a>(&'a self, value: &'a str) -> &'a str {
        self.matchers.get(value).map(String::as_str).unwrap_or(value)
    }
}

/// Configuration for one table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableConfig {
    /// Table name.
    pub name: String,

    /// Skip the table's rows entirely; the structure is still copied.
    #[serde(default)]
    pub ignore_data: bool,

    #[serde(default)]
    pub filter: Filter,

    /// Column to generator name, or `literal:<value>`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub anonymise: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replace: Vec<ReplaceRule>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<RelationshipConfig>,
}

impl TableConfig {
    /// Create a config with nothing but a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Relationships of this table with the owning table resolved.
    pub fn relationships(&self) -> impl Iterator<Item = Relationship> + '_ {
        self.relationships.iter().map(|r| Relationship {
            table: r.table.clone().unwrap_or_else(|| self.name.clone()),
            foreign_key: r.foreign_key.clone(),
            referenced_table: r.referenced_table.clone(),
            referenced_key: r.referenced_key.clone(),
        })
    }
}

/// Row selection for a table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Predicate text, or the name of a global matcher.
    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    pub match_: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sorts: Vec<SortKey>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

/// One ORDER BY entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub column: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Desc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Asc => f.write_str("ASC"),
            SortDirection::Desc => f.write_str("DESC"),
        }
    }
}

/// Substring replacement applied to a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaceRule {
    pub column: String,
    pub before: String,
    #[serde(default)]
    pub after: String,
}

/// Relationship as written in the configuration file.
///
/// `table` defaults to the table the relationship is declared on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    pub foreign_key: String,
    pub referenced_table: String,
    pub referenced_key: String,
}

/// A resolved foreign key: `table.foreign_key -> referenced_table.referenced_key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Relationship {
    pub table: String,
    pub foreign_key: String,
    pub referenced_table: String,
    pub referenced_key: String,
}

impl Relationship {
    pub fn new(
        table: impl Into<String>,
        foreign_key: impl Into<String>,
        referenced_table: impl Into<String>,
        referenced_key: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            foreign_key: foreign_key.into(),
            referenced_table: referenced_table.into(),
            referenced_key: referenced_key.into(),
        }
    }

    pub fn is_self_reference(&self) -> bool {
        self.table == self.referenced_table
    }
}

/// Connection options for one side of the copy.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnOpts {
    /// Connection string.
    pub dsn: String,
    /// Statement timeout. Zero means unbounded.
    pub timeout: Duration,
    /// Maximum lifetime of a pooled connection. Zero means unlimited.
    pub max_conn_lifetime: Duration,
    pub max_conns: usize,
    pub max_idle_conns: usize,
}

impl ConnOpts {
    pub fn new(dsn: impl Into<String>) -> Self {
        Self {
            dsn: dsn.into(),
            ..Default::default()
        }
    }

    /// Timeout as an option, `None` when unbounded.
    pub fn timeout(&self) -> Option<Duration> {
        (!self.timeout.is_zero()).then_some(self.timeout)
    }

    /// Lifetime as an option, `None` when unlimited.
    pub fn max_conn_lifetime(&self) -> Option<Duration> {
        (!self.max_conn_lifetime.is_zero()).then_some(self.max_conn_lifetime)
    }
}

impl Default for ConnOpts {
    fn default() -> Self {
        Self {
            dsn: String::new(),
            timeout: Duration::ZERO,
            max_conn_lifetime: Duration::ZERO,
            max_conns: 5,
            max_idle_conns: 0,
        }
    }
}

// Custom Debug implementation to redact credentials in the DSN
impl fmt::Debug for ConnOpts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnOpts")
            .field("dsn", &crate::dsn::redact(&self.dsn))
            .field("timeout", &self.timeout)
            .field("max_conn_lifetime", &self.max_conn_lifetime)
            .field("max_conns", &self.max_conns)
            .field("max_idle_conns", &self.max_idle_conns)
            .finish()
    }
}

/// Options for one copy run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub read: ConnOpts,
    pub write: ConnOpts,
    /// Tables copied at once. Auto-tuned from CPU cores if not set.
    pub concurrency: Option<usize>,
    /// Fail the run when any table fails.
    pub strict: bool,
}

impl RunOptions {
    /// Apply auto-tuned defaults based on system resources.
    ///
    /// Fills in concurrency when it wasn't set, then grows the pools to fit
    /// it: every table in flight holds one destination connection, and one
    /// source connection for its stream plus one for relationship lookups.
    pub fn with_auto_tuning(mut self, resources: &SystemResources) -> Self {
        if self.concurrency.is_none() {
            let concurrency = resources.cpu_cores.max(1);
            info!("Auto-tuned concurrency={}", concurrency);
            self.concurrency = Some(concurrency);
        }

        let concurrency = self.get_concurrency();
        grow_pool("source", &mut self.read, 2 * concurrency);
        grow_pool("destination", &mut self.write, concurrency);
        self
    }

    pub fn get_concurrency(&self) -> usize {
        self.concurrency.unwrap_or(4).max(1)
    }
}

fn grow_pool(role: &str, opts: &mut ConnOpts, needed: usize) {
    if opts.max_conns < needed {
        warn!(
            "Raising {} max_conns from {} to {} to fit the concurrency",
            role, opts.max_conns, needed
        );
        opts.max_conns = needed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relationship_table_defaults_to_owner() {
        let mut orders = TableConfig::new("orders");
        orders.relationships.push(RelationshipConfig {
            table: None,
            foreign_key: "user_id".into(),
            referenced_table: "users".into(),
            referenced_key: "id".into(),
        });

        let rels: Vec<_> = orders.relationships().collect();
        assert_eq!(rels, vec![Relationship::new("orders", "user_id", "users", "id")]);
    }

    #[test]
    fn test_referenced_tables_skip_self_references() {
        let mut employees = TableConfig::new("employees");
        employees.relationships.push(RelationshipConfig {
            table: None,
            foreign_key: "manager_id".into(),
            referenced_table: "employees".into(),
            referenced_key: "id".into(),
        });
        employees.relationships.push(RelationshipConfig {
            table: None,
            foreign_key: "dept_id".into(),
            referenced_table: "departments".into(),
            referenced_key: "id".into(),
        });
        let spec = Spec {
            tables: vec![employees],
            ..Default::default()
        };

        let referenced = spec.referenced_tables();
        assert!(referenced.contains("departments"));
        assert!(!referenced.contains("employees"));
    }

    #[test]
    fn test_resolve_match_alias() {
        let mut spec = Spec::default();
        spec.matchers
            .insert("active".into(), "users.active = TRUE".into());

        assert_eq!(spec.resolve_match("active"), "users.active = TRUE");
        assert_eq!(spec.resolve_match("users.id > 10"), "users.id > 10");
    }

    #[test]
    fn test_auto_tuning_respects_explicit_concurrency() {
        let resources = SystemResources {
            total_memory_gb: 16.0,
            cpu_cores: 12,
        };

        let tuned = RunOptions::default().with_auto_tuning(&resources);
        assert_eq!(tuned.concurrency, Some(12));

        let explicit = RunOptions {
            concurrency: Some(3),
            ..Default::default()
        }
        .with_auto_tuning(&resources);
        assert_eq!(explicit.get_concurrency(), 3);
    }

    #[test]
    fn test_auto_tuning_grows_pools_to_fit_concurrency() {
        let resources = SystemResources {
            total_memory_gb: 16.0,
            cpu_cores: 8,
        };

        let tuned = RunOptions::default().with_auto_tuning(&resources);
        assert_eq!(tuned.read.max_conns, 16);
        assert_eq!(tuned.write.max_conns, 8);

        let roomy = RunOptions {
            read: ConnOpts {
                max_conns: 40,
                ..Default::default()
            },
            concurrency: Some(2),
            ..Default::default()
        }
        .with_auto_tuning(&resources);
        assert_eq!(roomy.read.max_conns, 40);
        assert_eq!(roomy.write.max_conns, 5);
    }

    #[test]
    fn test_conn_opts_debug_redacts_password() {
        let opts = ConnOpts::new("postgres://app:super_secret@db:5432/shop");
        let debug_output = format!("{:?}", opts);
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret"));
    }

    #[test]
    fn test_zero_durations_mean_unbounded() {
        let opts = ConnOpts::default();
        assert_eq!(opts.timeout(), None);
        assert_eq!(opts.max_conn_lifetime(), None);
    }
}
