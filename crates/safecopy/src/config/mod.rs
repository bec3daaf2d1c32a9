//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::core::ReadTableOptions;
use crate::error::Result;
use std::path::Path;

/// Starter configuration written by `safecopy init`.
pub const TEMPLATE: &str = r#"# safecopy configuration
#
# Tables not listed here are copied untouched.

matchers:
  active_users: "users.active = TRUE"

tables:
  - name: users
    filter:
      match: active_users
      sorts:
        - column: created_at
          direction: desc
    anonymise:
      email: EmailAddress
      first_name: FirstName
      last_name: LastName
      password: "literal:changeme"

  - name: orders
    filter:
      limit: 100
    replace:
      - column: notes
        before: "@example.com"
        after: "@example.invalid"
    relationships:
      - foreign_key: user_id
        referenced_table: users
        referenced_key: id

  - name: audit_log
    ignore_data: true
"#;

impl Spec {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let spec: Spec = serde_yaml::from_str(yaml)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Fail when a relationship points at a table missing from `tables`.
    pub fn check_relationships(&self, tables: &[String]) -> Result<()> {
        validation::check_relationships(self, tables)
    }

    /// Read options for a top-level read of `table`.
    pub fn read_options(&self, table: &str) -> ReadTableOptions {
        let Some(config) = self.table(table) else {
            return ReadTableOptions::default();
        };

        ReadTableOptions {
            match_: config
                .filter
                .match_
                .as_deref()
                .map(|m| self.resolve_match(m).to_string()),
            sorts: config.filter.sorts.clone(),
            limit: config.filter.limit,
            relationships: config.relationships().collect(),
            ..Default::default()
        }
    }
}
