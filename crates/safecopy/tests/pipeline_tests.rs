//! End-to-end copies over the in-memory drivers.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use safecopy::drivers::{MemoryDumper, MemoryReader};
use safecopy::{decorate, CopyError, DumpEngine, Dumper, Row, Spec, Value};
use tokio_util::sync::CancellationToken;

fn users(count: i64) -> Vec<Row> {
    (1..=count)
        .map(|id| {
            [
                ("id", Value::Integer(id)),
                ("email", Value::from(format!("user{id}@corp.com"))),
                ("name", Value::from(format!("User {id}"))),
                ("uuid", Value::from(format!("00000000-0000-0000-0000-{id:012}"))),
            ]
            .into_iter()
            .collect()
        })
        .collect()
}

fn orders(count: i64, user_count: i64) -> Vec<Row> {
    (1..=count)
        .map(|id| {
            [
                ("id", Value::Integer(id)),
                ("user_id", Value::Integer(id % user_count + 1)),
                ("notes", Value::from("ship to ops@corp.com, cc ops@corp.com")),
            ]
            .into_iter()
            .collect()
        })
        .collect()
}

fn source() -> Arc<MemoryReader> {
    let reader = MemoryReader::new();
    reader.insert_rows("users", users(10));
    Arc::new(reader)
}

async fn run(
    reader: Arc<MemoryReader>,
    spec: &Spec,
    concurrency: usize,
    dumper: MemoryDumper,
) -> (safecopy::Result<safecopy::DumpReport>, DumpEngine<MemoryDumper>) {
    let reader = decorate(reader, spec).unwrap();
    let engine = DumpEngine::new(reader, dumper, concurrency);
    let report = engine.dump(spec, CancellationToken::new()).await;
    (report, engine)
}

fn int(row: &Row, column: &str) -> i64 {
    match row.get(column) {
        Some(Value::Integer(v)) => *v,
        other => panic!("{} is not an integer: {:?}", column, other),
    }
}

#[tokio::test]
async fn test_unconfigured_tables_are_copied_verbatim() {
    let (report, engine) = run(source(), &Spec::default(), 2, MemoryDumper::new()).await;
    let report = report.unwrap();

    assert_eq!(report.tables_success, 1);
    assert_eq!(report.rows_written, 10);
    assert_eq!(engine.table_dumper().rows("users"), users(10));
}

#[tokio::test]
async fn test_literal_anonymisation() {
    let spec = Spec::from_yaml(
        r#"
tables:
  - name: users
    anonymise:
      email: "literal:redacted@test"
"#,
    )
    .unwrap();

    let (report, engine) = run(source(), &spec, 2, MemoryDumper::new()).await;
    report.unwrap();

    let copied = engine.table_dumper().rows("users");
    assert_eq!(copied.len(), 10);
    for (before, after) in users(10).iter().zip(&copied) {
        assert_eq!(after.get("email"), Some(&Value::from("redacted@test")));
        assert_eq!(after.get("id"), before.get("id"));
        assert_eq!(after.get("name"), before.get("name"));
        assert_eq!(after.get("uuid"), before.get("uuid"));
    }
}

#[tokio::test]
async fn test_generated_values_differ_from_source() {
    let spec = Spec::from_yaml(
        r#"
tables:
  - name: users
    anonymise:
      uuid: UUID
"#,
    )
    .unwrap();

    let (report, engine) = run(source(), &spec, 2, MemoryDumper::new()).await;
    report.unwrap();

    let copied = engine.table_dumper().rows("users");
    for (before, after) in users(10).iter().zip(&copied) {
        assert_ne!(after.get("uuid"), before.get("uuid"));
        assert_eq!(after.get("email"), before.get("email"));
    }
}

#[tokio::test]
async fn test_replace_first_occurrence() {
    let reader = MemoryReader::new();
    reader.insert_rows("orders", orders(3, 1));
    reader.insert_rows("users", users(1));
    let spec = Spec::from_yaml(
        r#"
tables:
  - name: orders
    replace:
      - column: notes
        before: "@corp.com"
        after: "@example.com"
"#,
    )
    .unwrap();

    let (report, engine) = run(Arc::new(reader), &spec, 2, MemoryDumper::new()).await;
    report.unwrap();

    for row in engine.table_dumper().rows("orders") {
        assert_eq!(
            row.get("notes"),
            Some(&Value::from("ship to ops@example.com, cc ops@corp.com"))
        );
    }
    assert_eq!(
        engine.table_dumper().rows("users")[0].get("email"),
        Some(&Value::from("user1@corp.com"))
    );
}

#[tokio::test]
async fn test_limit_with_relationship_pulls_only_referenced_rows() {
    let reader = MemoryReader::new();
    reader.insert_rows("users", users(30));
    reader.insert_rows("orders", orders(100, 30));
    let spec = Spec::from_yaml(
        r#"
tables:
  - name: orders
    filter:
      limit: 4
      sorts:
        - column: id
          direction: asc
    relationships:
      - foreign_key: user_id
        referenced_table: users
        referenced_key: id
  - name: users
    anonymise:
      email: "literal:hidden"
"#,
    )
    .unwrap();

    let (report, engine) = run(Arc::new(reader), &spec, 2, MemoryDumper::new()).await;
    let report = report.unwrap();
    assert_eq!(report.tables_failed, 0);

    let copied_orders = engine.table_dumper().rows("orders");
    assert_eq!(copied_orders.len(), 4);
    assert_eq!(
        copied_orders.iter().map(|r| int(r, "id")).collect::<Vec<_>>(),
        vec![1, 2, 3, 4]
    );

    let referenced: BTreeSet<i64> = copied_orders.iter().map(|r| int(r, "user_id")).collect();
    let copied_users = engine.table_dumper().rows("users");
    let user_ids: BTreeSet<i64> = copied_users.iter().map(|r| int(r, "id")).collect();
    assert_eq!(copied_users.len(), referenced.len());
    assert_eq!(user_ids, referenced);

    // Pulled-in rows follow their own table's rules.
    assert!(copied_users
        .iter()
        .all(|r| r.get("email") == Some(&Value::from("hidden"))));
}

#[tokio::test]
async fn test_concurrency_bound() {
    let reader = MemoryReader::new();
    for table in ["a", "b", "c", "d", "e", "f"] {
        reader.insert_rows(table, users(3));
    }
    let dumper = MemoryDumper::new().with_table_delay(Duration::from_millis(30));

    let (report, engine) = run(Arc::new(reader), &Spec::default(), 2, dumper).await;
    let report = report.unwrap();

    assert_eq!(report.tables_success, 6);
    assert!(engine.table_dumper().max_active_tables() <= 2);
    assert!(engine.table_dumper().max_active_tables() >= 1);
}

#[tokio::test]
async fn test_partial_failure_and_strict_mode() {
    let reader = MemoryReader::new();
    reader.insert_rows("users", users(5));
    reader.insert_rows("orders", orders(5, 5));
    reader.fail_reads_of("orders");

    let (report, engine) = run(Arc::new(reader), &Spec::default(), 2, MemoryDumper::new()).await;
    let report = report.unwrap();

    assert_eq!(report.tables_success, 1);
    assert_eq!(report.tables_failed, 1);
    assert_eq!(report.failed_tables, vec!["orders".to_string()]);
    assert_eq!(engine.table_dumper().rows("users").len(), 5);

    let err = report.ensure_success().unwrap_err();
    assert!(matches!(err, CopyError::TablesFailed { .. }));
    assert_eq!(err.exit_code(), 4);
}

#[test]
fn test_unknown_generator_is_rejected_at_load() {
    let err = Spec::from_yaml(
        r#"
tables:
  - name: users
    anonymise:
      email: NotAGenerator
"#,
    )
    .unwrap_err();
    assert!(matches!(err, CopyError::Config(_)));
    assert_eq!(err.exit_code(), 2);
}
