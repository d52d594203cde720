//! Reconstruction through the public traversal: limits, column dropping,
//! alias qualification, and idempotence.

mod common;

use bifrost_core::{Dialect, Error};
use common::{autofix, kind};
use rstest::rstest;

#[rstest]
#[case::sqlite(Dialect::Sqlite)]
#[case::mysql(Dialect::Mysql)]
fn missing_limit_is_inserted(#[case] dialect: Dialect) {
    let sql = "SELECT c.name FROM customer c WHERE c.customer_id = :customer_id";
    let out = autofix(dialect, sql).unwrap();
    assert!(out.contains("LIMIT 20"), "{out}");
}

#[test]
fn existing_offset_is_preserved_while_tightening() {
    let sql =
        "SELECT c.name FROM customer c WHERE c.customer_id = :customer_id LIMIT 100 OFFSET 40";
    let out = autofix(Dialect::Sqlite, sql).unwrap();
    assert!(out.contains("LIMIT 20"), "{out}");
    assert!(out.contains("OFFSET 40"), "{out}");
}

#[test]
fn mysql_comma_limit_is_tightened_in_place() {
    let sql = "SELECT c.name FROM customer c WHERE c.customer_id = :customer_id LIMIT 40, 100";
    let out = autofix(Dialect::Mysql, sql).unwrap();
    assert!(out.contains("LIMIT 40, 20"), "{out}");
}

#[test]
fn compliant_limit_is_untouched() {
    let sql = "SELECT c.name FROM customer c WHERE c.customer_id = :customer_id LIMIT 5";
    let out = autofix(Dialect::Sqlite, sql).unwrap();
    assert!(out.contains("LIMIT 5"), "{out}");
    assert!(!out.contains("LIMIT 20"), "{out}");
}

#[test]
fn illegal_columns_are_dropped_not_fatal() {
    let sql = "SELECT c.customer_id, c.name FROM customer c \
        WHERE c.customer_id = :customer_id";
    let out = autofix(Dialect::Sqlite, sql).unwrap();
    assert!(out.starts_with("SELECT c.name"), "{out}");
}

#[test]
fn dropping_the_whole_select_list_is_fatal() {
    let sql = "SELECT c.customer_id, c.store_id FROM customer c \
        WHERE c.customer_id = :customer_id";
    assert!(matches!(
        kind(autofix(Dialect::Sqlite, sql)),
        Error::IllegalSelectedColumn { .. }
    ));
}

#[test]
fn repair_cannot_fix_a_missing_identity() {
    let sql = "SELECT c.name FROM customer c";
    assert!(matches!(
        kind(autofix(Dialect::Sqlite, sql)),
        Error::MissingRequiredIdentity { .. }
    ));
}

#[test]
fn repair_cannot_fix_an_illegal_function() {
    let sql = "SELECT load_extension(c.name) FROM customer c \
        WHERE c.customer_id = :customer_id";
    assert!(matches!(
        kind(autofix(Dialect::Sqlite, sql)),
        Error::IllegalFunction { .. }
    ));
}

#[test]
fn repair_is_idempotent() {
    let sql = "SELECT c.customer_id, c.name FROM customer c \
        WHERE c.customer_id = :customer_id LIMIT 100";
    let once = autofix(Dialect::Sqlite, sql).unwrap();
    let twice = autofix(Dialect::Sqlite, &once).unwrap();
    assert_eq!(once, twice);
}

#[test]
fn repairing_a_compliant_query_preserves_it() {
    let sql = "SELECT c.name FROM customer c WHERE c.customer_id = :customer_id LIMIT 20";
    let out = autofix(Dialect::Sqlite, sql).unwrap();
    assert_eq!(out, sql);
}
