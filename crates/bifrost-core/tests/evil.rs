//! Hostile inputs: everything here must fail, whatever else is true.

mod common;

use bifrost_core::{Dialect, Error};
use common::{kind, validate};

#[test]
fn stacked_statements_are_rejected() {
    let sql = "SELECT c.name FROM customer c WHERE c.customer_id = :customer_id LIMIT 20; \
        DROP TABLE customer";
    assert!(matches!(
        kind(validate(Dialect::Sqlite, sql)),
        Error::UnsupportedQuery { .. } | Error::InvalidQuery { .. }
    ));
}

#[test]
fn dml_disguised_as_a_question_is_rejected() {
    for sql in [
        "DELETE FROM customer",
        "UPDATE customer SET name = 'x' WHERE customer.customer_id = :customer_id",
        "INSERT INTO customer (name) VALUES ('x')",
    ] {
        assert!(matches!(
            kind(validate(Dialect::Sqlite, sql)),
            Error::UnsupportedQuery { .. } | Error::InvalidQuery { .. }
        ));
    }
}

#[test]
fn union_smuggling_is_rejected() {
    let sql = "SELECT c.name FROM customer c WHERE c.customer_id = :customer_id \
        UNION SELECT s.secret FROM secrets s";
    assert!(matches!(
        kind(validate(Dialect::Sqlite, sql)),
        Error::UnsupportedQuery { .. }
    ));
}

#[test]
fn tautology_next_to_the_identity_is_rejected() {
    let sql = "SELECT c.name FROM customer c \
        WHERE c.customer_id = :customer_id OR 1 = 1 LIMIT 20";
    assert!(matches!(
        kind(validate(Dialect::Sqlite, sql)),
        Error::MissingRequiredIdentity { .. }
    ));
}

#[test]
fn identity_buried_in_a_subquery_is_rejected() {
    let sql = "SELECT f.title FROM film f WHERE f.film_id IN \
        (SELECT r.rental_date FROM rental r WHERE r.customer_id = :customer_id LIMIT 20) \
        LIMIT 20";
    assert!(matches!(
        kind(validate(Dialect::Sqlite, sql)),
        Error::MissingRequiredIdentity { .. }
    ));
}

#[test]
fn unlimited_subquery_is_rejected_even_with_a_top_level_limit() {
    let sql = "SELECT c.name FROM customer c \
        WHERE c.customer_id = :customer_id \
        AND c.store_id IN (SELECT s.store_id FROM store s) LIMIT 20";
    // the subquery scope carries no limit, which the policy's cap forbids
    assert!(matches!(
        kind(validate(Dialect::Sqlite, sql)),
        Error::TooManyRows { limit: None }
    ));
}

#[test]
fn comment_tricks_do_not_parse_into_extra_statements() {
    let sql = "SELECT c.name FROM customer c WHERE c.customer_id = :customer_id LIMIT 20 -- '";
    // a trailing comment is fine; it cannot smuggle a second statement
    let out = validate(Dialect::Sqlite, sql);
    assert!(out.is_ok(), "{out:?}");
}

#[test]
fn select_into_is_rejected() {
    let sql = "SELECT c.name INTO backup FROM customer c \
        WHERE c.customer_id = :customer_id LIMIT 20";
    assert!(matches!(
        kind(validate(Dialect::Sqlite, sql)),
        Error::UnsupportedQuery { .. } | Error::InvalidQuery { .. }
    ));
}

#[test]
fn quoting_cannot_hide_a_wildcard() {
    assert!(matches!(
        kind(validate(Dialect::Sqlite, "SELECT c.* FROM customer c LIMIT 20")),
        Error::IllegalSelectedColumn { column } if column == "*"
    ));
}
