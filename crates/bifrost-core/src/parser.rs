//! Parser driver: one untrusted string in, one `SELECT` query out.
//!
//! Anything the dialect grammar cannot parse is normalised to
//! [`Error::InvalidQuery`] so callers never see raw parser errors. Anything
//! that parses but is not a single plain `SELECT` (set operations, DML,
//! `VALUES`, multiple statements) is rejected as
//! [`Error::UnsupportedQuery`]: this crate proves things about restricted
//! reads and refuses everything else.

use crate::dialect::Dialect;
use crate::error::Error;
use sqlparser::ast::{Query, SetExpr, Statement};
use sqlparser::parser::Parser;

/// Parses the untrusted text into a single `SELECT` query.
pub fn parse_select(sql: &str, dialect: Dialect) -> Result<Box<Query>, Error> {
    let handle = dialect.to_sqlparser_dialect();
    let mut statements = Parser::parse_sql(handle.as_ref(), sql).map_err(|parse_error| {
        tracing::debug!(dialect = dialect.name(), error = %parse_error, "parse failed");
        Error::InvalidQuery {
            query: sql.to_string(),
        }
    })?;

    let statement = match statements.len() {
        0 => {
            return Err(Error::InvalidQuery {
                query: sql.to_string(),
            })
        }
        1 => statements.remove(0),
        _ => {
            return Err(Error::UnsupportedQuery {
                reason: "multiple statements".to_string(),
            })
        }
    };

    let query = match statement {
        Statement::Query(query) => query,
        _ => {
            return Err(Error::UnsupportedQuery {
                reason: "only SELECT queries are supported".to_string(),
            })
        }
    };

    ensure_plain_select(&query)?;
    Ok(query)
}

/// The query body must be a plain `SELECT`; CTE bodies are checked
/// recursively. Recursive CTEs are out of the restricted surface.
fn ensure_plain_select(query: &Query) -> Result<(), Error> {
    if let Some(with) = &query.with {
        if with.recursive {
            return Err(Error::UnsupportedQuery {
                reason: "recursive CTE".to_string(),
            });
        }
        for cte in &with.cte_tables {
            ensure_plain_select(&cte.query)?;
        }
    }

    if query.fetch.is_some() {
        return Err(Error::UnsupportedQuery {
            reason: "FETCH clause".to_string(),
        });
    }
    if !query.locks.is_empty() {
        return Err(Error::UnsupportedQuery {
            reason: "locking clause".to_string(),
        });
    }

    match query.body.as_ref() {
        SetExpr::Select(_) => Ok(()),
        SetExpr::SetOperation { op, .. } => Err(Error::UnsupportedQuery {
            reason: format!("set operation {op}"),
        }),
        SetExpr::Values(_) => Err(Error::UnsupportedQuery {
            reason: "VALUES clause".to_string(),
        }),
        _ => Err(Error::UnsupportedQuery {
            reason: "unsupported query body".to_string(),
        }),
    }
}
