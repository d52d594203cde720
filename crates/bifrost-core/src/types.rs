//! Domain types shared by the policy, the analyzer, and the validator.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// A fully-qualified column name in the form `table.column`.
///
/// LLM-produced queries must use fully-qualified columns in their clauses.
/// Without qualification we would need runtime schema analysis to attribute a
/// column to a table, so we instruct the LLM to qualify everything and reject
/// what it fails to qualify. Comparisons are case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FqColumn {
    pub table: String,
    pub column: String,
}

impl FqColumn {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Parses a `table.column` literal.
    ///
    /// Fails with [`Error::UnqualifiedColumn`] when the string does not have
    /// exactly one dot separating two non-empty parts.
    pub fn parse(fq_column_name: &str) -> Result<Self, Error> {
        let mut parts = fq_column_name.splitn(2, '.');
        match (parts.next(), parts.next()) {
            (Some(table), Some(column)) if !table.is_empty() && !column.is_empty() => {
                Ok(Self::new(table, column))
            }
            _ => Err(Error::UnqualifiedColumn {
                column: Some(fq_column_name.to_string()),
            }),
        }
    }
}

impl fmt::Display for FqColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// A constraint of the form `table.column = :placeholder`.
///
/// The comparison is always strict equality against exactly one named
/// placeholder, which guarantees the query is constrained by a value the
/// caller supplies at execution time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParameterizedConstraint {
    pub column: FqColumn,
    pub placeholder: String,
}

impl ParameterizedConstraint {
    pub fn new(column: &str, placeholder: impl Into<String>) -> Result<Self, Error> {
        Ok(Self {
            column: FqColumn::parse(column)?,
            placeholder: placeholder.into(),
        })
    }
}

impl fmt::Display for ParameterizedConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=:{}", self.column, self.placeholder)
    }
}

/// An equi-join between two tables on two columns.
///
/// Equality and hashing are order-independent: `a=b` matches `b=a`. The
/// optional identity placeholder marks a join whose columns also count as a
/// requester identity (either side).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinCondition {
    pub first: FqColumn,
    pub second: FqColumn,
    pub identity_placeholder: Option<String>,
}

impl JoinCondition {
    pub fn new(first: &str, second: &str) -> Result<Self, Error> {
        Ok(Self {
            first: FqColumn::parse(first)?,
            second: FqColumn::parse(second)?,
            identity_placeholder: None,
        })
    }

    /// Builds a join condition whose columns can both stand in for the
    /// requester identity, bound to `placeholder` at execution time.
    pub fn with_identity(first: &str, second: &str, placeholder: &str) -> Result<Self, Error> {
        Ok(Self {
            identity_placeholder: Some(placeholder.to_string()),
            ..Self::new(first, second)?
        })
    }

    pub(crate) fn from_columns(first: FqColumn, second: FqColumn) -> Self {
        Self {
            first,
            second,
            identity_placeholder: None,
        }
    }

    /// The parameterized constraints this join contributes as requester
    /// identities: one per side when the identity placeholder is set.
    pub fn requester_identities(&self) -> Vec<ParameterizedConstraint> {
        match &self.identity_placeholder {
            Some(placeholder) => vec![
                ParameterizedConstraint {
                    column: self.first.clone(),
                    placeholder: placeholder.clone(),
                },
                ParameterizedConstraint {
                    column: self.second.clone(),
                    placeholder: placeholder.clone(),
                },
            ],
            None => Vec::new(),
        }
    }
}

impl PartialEq for JoinCondition {
    fn eq(&self, other: &Self) -> bool {
        // order-independent; the identity marker does not take part
        (self.first == other.first && self.second == other.second)
            || (self.first == other.second && self.second == other.first)
    }
}

impl Eq for JoinCondition {}

impl Hash for JoinCondition {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let (lo, hi) = if self.first <= self.second {
            (&self.first, &self.second)
        } else {
            (&self.second, &self.first)
        };
        lo.hash(state);
        hi.hash(state);
    }
}

impl fmt::Display for JoinCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.first, self.second)
    }
}

/// An entry in a policy's join allowlist.
///
/// `Any` disables join-pair checking entirely (connectivity is still
/// enforced). Only use it for a policy that represents full read access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllowedJoin {
    Any,
    Pair(JoinCondition),
}

impl AllowedJoin {
    pub fn pair(first: &str, second: &str) -> Result<Self, Error> {
        Ok(Self::Pair(JoinCondition::new(first, second)?))
    }

    pub(crate) fn as_pair(&self) -> Option<&JoinCondition> {
        match self {
            Self::Pair(condition) => Some(condition),
            Self::Any => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn parse_fq_column() {
        let column = FqColumn::parse("film.title").unwrap();
        assert_eq!(column.table, "film");
        assert_eq!(column.column, "title");
        assert_eq!(column.to_string(), "film.title");
    }

    #[test]
    fn parse_rejects_unqualified() {
        for bad in ["title", ".title", "film.", ""] {
            let err = FqColumn::parse(bad).unwrap_err();
            assert!(matches!(err, Error::UnqualifiedColumn { .. }), "{bad}");
        }
    }

    #[test]
    fn join_condition_equality_is_unordered() {
        let a = JoinCondition::new("t1.id", "t2.id").unwrap();
        let b = JoinCondition::new("t2.id", "t1.id").unwrap();
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn join_condition_equality_ignores_identity_marker() {
        let plain = JoinCondition::new("t1.id", "t2.id").unwrap();
        let marked = JoinCondition::with_identity("t1.id", "t2.id", "uid").unwrap();
        assert_eq!(plain, marked);
    }

    #[test]
    fn identity_join_yields_both_sides() {
        let join = JoinCondition::with_identity("rental.customer_id", "customer.customer_id", "customer_id")
            .unwrap();
        let identities = join.requester_identities();
        assert_eq!(identities.len(), 2);
        assert_eq!(identities[0].placeholder, "customer_id");
        assert_eq!(identities[0].column.to_string(), "rental.customer_id");
        assert_eq!(identities[1].column.to_string(), "customer.customer_id");
    }

    #[test]
    fn constraint_display_matches_query_form() {
        let constraint = ParameterizedConstraint::new("customer.customer_id", "customer_id").unwrap();
        assert_eq!(constraint.to_string(), "customer.customer_id=:customer_id");
    }

    #[test]
    fn domain_types_round_trip_through_serde() {
        let join = JoinCondition::with_identity(
            "rental.customer_id",
            "customer.customer_id",
            "customer_id",
        )
        .unwrap();
        let json = serde_json::to_string(&AllowedJoin::Pair(join.clone())).unwrap();
        let back: AllowedJoin = serde_json::from_str(&json).unwrap();
        assert_eq!(back, AllowedJoin::Pair(join));
    }
}
