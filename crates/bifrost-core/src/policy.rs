//! The constraint policy a traversal validates against.

use crate::types::{AllowedJoin, FqColumn, ParameterizedConstraint};

/// The allowlist policy for one class of requester.
///
/// Implementations are read-only during validation and may be shared across
/// concurrent traversals. Every method is deliberately explicit: a policy
/// that allows everything should say so in code, not by omission.
///
/// The [`presets`](crate::presets) module provides curated safe-function
/// lists most [`can_use_function`](Self::can_use_function) implementations
/// delegate to.
pub trait ConstraintValidator: Send + Sync {
    /// The requester's possible identities as represented in the database.
    ///
    /// Only one needs to match for the query to be compliant. A sequence,
    /// not a single identity, because an LLM may constrain the query inside
    /// a `JOIN` condition rather than the `WHERE` clause, in which case the
    /// constrained column may be a different table's copy of the identity
    /// (`rental.customer_id` vs `customer.customer_id`).
    ///
    /// Return an empty sequence for unrestricted access.
    fn requester_identities(&self) -> Vec<ParameterizedConstraint>;

    /// Constraints that must be enforced somewhere in the `WHERE` clause or
    /// a `JOIN` condition, unconditionally (not behind an `OR`).
    fn parameterized_constraints(&self) -> Vec<ParameterizedConstraint>;

    /// Whether a fully-qualified column may appear in the `SELECT` list.
    ///
    /// Also drives reconstruction: columns that fail this check are removed
    /// from the query when repair is enabled.
    fn select_column_allowed(&self, column: &FqColumn) -> bool;

    /// The tables that may be connected to the query and the equi-join
    /// conditions that connect them. [`AllowedJoin::Any`] admits every join
    /// pair (connectivity is still enforced).
    fn allowed_joins(&self) -> Vec<AllowedJoin>;

    /// The maximum number of rows a query may return, or `None` for no
    /// bound. Also drives reconstruction: a missing or looser limit is
    /// rewritten to this value.
    fn max_limit(&self) -> Option<u64>;

    /// Whether a function (lowercase name) may be used anywhere in the
    /// query.
    fn can_use_function(&self, function: &str) -> bool;

    /// Whether a column may be used in `WHERE`, `JOIN`, `HAVING`, or
    /// `ORDER BY`. Defaults to "if you can see it, you can filter on it".
    fn condition_column_allowed(&self, column: &FqColumn) -> bool {
        self.select_column_allowed(column)
    }
}
