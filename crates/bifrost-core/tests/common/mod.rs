#![allow(dead_code)]

use bifrost_core::{
    AllowedJoin, Bifrost, ConstraintValidator, Dialect, Error, FqColumn, ParameterizedConstraint,
    TraverseError,
};

/// Allows basically anything in the query.
pub struct Permissive;

impl ConstraintValidator for Permissive {
    fn requester_identities(&self) -> Vec<ParameterizedConstraint> {
        Vec::new()
    }
    fn parameterized_constraints(&self) -> Vec<ParameterizedConstraint> {
        Vec::new()
    }
    fn select_column_allowed(&self, _column: &FqColumn) -> bool {
        true
    }
    fn allowed_joins(&self) -> Vec<AllowedJoin> {
        vec![AllowedJoin::Any]
    }
    fn max_limit(&self) -> Option<u64> {
        None
    }
    fn can_use_function(&self, _function: &str) -> bool {
        true
    }
    fn condition_column_allowed(&self, _column: &FqColumn) -> bool {
        true
    }
}

/// The customer-scoped policy the end-to-end scenarios run against: the
/// requester may see non-id columns of the rental domain, any join is fine,
/// and every query must be pinned to the requesting customer and capped at
/// twenty rows.
pub struct CustomerPolicy {
    pub dialect: Dialect,
}

impl CustomerPolicy {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }
}

impl ConstraintValidator for CustomerPolicy {
    fn requester_identities(&self) -> Vec<ParameterizedConstraint> {
        vec![ParameterizedConstraint::new("customer.customer_id", "customer_id").unwrap()]
    }
    fn parameterized_constraints(&self) -> Vec<ParameterizedConstraint> {
        Vec::new()
    }
    fn select_column_allowed(&self, column: &FqColumn) -> bool {
        !column.column.ends_with("_id")
    }
    fn allowed_joins(&self) -> Vec<AllowedJoin> {
        vec![AllowedJoin::Any]
    }
    fn max_limit(&self) -> Option<u64> {
        Some(20)
    }
    fn can_use_function(&self, function: &str) -> bool {
        bifrost_core::presets::safe_functions(self.dialect).contains(function)
    }
    fn condition_column_allowed(&self, _column: &FqColumn) -> bool {
        true
    }
}

pub fn customer_bifrost(dialect: Dialect) -> Bifrost {
    Bifrost::validation_only(dialect, vec![Box::new(CustomerPolicy::new(dialect))])
}

pub fn permissive_bifrost(dialect: Dialect) -> Bifrost {
    Bifrost::validation_only(dialect, vec![Box::new(Permissive)])
}

/// Traverses without repair under the customer policy.
pub fn validate(dialect: Dialect, sql: &str) -> Result<String, TraverseError> {
    customer_bifrost(dialect).traverse(sql, false)
}

/// Traverses with repair under the customer policy.
pub fn autofix(dialect: Dialect, sql: &str) -> Result<String, TraverseError> {
    customer_bifrost(dialect).traverse(sql, true)
}

pub fn kind(result: Result<String, TraverseError>) -> Error {
    result.expect_err("expected the traversal to fail").kind
}
