//! Applies a constraint policy to collected facets.
//!
//! Checks run in a fixed order and the first failure wins. The order is part
//! of the contract: callers trying multiple policies surface the last
//! policy's error, and tests pin specific failures.

use crate::analyzer::facets::Facets;
use crate::error::Error;
use crate::policy::ConstraintValidator;
use crate::types::{AllowedJoin, FqColumn, ParameterizedConstraint};
use std::collections::{BTreeSet, HashSet};

pub(crate) fn validate(policy: &dyn ConstraintValidator, facets: &Facets) -> Result<(), Error> {
    let allowed_joins = policy.allowed_joins();
    let any_join_allowed = allowed_joins.contains(&AllowedJoin::Any);

    // 1. the select-column allowlist
    for column in &facets.selected_columns {
        if !policy.select_column_allowed(column) {
            return Err(Error::IllegalSelectedColumn {
                column: column.to_string(),
            });
        }
    }

    for scope in facets.scopes.values() {
        // 2. the join-pair allowlist
        if !any_join_allowed {
            for conditions in scope.joined_tables.values() {
                for condition in conditions {
                    let allowed = allowed_joins
                        .iter()
                        .filter_map(AllowedJoin::as_pair)
                        .any(|pair| pair == condition);
                    if !allowed {
                        return Err(Error::IllegalJoinTable {
                            join: condition.clone(),
                        });
                    }
                }
            }
        }

        // 3. the FROM table must participate in the join graph
        if scope.has_joins {
            if let Some(selected_table) = &scope.selected_table {
                let connected = scope
                    .joined_tables
                    .get(selected_table)
                    .is_some_and(|edges| !edges.is_empty());
                if !connected {
                    return Err(Error::DisconnectedTable {
                        table: selected_table.clone(),
                    });
                }
            }
        }

        // 4. joins must reference the table they join
        if let Some(table) = scope.bad_joins.first() {
            return Err(Error::BogusJoinedTable {
                table: table.clone(),
            });
        }
    }

    // 5. the condition-column allowlist; join-condition columns are
    // implicitly allowed
    let join_condition_sides: HashSet<&FqColumn> = allowed_joins
        .iter()
        .filter_map(AllowedJoin::as_pair)
        .flat_map(|pair| [&pair.first, &pair.second])
        .collect();
    for column in &facets.condition_columns {
        if join_condition_sides.contains(column) {
            continue;
        }
        if !policy.condition_column_allowed(column) {
            return Err(Error::IllegalConditionColumn {
                column: column.clone(),
            });
        }
    }

    // 6. every required parameterized constraint must be enforced
    for constraint in policy.parameterized_constraints() {
        if !facets.parameterized_constraints.contains(&constraint) {
            return Err(Error::MissingParameterizedConstraint {
                column: constraint.column,
                placeholder: constraint.placeholder,
            });
        }
    }

    // 7. at least one requester identity must constrain the query
    let identities: BTreeSet<ParameterizedConstraint> = policy
        .requester_identities()
        .into_iter()
        .chain(
            allowed_joins
                .iter()
                .filter_map(AllowedJoin::as_pair)
                .flat_map(|pair| pair.requester_identities()),
        )
        .collect();
    if !identities.is_empty()
        && !identities
            .iter()
            .any(|identity| facets.parameterized_constraints.contains(identity))
    {
        return Err(Error::MissingRequiredIdentity {
            identities: identities.into_iter().collect(),
        });
    }

    // 8. every scope must limit its rows within the policy's bound
    if let Some(max_limit) = policy.max_limit() {
        for limit in facets.limits.values() {
            match limit {
                Some(rows) if *rows <= max_limit => {}
                _ => return Err(Error::TooManyRows { limit: *limit }),
            }
        }
    }

    // 9. the function allowlist
    for function in &facets.functions {
        if !policy.can_use_function(function) {
            return Err(Error::IllegalFunction {
                function: function.clone(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze;
    use crate::dialect::Dialect;
    use crate::parser::parse_select;
    use crate::presets;

    struct Permissive;

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
        fn can_use_function(&self, function: &str) -> bool {
            presets::safe_functions(Dialect::Sqlite).contains(function)
        }
    }

    fn check(policy: &dyn ConstraintValidator, sql: &str) -> Result<(), Error> {
        let query = parse_select(sql, Dialect::Sqlite)?;
        let analysis = analyze(&query, Dialect::Sqlite.reserved_keywords())?;
        validate(policy, &analysis.facets)
    }

    #[test]
    fn permissive_policy_accepts_a_joined_query() {
        check(
            &Permissive,
            "SELECT f.title FROM film f JOIN inventory i ON f.film_id = i.film_id",
        )
        .unwrap();
    }

    #[test]
    fn join_pairs_are_checked_without_any_join() {
        struct OnlyOneJoin;
        impl ConstraintValidator for OnlyOneJoin {
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
                vec![AllowedJoin::pair("film.film_id", "inventory.film_id").unwrap()]
            }
            fn max_limit(&self) -> Option<u64> {
                None
            }
            fn can_use_function(&self, _function: &str) -> bool {
                true
            }
        }

        check(
            &OnlyOneJoin,
            "SELECT f.title FROM film f JOIN inventory i ON f.film_id = i.film_id",
        )
        .unwrap();

        let err = check(
            &OnlyOneJoin,
            "SELECT f.title FROM film f JOIN rental r ON f.film_id = r.rental_id",
        )
        .unwrap_err();
        assert!(matches!(err, Error::IllegalJoinTable { .. }));
    }

    #[test]
    fn disconnected_from_table_is_rejected() {
        let err = check(
            &Permissive,
            "SELECT f.title FROM film f JOIN inventory i ON i.film_id = i.other_id",
        )
        .unwrap_err();
        assert!(matches!(err, Error::DisconnectedTable { table } if table == "film"));
    }

    #[test]
    fn bogus_joined_table_is_rejected() {
        // rental's ON clause only references the other two tables, so it is
        // bogus even though the join graph itself is connected
        let err = check(
            &Permissive,
            "SELECT f.title FROM film f \
             JOIN inventory i ON f.film_id = i.film_id \
             JOIN rental r ON f.film_id = i.film_id",
        )
        .unwrap_err();
        assert!(matches!(err, Error::BogusJoinedTable { table } if table == "rental"));
    }

    #[test]
    fn missing_limit_is_too_many_rows() {
        struct Limited;
        impl ConstraintValidator for Limited {
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
                Some(10)
            }
            fn can_use_function(&self, _function: &str) -> bool {
                true
            }
        }

        let err = check(&Limited, "SELECT f.title FROM film f").unwrap_err();
        assert!(matches!(err, Error::TooManyRows { limit: None }));

        let err = check(&Limited, "SELECT f.title FROM film f LIMIT 11").unwrap_err();
        assert!(matches!(err, Error::TooManyRows { limit: Some(11) }));

        check(&Limited, "SELECT f.title FROM film f LIMIT 10").unwrap();
    }

    #[test]
    fn disallowed_function_is_rejected() {
        let err = check(
            &Permissive,
            "SELECT load_extension(f.title) FROM film f",
        )
        .unwrap_err();
        assert!(matches!(err, Error::IllegalFunction { function } if function == "load_extension"));
    }

    #[test]
    fn identity_from_allowed_join_annotation_is_honoured() {
        struct JoinIdentity;
        impl ConstraintValidator for JoinIdentity {
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
                vec![AllowedJoin::Pair(
                    crate::types::JoinCondition::with_identity(
                        "rental.customer_id",
                        "customer.customer_id",
                        "customer_id",
                    )
                    .unwrap(),
                )]
            }
            fn max_limit(&self) -> Option<u64> {
                None
            }
            fn can_use_function(&self, _function: &str) -> bool {
                true
            }
        }

        // either side of the identity join satisfies the identity check
        check(
            &JoinIdentity,
            "SELECT r.rental_date FROM rental r \
             JOIN customer c ON r.customer_id = c.customer_id \
             WHERE r.customer_id = :customer_id",
        )
        .unwrap();

        let err = check(
            &JoinIdentity,
            "SELECT r.rental_date FROM rental r \
             JOIN customer c ON r.customer_id = c.customer_id",
        )
        .unwrap_err();
        assert!(matches!(err, Error::MissingRequiredIdentity { .. }));
    }
}
