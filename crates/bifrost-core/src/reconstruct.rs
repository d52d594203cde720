//! Reconstruction: rewrites a parse tree that fails the policy in fixable
//! ways, without changing the query's intent.
//!
//! Three transforms, applied to a clone of the parsed tree:
//!
//! - insert or tighten the top-level `LIMIT` (existing `OFFSET` preserved);
//! - rewrite column aliases in condition clauses to fully-qualified columns;
//! - drop selected columns the policy rejects, failing if none remain.
//!
//! The rewritten tree is serialised back to SQL; the caller re-parses and
//! re-analyses the result before validating, so reconstruction never has to
//! be trusted.

use crate::analyzer::expression::{is_count_function, ExprScan};
use crate::analyzer::identifier::{object_name_text, resolve_ident};
use crate::error::Error;
use crate::policy::ConstraintValidator;
use crate::types::FqColumn;
use sqlparser::ast::{
    Expr, GroupByExpr, Ident, Join, JoinConstraint, JoinOperator, LimitClause, OrderByKind,
    Query, SelectItem, SetExpr, TableFactor, Value,
};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Applies the repair transforms to a clone of `query` and serialises the
/// result. The original tree is never mutated.
pub(crate) fn repair(
    query: &Query,
    policy: &dyn ConstraintValidator,
    reserved: &HashSet<String>,
) -> Result<String, Error> {
    let mut fixed = query.clone();
    let mut scope_stack = Vec::new();
    transform_query(&mut fixed, &mut scope_stack, true, policy, reserved)?;
    Ok(fixed.to_string())
}

/// The alias environment of one query level, rebuilt during the repair walk.
#[derive(Debug, Default)]
struct ScopeCtx {
    tables: HashMap<String, String>,
    columns: HashMap<String, Option<BTreeSet<FqColumn>>>,
    subqueries: HashSet<String>,
    selected_table: Option<String>,
}

fn transform_query(
    query: &mut Query,
    stack: &mut Vec<ScopeCtx>,
    top_level: bool,
    policy: &dyn ConstraintValidator,
    reserved: &HashSet<String>,
) -> Result<(), Error> {
    let ctx = build_ctx(query, reserved)?;
    stack.push(ctx);
    let result = transform_in_scope(query, stack, top_level, policy, reserved);
    stack.pop();
    result
}

fn transform_in_scope(
    query: &mut Query,
    stack: &mut Vec<ScopeCtx>,
    top_level: bool,
    policy: &dyn ConstraintValidator,
    reserved: &HashSet<String>,
) -> Result<(), Error> {
    if let Some(with) = &mut query.with {
        for cte in &mut with.cte_tables {
            transform_query(&mut cte.query, stack, false, policy, reserved)?;
        }
    }

    // never touch a subquery's limit; only the top-level scope is repaired
    if top_level {
        if let Some(max_limit) = policy.max_limit() {
            enforce_limit(query, max_limit);
        }
    }

    let SetExpr::Select(select) = query.body.as_mut() else {
        return Err(Error::UnsupportedQuery {
            reason: "unsupported query body".to_string(),
        });
    };

    if let Some(from) = select.from.first_mut() {
        if let TableFactor::Derived { subquery, .. } = &mut from.relation {
            transform_query(subquery, stack, false, policy, reserved)?;
        }
        for join in &mut from.joins {
            if let Some(on_expr) = inner_join_on_mut(join) {
                rewrite_expr(on_expr, stack, true, policy, reserved)?;
            }
        }
    }

    drop_illegal_columns(select, stack, policy, reserved)?;
    for item in &mut select.projection {
        if let SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } = item {
            // select-list identifiers are aliases being defined, not used;
            // only descend for nested subqueries
            rewrite_expr(expr, stack, false, policy, reserved)?;
        }
    }

    if let Some(selection) = &mut select.selection {
        rewrite_expr(selection, stack, true, policy, reserved)?;
    }
    if let Some(having) = &mut select.having {
        rewrite_expr(having, stack, true, policy, reserved)?;
    }
    if let GroupByExpr::Expressions(exprs, _) = &mut select.group_by {
        for expr in exprs {
            rewrite_expr(expr, stack, true, policy, reserved)?;
        }
    }
    if let Some(order_by) = &mut query.order_by {
        if let OrderByKind::Expressions(exprs) = &mut order_by.kind {
            for order_expr in exprs {
                rewrite_expr(&mut order_expr.expr, stack, true, policy, reserved)?;
            }
        }
    }

    Ok(())
}

/// Ensures the top-level limit exists and does not exceed `max_limit`,
/// preserving any existing offset exactly.
fn enforce_limit(query: &mut Query, max_limit: u64) {
    let max_expr = || Expr::Value(Value::Number(max_limit.to_string(), false).into());

    match &mut query.limit_clause {
        None => {
            query.limit_clause = Some(LimitClause::LimitOffset {
                limit: Some(max_expr()),
                offset: None,
                limit_by: Vec::new(),
            });
        }
        Some(LimitClause::LimitOffset { limit, .. }) => match limit {
            None => *limit = Some(max_expr()),
            Some(expr) => {
                if literal_limit(expr).map_or(true, |current| current > max_limit) {
                    *expr = max_expr();
                }
            }
        },
        Some(LimitClause::OffsetCommaLimit { limit, .. }) => {
            if literal_limit(limit).map_or(true, |current| current > max_limit) {
                *limit = max_expr();
            }
        }
    }
}

fn literal_limit(expr: &Expr) -> Option<u64> {
    match expr {
        Expr::Value(value) => match &value.value {
            Value::Number(text, _) => text.parse().ok(),
            _ => None,
        },
        _ => None,
    }
}

/// Removes selected columns the policy rejects. `COUNT(...)` aggregates and
/// subquery items always survive; an emptied select list is fatal.
fn drop_illegal_columns(
    select: &mut sqlparser::ast::Select,
    stack: &[ScopeCtx],
    policy: &dyn ConstraintValidator,
    reserved: &HashSet<String>,
) -> Result<(), Error> {
    let mut kept = Vec::with_capacity(select.projection.len());
    let mut last_dropped: Option<FqColumn> = None;

    for item in select.projection.drain(..) {
        let expr = match &item {
            SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => expr,
            // wildcards are not repairable; validation rejects them
            _ => {
                kept.push(item);
                continue;
            }
        };

        if is_count_function(expr) {
            kept.push(item);
            continue;
        }

        let scan = ExprScan::of(expr)?;
        if !scan.subqueries.is_empty() {
            kept.push(item);
            continue;
        }

        let mut rejected = None;
        for idents in &scan.compound {
            if let [table, column] = idents {
                let table_name = resolve_ident(table, reserved)?;
                let column_name = resolve_ident(column, reserved)?;
                if let Some(authoritative) = resolve_table(stack, &table_name) {
                    let fq_column = FqColumn::new(authoritative, column_name);
                    if !policy.select_column_allowed(&fq_column) {
                        rejected = Some(fq_column);
                        break;
                    }
                }
            }
        }

        match rejected {
            Some(column) => last_dropped = Some(column),
            None => kept.push(item),
        }
    }

    if kept.is_empty() {
        if let Some(column) = last_dropped {
            return Err(Error::IllegalSelectedColumn {
                column: column.to_string(),
            });
        }
    }

    select.projection = kept;
    Ok(())
}

/// Rewrites column aliases to fully-qualified columns and recurses into
/// subqueries. With `rewrite` false only the recursion happens.
fn rewrite_expr(
    expr: &mut Expr,
    stack: &mut Vec<ScopeCtx>,
    rewrite: bool,
    policy: &dyn ConstraintValidator,
    reserved: &HashSet<String>,
) -> Result<(), Error> {
    match expr {
        Expr::Identifier(ident) => {
            if !rewrite {
                return Ok(());
            }
            let alias = resolve_ident(ident, reserved)?;
            if let Some(replacement) = alias_replacement(stack, &alias) {
                *expr = Expr::CompoundIdentifier(vec![
                    Ident::new(replacement.table),
                    Ident::new(replacement.column),
                ]);
            }
            Ok(())
        }
        Expr::Subquery(subquery) | Expr::Exists { subquery, .. } => {
            transform_query(subquery, stack, false, policy, reserved)
        }
        Expr::InSubquery {
            expr: target,
            subquery,
            ..
        } => {
            rewrite_expr(target, stack, rewrite, policy, reserved)?;
            transform_query(subquery, stack, false, policy, reserved)
        }
        Expr::BinaryOp { left, right, .. } => {
            rewrite_expr(left, stack, rewrite, policy, reserved)?;
            rewrite_expr(right, stack, rewrite, policy, reserved)
        }
        Expr::UnaryOp { expr: inner, .. } | Expr::Nested(inner) | Expr::Cast { expr: inner, .. } => {
            rewrite_expr(inner, stack, rewrite, policy, reserved)
        }
        Expr::IsNull(inner)
        | Expr::IsNotNull(inner)
        | Expr::IsTrue(inner)
        | Expr::IsNotTrue(inner)
        | Expr::IsFalse(inner)
        | Expr::IsNotFalse(inner) => rewrite_expr(inner, stack, rewrite, policy, reserved),
        Expr::Between {
            expr: target,
            low,
            high,
            ..
        } => {
            rewrite_expr(target, stack, rewrite, policy, reserved)?;
            rewrite_expr(low, stack, rewrite, policy, reserved)?;
            rewrite_expr(high, stack, rewrite, policy, reserved)
        }
        Expr::InList {
            expr: target, list, ..
        } => {
            rewrite_expr(target, stack, rewrite, policy, reserved)?;
            for item in list {
                rewrite_expr(item, stack, rewrite, policy, reserved)?;
            }
            Ok(())
        }
        Expr::Like {
            expr: target,
            pattern,
            ..
        }
        | Expr::ILike {
            expr: target,
            pattern,
            ..
        } => {
            rewrite_expr(target, stack, rewrite, policy, reserved)?;
            rewrite_expr(pattern, stack, rewrite, policy, reserved)
        }
        Expr::Case {
            operand,
            conditions,
            else_result,
            ..
        } => {
            if let Some(operand) = operand {
                rewrite_expr(operand, stack, rewrite, policy, reserved)?;
            }
            for case_when in conditions {
                rewrite_expr(&mut case_when.condition, stack, rewrite, policy, reserved)?;
                rewrite_expr(&mut case_when.result, stack, rewrite, policy, reserved)?;
            }
            if let Some(else_result) = else_result {
                rewrite_expr(else_result, stack, rewrite, policy, reserved)?;
            }
            Ok(())
        }
        Expr::Function(function) => {
            if let sqlparser::ast::FunctionArguments::List(list) = &mut function.args {
                for arg in &mut list.args {
                    if let sqlparser::ast::FunctionArg::Unnamed(
                        sqlparser::ast::FunctionArgExpr::Expr(inner),
                    ) = arg
                    {
                        rewrite_expr(inner, stack, rewrite, policy, reserved)?;
                    }
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// The fully-qualified replacement for a column alias, when one exists.
fn alias_replacement(stack: &[ScopeCtx], alias: &str) -> Option<FqColumn> {
    for ctx in stack.iter().rev() {
        if let Some(backing) = ctx.columns.get(alias) {
            return match backing {
                // expression alias: leave as is
                None => None,
                Some(columns) if columns.len() == 1 => {
                    let column = columns.iter().next()?;
                    let table = resolve_table(stack, &column.table)?;
                    Some(FqColumn::new(table, &column.column))
                }
                // composite: cannot pick a side
                Some(_) => None,
            };
        }
        if ctx.subqueries.contains(alias) || ctx.tables.contains_key(alias) {
            return None;
        }
    }

    // unknown name: infer the implicit single table of the current scope
    let current = stack.last()?;
    let table = current.selected_table.clone()?;
    Some(FqColumn::new(table, alias))
}

/// Resolves a table alias to its authoritative name through the scope chain.
/// Derived-table aliases yield `None`.
fn resolve_table(stack: &[ScopeCtx], name: &str) -> Option<String> {
    for ctx in stack.iter().rev() {
        if ctx.subqueries.contains(name) {
            return None;
        }
        if let Some(authoritative) = ctx.tables.get(name) {
            if stack.iter().any(|c| c.subqueries.contains(authoritative)) {
                return None;
            }
            return Some(authoritative.clone());
        }
    }
    Some(name.to_string())
}

fn build_ctx(query: &Query, reserved: &HashSet<String>) -> Result<ScopeCtx, Error> {
    let mut ctx = ScopeCtx::default();

    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            ctx.subqueries.insert(resolve_ident(&cte.alias.name, reserved)?);
        }
    }

    let SetExpr::Select(select) = query.body.as_ref() else {
        return Err(Error::UnsupportedQuery {
            reason: "unsupported query body".to_string(),
        });
    };

    if let Some(from) = select.from.first() {
        register_relation(&mut ctx, &from.relation, true, reserved)?;
        for join in &from.joins {
            register_relation(&mut ctx, &join.relation, false, reserved)?;
        }
    }

    for item in &select.projection {
        if let SelectItem::ExprWithAlias { expr, alias } = item {
            let alias_name = resolve_ident(alias, reserved)?;
            if is_count_function(expr) {
                ctx.columns.insert(alias_name, None);
            } else if matches!(expr, Expr::Subquery(_)) {
                ctx.subqueries.insert(alias_name);
            } else {
                let scan = ExprScan::of(expr)?;
                let mut backing = BTreeSet::new();
                for idents in &scan.compound {
                    if let [table, column] = idents {
                        backing.insert(FqColumn::new(
                            resolve_ident(table, reserved)?,
                            resolve_ident(column, reserved)?,
                        ));
                    }
                }
                ctx.columns
                    .insert(alias_name, (!backing.is_empty()).then_some(backing));
            }
        }
    }

    Ok(ctx)
}

fn register_relation(
    ctx: &mut ScopeCtx,
    relation: &TableFactor,
    is_from: bool,
    reserved: &HashSet<String>,
) -> Result<(), Error> {
    match relation {
        TableFactor::Table { name, alias, .. } => {
            let table_name = object_name_text(name, reserved)?;
            if let Some(table_alias) = alias {
                let alias_name = resolve_ident(&table_alias.name, reserved)?;
                ctx.tables.insert(alias_name, table_name.clone());
            } else if !ctx.subqueries.contains(&table_name) {
                ctx.tables.insert(table_name.clone(), table_name.clone());
            }
            if is_from {
                ctx.selected_table = Some(table_name);
            }
            Ok(())
        }
        TableFactor::Derived { alias, .. } => {
            if let Some(table_alias) = alias {
                let alias_name = resolve_ident(&table_alias.name, reserved)?;
                ctx.subqueries.insert(alias_name.clone());
                if is_from {
                    ctx.selected_table = Some(alias_name);
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn inner_join_on_mut(join: &mut Join) -> Option<&mut Expr> {
    match &mut join.join_operator {
        JoinOperator::Join(JoinConstraint::On(expr))
        | JoinOperator::Inner(JoinConstraint::On(expr)) => Some(expr),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use crate::parser::parse_select;
    use crate::types::{AllowedJoin, ParameterizedConstraint};

    struct NoIdPolicy {
        max_limit: Option<u64>,
    }

    impl ConstraintValidator for NoIdPolicy {
        fn requester_identities(&self) -> Vec<ParameterizedConstraint> {
            Vec::new()
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
            self.max_limit
        }
        fn can_use_function(&self, _function: &str) -> bool {
            true
        }
    }

    fn fix(sql: &str, policy: &dyn ConstraintValidator) -> Result<String, Error> {
        let query = parse_select(sql, Dialect::Sqlite).unwrap();
        repair(&query, policy, Dialect::Sqlite.reserved_keywords())
    }

    #[test]
    fn missing_limit_is_inserted() {
        let out = fix(
            "SELECT f.title FROM film f",
            &NoIdPolicy {
                max_limit: Some(20),
            },
        )
        .unwrap();
        assert!(out.contains("LIMIT 20"), "{out}");
    }

    #[test]
    fn loose_limit_is_tightened_and_offset_preserved() {
        let out = fix(
            "SELECT f.title FROM film f LIMIT 40 OFFSET 5",
            &NoIdPolicy {
                max_limit: Some(20),
            },
        )
        .unwrap();
        assert!(out.contains("LIMIT 20"), "{out}");
        assert!(out.contains("OFFSET 5"), "{out}");
    }

    #[test]
    fn tight_limit_is_left_alone() {
        let out = fix(
            "SELECT f.title FROM film f LIMIT 10",
            &NoIdPolicy {
                max_limit: Some(20),
            },
        )
        .unwrap();
        assert!(out.contains("LIMIT 10"), "{out}");
    }

    #[test]
    fn subquery_limits_are_not_touched() {
        let out = fix(
            "SELECT d.title FROM (SELECT f.title FROM film f) d",
            &NoIdPolicy {
                max_limit: Some(20),
            },
        )
        .unwrap();
        // the inner scope keeps its missing limit; only the outer gets one
        assert_eq!(out.matches("LIMIT 20").count(), 1, "{out}");
        assert!(out.trim_end().ends_with("LIMIT 20"), "{out}");
    }

    #[test]
    fn illegal_selected_columns_are_dropped() {
        let out = fix(
            "SELECT f.film_id, f.title FROM film f",
            &NoIdPolicy { max_limit: None },
        )
        .unwrap();
        assert!(!out.contains("film_id"), "{out}");
        assert!(out.contains("f.title"), "{out}");
    }

    #[test]
    fn dropping_every_column_is_fatal() {
        let err = fix(
            "SELECT f.film_id, f.store_id FROM film f",
            &NoIdPolicy { max_limit: None },
        )
        .unwrap_err();
        assert!(
            matches!(err, Error::IllegalSelectedColumn { column } if column == "film.store_id")
        );
    }

    #[test]
    fn count_star_survives_dropping() {
        let out = fix(
            "SELECT COUNT(*) FROM film f",
            &NoIdPolicy { max_limit: None },
        )
        .unwrap();
        assert!(out.contains("COUNT(*)"), "{out}");
    }

    #[test]
    fn alias_in_where_is_rewritten_to_fq() {
        let out = fix(
            "SELECT f.title AS name FROM film f WHERE name = 'ALIEN'",
            &NoIdPolicy { max_limit: None },
        )
        .unwrap();
        assert!(out.contains("WHERE film.title = 'ALIEN'"), "{out}");
    }

    #[test]
    fn unknown_identifier_gets_the_implicit_table() {
        let out = fix(
            "SELECT f.title FROM film f WHERE year > 2000",
            &NoIdPolicy { max_limit: None },
        )
        .unwrap();
        assert!(out.contains("WHERE film.year > 2000"), "{out}");
    }

    #[test]
    fn expression_alias_is_left_alone() {
        let out = fix(
            "SELECT COUNT(*) AS n FROM film f ORDER BY n",
            &NoIdPolicy { max_limit: None },
        )
        .unwrap();
        assert!(out.contains("ORDER BY n"), "{out}");
    }

    #[test]
    fn repair_is_identity_on_compliant_queries() {
        let sql = "SELECT f.title FROM film f WHERE f.year > 2000 LIMIT 10";
        let out = fix(
            sql,
            &NoIdPolicy {
                max_limit: Some(20),
            },
        )
        .unwrap();
        assert_eq!(out, sql);
    }
}
