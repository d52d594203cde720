//! Facet extraction: everything the validator consults about a query.
//!
//! One traversal over the decorated tree collects selected columns, the join
//! graph per scope, condition columns, unconditionally-enforced parameterized
//! comparisons, function usage, and row limits. The collector is strict: it
//! shares the restricted-surface walker with the alias pass, so anything
//! outside the supported grammar fails before the validator ever runs.

use crate::analyzer::expression::{
    is_count_function, placeholder_name, placeholder_token, ExprScan,
};
use crate::analyzer::identifier::{object_name_text, resolve_ident};
use crate::analyzer::scopes::{ResolvedTable, ScopeId, ScopeMap};
use crate::error::Error;
use crate::types::{FqColumn, JoinCondition, ParameterizedConstraint};
use sqlparser::ast::{
    BinaryOperator, Expr, GroupByExpr, Ident, Join, JoinConstraint, JoinOperator, LimitClause,
    OrderByKind, Query, Select, SelectItem, SetExpr, Value, ValueWithSpan,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Join graph and FROM table of one scope.
#[derive(Debug, Default)]
pub(crate) struct ScopeFacets {
    /// Whether the scope contains any JOIN at all. Tracked separately from
    /// the edge map: a join whose ON clause never compares two columns
    /// contributes no edges, but still makes connectivity mandatory.
    pub(crate) has_joins: bool,
    /// Table name to the join conditions touching it.
    pub(crate) joined_tables: HashMap<String, HashSet<JoinCondition>>,
    /// Tables whose join condition does not reference themselves.
    pub(crate) bad_joins: Vec<String>,
    /// Authoritative name of the FROM table (or a derived-table alias).
    pub(crate) selected_table: Option<String>,
}

/// Structural properties of the whole query, one traversal's worth.
#[derive(Debug, Default)]
pub(crate) struct Facets {
    pub(crate) selected_columns: BTreeSet<FqColumn>,
    pub(crate) scopes: BTreeMap<ScopeId, ScopeFacets>,
    pub(crate) condition_columns: BTreeSet<FqColumn>,
    pub(crate) parameterized_constraints: HashSet<ParameterizedConstraint>,
    pub(crate) functions: BTreeSet<String>,
    pub(crate) limits: BTreeMap<ScopeId, Option<u64>>,
}

pub(crate) struct FacetCollector<'a> {
    scopes: &'a ScopeMap,
    reserved: &'a HashSet<String>,
    facets: Facets,
}

impl<'a> FacetCollector<'a> {
    pub(crate) fn collect(
        query: &Query,
        scopes: &'a ScopeMap,
        reserved: &'a HashSet<String>,
    ) -> Result<Facets, Error> {
        let mut collector = FacetCollector {
            scopes,
            reserved,
            facets: Facets::default(),
        };
        collector.visit_query(query, false)?;
        Ok(collector.facets)
    }

    fn visit_query(&mut self, query: &Query, in_subquery: bool) -> Result<(), Error> {
        let scope_id = self
            .scopes
            .scope_id_of(query)
            .expect("every query node is assigned a scope");

        self.facets.limits.insert(scope_id, parse_limit(query)?);

        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.visit_query(&cte.query, true)?;
            }
        }

        let SetExpr::Select(select) = query.body.as_ref() else {
            return Err(Error::UnsupportedQuery {
                reason: "unsupported query body".to_string(),
            });
        };
        restricted_select_surface(select)?;

        self.facets.scopes.insert(
            scope_id,
            ScopeFacets {
                selected_table: self.scopes.scope(scope_id).selected_table.clone(),
                ..ScopeFacets::default()
            },
        );

        let Some(from) = select.from.first() else {
            return Err(Error::UnsupportedQuery {
                reason: "SELECT without FROM".to_string(),
            });
        };

        if let sqlparser::ast::TableFactor::Derived { subquery, .. } = &from.relation {
            self.visit_query(subquery, true)?;
        }

        for join in &from.joins {
            self.visit_join(scope_id, join, in_subquery)?;
        }

        for item in &select.projection {
            self.visit_selected(scope_id, item)?;
        }

        if let Some(selection) = &select.selection {
            self.collect_condition_columns(scope_id, selection)?;
            self.collect_parameterized(scope_id, selection, false, in_subquery)?;
        }

        if let Some(having) = &select.having {
            self.collect_condition_columns(scope_id, having)?;
        }

        if let GroupByExpr::Expressions(exprs, _) = &select.group_by {
            for expr in exprs {
                self.scan_neutral(scope_id, expr)?;
            }
        }

        if let Some(order_by) = &query.order_by {
            match &order_by.kind {
                OrderByKind::Expressions(exprs) => {
                    for order_expr in exprs {
                        self.collect_condition_columns(scope_id, &order_expr.expr)?;
                    }
                }
                _ => {
                    return Err(Error::UnsupportedQuery {
                        reason: "ORDER BY ALL".to_string(),
                    })
                }
            }
        }

        Ok(())
    }

    fn visit_join(&mut self, scope_id: ScopeId, join: &Join, in_subquery: bool) -> Result<(), Error> {
        let constraint = match &join.join_operator {
            JoinOperator::Join(constraint) | JoinOperator::Inner(constraint) => constraint,
            JoinOperator::Left(_)
            | JoinOperator::LeftOuter(_)
            | JoinOperator::Right(_)
            | JoinOperator::RightOuter(_)
            | JoinOperator::FullOuter(_) => {
                return Err(Error::IllegalJoinType {
                    join_type: "OUTER_JOIN".to_string(),
                })
            }
            JoinOperator::CrossJoin(_) => {
                return Err(Error::IllegalJoinType {
                    join_type: "CROSS_JOIN".to_string(),
                })
            }
            _ => {
                return Err(Error::IllegalJoinType {
                    join_type: "NON_INNER_JOIN".to_string(),
                })
            }
        };

        let joined_table = match &join.relation {
            sqlparser::ast::TableFactor::Table { name, alias, .. } => {
                let table_name = object_name_text(name, self.reserved)?;
                if alias.is_some() {
                    table_name
                } else {
                    match self.scopes.resolve_table(scope_id, &table_name) {
                        ResolvedTable::Table(authoritative) => authoritative,
                        ResolvedTable::Derived => {
                            return Err(Error::UnsupportedQuery {
                                reason: "JOIN on derived table".to_string(),
                            })
                        }
                    }
                }
            }
            sqlparser::ast::TableFactor::Derived { .. } => {
                return Err(Error::UnsupportedQuery {
                    reason: "JOIN on derived table".to_string(),
                })
            }
            other => {
                return Err(Error::UnsupportedQuery {
                    reason: format!("unsupported table reference `{other}`"),
                })
            }
        };

        let JoinConstraint::On(on_expr) = constraint else {
            return Err(Error::UnsupportedQuery {
                reason: "JOIN without an ON condition".to_string(),
            });
        };

        self.scope_facets(scope_id).has_joins = true;

        // ON bodies feed the common condition walker, like WHERE and HAVING
        self.collect_condition_columns(scope_id, on_expr)?;
        // a parameterized comparison may live in the join instead of WHERE
        self.collect_parameterized(scope_id, on_expr, false, in_subquery)?;
        self.collect_join_edges(scope_id, on_expr, &joined_table)?;

        Ok(())
    }

    /// Records equi-join edges between fully-qualified columns, flagging
    /// joined tables whose condition never references them.
    fn collect_join_edges(
        &mut self,
        scope_id: ScopeId,
        expr: &Expr,
        joined_table: &str,
    ) -> Result<(), Error> {
        match expr {
            Expr::Nested(inner) => self.collect_join_edges(scope_id, inner, joined_table),
            Expr::BinaryOp {
                left,
                op: BinaryOperator::And | BinaryOperator::Or,
                right,
            } => {
                self.collect_join_edges(scope_id, left, joined_table)?;
                self.collect_join_edges(scope_id, right, joined_table)
            }
            Expr::BinaryOp {
                left,
                op: BinaryOperator::Eq,
                right,
            } => {
                let Expr::CompoundIdentifier(from_idents) = left.as_ref() else {
                    return Ok(());
                };
                let Some(from_column) = self.fq_column(scope_id, from_idents, "JOIN condition")?
                else {
                    return Err(Error::UnsupportedQuery {
                        reason: "JOIN condition on derived table".to_string(),
                    });
                };

                let Expr::CompoundIdentifier(to_idents) = right.as_ref() else {
                    // string, number, function, placeholder: no edge to record
                    return Ok(());
                };
                let Some(to_column) = self.fq_column(scope_id, to_idents, "JOIN condition")? else {
                    return Err(Error::UnsupportedQuery {
                        reason: "JOIN condition on derived table".to_string(),
                    });
                };

                if joined_table != from_column.table && joined_table != to_column.table {
                    self.scope_facets(scope_id).bad_joins.push(joined_table.to_string());
                    return Ok(());
                }

                let edge = JoinCondition::from_columns(from_column.clone(), to_column.clone());
                let facets = self.scope_facets(scope_id);
                facets
                    .joined_tables
                    .entry(from_column.table)
                    .or_default()
                    .insert(edge.clone());
                facets
                    .joined_tables
                    .entry(to_column.table)
                    .or_default()
                    .insert(edge);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn visit_selected(&mut self, scope_id: ScopeId, item: &SelectItem) -> Result<(), Error> {
        let expr = match item {
            SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(..) => {
                return Err(Error::IllegalSelectedColumn {
                    column: "*".to_string(),
                })
            }
            SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => expr,
        };

        let scan = ExprScan::of(expr)?;
        self.facets.functions.extend(scan.functions.iter().cloned());
        for subquery in &scan.subqueries {
            self.visit_query(subquery, true)?;
        }

        // counting reveals no underlying values
        if is_count_function(expr) {
            return Ok(());
        }

        // a scalar subquery's select list is analysed in its own scope
        if !scan.subqueries.is_empty() {
            return Ok(());
        }

        if let Some(ident) = scan.bare.first() {
            return Err(Error::UnqualifiedColumn {
                column: Some(resolve_ident(ident, self.reserved)?),
            });
        }

        for idents in &scan.compound {
            if let Some(column) = self.fq_column(scope_id, idents, "SELECT")? {
                self.facets.selected_columns.insert(column);
            }
            // a derived-table column: its inner scope is validated separately
        }
        Ok(())
    }

    /// The common walker behind WHERE, JOIN ON, HAVING, and ORDER BY.
    fn collect_condition_columns(&mut self, scope_id: ScopeId, expr: &Expr) -> Result<(), Error> {
        let scan = ExprScan::of(expr)?;
        self.facets.functions.extend(scan.functions.iter().cloned());

        for idents in &scan.compound {
            match self.fq_column(scope_id, idents, "condition")? {
                Some(column) => {
                    self.facets.condition_columns.insert(column);
                }
                None => {
                    return Err(Error::UnsupportedQuery {
                        reason: "condition on derived table column".to_string(),
                    })
                }
            }
        }

        for ident in &scan.bare {
            let alias = resolve_ident(ident, self.reserved)?;
            match self.scopes.resolve_column_alias(scope_id, &alias) {
                // expression alias: nothing to check, and nothing to track
                Some(None) => {}
                Some(Some(columns)) => {
                    self.facets.condition_columns.extend(columns.iter().cloned());
                }
                None => {
                    return Err(Error::UnqualifiedColumn {
                        column: Some(alias),
                    })
                }
            }
        }

        for subquery in scan.subqueries {
            self.visit_query(subquery, true)?;
        }
        Ok(())
    }

    fn scan_neutral(&mut self, scope_id: ScopeId, expr: &Expr) -> Result<(), Error> {
        let scan = ExprScan::of(expr)?;
        self.facets.functions.extend(scan.functions.iter().cloned());
        for subquery in scan.subqueries {
            self.visit_query(subquery, true)?;
        }
        Ok(())
    }

    /// Walks a boolean expression level by level: a level joined by `OR` is
    /// tainted, and so is everything below it, because a comparison behind an
    /// `OR` is optional rather than enforced. Only untainted equality
    /// comparisons against a placeholder count as parameterized constraints.
    fn collect_parameterized(
        &mut self,
        scope_id: ScopeId,
        expr: &Expr,
        tainted: bool,
        in_subquery: bool,
    ) -> Result<(), Error> {
        match expr {
            Expr::Nested(inner) => {
                self.collect_parameterized(scope_id, inner, tainted, in_subquery)
            }
            Expr::BinaryOp {
                left,
                op: BinaryOperator::And,
                right,
            } => {
                self.collect_parameterized(scope_id, left, tainted, in_subquery)?;
                self.collect_parameterized(scope_id, right, tainted, in_subquery)
            }
            Expr::BinaryOp {
                left,
                op: BinaryOperator::Or,
                right,
            } => {
                self.collect_parameterized(scope_id, left, true, in_subquery)?;
                self.collect_parameterized(scope_id, right, true, in_subquery)
            }
            Expr::BinaryOp {
                left,
                op: BinaryOperator::Eq,
                right,
            } => {
                if tainted || in_subquery {
                    return Ok(());
                }
                let (token, column_side) =
                    match (placeholder_token(left), placeholder_token(right)) {
                        (Some(token), None) => (token, right.as_ref()),
                        (None, Some(token)) => (token, left.as_ref()),
                        _ => return Ok(()),
                    };
                self.record_constraint(scope_id, column_side, placeholder_name(token))
            }
            _ => Ok(()),
        }
    }

    fn record_constraint(
        &mut self,
        scope_id: ScopeId,
        column_side: &Expr,
        placeholder: &str,
    ) -> Result<(), Error> {
        match column_side {
            Expr::CompoundIdentifier(idents) => {
                if let Some(column) = self.fq_column(scope_id, idents, "constraint")? {
                    self.facets
                        .parameterized_constraints
                        .insert(ParameterizedConstraint {
                            column,
                            placeholder: placeholder.to_string(),
                        });
                }
                Ok(())
            }
            Expr::Identifier(ident) => {
                let alias = resolve_ident(ident, self.reserved)?;
                match self.scopes.resolve_column_alias(scope_id, &alias) {
                    // expression alias: not a column
                    Some(None) => {}
                    Some(Some(columns)) if columns.len() == 1 => {
                        if let Some(column) = columns.iter().next() {
                            self.facets
                                .parameterized_constraints
                                .insert(ParameterizedConstraint {
                                    column: column.clone(),
                                    placeholder: placeholder.to_string(),
                                });
                        }
                    }
                    // composite alias: cannot attribute; unknown: the
                    // condition walker already rejected it
                    Some(Some(_)) | None => {}
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Resolves a two-part identifier to a fully-qualified column. Returns
    /// `None` when the table resolves to a derived table.
    fn fq_column(
        &self,
        scope_id: ScopeId,
        idents: &[Ident],
        context: &str,
    ) -> Result<Option<FqColumn>, Error> {
        let [table, column] = idents else {
            return Err(Error::UnsupportedQuery {
                reason: format!(
                    "{context} reference must be table.column, got `{}`",
                    idents
                        .iter()
                        .map(|i| i.value.clone())
                        .collect::<Vec<_>>()
                        .join(".")
                ),
            });
        };
        let table_name = resolve_ident(table, self.reserved)?;
        let column_name = resolve_ident(column, self.reserved)?;
        match self.scopes.resolve_table(scope_id, &table_name) {
            ResolvedTable::Table(authoritative) => {
                Ok(Some(FqColumn::new(authoritative, column_name)))
            }
            ResolvedTable::Derived => Ok(None),
        }
    }

    fn scope_facets(&mut self, scope_id: ScopeId) -> &mut ScopeFacets {
        self.facets.scopes.entry(scope_id).or_default()
    }
}

fn parse_limit(query: &Query) -> Result<Option<u64>, Error> {
    let Some(limit_clause) = &query.limit_clause else {
        return Ok(None);
    };
    match limit_clause {
        LimitClause::LimitOffset { limit, .. } => match limit {
            Some(expr) => limit_number(expr).map(Some),
            None => Ok(None),
        },
        LimitClause::OffsetCommaLimit { limit, .. } => limit_number(limit).map(Some),
    }
}

fn limit_number(expr: &Expr) -> Result<u64, Error> {
    match expr {
        Expr::Value(ValueWithSpan {
            value: Value::Number(text, _),
            ..
        }) => text.parse().map_err(|_| Error::UnsupportedQuery {
            reason: format!("LIMIT must be a non-negative integer, got `{text}`"),
        }),
        other => Err(Error::UnsupportedQuery {
            reason: format!("LIMIT must be a number literal, got `{other}`"),
        }),
    }
}

/// The parts of `SELECT` the restricted grammar does not admit.
fn restricted_select_surface(select: &Select) -> Result<(), Error> {
    let unsupported = if select.top.is_some() {
        Some("TOP clause")
    } else if select.into.is_some() {
        Some("SELECT INTO")
    } else if select.prewhere.is_some() {
        Some("PREWHERE clause")
    } else if select.qualify.is_some() {
        Some("QUALIFY clause")
    } else if select.connect_by.is_some() {
        Some("CONNECT BY clause")
    } else if !select.lateral_views.is_empty() {
        Some("LATERAL VIEW")
    } else if !select.cluster_by.is_empty()
        || !select.distribute_by.is_empty()
        || !select.sort_by.is_empty()
    {
        Some("CLUSTER/DISTRIBUTE/SORT BY")
    } else if !select.named_window.is_empty() {
        Some("named WINDOW clause")
    } else {
        None
    };
    match unsupported {
        Some(reason) => Err(Error::UnsupportedQuery {
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}
