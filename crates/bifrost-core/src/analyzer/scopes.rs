//! Alias collection: builds the per-scope namespace of table aliases, column
//! aliases, and derived-table aliases before any facet is extracted.
//!
//! This runs as its own pass because a query may use an alias before the
//! clause that defines it. Phase A visits every query level and records raw
//! alias bindings; phase B detects conflicts and rewrites recorded columns to
//! authoritative table names.

use crate::analyzer::expression::{is_count_function, ExprScan};
use crate::analyzer::identifier::{object_name_text, resolve_ident};
use crate::error::Error;
use crate::types::FqColumn;
use sqlparser::ast::{
    Expr, GroupByExpr, Join, JoinConstraint, JoinOperator, OrderByKind, Query, SelectItem,
    SetExpr, TableFactor,
};
use std::collections::{BTreeSet, HashMap, HashSet};

pub(crate) type ScopeId = usize;

/// The namespace belonging to one query level (the outer query, a derived
/// table, a CTE body, or a scalar subquery).
#[derive(Debug, Default)]
pub(crate) struct Scope {
    pub(crate) parent: Option<ScopeId>,
    /// Table alias to the set of authoritative names it was bound to. More
    /// than one binding is an alias conflict.
    pub(crate) tables: HashMap<String, BTreeSet<String>>,
    /// Select-list alias to its backing columns. `None` marks an expression
    /// alias that cannot be attributed to any column.
    pub(crate) columns: HashMap<String, Option<BTreeSet<FqColumn>>>,
    /// Aliases naming a derived table, CTE, or aliased scalar subquery.
    pub(crate) subqueries: HashMap<String, ScopeId>,
    /// Authoritative name of the FROM table (or a derived-table alias).
    pub(crate) selected_table: Option<String>,
}

/// How a table reference resolves within a scope chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ResolvedTable {
    /// A real table, by authoritative name.
    Table(String),
    /// A derived table or CTE; its interior is validated separately.
    Derived,
}

/// All scopes of one parsed query, addressable by `Query` node identity.
///
/// The side-table is keyed by node address, which is stable for the lifetime
/// of the borrow the analysis runs under.
#[derive(Debug, Default)]
pub(crate) struct ScopeMap {
    scopes: Vec<Scope>,
    by_query: HashMap<usize, ScopeId>,
}

fn query_key(query: &Query) -> usize {
    query as *const Query as usize
}

impl ScopeMap {
    pub(crate) fn build(query: &Query, reserved: &HashSet<String>) -> Result<Self, Error> {
        let mut builder = ScopeBuilder {
            map: ScopeMap::default(),
            reserved,
        };
        builder.visit_query(query, None)?;
        builder.map.resolve()?;
        Ok(builder.map)
    }

    pub(crate) fn scope_id_of(&self, query: &Query) -> Option<ScopeId> {
        self.by_query.get(&query_key(query)).copied()
    }

    pub(crate) fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id]
    }

    /// Resolves a table reference through the scope chain: alias to
    /// authoritative name, then derived-table detection.
    pub(crate) fn resolve_table(&self, scope: ScopeId, name: &str) -> ResolvedTable {
        if self.lookup_subquery(scope, name) {
            return ResolvedTable::Derived;
        }
        if let Some(authoritative) = self.lookup_table_alias(scope, name) {
            if self.lookup_subquery(scope, &authoritative) {
                return ResolvedTable::Derived;
            }
            return ResolvedTable::Table(authoritative);
        }
        ResolvedTable::Table(name.to_string())
    }

    /// Looks up a select-list alias through the scope chain.
    pub(crate) fn resolve_column_alias(
        &self,
        scope: ScopeId,
        alias: &str,
    ) -> Option<&Option<BTreeSet<FqColumn>>> {
        let mut current = Some(scope);
        while let Some(id) = current {
            if let Some(entry) = self.scopes[id].columns.get(alias) {
                return Some(entry);
            }
            current = self.scopes[id].parent;
        }
        None
    }

    fn lookup_table_alias(&self, scope: ScopeId, name: &str) -> Option<String> {
        let mut current = Some(scope);
        while let Some(id) = current {
            if let Some(tables) = self.scopes[id].tables.get(name) {
                return tables.iter().next().cloned();
            }
            current = self.scopes[id].parent;
        }
        None
    }

    fn lookup_subquery(&self, scope: ScopeId, name: &str) -> bool {
        let mut current = Some(scope);
        while let Some(id) = current {
            if self.scopes[id].subqueries.contains_key(name) {
                return true;
            }
            current = self.scopes[id].parent;
        }
        false
    }

    fn resolve(&mut self) -> Result<(), Error> {
        for scope in &self.scopes {
            for (alias, tables) in &scope.tables {
                if tables.len() > 1 {
                    return Err(Error::AliasConflict {
                        alias: alias.clone(),
                    });
                }
            }
        }

        let table_aliases: HashSet<&String> =
            self.scopes.iter().flat_map(|s| s.tables.keys()).collect();
        for scope in &self.scopes {
            for alias in scope.subqueries.keys() {
                if table_aliases.contains(alias) {
                    return Err(Error::AliasConflict {
                        alias: alias.clone(),
                    });
                }
            }
        }

        // rewrite recorded column aliases to authoritative table names
        for id in 0..self.scopes.len() {
            let rewritten: HashMap<String, Option<BTreeSet<FqColumn>>> = self.scopes[id]
                .columns
                .iter()
                .map(|(alias, backing)| {
                    let resolved = backing.as_ref().map(|columns| {
                        columns
                            .iter()
                            .map(|column| match self.resolve_table(id, &column.table) {
                                ResolvedTable::Table(authoritative) => {
                                    FqColumn::new(authoritative, &column.column)
                                }
                                ResolvedTable::Derived => column.clone(),
                            })
                            .collect()
                    });
                    (alias.clone(), resolved)
                })
                .collect();
            self.scopes[id].columns = rewritten;
        }
        Ok(())
    }
}

struct ScopeBuilder<'a> {
    map: ScopeMap,
    reserved: &'a HashSet<String>,
}

impl ScopeBuilder<'_> {
    fn visit_query(&mut self, query: &Query, parent: Option<ScopeId>) -> Result<ScopeId, Error> {
        let id = self.map.scopes.len();
        self.map.scopes.push(Scope {
            parent,
            ..Scope::default()
        });
        self.map.by_query.insert(query_key(query), id);

        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                let alias = resolve_ident(&cte.alias.name, self.reserved)?;
                let child = self.visit_query(&cte.query, Some(id))?;
                self.map.scopes[id].subqueries.insert(alias, child);
            }
        }

        let SetExpr::Select(select) = query.body.as_ref() else {
            return Err(Error::UnsupportedQuery {
                reason: "unsupported query body".to_string(),
            });
        };

        let from = match select.from.as_slice() {
            [] => {
                return Err(Error::UnsupportedQuery {
                    reason: "SELECT without FROM".to_string(),
                })
            }
            [table_with_joins] => table_with_joins,
            _ => {
                return Err(Error::UnsupportedQuery {
                    reason: "multiple FROM tables".to_string(),
                })
            }
        };

        self.register_relation(id, &from.relation, true)?;
        for join in &from.joins {
            self.register_relation(id, &join.relation, false)?;
            if let Some(on_expr) = inner_join_on(join) {
                self.visit_expr_subqueries(id, on_expr)?;
            }
        }

        for item in &select.projection {
            match item {
                SelectItem::ExprWithAlias { expr, alias } => {
                    let alias_name = resolve_ident(alias, self.reserved)?;
                    if is_count_function(expr) {
                        self.map.scopes[id].columns.insert(alias_name, None);
                        self.visit_expr_subqueries(id, expr)?;
                    } else if let Expr::Subquery(subquery) = expr {
                        let child = self.visit_query(subquery, Some(id))?;
                        self.map.scopes[id].subqueries.insert(alias_name, child);
                    } else {
                        let scan = ExprScan::of(expr)?;
                        let mut backing = BTreeSet::new();
                        for idents in &scan.compound {
                            if let [table, column] = idents {
                                backing.insert(FqColumn::new(
                                    resolve_ident(table, self.reserved)?,
                                    resolve_ident(column, self.reserved)?,
                                ));
                            }
                        }
                        let entry = (!backing.is_empty()).then_some(backing);
                        self.map.scopes[id].columns.insert(alias_name, entry);
                        for subquery in scan.subqueries {
                            self.visit_query(subquery, Some(id))?;
                        }
                    }
                }
                SelectItem::UnnamedExpr(expr) => self.visit_expr_subqueries(id, expr)?,
                _ => {}
            }
        }

        if let Some(selection) = &select.selection {
            self.visit_expr_subqueries(id, selection)?;
        }
        if let Some(having) = &select.having {
            self.visit_expr_subqueries(id, having)?;
        }
        if let GroupByExpr::Expressions(exprs, _) = &select.group_by {
            for expr in exprs {
                self.visit_expr_subqueries(id, expr)?;
            }
        }
        if let Some(order_by) = &query.order_by {
            if let OrderByKind::Expressions(exprs) = &order_by.kind {
                for order_expr in exprs {
                    self.visit_expr_subqueries(id, &order_expr.expr)?;
                }
            }
        }

        Ok(id)
    }

    fn register_relation(
        &mut self,
        scope: ScopeId,
        relation: &TableFactor,
        is_from: bool,
    ) -> Result<(), Error> {
        match relation {
            TableFactor::Table { name, alias, .. } => {
                let table_name = object_name_text(name, self.reserved)?;
                match alias {
                    Some(table_alias) => {
                        let alias_name = resolve_ident(&table_alias.name, self.reserved)?;
                        self.map.scopes[scope]
                            .tables
                            .entry(alias_name)
                            .or_default()
                            .insert(table_name.clone());
                        if is_from {
                            self.map.scopes[scope].selected_table = Some(table_name);
                        }
                    }
                    None => {
                        // a plain name may reference a CTE defined above
                        if !self.map.lookup_subquery(scope, &table_name) {
                            self.map.scopes[scope]
                                .tables
                                .entry(table_name.clone())
                                .or_default()
                                .insert(table_name.clone());
                        }
                        if is_from {
                            self.map.scopes[scope].selected_table = Some(table_name);
                        }
                    }
                }
                Ok(())
            }
            TableFactor::Derived {
                subquery, alias, ..
            } => {
                let Some(table_alias) = alias else {
                    return Err(Error::UnsupportedQuery {
                        reason: "derived table requires an alias".to_string(),
                    });
                };
                let alias_name = resolve_ident(&table_alias.name, self.reserved)?;
                let child = self.visit_query(subquery, Some(scope))?;
                self.map.scopes[scope]
                    .subqueries
                    .insert(alias_name.clone(), child);
                if is_from {
                    self.map.scopes[scope].selected_table = Some(alias_name);
                }
                Ok(())
            }
            other => Err(Error::UnsupportedQuery {
                reason: format!("unsupported table reference `{other}`"),
            }),
        }
    }

    fn visit_expr_subqueries(&mut self, scope: ScopeId, expr: &Expr) -> Result<(), Error> {
        for subquery in ExprScan::of(expr)?.subqueries {
            self.visit_query(subquery, Some(scope))?;
        }
        Ok(())
    }
}

/// The ON expression of an inner join. Illegal join types are rejected later
/// by the facet collector, so nothing is harvested from them here.
fn inner_join_on(join: &Join) -> Option<&Expr> {
    match &join.join_operator {
        JoinOperator::Join(JoinConstraint::On(expr))
        | JoinOperator::Inner(JoinConstraint::On(expr)) => Some(expr),
        _ => None,
    }
}
