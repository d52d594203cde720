//! Expression traversal over the restricted `SELECT` surface.
//!
//! The original grammar this pipeline trusts is deliberately small, so the
//! walker is a whitelist: every expression form it does not recognise is an
//! [`Error::UnsupportedQuery`]. That keeps the closed-world property — a
//! construct we have not reasoned about cannot sneak through the validator
//! inside an exotic expression.

use crate::error::Error;
use sqlparser::ast::{
    BinaryOperator, Expr, Function, FunctionArg, FunctionArgExpr, FunctionArguments, Ident, Query,
    Value, ValueWithSpan,
};
use std::collections::BTreeSet;

/// Everything a single expression contributes to facet collection.
///
/// Subqueries are boundaries: the scan records them but does not descend,
/// because their bodies belong to their own scope.
#[derive(Debug, Default)]
pub(crate) struct ExprScan<'a> {
    /// Fully-qualified column references (`table.column`).
    pub(crate) compound: Vec<&'a [Ident]>,
    /// Bare identifiers: column aliases or unqualified columns.
    pub(crate) bare: Vec<&'a Ident>,
    /// Lowercased function names.
    pub(crate) functions: BTreeSet<String>,
    /// Subquery bodies reachable from this expression.
    pub(crate) subqueries: Vec<&'a Query>,
}

impl<'a> ExprScan<'a> {
    pub(crate) fn of(expr: &'a Expr) -> Result<Self, Error> {
        let mut scan = Self::default();
        scan.walk(expr)?;
        Ok(scan)
    }

    fn walk(&mut self, expr: &'a Expr) -> Result<(), Error> {
        match expr {
            Expr::Identifier(ident) => self.bare.push(ident),
            Expr::CompoundIdentifier(idents) => self.compound.push(idents),
            Expr::Value(_) | Expr::TypedString { .. } => {}
            Expr::BinaryOp { left, op, right } => {
                ensure_supported_operator(op)?;
                self.walk(left)?;
                self.walk(right)?;
            }
            Expr::UnaryOp { expr: inner, .. } | Expr::Nested(inner) => self.walk(inner)?,
            Expr::IsNull(inner)
            | Expr::IsNotNull(inner)
            | Expr::IsTrue(inner)
            | Expr::IsNotTrue(inner)
            | Expr::IsFalse(inner)
            | Expr::IsNotFalse(inner) => self.walk(inner)?,
            Expr::Between {
                expr: target,
                low,
                high,
                ..
            } => {
                self.walk(target)?;
                self.walk(low)?;
                self.walk(high)?;
            }
            Expr::InList {
                expr: target, list, ..
            } => {
                self.walk(target)?;
                for item in list {
                    self.walk(item)?;
                }
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
                self.walk(target)?;
                self.walk(pattern)?;
            }
            Expr::Cast { expr: inner, .. } => self.walk(inner)?,
            Expr::Case {
                operand,
                conditions,
                else_result,
                ..
            } => {
                if let Some(operand) = operand {
                    self.walk(operand)?;
                }
                for case_when in conditions {
                    self.walk(&case_when.condition)?;
                    self.walk(&case_when.result)?;
                }
                if let Some(else_result) = else_result {
                    self.walk(else_result)?;
                }
            }
            Expr::Function(function) => self.walk_function(function)?,
            Expr::Substring {
                expr: target,
                substring_from,
                substring_for,
                ..
            } => {
                self.functions.insert("substring".to_string());
                self.walk(target)?;
                if let Some(from) = substring_from {
                    self.walk(from)?;
                }
                if let Some(length) = substring_for {
                    self.walk(length)?;
                }
            }
            Expr::Trim {
                expr: target,
                trim_what,
                trim_characters,
                ..
            } => {
                self.functions.insert("trim".to_string());
                self.walk(target)?;
                if let Some(what) = trim_what {
                    self.walk(what)?;
                }
                if let Some(characters) = trim_characters {
                    for c in characters {
                        self.walk(c)?;
                    }
                }
            }
            Expr::Extract { expr: target, .. } => {
                self.functions.insert("extract".to_string());
                self.walk(target)?;
            }
            Expr::Subquery(subquery) => self.subqueries.push(subquery),
            Expr::Exists { subquery, .. } => self.subqueries.push(subquery),
            Expr::InSubquery {
                expr: target,
                subquery,
                ..
            } => {
                self.walk(target)?;
                self.subqueries.push(subquery);
            }
            other => {
                return Err(Error::UnsupportedQuery {
                    reason: format!("unsupported expression `{other}`"),
                })
            }
        }
        Ok(())
    }

    fn walk_function(&mut self, function: &'a Function) -> Result<(), Error> {
        if function.over.is_some() {
            return Err(Error::UnsupportedQuery {
                reason: "window functions".to_string(),
            });
        }
        if function.filter.is_some() || !function.within_group.is_empty() {
            return Err(Error::UnsupportedQuery {
                reason: "function FILTER / WITHIN GROUP clauses".to_string(),
            });
        }

        self.functions.insert(function_name(function));

        match &function.args {
            FunctionArguments::None => Ok(()),
            FunctionArguments::Subquery(_) => Err(Error::UnsupportedQuery {
                reason: "subquery as function argument".to_string(),
            }),
            FunctionArguments::List(list) => {
                if !list.clauses.is_empty() {
                    return Err(Error::UnsupportedQuery {
                        reason: "function argument clauses".to_string(),
                    });
                }
                for arg in &list.args {
                    match arg {
                        FunctionArg::Unnamed(FunctionArgExpr::Expr(inner)) => self.walk(inner)?,
                        // COUNT(*) and friends
                        FunctionArg::Unnamed(FunctionArgExpr::Wildcard)
                        | FunctionArg::Unnamed(FunctionArgExpr::QualifiedWildcard(_)) => {}
                        FunctionArg::Named { .. } | FunctionArg::ExprNamed { .. } => {
                            return Err(Error::UnsupportedQuery {
                                reason: "named function arguments".to_string(),
                            })
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

fn ensure_supported_operator(op: &BinaryOperator) -> Result<(), Error> {
    use BinaryOperator::*;
    match op {
        Eq | NotEq | Lt | LtEq | Gt | GtEq | And | Or | Plus | Minus | Multiply | Divide
        | Modulo | StringConcat => Ok(()),
        other => Err(Error::UnsupportedQuery {
            reason: format!("unsupported operator `{other}`"),
        }),
    }
}

/// The lowercased leading identifier of a function call.
pub(crate) fn function_name(function: &Function) -> String {
    function.name.to_string().to_lowercase()
}

/// Whether the expression is a `COUNT(...)` call. Counting does not reveal
/// underlying values, so counted columns are exempt from SELECT checks.
pub(crate) fn is_count_function(expr: &Expr) -> bool {
    matches!(expr, Expr::Function(function) if function_name(function) == "count")
}

/// Extracts the placeholder token when the expression is a bound parameter.
pub(crate) fn placeholder_token(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Value(ValueWithSpan {
            value: Value::Placeholder(token),
            ..
        }) => Some(token),
        _ => None,
    }
}

/// Strips the parameter sigil from a placeholder token.
pub(crate) fn placeholder_name(token: &str) -> &str {
    token.trim_start_matches([':', '@', '$', '?'])
}
