//! Per-dialect knowledge: the sqlparser handle, the reserved-keyword set,
//! placeholder rendering, and the placeholder post-transform.

use serde::{Deserialize, Serialize};
use sqlparser::ast::{Expr, Query, Value, ValueWithSpan, Visit, Visitor};
use sqlparser::dialect::{MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::keywords::{
    Keyword, ALL_KEYWORDS, ALL_KEYWORDS_INDEX, RESERVED_FOR_COLUMN_ALIAS,
    RESERVED_FOR_TABLE_ALIAS,
};
use sqlparser::tokenizer::Location;
use std::collections::HashSet;
use std::ops::ControlFlow;
use std::sync::OnceLock;

/// SQL dialect a [`Bifrost`](crate::bifrost::Bifrost) traverses.
///
/// The dialect decides how the untrusted text is parsed, which keywords may
/// not be used as aliases, and how named parameters are rendered for the
/// database driver that will eventually execute the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Sqlite,
    Mysql,
    Postgres,
}

impl Dialect {
    /// The parser handle for this dialect. The handle is an immutable value:
    /// construct once, parse many.
    pub fn to_sqlparser_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect> {
        match self {
            Self::Sqlite => Box::new(SQLiteDialect {}),
            Self::Mysql => Box::new(MySqlDialect {}),
            Self::Postgres => Box::new(PostgreSqlDialect {}),
        }
    }

    /// Lowercase dialect name, used in prompt envelopes and diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Mysql => "mysql",
            Self::Postgres => "postgres",
        }
    }

    /// Keywords that may not appear unquoted as a table or column alias.
    ///
    /// Built from sqlparser's reserved-for-alias tables, which cover the
    /// clause keywords an LLM most plausibly collides with (`order`,
    /// `limit`, `left`, ...). Uppercase, compare case-insensitively.
    pub fn reserved_keywords(&self) -> &'static HashSet<String> {
        static KEYWORDS: OnceLock<HashSet<String>> = OnceLock::new();
        KEYWORDS.get_or_init(|| {
            let mut set: HashSet<String> = RESERVED_FOR_TABLE_ALIAS
                .iter()
                .chain(RESERVED_FOR_COLUMN_ALIAS)
                .filter_map(keyword_text)
                .map(str::to_string)
                .collect();
            for extra in [
                "AND", "AS", "BETWEEN", "BY", "CASE", "DISTINCT", "ELSE", "END", "EXISTS",
                "IN", "IS", "JOIN", "LIKE", "NOT", "NULL", "ON", "OR", "THEN", "WHEN",
            ] {
                set.insert(extra.to_string());
            }
            set
        })
    }

    /// Renders the dialect-native form of a named parameter.
    pub fn placeholder(&self, name: &str) -> String {
        match self {
            Self::Sqlite => format!(":{name}"),
            Self::Mysql => format!("%({name})s"),
            Self::Postgres => format!("${name}"),
        }
    }

    /// Rewrites every `:name` placeholder in `sql` to the dialect-native
    /// form.
    ///
    /// `query` must be the parse of `sql` itself: the placeholder spans are
    /// taken from the tree and applied to the text in reverse byte order so
    /// earlier offsets stay valid while splicing.
    pub(crate) fn post_transform(&self, sql: &str, query: &Query) -> String {
        let mut placeholders = collect_placeholders(query);
        placeholders.retain(|(_, token)| token.starts_with(':'));

        let mut spans: Vec<(usize, &str)> = placeholders
            .iter()
            .filter_map(|(location, token)| {
                let start = byte_offset(sql, *location)?;
                // only rewrite what is actually at the recorded position; the
                // span may anchor on the sigil or on the name after it
                [start, start.saturating_sub(1)]
                    .into_iter()
                    .find(|&offset| sql[offset..].starts_with(token.as_str()))
                    .map(|offset| (offset, token.as_str()))
            })
            .collect();
        spans.sort_by(|a, b| b.0.cmp(&a.0));

        let mut output = sql.to_string();
        for (start, token) in spans {
            let rendered = self.placeholder(&token[1..]);
            output.replace_range(start..start + token.len(), &rendered);
        }
        output
    }
}

fn keyword_text(keyword: &Keyword) -> Option<&'static str> {
    ALL_KEYWORDS_INDEX
        .iter()
        .position(|candidate| candidate == keyword)
        .map(|index| ALL_KEYWORDS[index])
}

fn collect_placeholders(query: &Query) -> Vec<(Location, String)> {
    struct PlaceholderCollector {
        found: Vec<(Location, String)>,
    }

    impl Visitor for PlaceholderCollector {
        type Break = ();

        fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
            if let Expr::Value(ValueWithSpan {
                value: Value::Placeholder(token),
                span,
            }) = expr
            {
                self.found.push((span.start, token.clone()));
            }
            ControlFlow::Continue(())
        }
    }

    let mut collector = PlaceholderCollector { found: Vec::new() };
    let _ = query.visit(&mut collector);
    collector.found
}

/// Converts a 1-based line/column token location into a byte offset.
fn byte_offset(sql: &str, location: Location) -> Option<usize> {
    if location.line == 0 || location.column == 0 {
        return None;
    }
    let mut line_start = 0usize;
    for _ in 1..location.line {
        line_start += sql[line_start..].find('\n')? + 1;
    }
    let line = &sql[line_start..];
    let mut column = 1u64;
    for (index, _) in line.char_indices() {
        if column == location.column {
            return Some(line_start + index);
        }
        column += 1;
    }
    (column == location.column).then_some(line_start + line.len())
}
