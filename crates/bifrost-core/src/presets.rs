//! Curated allowlists of SQL functions that do not leak data beyond the
//! values they are applied to.
//!
//! These back the default [`can_use_function`] implementation. The lists are
//! intentionally conservative: anything that touches the filesystem, session
//! state, or server configuration is absent.
//!
//! [`can_use_function`]: crate::policy::ConstraintValidator::can_use_function

use crate::dialect::Dialect;
use std::collections::HashSet;
use std::sync::OnceLock;

const AGGREGATE_FUNCTIONS: &[&str] = &[
    "avg", "count", "group_concat", "max", "min", "sum", "total",
];

const STRING_FUNCTIONS: &[&str] = &[
    "ascii",
    "char_length",
    "character_length",
    "concat",
    "concat_ws",
    "format",
    "hex",
    "initcap",
    "instr",
    "left",
    "length",
    "lower",
    "lpad",
    "ltrim",
    "repeat",
    "replace",
    "reverse",
    "right",
    "rpad",
    "rtrim",
    "split_part",
    "strpos",
    "substr",
    "substring",
    "translate",
    "trim",
    "upper",
];

const MATH_FUNCTIONS: &[&str] = &[
    "abs", "ceil", "ceiling", "exp", "floor", "ln", "log", "log10", "log2", "mod", "pi", "pow",
    "power", "round", "sign", "sqrt", "trunc",
];

const SQLITE_DATE_FUNCTIONS: &[&str] = &["date", "datetime", "julianday", "strftime", "time"];

const MYSQL_DATE_FUNCTIONS: &[&str] = &[
    "curdate",
    "current_date",
    "current_time",
    "current_timestamp",
    "curtime",
    "date",
    "date_add",
    "date_format",
    "date_sub",
    "datediff",
    "day",
    "dayname",
    "dayofmonth",
    "dayofweek",
    "dayofyear",
    "hour",
    "minute",
    "month",
    "monthname",
    "now",
    "quarter",
    "second",
    "str_to_date",
    "week",
    "year",
];

const POSTGRES_DATE_FUNCTIONS: &[&str] = &[
    "age",
    "current_date",
    "current_time",
    "current_timestamp",
    "date_bin",
    "date_part",
    "date_trunc",
    "extract",
    "justify_days",
    "justify_hours",
    "localtime",
    "localtimestamp",
    "make_date",
    "make_interval",
    "make_time",
    "make_timestamp",
    "now",
    "to_char",
    "to_date",
    "to_timestamp",
];

const COMMON_FUNCTIONS: &[&str] = &["coalesce", "ifnull", "nullif"];

fn build(dialect_specific: &[&'static str]) -> HashSet<&'static str> {
    AGGREGATE_FUNCTIONS
        .iter()
        .chain(STRING_FUNCTIONS)
        .chain(MATH_FUNCTIONS)
        .chain(COMMON_FUNCTIONS)
        .chain(dialect_specific)
        .copied()
        .collect()
}

/// The safe-function allowlist for a dialect. Names are lowercase.
pub fn safe_functions(dialect: Dialect) -> &'static HashSet<&'static str> {
    static SQLITE: OnceLock<HashSet<&'static str>> = OnceLock::new();
    static MYSQL: OnceLock<HashSet<&'static str>> = OnceLock::new();
    static POSTGRES: OnceLock<HashSet<&'static str>> = OnceLock::new();

    match dialect {
        Dialect::Sqlite => SQLITE.get_or_init(|| build(SQLITE_DATE_FUNCTIONS)),
        Dialect::Mysql => MYSQL.get_or_init(|| build(MYSQL_DATE_FUNCTIONS)),
        Dialect::Postgres => POSTGRES.get_or_init(|| build(POSTGRES_DATE_FUNCTIONS)),
    }
}
