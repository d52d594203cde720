//! Error types for the traversal pipeline.
//!
//! Every failure mode shares the single [`Error`] enum so callers can match
//! generically or on a specific kind. [`Bifrost::traverse`] wraps the kind in
//! a [`TraverseError`] that also carries the [`TraverseContext`] snapshot:
//! the untrusted human input, the raw LLM output, and the unwrapped text as
//! they were at the point of failure.
//!
//! [`Bifrost::traverse`]: crate::bifrost::Bifrost::traverse

use crate::types::{FqColumn, JoinCondition, ParameterizedConstraint};
use serde::{Deserialize, Serialize};

/// A failure in any phase of the traversal: parsing, alias resolution, facet
/// collection, validation, reconstruction, or a collaborator call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The unwrapped LLM output could not be parsed by the dialect grammar.
    #[error("query could not be parsed:\n\n{query}\n")]
    InvalidQuery { query: String },

    /// The query parsed, but uses a construct outside the restricted
    /// read-only surface this crate is willing to reason about.
    #[error("unsupported query: {reason}")]
    UnsupportedQuery { reason: String },

    /// An unquoted reserved keyword was used as a table or column alias.
    #[error("alias `{keyword}` is a reserved keyword")]
    ReservedKeyword { keyword: String },

    /// The parser produced more than one surviving interpretation.
    ///
    /// Kept for taxonomy completeness: the deterministic dialect parsers in
    /// this crate cannot currently produce it.
    #[error("query resulted in {} ambiguous parses", .candidates.len())]
    AmbiguousParse { candidates: Vec<String> },

    /// A column was not fully qualified as `table.column`.
    #[error("fully-qualified column name needs to be in the form 'table.column'{}",
        .column.as_deref().map(|c| format!(" (got `{c}`)")).unwrap_or_default())]
    UnqualifiedColumn { column: Option<String> },

    /// A selected column is not allowed by the policy.
    #[error("column `{column}` is not allowed in SELECT")]
    IllegalSelectedColumn { column: String },

    /// A column used in WHERE, JOIN, HAVING, or ORDER BY is not allowed.
    #[error("column `{column}` is not allowed in a condition")]
    IllegalConditionColumn { column: FqColumn },

    /// A constraint the policy requires is absent or only optionally applied.
    #[error("missing required constraint `{column}`=:{placeholder}")]
    MissingParameterizedConstraint { column: FqColumn, placeholder: String },

    /// None of the policy's requester identities constrain the query.
    #[error("missing one of the required identities: {}",
        .identities.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))]
    MissingRequiredIdentity {
        identities: Vec<ParameterizedConstraint>,
    },

    /// A join pair is not in the policy's allowlist.
    #[error("join condition {join} is not allowed")]
    IllegalJoinTable { join: JoinCondition },

    /// A join type other than an inner equi-join was used.
    #[error("JOIN type `{join_type}` is not allowed")]
    IllegalJoinType { join_type: String },

    /// The FROM table does not participate in any join edge even though the
    /// query contains joins.
    #[error("table `{table}` is not connected to the query")]
    DisconnectedTable { table: String },

    /// A table's join condition does not reference the table itself.
    #[error("join condition for `{table}` does not reference the table")]
    BogusJoinedTable { table: String },

    /// A scope returns more rows than the policy's maximum, or has no limit.
    #[error("attempting to return too many rows ({})",
        .limit.map(|l| l.to_string()).unwrap_or_else(|| "unlimited".to_string()))]
    TooManyRows { limit: Option<u64> },

    /// A function outside the policy's allowlist was invoked.
    #[error("function `{function}` is not allowed")]
    IllegalFunction { function: String },

    /// An alias resolves to conflicting tables, or shadows another name.
    #[error("alias `{alias}` conflicts with a table name or another alias")]
    AliasConflict { alias: String },

    /// The LLM collaborator failed; its error is surfaced unchanged.
    #[error("LLM completion failed: {message}")]
    Llm { message: String },

    /// The prompt envelope failed to render or unwrap.
    #[error("prompt envelope failed: {message}")]
    Envelope { message: String },
}

/// What the traversal had seen at the point an error was raised.
///
/// Each field is populated as the corresponding phase completes, so a failure
/// early in the pipeline leaves the later fields `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraverseContext {
    /// The human's original request, before the envelope wrapped it.
    pub untrusted_human_input: Option<String>,
    /// The raw LLM completion, before unwrapping.
    pub untrusted_llm_output: Option<String>,
    /// The LLM output with fencing and prefixes stripped.
    pub unwrapped_llm_output: Option<String>,
    /// The validated output, set only when the traversal succeeds.
    pub trusted_llm_output: Option<String>,
}

/// An [`Error`] paired with the [`TraverseContext`] at the time of failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}")]
pub struct TraverseError {
    pub kind: Error,
    pub context: TraverseContext,
}
