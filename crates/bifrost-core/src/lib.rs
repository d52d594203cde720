//! A trust boundary between a large language model and your database.
//!
//! `bifrost-core` takes a natural-language request, asks an LLM to translate
//! it into a SQL `SELECT` statement, and then *proves*, by static analysis of
//! the statement, that executing it cannot disclose data outside an allowlist
//! policy or perform anything beyond a restricted read. A statement is
//! accepted, accepted after repair, or rejected with a typed error.
//!
//! The pipeline: prompt envelope → LLM → unwrap → parse → alias collection →
//! facet collection → policy validation (optionally preceded by
//! reconstruction) → dialect placeholder post-transform.
//!
//! ```no_run
//! use bifrost_core::{Bifrost, Dialect};
//! # fn policies() -> Vec<Box<dyn bifrost_core::ConstraintValidator>> { Vec::new() }
//!
//! let bifrost = Bifrost::validation_only(Dialect::Sqlite, policies());
//! let trusted = bifrost.traverse(
//!     "SELECT f.title FROM film f WHERE f.film_id = :film_id LIMIT 20",
//!     true,
//! )?;
//! # Ok::<(), bifrost_core::TraverseError>(())
//! ```

mod analyzer;
pub mod bifrost;
pub mod dialect;
pub mod envelope;
pub mod error;
pub mod llm;
pub mod parser;
pub mod policy;
pub mod presets;
mod reconstruct;
pub mod types;
mod validator;

pub use bifrost::Bifrost;
pub use dialect::Dialect;
pub use envelope::{PassthroughEnvelope, PromptEnvelope, SqlPromptEnvelope};
pub use error::{Error, TraverseContext, TraverseError};
pub use llm::{EchoLlm, LlmError, LlmIntegration, LookupLlm};
pub use policy::ConstraintValidator;
pub use types::{AllowedJoin, FqColumn, JoinCondition, ParameterizedConstraint};
