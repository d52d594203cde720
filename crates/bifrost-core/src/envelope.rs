//! Prompt envelope: wraps the untrusted question with the context the LLM
//! needs, and unwraps the LLM's reply.
//!
//! The envelope does no validation. Prompt injection cannot be prevented
//! here; a malicious prompt simply fails to produce a parseable, compliant
//! query downstream.

use crate::dialect::Dialect;
use crate::error::Error;
use crate::policy::ConstraintValidator;
use minijinja::{context, Environment};
use regex::Regex;
use std::sync::OnceLock;

const PROMPT_TEMPLATE: &str = include_str!("prompt.j2");

/// Wraps user input for the LLM and unwraps the LLM's output.
pub trait PromptEnvelope: Send + Sync {
    fn wrap(&self, untrusted_input: &str) -> Result<String, Error>;
    fn unwrap(&self, untrusted_llm_output: &str) -> Result<String, Error>;
}

/// The standard SQL envelope: renders the embedded prompt template with the
/// database schema, the dialect, and the policies' identity constraints.
pub struct SqlPromptEnvelope {
    dialect: Dialect,
    db_schema: String,
    id_constraints: String,
    env: Environment<'static>,
}

impl SqlPromptEnvelope {
    pub fn new(
        dialect: Dialect,
        db_schema: impl Into<String>,
        validators: &[Box<dyn ConstraintValidator>],
    ) -> Self {
        let id_constraints = validators
            .iter()
            .flat_map(|validator| validator.requester_identities())
            .map(|identity| identity.to_string())
            .collect::<Vec<_>>()
            .join(" or ");

        let mut env = Environment::new();
        env.add_template("prompt", PROMPT_TEMPLATE)
            .expect("embedded prompt template parses");

        Self {
            dialect,
            db_schema: db_schema.into(),
            id_constraints,
            env,
        }
    }
}

impl PromptEnvelope for SqlPromptEnvelope {
    fn wrap(&self, untrusted_input: &str) -> Result<String, Error> {
        let template = self
            .env
            .get_template("prompt")
            .map_err(|render_error| Error::Envelope {
                message: render_error.to_string(),
            })?;
        template
            .render(context! {
                dialect => self.dialect.name(),
                db_schema => self.db_schema,
                id_constraints => self.id_constraints,
                query => untrusted_input,
            })
            .map_err(|render_error| Error::Envelope {
                message: render_error.to_string(),
            })
    }

    fn unwrap(&self, untrusted_llm_output: &str) -> Result<String, Error> {
        Ok(unwrap_llm_output(untrusted_llm_output))
    }
}

/// Forwards the input unchanged on wrap, but still honours the unwrap
/// contract, so tests can feed either bare SQL or fenced SQL.
#[derive(Debug, Default)]
pub struct PassthroughEnvelope;

impl PromptEnvelope for PassthroughEnvelope {
    fn wrap(&self, untrusted_input: &str) -> Result<String, Error> {
        Ok(untrusted_input.to_string())
    }

    fn unwrap(&self, untrusted_llm_output: &str) -> Result<String, Error> {
        Ok(unwrap_llm_output(untrusted_llm_output))
    }
}

/// Strips the fencing an LLM tends to put around a query: a triple-backtick
/// fence with an optional `sql` tag (any case, spanning lines), or a bare
/// `sql` prefix line, plus surrounding whitespace.
pub(crate) fn unwrap_llm_output(raw: &str) -> String {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    static BARE_PREFIX: OnceLock<Regex> = OnceLock::new();

    if raw.contains("```") {
        let fence = FENCE
            .get_or_init(|| Regex::new(r"(?is)```(?:sql)?(.*?)```").expect("valid fence regex"));
        if let Some(captures) = fence.captures(raw) {
            return captures[1].trim().to_string();
        }
    }

    let bare_prefix = BARE_PREFIX
        .get_or_init(|| Regex::new(r"^\s*sql\n+").expect("valid prefix regex"));
    bare_prefix.replace(raw, "").trim().to_string()
}
