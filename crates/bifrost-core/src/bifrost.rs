//! The Bifrost: the bridge between untrusted language and trusted SQL.
//!
//! A traversal runs the whole chain: wrap the human's question, complete it
//! through the LLM, unwrap the reply, parse it, and then prove the parsed
//! query compliant with one of the configured policies, optionally repairing
//! it first. Returning from [`Bifrost::traverse`] is only possible when every
//! step succeeded.

use crate::analyzer::{self, Analysis};
use crate::dialect::Dialect;
use crate::envelope::{PassthroughEnvelope, PromptEnvelope};
use crate::error::{Error, TraverseContext, TraverseError};
use crate::llm::{EchoLlm, LlmIntegration};
use crate::parser::parse_select;
use crate::policy::ConstraintValidator;
use crate::reconstruct;
use crate::validator;
use sqlparser::ast::Query;

/// Composes the LLM, the prompt envelope, the dialect, and the policies.
///
/// Policies are tried in order; the first to accept the query wins, and when
/// all fail the last failure is surfaced.
pub struct Bifrost {
    llm: Box<dyn LlmIntegration>,
    envelope: Box<dyn PromptEnvelope>,
    dialect: Dialect,
    validators: Vec<Box<dyn ConstraintValidator>>,
}

impl Bifrost {
    pub fn new(
        llm: Box<dyn LlmIntegration>,
        envelope: Box<dyn PromptEnvelope>,
        dialect: Dialect,
        validators: Vec<Box<dyn ConstraintValidator>>,
    ) -> Self {
        Self {
            llm,
            envelope,
            dialect,
            validators,
        }
    }

    /// A Bifrost that treats its input as SQL already: the LLM echoes and
    /// the envelope passes through. The way to validate a query you already
    /// have, and the backbone of the test suite.
    pub fn validation_only(dialect: Dialect, validators: Vec<Box<dyn ConstraintValidator>>) -> Self {
        Self::new(
            Box::new(EchoLlm),
            Box::new(PassthroughEnvelope),
            dialect,
            validators,
        )
    }

    /// Runs the full chain from untrusted input to trusted SQL.
    ///
    /// With `repair` enabled, each policy first gets a reconstruction pass
    /// that may tighten limits, qualify aliases, and drop illegal selected
    /// columns before validation.
    pub fn traverse(&self, untrusted_human_input: &str, repair: bool) -> Result<String, TraverseError> {
        let mut context = TraverseContext {
            untrusted_human_input: Some(untrusted_human_input.to_string()),
            ..TraverseContext::default()
        };
        tracing::info!(repair, "traversing untrusted input");

        let untrusted_llm_input = self
            .envelope
            .wrap(untrusted_human_input)
            .map_err(|kind| self.fail(&context, kind))?;
        tracing::debug!("wrapped input in prompt envelope");

        let untrusted_llm_output = self
            .llm
            .complete(&untrusted_llm_input)
            .map_err(|llm_error| {
                self.fail(
                    &context,
                    Error::Llm {
                        message: llm_error.to_string(),
                    },
                )
            })?;
        context.untrusted_llm_output = Some(untrusted_llm_output.clone());
        tracing::debug!("received raw result from LLM");

        let unwrapped = self
            .envelope
            .unwrap(&untrusted_llm_output)
            .map_err(|kind| self.fail(&context, kind))?;
        context.unwrapped_llm_output = Some(unwrapped.clone());
        tracing::debug!(unwrapped = %unwrapped, "unwrapped prompt envelope");

        let query = parse_select(&unwrapped, self.dialect)
            .map_err(|kind| self.fail(&context, kind))?;
        tracing::debug!("parse succeeded");

        if self.validators.is_empty() {
            return Err(self.fail(
                &context,
                Error::UnsupportedQuery {
                    reason: "no constraint validators configured".to_string(),
                },
            ));
        }

        let mut last_failure = None;
        for (index, policy) in self.validators.iter().enumerate() {
            match self.try_policy(policy.as_ref(), repair, &unwrapped, &query) {
                Ok((trusted_sql, trusted_query)) => {
                    let output = self.dialect.post_transform(&trusted_sql, &trusted_query);
                    context.trusted_llm_output = Some(output.clone());
                    tracing::info!(policy = index, "validation succeeded");
                    return Ok(output);
                }
                Err(kind) => {
                    tracing::debug!(policy = index, error = %kind, "policy rejected query");
                    last_failure = Some(kind);
                }
            }
        }

        let kind = last_failure.unwrap_or(Error::UnsupportedQuery {
            reason: "no constraint validators configured".to_string(),
        });
        tracing::info!(error = %kind, "validation failed");
        Err(self.fail(&context, kind))
    }

    /// One policy's attempt: optionally repair (re-parsing the rewritten
    /// text), then analyze and validate.
    fn try_policy(
        &self,
        policy: &dyn ConstraintValidator,
        repair: bool,
        unwrapped: &str,
        query: &Query,
    ) -> Result<(String, Box<Query>), Error> {
        let reserved = self.dialect.reserved_keywords();

        let (candidate_sql, candidate_query) = if repair {
            let fixed_sql = reconstruct::repair(query, policy, reserved)?;
            tracing::debug!(fixed = %fixed_sql, "reconstructed query");
            let reparsed = parse_select(&fixed_sql, self.dialect)?;
            (fixed_sql, reparsed)
        } else {
            (unwrapped.to_string(), Box::new(query.clone()))
        };

        let Analysis { facets, .. } = analyzer::analyze(&candidate_query, reserved)?;
        validator::validate(policy, &facets)?;
        Ok((candidate_sql, candidate_query))
    }

    fn fail(&self, context: &TraverseContext, kind: Error) -> TraverseError {
        TraverseError {
            kind,
            context: context.clone(),
        }
    }
}
