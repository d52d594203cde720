//! The LLM collaborator seam.
//!
//! The traversal treats the LLM as hostile: nothing it returns is trusted
//! until it has passed the whole validation pipeline. This module only
//! defines the integration trait and the test doubles; wiring up a real
//! provider is the caller's business.

use std::collections::HashMap;

/// A failure from the LLM collaborator, surfaced unchanged by the traversal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct LlmError {
    pub message: String,
}

impl LlmError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Completes a prompt. Implementations may block; the core never retries.
pub trait LlmIntegration: Send + Sync {
    fn complete(&self, untrusted_input: &str) -> Result<String, LlmError>;
}

/// Returns its input unchanged. Backs
/// [`Bifrost::validation_only`](crate::bifrost::Bifrost::validation_only),
/// where the "prompt" already is the SQL to validate.
#[derive(Debug, Default)]
pub struct EchoLlm;

impl LlmIntegration for EchoLlm {
    fn complete(&self, untrusted_input: &str) -> Result<String, LlmError> {
        Ok(untrusted_input.to_string())
    }
}

/// Canned responses keyed by the exact prompt. A lookup miss is an error,
/// which doubles as a test for how the traversal surfaces LLM failures.
#[derive(Debug, Default)]
pub struct LookupLlm {
    responses: HashMap<String, String>,
}

impl LookupLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&mut self, prompt: impl Into<String>, response: impl Into<String>) {
        self.responses.insert(prompt.into(), response.into());
    }
}

impl LlmIntegration for LookupLlm {
    fn complete(&self, untrusted_input: &str) -> Result<String, LlmError> {
        self.responses
            .get(untrusted_input)
            .cloned()
            .ok_or_else(|| LlmError::new("no canned response for prompt"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_returns_its_input() {
        assert_eq!(EchoLlm.complete("SELECT 1").unwrap(), "SELECT 1");
    }

    #[test]
    fn lookup_returns_canned_responses() {
        let mut llm = LookupLlm::new();
        llm.respond("question", "answer");
        assert_eq!(llm.complete("question").unwrap(), "answer");
        assert!(llm.complete("other").is_err());
    }
}
