//! Generation backend traits and prompt assembly.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::GenerationError;
use super::item::WorkItem;

/// Output of one generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    /// Generated text.
    pub text: String,
    /// Tokens billed by the backend, when it reports them.
    pub tokens_used: Option<u64>,
}

impl Generation {
    /// Generation without token accounting.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tokens_used: None,
        }
    }
}

/// Abstraction over a metered generation service.
///
/// Calls must be repeatable with the same prompt; the scheduler may retry a
/// batch after a failure. The scheduler applies the call deadline itself.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use batchgate::core::{Generation, GenerationError, Generator};
///
/// struct Echo;
///
/// #[async_trait]
/// impl Generator for Echo {
///     async fn generate(&self, prompt: &str, _max_output_tokens: u64)
///         -> Result<Generation, GenerationError>
///     {
///         Ok(Generation::text(prompt))
///     }
/// }
/// ```
#[async_trait]
pub trait Generator: Send + Sync + 'static {
    /// Generate text for `prompt`, producing at most `max_output_tokens`.
    async fn generate(
        &self,
        prompt: &str,
        max_output_tokens: u64,
    ) -> Result<Generation, GenerationError>;
}

/// Renders the prompt for one partition's batch.
pub trait PromptBuilder: Send + Sync {
    /// Build the prompt text for `items`, all sharing `partition`.
    fn build(&self, partition: &str, items: &[WorkItem]) -> String;
}

/// Numbered plain-text listing of the batch.
#[derive(Debug, Clone, Default)]
pub struct PlainPromptBuilder;

impl PromptBuilder for PlainPromptBuilder {
    fn build(&self, partition: &str, items: &[WorkItem]) -> String {
        let mut prompt = format!(
            "Summarize the following {} items. Respond in: {partition}\n",
            items.len()
        );
        for (idx, item) in items.iter().enumerate() {
            prompt.push_str(&format!("\n[{}] {}\n{}\n", idx + 1, item.title, item.content));
        }
        prompt
    }
}
