//! Answer composition
//!
//! Turns retrieved passages into a grounded generation request and calls the
//! LLM. When retrieval finds nothing the fixed fallback is returned and the
//! LLM is never called.

use crate::retrieval::RetrievalService;
use crate::PromptBuilder;
use chrono::Utc;
use kbqa_core::{
    Answer, GenerationRequest, KbqaError, LlmClient, LlmConfig, QueryResult, RagConfig, Result,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Returned when no passage is relevant to the question
pub const FALLBACK_ANSWER: &str =
    "I'm sorry, I don't have information about this topic in my knowledge base.";

/// The model must answer out-of-scope questions with exactly this sentence
pub const REFUSAL_SENTENCE: &str = "I'm sorry I cannot help you about this subject";

/// Placed between passages in the composed context
pub const CONTEXT_SEPARATOR: &str = "\n---\n";

// ============================================================================
// Configuration
// ============================================================================

/// Answer composer configuration
#[derive(Debug, Clone)]
pub struct ComposerConfig {
    /// Passages retrieved when the caller does not choose
    pub top_k: usize,

    /// Largest k a caller may ask for
    pub max_top_k: usize,

    /// Passages placed in the context
    pub max_passages: usize,

    /// Characters kept from each passage
    pub max_per_passage: usize,

    /// Subjects the assistant covers, used in the system prompt
    pub assistant_scope: String,

    /// Deadline for one generation attempt
    pub generation_timeout: Duration,

    /// Extra attempts after a failed or timed-out generation
    pub max_retries: u32,

    /// Delay before retry n is `n * retry_backoff`
    pub retry_backoff: Duration,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self::from_config(&RagConfig::default(), &LlmConfig::default())
    }
}

impl ComposerConfig {
    /// Longest `answer` can spend generating: every attempt timing out plus
    /// the backoff between them
    pub fn worst_case_generation(&self) -> Duration {
        let attempts = self.max_retries + 1;
        let backoff_steps = attempts * (attempts - 1) / 2;
        self.generation_timeout * attempts + self.retry_backoff * backoff_steps
    }

    pub fn from_config(rag: &RagConfig, llm: &LlmConfig) -> Self {
        Self {
            top_k: rag.top_k,
            max_top_k: rag.max_top_k,
            max_passages: rag.max_passages,
            max_per_passage: rag.max_per_passage,
            assistant_scope: rag.assistant_scope.clone(),
            generation_timeout: Duration::from_secs(llm.timeout_secs),
            max_retries: llm.max_retries,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

// ============================================================================
// Prompt
// ============================================================================

/// System instructions sent with every question
pub fn system_prompt(assistant_scope: &str) -> String {
    PromptBuilder::new()
        .system(format!(
            "You are an assistant specialized in {assistant_scope}. \
             You answer questions using only the context provided with each question."
        ))
        .add_instruction(
            "Answer only from the context. Do not use outside knowledge and do not invent facts.",
        )
        .add_instruction(format!(
            "If the question is not covered by the context or is outside your domain, \
             reply with exactly: \"{REFUSAL_SENTENCE}\""
        ))
        .add_instruction(
            "Refuse unethical, illegal or unsafe requests and briefly state the reason.",
        )
        .add_instruction("Use clear, concise language, with bullet points where appropriate.")
        .add_instruction("Never mention document titles, file names or sources.")
        .build()
}

/// Join the first `max_passages` results, each cut to `max_per_passage`
/// characters, keeping their order
pub fn compose_context(results: &[QueryResult], max_per_passage: usize, max_passages: usize) -> String {
    results
        .iter()
        .take(max_passages)
        .map(|r| truncate_chars(&r.chunk.text, max_per_passage))
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

// ============================================================================
// Answer Composer
// ============================================================================

/// Answers questions from the knowledge base
pub struct AnswerComposer {
    retrieval: Arc<RetrievalService>,
    llm: Arc<dyn LlmClient>,
    config: ComposerConfig,
    system_prompt: String,
}

impl AnswerComposer {
    pub fn new(
        retrieval: Arc<RetrievalService>,
        llm: Arc<dyn LlmClient>,
        config: ComposerConfig,
    ) -> Self {
        let system_prompt = system_prompt(&config.assistant_scope);
        Self {
            retrieval,
            llm,
            config,
            system_prompt,
        }
    }

    pub fn config(&self) -> &ComposerConfig {
        &self.config
    }

    pub fn retrieval(&self) -> &Arc<RetrievalService> {
        &self.retrieval
    }

    /// Build the generation request for a question and its passages
    pub fn compose(&self, question: &str, results: &[QueryResult]) -> GenerationRequest {
        GenerationRequest {
            system: self.system_prompt.clone(),
            context: compose_context(
                results,
                self.config.max_per_passage,
                self.config.max_passages,
            ),
            question: question.to_string(),
        }
    }

    /// Answer a question, retrieving `k` passages (default `top_k`)
    pub async fn answer(&self, question: &str, k: Option<usize>) -> Result<Answer> {
        let start = Instant::now();
        let question = question.trim();
        if question.is_empty() {
            return Err(KbqaError::ValidationError(
                "Question cannot be empty".to_string(),
            ));
        }

        let k = k.unwrap_or(self.config.top_k);
        if k == 0 || k > self.config.max_top_k {
            return Err(KbqaError::ValidationError(format!(
                "top_k must be between 1 and {}",
                self.config.max_top_k
            )));
        }

        let mut passages = self.retrieval.search(question, k).await?;
        // The answer reports only the passages the model is shown
        passages.truncate(self.config.max_passages);

        if passages.is_empty() {
            tracing::info!("No relevant passages, returning fallback answer");
            return Ok(Answer {
                text: FALLBACK_ANSWER.to_string(),
                passages,
                grounded: false,
                processing_time_ms: start.elapsed().as_millis() as u64,
                answered_at: Utc::now(),
            });
        }

        let request = self.compose(question, &passages);
        tracing::info!(
            "Calling {} with {} passages ({} context chars)",
            self.llm.name(),
            passages.len(),
            request.context.chars().count()
        );

        let text = self.generate_with_retry(&request).await?;

        Ok(Answer {
            text,
            passages,
            grounded: true,
            processing_time_ms: start.elapsed().as_millis() as u64,
            answered_at: Utc::now(),
        })
    }

    /// Answer text for display, with errors turned into user-safe messages
    pub async fn answer_text(&self, question: &str) -> String {
        match self.answer(question, None).await {
            Ok(answer) => answer.text,
            Err(e) => {
                tracing::error!("Failed to answer question: {}", e);
                e.user_message()
            }
        }
    }

    async fn generate_with_retry(&self, request: &GenerationRequest) -> Result<String> {
        let attempts = self.config.max_retries + 1;
        let mut last_error = None;

        for attempt in 1..=attempts {
            let outcome =
                tokio::time::timeout(self.config.generation_timeout, self.llm.generate(request))
                    .await;

            let error = match outcome {
                Ok(Ok(text)) => return Ok(text),
                Ok(Err(e)) if !e.is_retryable() => return Err(e),
                Ok(Err(e)) => e,
                Err(_) => KbqaError::GenerationError(format!(
                    "{} timed out after {:?}",
                    self.llm.name(),
                    self.config.generation_timeout
                )),
            };

            tracing::warn!("Generation attempt {}/{} failed: {}", attempt, attempts, error);
            last_error = Some(error);

            if attempt < attempts {
                tokio::time::sleep(self.config.retry_backoff * attempt).await;
            }
        }

        Err(last_error
            .unwrap_or_else(|| KbqaError::GenerationError("generation failed".to_string())))
    }
}

// ============================================================================
// Tests
// ============================================================================
