//! kbqa RAG - Retrieval-Augmented Generation pipeline
//!
//! This crate wires the pieces of the question-answering pipeline together:
//! - `RetrievalService`: chunk, embed and index documents; search the index
//! - `AnswerComposer`: build grounded context and ask the LLM, with a
//!   fallback when nothing relevant was retrieved
//! - LLM clients for OpenAI-compatible APIs and Ollama
//! - A query embedding cache
//! - `KnowledgeBase`: assembles all of the above from `AppConfig`

pub mod cache;
pub mod composer;
pub mod knowledge_base;
pub mod llm;
pub mod retrieval;

pub use cache::{CacheStats, EmbeddingCache};
pub use composer::{
    compose_context, system_prompt, AnswerComposer, ComposerConfig, CONTEXT_SEPARATOR,
    FALLBACK_ANSWER, REFUSAL_SENTENCE,
};
pub use knowledge_base::KnowledgeBase;
pub use llm::{create_llm_client, OllamaClient, OpenAiClient};
pub use retrieval::{restore_index, IndexStats, RetrievalService};

// ============================================================================
// Prompt Builder
// ============================================================================

/// Builder for constructing prompt sections
pub struct PromptBuilder {
    system_instruction: String,
    context_sections: Vec<String>,
    question: String,
    instructions: Vec<String>,
}

impl PromptBuilder {
    /// Create a new prompt builder
    pub fn new() -> Self {
        Self {
            system_instruction: String::new(),
            context_sections: Vec::new(),
            question: String::new(),
            instructions: Vec::new(),
        }
    }

    /// Set system instruction
    pub fn system(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = instruction.into();
        self
    }

    /// Add a context section
    pub fn add_context(mut self, context: impl Into<String>) -> Self {
        self.context_sections.push(context.into());
        self
    }

    /// Set the question
    pub fn question(mut self, q: impl Into<String>) -> Self {
        self.question = q.into();
        self
    }

    /// Add a numbered instruction
    pub fn add_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instructions.push(instruction.into());
        self
    }

    /// Build the final prompt; empty sections are left out
    pub fn build(self) -> String {
        let mut prompt = String::new();

        if !self.system_instruction.is_empty() {
            prompt.push_str(&self.system_instruction);
            prompt.push_str("\n\n");
        }

        if !self.instructions.is_empty() {
            prompt.push_str("<instructions>\n");
            for (i, inst) in self.instructions.iter().enumerate() {
                prompt.push_str(&format!("{}. {}\n", i + 1, inst));
            }
            prompt.push_str("</instructions>\n\n");
        }

        if !self.context_sections.is_empty() {
            prompt.push_str("<context>\n");
            for section in &self.context_sections {
                prompt.push_str(section);
                prompt.push('\n');
            }
            prompt.push_str("</context>\n\n");
        }

        if !self.question.is_empty() {
            prompt.push_str("<question>\n");
            prompt.push_str(&self.question);
            prompt.push_str("\n</question>\n");
        }

        prompt.trim_end().to_string()
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_builder() {
        let prompt = PromptBuilder::new()
            .system("You are a helpful assistant.")
            .add_context("Context from document A")
            .add_context("Context from document B")
            .question("What is the answer?")
            .add_instruction("Be concise")
            .add_instruction("Use bullet points")
            .build();

        assert!(prompt.starts_with("You are a helpful assistant."));
        assert!(prompt.contains("<context>"));
        assert!(prompt.contains("What is the answer?"));
        assert!(prompt.contains("1. Be concise"));
        assert!(prompt.contains("2. Use bullet points"));
    }

    #[test]
    fn test_prompt_builder_skips_empty_sections() {
        let prompt = PromptBuilder::new().question("Only a question").build();
        assert!(!prompt.contains("<context>"));
        assert!(!prompt.contains("<instructions>"));
        assert_eq!(prompt, "<question>\nOnly a question\n</question>");
    }
}
