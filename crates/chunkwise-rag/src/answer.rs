//! Retrieval-augmented answers.

use chunkwise_core::{ChunkwiseError, SearchFilter};
use serde::Serialize;

use crate::llm::LlmClient;
use crate::prompt::build_messages;
use crate::retrieval::{Citation, RetrievedContext, Retriever};

/// An answer with the chunks it was grounded on.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub text: String,
    pub model: String,
    /// Chunks given to the model, in context order.
    pub citations: Vec<Citation>,
    pub context_truncated: bool,
}

/// Sends a composed context and question to the chat model.
#[derive(Debug)]
pub struct Synthesizer {
    llm: LlmClient,
}

impl Synthesizer {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    pub fn model(&self) -> &str {
        self.llm.model()
    }

    /// Ask the model about `question` given `context`. Makes exactly one
    /// request.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkwiseError::AnswerService`] if the chat call fails.
    pub async fn answer(
        &self,
        question: &str,
        context: &RetrievedContext,
    ) -> Result<Answer, ChunkwiseError> {
        let messages = build_messages(context, question);
        let text = self.llm.chat(&messages).await?;
        Ok(Answer {
            text: text.trim().to_string(),
            model: self.llm.model().to_string(),
            citations: context.citations(),
            context_truncated: context.truncated,
        })
    }
}

/// Retriever and synthesizer wired together for `ask`.
#[derive(Debug)]
pub struct CodeAssistant {
    retriever: Retriever,
    synthesizer: Synthesizer,
}

impl CodeAssistant {
    pub fn new(retriever: Retriever, synthesizer: Synthesizer) -> Self {
        Self {
            retriever,
            synthesizer,
        }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Retrieve context for `question` and answer it.
    ///
    /// # Errors
    ///
    /// Embedding and store failures from retrieval, or
    /// [`ChunkwiseError::AnswerService`] from the chat model.
    pub async fn ask(&self, question: &str, filter: SearchFilter) -> Result<Answer, ChunkwiseError> {
        let context = self.retriever.retrieve(question, filter).await?;
        tracing::info!(
            chunks = context.results.len(),
            dropped = context.dropped,
            truncated = context.truncated,
            model = self.synthesizer.model(),
            "asking chat model"
        );
        self.synthesizer.answer(question, &context).await
    }
}
