//! Retrieval-augmented question answering over an indexed codebase.
//!
//! [`retrieval::Retriever`] turns a question into a bounded context of
//! ranked chunks, and [`answer::Synthesizer`] sends it to a chat model.

pub mod answer;
pub mod llm;
pub mod prompt;
pub mod retrieval;

pub use answer::{Answer, CodeAssistant, Synthesizer};
pub use llm::{ChatMessage, LlmClient, Role};
pub use retrieval::{compose, Citation, RetrievedContext, Retriever};
