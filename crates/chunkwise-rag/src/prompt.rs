//! Prompt construction for code questions.

use crate::llm::ChatMessage;
use crate::retrieval::RetrievedContext;

/// System prompt sent with every question.
pub const SYSTEM_PROMPT: &str = "You are a helpful code assistant. Use the provided code context \
to answer the question accurately. Cite file paths and line ranges when you refer to code. \
If the context does not contain the answer, say so instead of guessing.";

/// Stands in for the context when retrieval found nothing.
pub const NO_CONTEXT: &str = "No relevant code was found in the index for this question.";

/// Render the user turn: context, then the question.
pub fn build_user_prompt(context: &RetrievedContext, question: &str) -> String {
    let body = if context.is_empty() {
        NO_CONTEXT
    } else {
        context.text.as_str()
    };
    let note = if context.truncated {
        "\n(The code above was shortened to fit the context window.)\n"
    } else {
        ""
    };
    format!("{body}{note}\n\nQuestion: {}\n\nAnswer: ", question.trim())
}

/// Full message list for one question.
pub fn build_messages(context: &RetrievedContext, question: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(build_user_prompt(context, question)),
    ]
}
