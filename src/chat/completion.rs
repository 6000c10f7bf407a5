//! Chat completion response records

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::message::ChatTurn;

/// Prompt and completion sizes.
///
/// Counted in characters, not tokenizer tokens; an approximation callers can
/// use for budgeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl Usage {
    pub fn from_texts(prompt: &str, completion: &str) -> Self {
        let prompt_tokens = prompt.chars().count();
        let completion_tokens = completion.chars().count();
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Result of a chat completion call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    /// Unique identifier for the response
    pub id: String,
    /// Unix timestamp (seconds) of creation
    pub created: i64,
    /// Identifier of the model that produced the completion
    pub model: String,
    pub usage: Usage,
    /// Always exactly one assistant turn
    pub choices: Vec<ChatTurn>,
}

impl ChatCompletionResponse {
    /// Wraps `completion`, generated from `prompt`, into a response.
    pub fn new(model: impl Into<String>, prompt: &str, completion: String) -> Self {
        Self {
            id: format!("chatcmpl-{}", Uuid::new_v4()),
            created: Utc::now().timestamp(),
            model: model.into(),
            usage: Usage::from_texts(prompt, &completion),
            choices: vec![ChatTurn::assistant(completion)],
        }
    }

    /// Text of the single choice.
    pub fn content(&self) -> &str {
        self.choices
            .first()
            .map(|turn| turn.content.as_str())
            .unwrap_or_default()
    }
}
