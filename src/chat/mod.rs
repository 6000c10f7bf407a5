//! Chat-style prompting
//!
//! Turns a conversation into an instruction prompt and packages generated text
//! as a chat completion response.

pub mod completion;
pub mod prompt;

pub use completion::{ChatCompletionResponse, Usage};
pub use prompt::build_prompt;
