//! llmodel
//!
//! Streams text out of a token-producing generation engine: per-token
//! callbacks, UTF-8 reassembly of split code points, instruction prompt
//! templating and chat completion records.

pub mod chat;
pub mod inference;
pub mod model;
pub mod storage;
pub mod types;

pub use chat::{build_prompt, ChatCompletionResponse, Usage};
pub use inference::{
    Continuation, Engine, GenerationConfig, GenerationError, GenerationResult, OutputOptions,
    StreamingAdapter,
};
pub use model::LlModel;
pub use types::{ChatTurn, Role};
