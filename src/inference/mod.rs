//! LLM inference
//!
//! This module drives a generation engine and turns its per-token callbacks
//! into text.

pub mod config;
pub mod engine;
#[cfg(feature = "llama")]
pub mod llama;
pub mod model;
pub mod scripted;
pub mod streaming;
pub mod utf8;
pub mod worker;

// Re-export main types for convenience
pub use config::{GenerationConfig, GenerationConfigBuilder};
pub use engine::{Engine, EngineError};
#[cfg(feature = "llama")]
pub use llama::LlamaEngine;
pub use model::{LoadError, ModelFile, GGUF_MAGIC};
pub use scripted::{ScriptStep, ScriptedEngine};
pub use streaming::{
    Continuation, GenerationCallbacks, GenerationError, GenerationResult, OutputOptions,
    StreamToken, StreamingAdapter, PROMPT_TOO_LONG_TOKEN,
};
pub use utf8::{Utf8Error, Utf8Reassembler};
pub use worker::{GenerationStream, ModelWorker};
