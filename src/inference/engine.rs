//! Engine collaborator interface
//!
//! The generation engine is the native component that tokenizes, samples and
//! decodes. This crate only drives it: it hands over a prompt and a
//! [`GenerationConfig`] and receives per-token callbacks.

use thiserror::Error;

use crate::inference::config::GenerationConfig;
use crate::inference::streaming::GenerationCallbacks;

/// Errors reported by an engine implementation
#[derive(Debug, Error, Clone)]
pub enum EngineError {
    #[error("No model loaded")]
    NoModelLoaded,

    #[error("Failed to initialize backend: {0}")]
    BackendInit(String),

    #[error("Failed to create context: {0}")]
    ContextCreate(String),

    #[error("Tokenization failed: {0}")]
    Tokenization(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Worker thread error: {0}")]
    WorkerError(String),
}

/// A loaded generation engine.
///
/// Generation borrows the engine mutably, so a handle never runs two
/// generations at once. Dropping the engine releases the native handle.
pub trait Engine {
    /// Returns true if the model behind this handle is ready.
    fn is_loaded(&self) -> bool;

    fn set_thread_count(&mut self, n_threads: i32);

    fn thread_count(&self) -> i32;

    /// Runs one blocking generation.
    ///
    /// The engine calls `callbacks.on_token` for every prompt token it
    /// evaluates, then `callbacks.on_response` for every generated token with
    /// the token's bytes followed by a `0x00`.
    /// Any hook returning [`Continuation::Stop`] ends the run after the
    /// current token. A prompt that does not fit the context is reported as a
    /// single response with token id `-1` and an error message.
    ///
    /// [`Continuation::Stop`]: crate::inference::streaming::Continuation::Stop
    fn run_generation(
        &mut self,
        prompt: &str,
        config: &GenerationConfig,
        callbacks: &mut dyn GenerationCallbacks,
    ) -> Result<(), EngineError>;
}

impl<E: Engine + ?Sized> Engine for Box<E> {
    fn is_loaded(&self) -> bool {
        (**self).is_loaded()
    }

    fn set_thread_count(&mut self, n_threads: i32) {
        (**self).set_thread_count(n_threads)
    }

    fn thread_count(&self) -> i32 {
        (**self).thread_count()
    }

    fn run_generation(
        &mut self,
        prompt: &str,
        config: &GenerationConfig,
        callbacks: &mut dyn GenerationCallbacks,
    ) -> Result<(), EngineError> {
        (**self).run_generation(prompt, config, callbacks)
    }
}
