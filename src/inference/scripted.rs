//! Scripted engine
//!
//! A deterministic [`Engine`] that replays a fixed list of steps instead of
//! running a model. Prompts are split on whitespace to stand in for
//! tokenization, which is enough to exercise the context-length check.

use tracing::debug;

use crate::inference::config::GenerationConfig;
use crate::inference::engine::{Engine, EngineError};
use crate::inference::streaming::{Continuation, GenerationCallbacks, PROMPT_TOO_LONG_TOKEN};

/// One event replayed by [`ScriptedEngine`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    /// A generated token; its bytes are delivered with a `0x00` appended
    Token { id: i32, bytes: Vec<u8> },
    /// Response bytes delivered exactly as given, terminator or not
    Raw { id: i32, bytes: Vec<u8> },
    /// A context recalculation, reported as a start and an end notification
    Recalculate,
}

impl ScriptStep {
    pub fn token(id: i32, text: impl AsRef<[u8]>) -> Self {
        ScriptStep::Token {
            id,
            bytes: text.as_ref().to_vec(),
        }
    }
}

/// Engine double replaying [`ScriptStep`]s on every generation call.
#[derive(Debug, Clone)]
pub struct ScriptedEngine {
    steps: Vec<ScriptStep>,
    threads: i32,
    prompts: Vec<String>,
}

impl ScriptedEngine {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            threads: 1,
            prompts: Vec::new(),
        }
    }

    /// One token per fragment, ids counting up from 1.
    pub fn from_fragments<T: AsRef<[u8]>>(fragments: &[T]) -> Self {
        let steps = fragments
            .iter()
            .zip(1..)
            .map(|(fragment, id)| ScriptStep::token(id, fragment))
            .collect();
        Self::new(steps)
    }

    /// Prompts received so far, oldest first.
    pub fn prompts(&self) -> &[String] {
        &self.prompts
    }

    fn replay(
        &self,
        config: &GenerationConfig,
        callbacks: &mut dyn GenerationCallbacks,
    ) -> Continuation {
        // negative limits mean unbounded, as in llama.cpp
        let limit = usize::try_from(config.n_predict).unwrap_or(usize::MAX);
        let mut generated = 0;

        for step in &self.steps {
            let next = match step {
                ScriptStep::Token { id, bytes } => {
                    if generated >= limit {
                        debug!("Reached n_predict={} tokens", config.n_predict);
                        return Continuation::Stop;
                    }
                    generated += 1;
                    let mut response = bytes.clone();
                    response.push(0);
                    callbacks.on_response(*id, &response)
                }
                ScriptStep::Raw { id, bytes } => {
                    if generated >= limit {
                        debug!("Reached n_predict={} tokens", config.n_predict);
                        return Continuation::Stop;
                    }
                    generated += 1;
                    callbacks.on_response(*id, bytes)
                }
                ScriptStep::Recalculate => match callbacks.on_recalculate(true) {
                    Continuation::Continue => callbacks.on_recalculate(false),
                    Continuation::Stop => Continuation::Stop,
                },
            };
            if next == Continuation::Stop {
                return Continuation::Stop;
            }
        }
        Continuation::Continue
    }
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Engine for ScriptedEngine {
    fn is_loaded(&self) -> bool {
        true
    }

    fn set_thread_count(&mut self, n_threads: i32) {
        self.threads = n_threads;
    }

    fn thread_count(&self) -> i32 {
        self.threads
    }

    fn run_generation(
        &mut self,
        prompt: &str,
        config: &GenerationConfig,
        callbacks: &mut dyn GenerationCallbacks,
    ) -> Result<(), EngineError> {
        self.prompts.push(prompt.to_string());

        let n_prompt = prompt.split_whitespace().count();
        if n_prompt as i64 > i64::from(config.n_ctx) {
            let message = format!(
                "Prompt has {} tokens but the context window holds {}\0",
                n_prompt, config.n_ctx
            );
            callbacks.on_response(PROMPT_TOO_LONG_TOKEN, message.as_bytes());
            return Ok(());
        }

        for id in 0..n_prompt {
            if callbacks.on_token(id as i32) == Continuation::Stop {
                return Ok(());
            }
        }

        if self.replay(config, callbacks) == Continuation::Stop {
            debug!("Scripted generation stopped early");
        }
        Ok(())
    }
}
