//! Model handle
//!
//! [`LlModel`] pairs a loaded engine with the name of its model and exposes
//! plain text generation and chat completion on top of it.

use std::io::{self, Write};

use tracing::{debug, info, warn};

use crate::chat::completion::ChatCompletionResponse;
use crate::chat::prompt::build_prompt;
use crate::inference::config::GenerationConfig;
use crate::inference::engine::{Engine, EngineError};
use crate::inference::streaming::{
    GenerationError, GenerationResult, OutputOptions, StreamingAdapter,
};
use crate::types::message::ChatTurn;

#[cfg(feature = "llama")]
use crate::inference::{
    llama::LlamaEngine,
    model::{LoadError, ModelFile},
};

/// A loaded model ready to generate.
///
/// Generation takes `&mut self`: one handle runs one generation at a time.
/// The engine is released when the handle is dropped.
pub struct LlModel<E: Engine> {
    engine: E,
    name: String,
}

#[cfg(feature = "llama")]
impl LlModel<LlamaEngine> {
    /// Checks the model file and loads it with llama.cpp.
    pub fn load<P: AsRef<std::path::Path>>(path: P, gpu_layers: u32) -> Result<Self, LoadError> {
        let file = ModelFile::inspect(path)?;
        let engine = LlamaEngine::load(&file, gpu_layers)?;
        Ok(Self::new(engine, file.name))
    }
}

impl<E: Engine> LlModel<E> {
    pub fn new(engine: E, name: impl Into<String>) -> Self {
        Self {
            engine,
            name: name.into(),
        }
    }

    /// Model identifier reported in chat completions
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn is_loaded(&self) -> bool {
        self.engine.is_loaded()
    }

    pub fn set_thread_count(&mut self, n_threads: i32) {
        self.engine.set_thread_count(n_threads);
    }

    pub fn thread_count(&self) -> i32 {
        self.engine.thread_count()
    }

    /// Generates text after `prompt`, optionally echoing it to stdout as it
    /// is produced.
    pub fn generate(
        &mut self,
        prompt: &str,
        config: &GenerationConfig,
        echo_to_stdout: bool,
    ) -> Result<String, GenerationError> {
        let options = OutputOptions {
            echo: echo_to_stdout,
            ..OutputOptions::default()
        };
        let adapter = StreamingAdapter::from_options(&options);
        Ok(self.generate_with(prompt, config, adapter)?.text)
    }

    /// Generates text using a caller-configured adapter (custom hooks, echo
    /// sink or debug logging).
    pub fn generate_with(
        &mut self,
        prompt: &str,
        config: &GenerationConfig,
        mut adapter: StreamingAdapter<'_>,
    ) -> Result<GenerationResult, GenerationError> {
        if !self.engine.is_loaded() {
            return Err(EngineError::NoModelLoaded.into());
        }

        info!(
            "Generating with {} (prompt: {} bytes, n_predict: {})",
            self.name,
            prompt.len(),
            config.n_predict
        );
        self.engine.run_generation(prompt, config, &mut adapter)?;
        let result = adapter.finish()?;
        debug!("Generated {} tokens", result.tokens);
        Ok(result)
    }

    /// Builds an instruction prompt from `turns`, generates a reply and
    /// wraps it into a [`ChatCompletionResponse`].
    pub fn chat_completion(
        &mut self,
        turns: &[ChatTurn],
        config: &GenerationConfig,
        echo_to_stdout: bool,
        echo_prompt_to_stdout: bool,
    ) -> Result<ChatCompletionResponse, GenerationError> {
        let options = OutputOptions {
            echo: echo_to_stdout,
            echo_prompt: echo_prompt_to_stdout,
            debug: false,
        };
        self.chat_completion_with(turns, config, &options)
    }

    pub fn chat_completion_with(
        &mut self,
        turns: &[ChatTurn],
        config: &GenerationConfig,
        options: &OutputOptions,
    ) -> Result<ChatCompletionResponse, GenerationError> {
        let prompt = build_prompt(turns);

        if options.echo_prompt {
            let mut stdout = io::stdout().lock();
            if let Err(e) = stdout
                .write_all(prompt.as_bytes())
                .and_then(|_| stdout.flush())
            {
                warn!("Failed to echo prompt: {}", e);
            }
        }

        let adapter = StreamingAdapter::from_options(options);
        let result = self.generate_with(&prompt, config, adapter)?;

        Ok(ChatCompletionResponse::new(
            self.name.clone(),
            &prompt,
            result.text,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::scripted::{ScriptStep, ScriptedEngine};
    use crate::inference::streaming::Continuation;

    fn model(fragments: &[&str]) -> LlModel<ScriptedEngine> {
        LlModel::new(ScriptedEngine::from_fragments(fragments), "test.gguf")
    }

    #[test]
    fn test_generate_returns_full_text() {
        let mut model = model(&["The", " answer", " is", " 42"]);
        let text = model
            .generate("question", &GenerationConfig::default(), false)
            .unwrap();
        assert_eq!(text, "The answer is 42");
    }

    #[test]
    fn test_runs_do_not_share_state() {
        let euro = "€".as_bytes();
        let mut model = LlModel::new(
            ScriptedEngine::new(vec![ScriptStep::token(1, &euro[..2])]),
            "broken.gguf",
        );
        assert!(model
            .generate("x", &GenerationConfig::default(), false)
            .is_err());

        let mut model = LlModel::new(
            ScriptedEngine::new(vec![ScriptStep::token(1, &euro[2..])]),
            "broken.gguf",
        );
        // a fresh run starting with a continuation byte is invalid on its own
        assert!(matches!(
            model.generate("x", &GenerationConfig::default(), false),
            Err(GenerationError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_generate_with_stop_hook() {
        let mut model = model(&["a", "b", "c", "d"]);
        let mut seen = 0;
        let adapter = StreamingAdapter::new().with_response_hook(|_, _| {
            seen += 1;
            Continuation::from(seen < 3)
        });
        let result = model
            .generate_with("x", &GenerationConfig::default(), adapter)
            .unwrap();
        assert_eq!(result.text, "ab");
    }

    #[test]
    fn test_chat_completion_usage() {
        let mut model = model(&["Hello", "!"]);
        let turns = [ChatTurn::system("Be terse."), ChatTurn::user("Hi")];
        let response = model
            .chat_completion(&turns, &GenerationConfig::default(), false, false)
            .unwrap();

        let prompt = build_prompt(&turns);
        assert_eq!(response.model, "test.gguf");
        assert_eq!(response.content(), "Hello!");
        assert_eq!(response.usage.prompt_tokens, prompt.chars().count());
        assert_eq!(response.usage.completion_tokens, 6);
        assert_eq!(response.usage.total_tokens, prompt.chars().count() + 6);
        assert_eq!(model.engine().prompts(), [prompt]);
    }

    #[test]
    fn test_thread_count_passthrough() {
        let mut model = model(&[]);
        model.set_thread_count(8);
        assert_eq!(model.thread_count(), 8);
        assert!(model.is_loaded());
    }
}
