//! llama.cpp engine
//!
//! [`Engine`] implementation on top of `llama-cpp-2`. A fresh context is
//! created for every generation call, so runs never share KV state.
//!
//! `LlamaBackend`, `LlamaModel` and `LlamaContext` hold raw pointers and are
//! not `Send`; use [`crate::inference::worker::ModelWorker`] to drive this
//! engine from another thread.

use std::num::NonZeroU32;

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::token::LlamaToken;
use tracing::{debug, info};

use crate::inference::config::GenerationConfig;
use crate::inference::engine::{Engine, EngineError};
use crate::inference::model::{LoadError, ModelFile};
use crate::inference::streaming::{Continuation, GenerationCallbacks, PROMPT_TOO_LONG_TOKEN};

/// Engine backed by a llama.cpp model
pub struct LlamaEngine {
    backend: LlamaBackend,
    model: LlamaModel,
    threads: i32,
    seed: u32,
}

impl LlamaEngine {
    /// Initializes the backend and loads `file`.
    ///
    /// # Arguments
    /// * `file` - A model file that passed [`ModelFile::inspect`]
    /// * `gpu_layers` - Number of layers to offload to GPU (0 = CPU only)
    pub fn load(file: &ModelFile, gpu_layers: u32) -> Result<Self, LoadError> {
        let load_error = |reason: String| LoadError::ModelLoad {
            name: file.name.clone(),
            reason,
        };

        let backend = LlamaBackend::init()
            .map_err(|e| load_error(EngineError::BackendInit(e.to_string()).to_string()))?;

        let model_params = LlamaModelParams::default().with_n_gpu_layers(gpu_layers);
        let model = LlamaModel::load_from_file(&backend, &file.path, &model_params)
            .map_err(|e| load_error(e.to_string()))?;

        info!(
            "Model loaded: {} ({} params, {} vocab, {} ctx)",
            file.name,
            model.n_params(),
            model.n_vocab(),
            model.n_ctx_train()
        );

        let threads = std::thread::available_parallelism()
            .map(|n| n.get() as i32)
            .unwrap_or(4);

        Ok(Self {
            backend,
            model,
            threads,
            seed: 0,
        })
    }

    /// Fixes the sampling seed (0 = random per call).
    pub fn with_seed(mut self, seed: u32) -> Self {
        self.seed = seed;
        self
    }

    fn sampler(&self, config: &GenerationConfig) -> LlamaSampler {
        let penalties =
            LlamaSampler::penalties(config.repeat_last_n, config.repeat_penalty, 0.0, 0.0);

        if config.temp < 0.01 {
            // Use greedy sampling for very low temperature
            return LlamaSampler::chain_simple([penalties, LlamaSampler::greedy()]);
        }

        let seed = if self.seed == 0 { rand_seed() } else { self.seed };
        LlamaSampler::chain_simple([
            penalties,
            LlamaSampler::top_k(config.top_k),
            LlamaSampler::top_p(config.top_p, 1),
            LlamaSampler::temp(config.temp),
            LlamaSampler::dist(seed),
        ])
    }

    /// Drops the oldest `context_erase` share of `history` and re-evaluates
    /// the rest into an empty KV cache.
    fn recalculate(
        ctx: &mut LlamaContext,
        batch: &mut LlamaBatch,
        history: &mut Vec<LlamaToken>,
        config: &GenerationConfig,
        callbacks: &mut dyn GenerationCallbacks,
    ) -> Result<Continuation, EngineError> {
        if callbacks.on_recalculate(true) == Continuation::Stop {
            return Ok(Continuation::Stop);
        }

        let erase = (history.len() as f32 * config.context_erase.clamp(0.0, 1.0)) as usize;
        let erase = erase.max(1).min(history.len());
        history.drain(..erase);
        debug!("Erased {} tokens, re-evaluating {}", erase, history.len());

        ctx.clear_kv_cache();
        evaluate(ctx, batch, history.as_slice(), 0, batch_size(config), &mut |_: LlamaToken| {
            Continuation::Continue
        })?;

        Ok(callbacks.on_recalculate(false))
    }
}

impl Engine for LlamaEngine {
    fn is_loaded(&self) -> bool {
        // construction fails unless the model loaded
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
        let n_ctx = u32::try_from(config.n_ctx)
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or_else(|| {
                EngineError::ContextCreate(format!("invalid context size {}", config.n_ctx))
            })?;
        if config.n_past != 0 {
            debug!(
                "Ignoring n_past={}: every call starts from an empty context",
                config.n_past
            );
        }

        let ctx_params = LlamaContextParams::default()
            .with_n_ctx(Some(n_ctx))
            .with_n_batch(n_ctx.get())
            .with_n_threads(self.threads)
            .with_n_threads_batch(self.threads);

        let mut ctx = self
            .model
            .new_context(&self.backend, ctx_params)
            .map_err(|e| EngineError::ContextCreate(e.to_string()))?;

        let mut history = self
            .model
            .str_to_token(prompt, AddBos::Always)
            .map_err(|e| EngineError::Tokenization(e.to_string()))?;
        debug!("Tokenized prompt into {} tokens", history.len());

        if history.len() >= n_ctx.get() as usize {
            let message = format!(
                "ERROR: The prompt size exceeds the context window size and cannot be processed. ({} tokens, context {})\0",
                history.len(),
                n_ctx
            );
            callbacks.on_response(PROMPT_TOO_LONG_TOKEN, message.as_bytes());
            return Ok(());
        }

        let n_batch = batch_size(config);
        let mut batch = LlamaBatch::new(n_ctx.get() as usize, 1);
        let prompt_tokens = history.clone();
        if evaluate(&mut ctx, &mut batch, &prompt_tokens, 0, n_batch, &mut |token: LlamaToken| {
            callbacks.on_token(token.0)
        })? == Continuation::Stop
        {
            debug!("Generation stopped during prompt evaluation");
            return Ok(());
        }

        let mut sampler = self.sampler(config);
        let limit = usize::try_from(config.n_predict).unwrap_or(usize::MAX);

        for _ in 0..limit {
            let token = sampler.sample(&ctx, batch.n_tokens() - 1);
            sampler.accept(token);

            if self.model.is_eog_token(token) {
                debug!("End of generation token encountered");
                break;
            }

            let mut response = self
                .model
                .token_to_bytes(token, Special::Tokenize)
                .map_err(|e| EngineError::Inference(format!("token to bytes: {}", e)))?;
            response.push(0);

            if callbacks.on_response(token.0, &response) == Continuation::Stop {
                debug!("Generation stopped by callback");
                break;
            }

            if history.len() >= n_ctx.get() as usize
                && Self::recalculate(&mut ctx, &mut batch, &mut history, config, callbacks)?
                    == Continuation::Stop
            {
                break;
            }

            let pos = history.len() as i32;
            history.push(token);
            batch.clear();
            batch
                .add(token, pos, &[0], true)
                .map_err(|e| EngineError::Inference(format!("batch add: {}", e)))?;
            ctx.decode(&mut batch)
                .map_err(|e| EngineError::Inference(format!("decode: {}", e)))?;
        }

        Ok(())
    }
}

fn batch_size(config: &GenerationConfig) -> usize {
    usize::try_from(config.n_batch).unwrap_or(1).max(1)
}

/// Decodes `tokens` starting at position `start` in chunks of `n_batch`,
/// reporting each token once its chunk is decoded. Logits are kept for the
/// final token only, at index `batch.n_tokens() - 1`.
fn evaluate(
    ctx: &mut LlamaContext,
    batch: &mut LlamaBatch,
    tokens: &[LlamaToken],
    start: i32,
    n_batch: usize,
    on_token: &mut dyn FnMut(LlamaToken) -> Continuation,
) -> Result<Continuation, EngineError> {
    let mut pos = start;
    let n_chunks = tokens.len().div_ceil(n_batch);

    for (chunk_index, chunk) in tokens.chunks(n_batch).enumerate() {
        let last_chunk = chunk_index + 1 == n_chunks;
        batch.clear();
        for (i, token) in chunk.iter().enumerate() {
            let logits = last_chunk && i + 1 == chunk.len();
            batch
                .add(*token, pos, &[0], logits)
                .map_err(|e| EngineError::Inference(format!("batch add: {}", e)))?;
            pos += 1;
        }
        ctx.decode(batch)
            .map_err(|e| EngineError::Inference(format!("decode prompt: {}", e)))?;

        for token in chunk {
            if on_token(*token) == Continuation::Stop {
                return Ok(Continuation::Stop);
            }
        }
    }

    Ok(Continuation::Continue)
}

/// Generates a random seed using system entropy
fn rand_seed() -> u32 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    RandomState::new().build_hasher().finish() as u32
}
