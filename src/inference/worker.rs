//! Background generation worker
//!
//! # Architecture
//!
//! Native engine types hold raw pointers that are not `Send`, so the engine is
//! built and used on one dedicated thread. Other threads talk to it through
//! channels: commands in, [`StreamToken`] fragments and a final result out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::inference::config::GenerationConfig;
use crate::inference::engine::{Engine, EngineError};
use crate::inference::model::LoadError;
use crate::inference::streaming::{
    Continuation, GenerationError, GenerationResult, StreamToken, StreamingAdapter,
};

type GenerationReply = Result<GenerationResult, GenerationError>;

/// Commands sent to the worker thread
enum WorkerCommand {
    Generate {
        prompt: String,
        config: GenerationConfig,
        token_tx: Sender<StreamToken>,
        stop_signal: Arc<AtomicBool>,
        reply: Sender<GenerationReply>,
    },
    SetThreadCount(i32),
    Shutdown,
}

/// A generation running on the worker thread.
pub struct GenerationStream {
    /// Decoded fragments, terminated by `Done` or `Error`
    pub tokens: Receiver<StreamToken>,
    stop_signal: Arc<AtomicBool>,
    reply: Receiver<GenerationReply>,
}

impl GenerationStream {
    /// Asks the engine to stop after the current token.
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::Relaxed);
    }

    /// Blocks until the generation ends and returns its outcome.
    pub fn wait(self) -> Result<GenerationResult, GenerationError> {
        self.reply
            .recv()
            .map_err(|e| EngineError::WorkerError(e.to_string()))?
    }
}

/// Owns a dedicated thread that owns the engine.
pub struct ModelWorker {
    /// Channel to send commands to the worker thread
    command_tx: Option<Sender<WorkerCommand>>,
    /// Handle to the worker thread
    worker_handle: Option<JoinHandle<()>>,
}

impl ModelWorker {
    /// Starts the worker thread and builds the engine on it with `load`.
    ///
    /// Returns once loading finished, with the load error if it failed.
    pub fn spawn<E, F>(load: F) -> Result<Self, LoadError>
    where
        E: Engine + 'static,
        F: FnOnce() -> Result<E, LoadError> + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::channel::<WorkerCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), LoadError>>();

        let handle = thread::spawn(move || {
            let mut engine = match load() {
                Ok(engine) => {
                    let _ = ready_tx.send(Ok(()));
                    engine
                }
                Err(e) => {
                    tracing::error!("Failed to load engine: {}", e);
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            worker_thread_main(&mut engine, command_rx);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                tracing::info!("Model worker thread started");
                Ok(Self {
                    command_tx: Some(command_tx),
                    worker_handle: Some(handle),
                })
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(LoadError::ModelLoad {
                    name: "worker".to_string(),
                    reason: "worker thread exited while loading".to_string(),
                })
            }
        }
    }

    fn send(&self, command: WorkerCommand) -> Result<(), EngineError> {
        self.command_tx
            .as_ref()
            .ok_or_else(|| EngineError::WorkerError("worker is shut down".to_string()))?
            .send(command)
            .map_err(|e| EngineError::WorkerError(e.to_string()))
    }

    pub fn set_thread_count(&self, n_threads: i32) -> Result<(), EngineError> {
        self.send(WorkerCommand::SetThreadCount(n_threads))
    }

    /// Queues a generation and returns its stream immediately.
    pub fn generate_stream(
        &self,
        prompt: &str,
        config: GenerationConfig,
    ) -> Result<GenerationStream, EngineError> {
        let (token_tx, token_rx) = mpsc::channel();
        let (reply_tx, reply_rx) = mpsc::channel();
        let stop_signal = Arc::new(AtomicBool::new(false));

        self.send(WorkerCommand::Generate {
            prompt: prompt.to_string(),
            config,
            token_tx,
            stop_signal: stop_signal.clone(),
            reply: reply_tx,
        })?;

        Ok(GenerationStream {
            tokens: token_rx,
            stop_signal,
            reply: reply_rx,
        })
    }

    /// Runs a generation to completion and returns the full text.
    pub fn generate(
        &self,
        prompt: &str,
        config: GenerationConfig,
    ) -> Result<String, GenerationError> {
        Ok(self.generate_stream(prompt, config)?.wait()?.text)
    }
}

impl Drop for ModelWorker {
    fn drop(&mut self) {
        if let Some(tx) = self.command_tx.take() {
            let _ = tx.send(WorkerCommand::Shutdown);
        }
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}

/// Worker thread main loop
fn worker_thread_main<E: Engine>(engine: &mut E, command_rx: Receiver<WorkerCommand>) {
    loop {
        match command_rx.recv() {
            Ok(WorkerCommand::Generate {
                prompt,
                config,
                token_tx,
                stop_signal,
                reply,
            }) => {
                let outcome = run_streaming(engine, &prompt, &config, &token_tx, &stop_signal);
                let last = match &outcome {
                    Ok(_) => StreamToken::Done,
                    Err(e) => StreamToken::Error(e.to_string()),
                };
                let _ = token_tx.send(last);
                let _ = reply.send(outcome);
            }
            Ok(WorkerCommand::SetThreadCount(n_threads)) => {
                engine.set_thread_count(n_threads);
            }
            Ok(WorkerCommand::Shutdown) => {
                tracing::info!("Worker thread shutting down");
                break;
            }
            Err(_) => {
                tracing::debug!("Command channel closed, worker exiting");
                break;
            }
        }
    }
}

fn run_streaming<E: Engine>(
    engine: &mut E,
    prompt: &str,
    config: &GenerationConfig,
    token_tx: &Sender<StreamToken>,
    stop_signal: &Arc<AtomicBool>,
) -> Result<GenerationResult, GenerationError> {
    let mut adapter = StreamingAdapter::new()
        .with_echo(|fragment| {
            if token_tx.send(StreamToken::Token(fragment.to_string())).is_err() {
                tracing::debug!("Receiver dropped, stopping generation");
                stop_signal.store(true, Ordering::Relaxed);
            }
        })
        .with_response_hook(|_, _| Continuation::from(!stop_signal.load(Ordering::Relaxed)));

    engine.run_generation(prompt, config, &mut adapter)?;
    adapter.finish()
}
