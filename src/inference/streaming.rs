//! Streaming inference support
//!
//! The engine reports progress through three callbacks per generated token.
//! [`StreamingAdapter`] implements them: it reassembles the raw response bytes
//! into text, accumulates the whole generation and optionally echoes finished
//! fragments to a live sink as they become available.

use std::io::{self, Write};

use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::inference::engine::EngineError;
use crate::inference::utf8::{terminated_run, Utf8Error, Utf8Reassembler};

/// Token id the engine reports when the prompt does not fit in the context.
pub const PROMPT_TOO_LONG_TOKEN: i32 = -1;

/// Longest engine error message kept from a prompt-too-long report
const MAX_ENGINE_MESSAGE: usize = 1000;

/// What a callback asks the engine to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// Keep generating
    Continue,
    /// Stop after the current token
    Stop,
}

impl Continuation {
    pub fn is_continue(self) -> bool {
        self == Continuation::Continue
    }
}

impl From<bool> for Continuation {
    fn from(keep_going: bool) -> Self {
        if keep_going {
            Continuation::Continue
        } else {
            Continuation::Stop
        }
    }
}

/// Hooks invoked by the engine, in order, on the generating thread.
///
/// Token and recalculation hooks are observability only and continue by
/// default.
pub trait GenerationCallbacks {
    /// Called with the id of every processed token.
    fn on_token(&mut self, _token_id: i32) -> Continuation {
        Continuation::Continue
    }

    /// Called with the raw, `0x00`-terminated response bytes of a generated
    /// token. A `token_id` of [`PROMPT_TOO_LONG_TOKEN`] carries an error
    /// message instead of generated text.
    fn on_response(&mut self, token_id: i32, response: &[u8]) -> Continuation;

    /// Called when the engine starts or stops re-processing its context.
    fn on_recalculate(&mut self, _is_recalculating: bool) -> Continuation {
        Continuation::Continue
    }
}

/// Errors that end a generation call
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Prompt is too long: {0}")]
    PromptTooLong(String),

    #[error("Engine protocol violation: {0}")]
    ProtocolViolation(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl From<Utf8Error> for GenerationError {
    fn from(e: Utf8Error) -> Self {
        GenerationError::ProtocolViolation(e.to_string())
    }
}

/// Per-call output switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputOptions {
    /// Echo generated text to standard output as it is produced
    pub echo: bool,
    /// Print the full prompt to standard output before generating
    pub echo_prompt: bool,
    /// Log token ids, responses and recalculation events at info level
    pub debug: bool,
}

/// Outcome of a finished generation call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    /// The complete generated text
    pub text: String,
    /// Text already flushed to the echo sink, if echo was enabled
    pub echoed: Option<String>,
    /// Number of generated tokens that contributed to `text`
    pub tokens: usize,
}

/// Represents a fragment emitted by a background generation.
#[derive(Debug, Clone)]
pub enum StreamToken {
    /// A decoded text fragment
    Token(String),
    /// Generation completed successfully
    Done,
    /// An error occurred during generation
    Error(String),
}

impl StreamToken {
    pub fn is_token(&self) -> bool {
        matches!(self, StreamToken::Token(_))
    }

    pub fn is_done(&self) -> bool {
        matches!(self, StreamToken::Done)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, StreamToken::Error(_))
    }

    pub fn as_token(&self) -> Option<&str> {
        match self {
            StreamToken::Token(s) => Some(s),
            _ => None,
        }
    }
}

type TokenHook<'a> = Box<dyn FnMut(i32) -> Continuation + 'a>;
type ResponseHook<'a> = Box<dyn FnMut(i32, &[u8]) -> Continuation + 'a>;
type RecalculateHook<'a> = Box<dyn FnMut(bool) -> Continuation + 'a>;
type EchoSink<'a> = Box<dyn FnMut(&str) + 'a>;

struct Echo<'a> {
    reassembler: Utf8Reassembler,
    sink: EchoSink<'a>,
    echoed: String,
}

/// Callback state for exactly one generation call.
///
/// Owns the byte accumulator and the echo reassembler; both are dropped with
/// the adapter, so nothing leaks into the next call.
pub struct StreamingAdapter<'a> {
    generation: Vec<u8>,
    tokens: usize,
    echo: Option<Echo<'a>>,
    debug: bool,
    stopped: bool,
    failure: Option<GenerationError>,
    token_hook: Option<TokenHook<'a>>,
    response_hook: Option<ResponseHook<'a>>,
    recalculate_hook: Option<RecalculateHook<'a>>,
}

impl<'a> StreamingAdapter<'a> {
    pub fn new() -> Self {
        Self {
            generation: Vec::new(),
            tokens: 0,
            echo: None,
            debug: false,
            stopped: false,
            failure: None,
            token_hook: None,
            response_hook: None,
            recalculate_hook: None,
        }
    }

    /// Builds an adapter from per-call options, echoing to stdout if asked.
    pub fn from_options(options: &OutputOptions) -> Self {
        let adapter = Self::new().with_debug(options.debug);
        if options.echo {
            adapter.with_stdout_echo()
        } else {
            adapter
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Sends every completed text fragment to `sink` as soon as it decodes.
    pub fn with_echo(mut self, sink: impl FnMut(&str) + 'a) -> Self {
        self.echo = Some(Echo {
            reassembler: Utf8Reassembler::new(),
            sink: Box::new(sink),
            echoed: String::new(),
        });
        self
    }

    pub fn with_stdout_echo(self) -> Self {
        self.with_echo(|fragment| {
            let mut stdout = io::stdout().lock();
            if let Err(e) = stdout
                .write_all(fragment.as_bytes())
                .and_then(|_| stdout.flush())
            {
                warn!("Failed to echo generated text: {}", e);
            }
        })
    }

    /// Replaces the default token hook.
    pub fn with_token_hook(mut self, hook: impl FnMut(i32) -> Continuation + 'a) -> Self {
        self.token_hook = Some(Box::new(hook));
        self
    }

    /// Consulted with each token's bytes before they are accumulated; a
    /// `Stop` leaves that token out of the result.
    pub fn with_response_hook(
        mut self,
        hook: impl FnMut(i32, &[u8]) -> Continuation + 'a,
    ) -> Self {
        self.response_hook = Some(Box::new(hook));
        self
    }

    /// Replaces the default recalculation hook.
    pub fn with_recalculate_hook(mut self, hook: impl FnMut(bool) -> Continuation + 'a) -> Self {
        self.recalculate_hook = Some(Box::new(hook));
        self
    }

    /// The error that aborted this run, if any.
    pub fn failure(&self) -> Option<&GenerationError> {
        self.failure.as_ref()
    }

    fn fail(&mut self, error: GenerationError) -> Continuation {
        warn!("Aborting generation: {}", error);
        self.generation.clear();
        self.failure = Some(error);
        Continuation::Stop
    }

    /// Consumes the adapter after the engine returned and yields the text.
    ///
    /// Any failure recorded by a callback wins over the accumulated output,
    /// which is discarded.
    pub fn finish(self) -> Result<GenerationResult, GenerationError> {
        if let Some(error) = self.failure {
            return Err(error);
        }

        let echoed = match self.echo {
            Some(echo) => {
                if !self.stopped {
                    echo.reassembler.finish()?;
                }
                Some(echo.echoed)
            }
            None => None,
        };

        let text = match String::from_utf8(self.generation) {
            Ok(text) => text,
            // a caller-requested stop may cut a code point short
            Err(e) if self.stopped && e.utf8_error().error_len().is_none() => {
                let valid = e.utf8_error().valid_up_to();
                let mut bytes = e.into_bytes();
                debug!(
                    "Dropping {} trailing bytes of an unfinished code point",
                    bytes.len() - valid
                );
                bytes.truncate(valid);
                String::from_utf8(bytes).map_err(|e| {
                    GenerationError::ProtocolViolation(e.utf8_error().to_string())
                })?
            }
            Err(e) => {
                return Err(GenerationError::ProtocolViolation(format!(
                    "generated text is not valid UTF-8: {}",
                    e.utf8_error()
                )))
            }
        };

        Ok(GenerationResult {
            text,
            echoed,
            tokens: self.tokens,
        })
    }
}

impl Default for StreamingAdapter<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationCallbacks for StreamingAdapter<'_> {
    fn on_token(&mut self, token_id: i32) -> Continuation {
        if self.debug {
            info!(token_id, "token");
        } else {
            trace!(token_id, "token");
        }
        if self.failure.is_some() || self.stopped {
            return Continuation::Stop;
        }
        let next = match self.token_hook.as_mut() {
            Some(hook) => hook(token_id),
            None => Continuation::Continue,
        };
        if next == Continuation::Stop {
            debug!("Generation stopped by token hook at token {}", token_id);
            self.stopped = true;
        }
        next
    }

    fn on_response(&mut self, token_id: i32, response: &[u8]) -> Continuation {
        if self.debug {
            info!(token_id, bytes = response.len(), "response token");
        }
        if self.failure.is_some() || self.stopped {
            return Continuation::Stop;
        }

        if token_id == PROMPT_TOO_LONG_TOKEN {
            let message = terminated_run(response).unwrap_or(response);
            let message = &message[..message.len().min(MAX_ENGINE_MESSAGE)];
            let message = String::from_utf8_lossy(message).into_owned();
            return self.fail(GenerationError::PromptTooLong(message));
        }

        let Some(bytes) = terminated_run(response) else {
            return self.fail(GenerationError::ProtocolViolation(format!(
                "response for token {} is empty or not null terminated",
                token_id
            )));
        };

        if let Some(hook) = self.response_hook.as_mut() {
            if hook(token_id, bytes) == Continuation::Stop {
                debug!("Generation stopped by response hook at token {}", token_id);
                self.stopped = true;
                return Continuation::Stop;
            }
        }

        self.generation.extend_from_slice(bytes);
        self.tokens += 1;

        if let Some(echo) = self.echo.as_mut() {
            match echo.reassembler.push(bytes) {
                Ok(Some(fragment)) => {
                    (echo.sink)(&fragment);
                    echo.echoed.push_str(&fragment);
                }
                Ok(None) => {}
                Err(e) => return self.fail(e.into()),
            }
        }

        Continuation::Continue
    }

    fn on_recalculate(&mut self, is_recalculating: bool) -> Continuation {
        if self.debug {
            info!(is_recalculating, "recalculating context");
        } else {
            debug!(is_recalculating, "recalculating context");
        }
        if self.failure.is_some() || self.stopped {
            return Continuation::Stop;
        }
        let next = match self.recalculate_hook.as_mut() {
            Some(hook) => hook(is_recalculating),
            None => Continuation::Continue,
        };
        if next == Continuation::Stop {
            debug!("Generation stopped by recalculation hook");
            self.stopped = true;
        }
        next
    }
}
