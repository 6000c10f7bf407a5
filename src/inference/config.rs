//! Generation configuration
//!
//! Parameters handed to the engine for a single generation call.

use serde::{Deserialize, Serialize};

/// How the engine samples and decodes tokens for one generation call.
///
/// Built through [`GenerationConfigBuilder`]; once built the value is only
/// ever read. No range checks are applied: whatever is set is forwarded to the
/// engine, which is responsible for rejecting values it cannot use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Context window size
    pub n_ctx: i32,
    /// Maximum number of tokens to predict
    pub n_predict: i32,
    /// Tokens already consumed by the context
    pub n_past: i32,
    /// Top-k sampling parameter
    pub top_k: i32,
    /// Top-p (nucleus) sampling parameter
    pub top_p: f32,
    /// Sampling temperature
    pub temp: f32,
    /// Prompt evaluation batch size
    pub n_batch: i32,
    /// Repetition penalty
    pub repeat_penalty: f32,
    /// Number of trailing tokens the repetition penalty looks at
    pub repeat_last_n: i32,
    /// Fraction of the context erased when the window overflows
    pub context_erase: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            n_ctx: 1024,
            n_predict: 128,
            n_past: 0,
            top_k: 40,
            top_p: 0.95,
            temp: 0.28,
            n_batch: 8,
            repeat_penalty: 1.1,
            repeat_last_n: 10,
            context_erase: 0.55,
        }
    }
}

impl GenerationConfig {
    /// Shortcut for starting a builder from the defaults.
    pub fn builder() -> GenerationConfigBuilder {
        GenerationConfigBuilder::new()
    }
}

/// Fluent builder for [`GenerationConfig`].
#[derive(Debug, Clone, Default)]
pub struct GenerationConfigBuilder {
    config: GenerationConfig,
}

impl GenerationConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_n_ctx(mut self, n_ctx: i32) -> Self {
        self.config.n_ctx = n_ctx;
        self
    }

    pub fn with_n_predict(mut self, n_predict: i32) -> Self {
        self.config.n_predict = n_predict;
        self
    }

    pub fn with_n_past(mut self, n_past: i32) -> Self {
        self.config.n_past = n_past;
        self
    }

    pub fn with_top_k(mut self, top_k: i32) -> Self {
        self.config.top_k = top_k;
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.config.top_p = top_p;
        self
    }

    pub fn with_temp(mut self, temp: f32) -> Self {
        self.config.temp = temp;
        self
    }

    pub fn with_n_batch(mut self, n_batch: i32) -> Self {
        self.config.n_batch = n_batch;
        self
    }

    pub fn with_repeat_penalty(mut self, repeat_penalty: f32) -> Self {
        self.config.repeat_penalty = repeat_penalty;
        self
    }

    pub fn with_repeat_last_n(mut self, repeat_last_n: i32) -> Self {
        self.config.repeat_last_n = repeat_last_n;
        self
    }

    pub fn with_context_erase(mut self, context_erase: f32) -> Self {
        self.config.context_erase = context_erase;
        self
    }

    /// Finalizes the configuration.
    pub fn build(self) -> GenerationConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_config_default() {
        let config = GenerationConfig::default();
        assert_eq!(config.n_ctx, 1024);
        assert_eq!(config.n_predict, 128);
        assert_eq!(config.n_past, 0);
        assert_eq!(config.top_k, 40);
        assert!((config.top_p - 0.95).abs() < 0.001);
        assert!((config.temp - 0.28).abs() < 0.001);
        assert_eq!(config.n_batch, 8);
        assert!((config.repeat_penalty - 1.1).abs() < 0.001);
        assert_eq!(config.repeat_last_n, 10);
        assert!((config.context_erase - 0.55).abs() < 0.001);
    }

    #[test]
    fn test_builder_sets_each_field() {
        let config = GenerationConfig::builder()
            .with_n_ctx(2048)
            .with_n_predict(64)
            .with_n_past(3)
            .with_top_k(10)
            .with_top_p(0.5)
            .with_temp(0.9)
            .with_n_batch(16)
            .with_repeat_penalty(1.3)
            .with_repeat_last_n(32)
            .with_context_erase(0.25)
            .build();

        assert_eq!(config.n_ctx, 2048);
        assert_eq!(config.n_predict, 64);
        assert_eq!(config.n_past, 3);
        assert_eq!(config.top_k, 10);
        assert_eq!(config.top_p, 0.5);
        assert_eq!(config.temp, 0.9);
        assert_eq!(config.n_batch, 16);
        assert_eq!(config.repeat_penalty, 1.3);
        assert_eq!(config.repeat_last_n, 32);
        assert_eq!(config.context_erase, 0.25);
    }

    #[test]
    fn test_builder_passes_out_of_range_values_through() {
        let config = GenerationConfig::builder()
            .with_n_ctx(-5)
            .with_top_p(7.0)
            .with_temp(-1.0)
            .build();

        assert_eq!(config.n_ctx, -5);
        assert_eq!(config.top_p, 7.0);
        assert_eq!(config.temp, -1.0);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: GenerationConfig = serde_json::from_str(r#"{"n_predict": 12}"#).unwrap();
        assert_eq!(config.n_predict, 12);
        assert_eq!(config.n_ctx, 1024);
        assert_eq!(config.top_k, 40);
    }
}
