// Copyright 2026 The Framegate Project
// SPDX-License-Identifier: Apache-2.0

// Configuration: deterministic provider parameters and operational
// timeouts, loaded from the environment with fixed defaults.

mod error;

pub use error::ConfigError;

use std::path::PathBuf;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_FRAME_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_TOOL_TIMEOUT_MS: u64 = 8_000;
pub const DEFAULT_TOOL_RETRIES: u32 = 1;
pub const DEFAULT_REPAIR_RETRIES: u32 = 1;
pub const DEFAULT_MODEL_ID: &str = "gpt-4o-mini";
pub const DEFAULT_TEMPERATURE: f64 = 0.2;
pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_MAX_TOKENS: u32 = 384;
pub const DEFAULT_PROVIDER_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_MAX_QUEUED_CHUNKS: usize = 128;
pub const DEFAULT_MAX_ROUNDS: u32 = 5;
pub const DEFAULT_ARTIFACTS_DIR: &str = "artifacts";

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Read-only runtime configuration, shared by all sessions.
#[derive(Debug, Clone)]
pub struct Config {
    /// Idle-frame deadline; on expiry the session emits `error:frame_timeout`
    /// and closes.
    pub frame_timeout_ms: u64,
    /// Per-attempt tool wall-clock budget.
    pub tool_timeout_ms: u64,
    /// Retries after a first tool failure.
    pub tool_retries: u32,
    /// Reply-repair budget per session.
    pub repair_retries: u32,
    pub model_id: String,
    pub temperature: f64,
    pub seed: u64,
    pub max_tokens: u32,
    pub provider_base_url: String,
    pub provider_api_key: Option<String>,
    /// Emitter soft-backpressure threshold.
    pub max_queued_chunks: usize,
    /// Provider rounds per session.
    pub max_rounds: u32,
    pub artifacts_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            frame_timeout_ms: DEFAULT_FRAME_TIMEOUT_MS,
            tool_timeout_ms: DEFAULT_TOOL_TIMEOUT_MS,
            tool_retries: DEFAULT_TOOL_RETRIES,
            repair_retries: DEFAULT_REPAIR_RETRIES,
            model_id: DEFAULT_MODEL_ID.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            seed: DEFAULT_SEED,
            max_tokens: DEFAULT_MAX_TOKENS,
            provider_base_url: DEFAULT_PROVIDER_BASE_URL.to_string(),
            provider_api_key: None,
            max_queued_chunks: DEFAULT_MAX_QUEUED_CHUNKS,
            max_rounds: DEFAULT_MAX_ROUNDS,
            artifacts_dir: PathBuf::from(DEFAULT_ARTIFACTS_DIR),
        }
    }
}

impl Config {
    /// Load from the environment, falling back to defaults, then validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            frame_timeout_ms: env_parsed("FRAME_TIMEOUT_MS", DEFAULT_FRAME_TIMEOUT_MS)?,
            tool_timeout_ms: env_parsed("TOOL_TIMEOUT_MS", DEFAULT_TOOL_TIMEOUT_MS)?,
            tool_retries: env_parsed("TOOL_RETRIES", DEFAULT_TOOL_RETRIES)?,
            repair_retries: env_parsed("REPAIR_RETRIES", DEFAULT_REPAIR_RETRIES)?,
            model_id: env_string("MODEL_ID", DEFAULT_MODEL_ID),
            temperature: env_parsed("TEMPERATURE", DEFAULT_TEMPERATURE)?,
            seed: env_parsed("SEED", DEFAULT_SEED)?,
            max_tokens: env_parsed("MAX_TOKENS", DEFAULT_MAX_TOKENS)?,
            provider_base_url: env_string("PROVIDER_BASE_URL", DEFAULT_PROVIDER_BASE_URL),
            provider_api_key: std::env::var("PROVIDER_API_KEY").ok(),
            max_queued_chunks: env_parsed("MAX_QUEUED_CHUNKS", DEFAULT_MAX_QUEUED_CHUNKS)?,
            max_rounds: env_parsed("MAX_ROUNDS", DEFAULT_MAX_ROUNDS)?,
            artifacts_dir: PathBuf::from(env_string("ARTIFACTS_DIR", DEFAULT_ARTIFACTS_DIR)),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "FRAME_TIMEOUT_MS must be positive".to_string(),
            ));
        }
        if self.tool_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "TOOL_TIMEOUT_MS must be positive".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::Validation(format!(
                "TEMPERATURE {} out of range [0, 2]",
                self.temperature
            )));
        }
        if self.max_queued_chunks == 0 {
            return Err(ConfigError::Validation(
                "MAX_QUEUED_CHUNKS must be positive".to_string(),
            ));
        }
        if self.max_rounds == 0 {
            return Err(ConfigError::Validation(
                "MAX_ROUNDS must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
        Err(_) => Ok(default),
    }
}
