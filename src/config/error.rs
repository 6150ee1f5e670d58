// Copyright 2026 The Framegate Project
// SPDX-License-Identifier: Apache-2.0

/// All errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },

    #[error("validation error: {0}")]
    Validation(String),
}
