// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

/// Why a searchstream config could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read searchstream config: {0}")]
    IoError(#[from] std::io::Error),

    /// Bad YAML syntax, a wrong type or an unknown field.
    #[error("invalid searchstream YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Parsed fine but a value is out of range or malformed.
    #[error("invalid searchstream config: {0}")]
    Validation(String),

    /// `${NAME}` without a fallback and `NAME` unset.
    #[error("transport setting references ${{{name}}}, which is not set and has no fallback")]
    UndefinedVariable { name: String },
}
