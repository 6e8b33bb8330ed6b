// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    #[serde(rename = "openai")]
    OpenAI,
    Ollama,
    Custom(String),
}

#[derive(Debug, Error)]
pub enum LLMError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialisation error: {0}")]
    Serialisation(String),

    #[error("Empty completion returned by {0}")]
    EmptyCompletion(String),

    #[error("Timeout error")]
    Timeout,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type LLMResult<T> = Result<T, LLMError>;

impl LLMError {
    /// Whether another attempt of the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LLMError::RateLimit | LLMError::Network(_) | LLMError::Timeout
        )
    }
}

impl From<String> for Provider {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "openai" => Provider::OpenAI,
            "ollama" => Provider::Ollama,
            _ => Provider::Custom(s),
        }
    }
}

impl Provider {
    /// Chat-completions endpoint used when the configuration leaves it unset.
    pub fn default_endpoint(&self) -> Option<&'static str> {
        match self {
            Provider::OpenAI => Some("https://api.openai.com/v1/chat/completions"),
            Provider::Ollama => Some("http://localhost:11434/v1/chat/completions"),
            Provider::Custom(_) => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Ollama => "ollama",
            Provider::Custom(name) => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(LLMError::Timeout.is_transient());
        assert!(LLMError::RateLimit.is_transient());
        assert!(LLMError::Network("reset".into()).is_transient());
        assert!(!LLMError::Authentication("bad key".into()).is_transient());
        assert!(!LLMError::Provider("400".into()).is_transient());
    }

    #[test]
    fn test_provider_from_string() {
        assert_eq!(Provider::from("OpenAI".to_string()), Provider::OpenAI);
        assert_eq!(Provider::from("ollama".to_string()), Provider::Ollama);
        assert_eq!(
            Provider::from("azure".to_string()),
            Provider::Custom("azure".to_string())
        );
        assert!(Provider::Custom("azure".into()).default_endpoint().is_none());
    }
}
