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

use crate::types::{LLMError, LLMResult, Provider};
use serde::{Deserialize, Serialize};

/// Connection and generation settings for one chat-completions provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider")]
    pub provider: Provider,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

fn default_provider() -> Provider {
    Provider::OpenAI
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_timeout_seconds() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    1
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            endpoint: None,
            api_key_env: default_api_key_env(),
            timeout_seconds: default_timeout_seconds(),
            max_retries: default_max_retries(),
            temperature: None,
            max_tokens: None,
        }
    }
}

impl ProviderConfig {
    pub fn resolved_endpoint(&self) -> LLMResult<String> {
        if let Some(endpoint) = &self.endpoint {
            return Ok(endpoint.clone());
        }
        self.provider
            .default_endpoint()
            .map(str::to_string)
            .ok_or_else(|| {
                LLMError::Configuration(format!(
                    "provider '{}' requires an explicit endpoint",
                    self.provider.name()
                ))
            })
    }

    /// Reads the API key from the configured environment variable.
    /// Local providers such as Ollama accept an empty key.
    pub fn resolve_api_key(&self) -> LLMResult<String> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ if self.provider == Provider::Ollama => Ok(String::new()),
            _ => Err(LLMError::Authentication(format!(
                "environment variable {} is not set",
                self.api_key_env
            ))),
        }
    }

    pub fn validate(&self) -> LLMResult<()> {
        if self.model.trim().is_empty() {
            return Err(LLMError::Configuration("model must not be empty".into()));
        }
        if self.timeout_seconds == 0 {
            return Err(LLMError::Configuration(
                "timeout_seconds must be greater than 0".into(),
            ));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(LLMError::Configuration(format!(
                    "temperature {t} is outside 0.0..=2.0"
                )));
            }
        }
        self.resolved_endpoint().map(|_| ())
    }
}
