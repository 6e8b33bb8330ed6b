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

pub mod openai;

use async_trait::async_trait;
use llm_contracts::{LLMError, LLMResult, Provider, ProviderConfig, ProviderRequest, ProviderResponse};
use std::sync::Arc;

#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn send_request(&self, request: ProviderRequest) -> LLMResult<ProviderResponse>;

    fn provider_name(&self) -> &str;

    fn model(&self) -> &str;

    async fn health_check(&self) -> LLMResult<()>;
}

pub use openai::OpenAIClient;

/// Builds the client for a provider section. Every supported provider speaks
/// the chat-completions protocol.
pub fn client_from_config(config: &ProviderConfig) -> LLMResult<Arc<dyn ApiClient>> {
    config.validate()?;
    match &config.provider {
        Provider::OpenAI | Provider::Ollama | Provider::Custom(_) => {
            Ok(Arc::new(OpenAIClient::from_config(config)?))
        }
    }
}

/// Text of a response, rejecting blank completions.
pub fn completion_text(provider: &str, response: &ProviderResponse) -> LLMResult<String> {
    let text = response.content.trim();
    if text.is_empty() {
        return Err(LLMError::EmptyCompletion(provider.to_string()));
    }
    Ok(text.to_string())
}
