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

use async_trait::async_trait;
use llm_contracts::{
    LLMError, LLMResult, Message, ProviderConfig, ProviderRequest, ProviderResponse, Usage,
};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::ApiClient;

/// Chat-completions client for OpenAI and compatible endpoints.
#[derive(Debug, Clone)]
pub struct OpenAIClient {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
    provider: String,
    timeout: Duration,
    max_retries: u32,
    backoff: Duration,
}

impl OpenAIClient {
    pub fn new(
        api_key: String,
        endpoint: String,
        model: String,
        timeout_seconds: u64,
        max_retries: u32,
    ) -> LLMResult<Self> {
        let timeout = Duration::from_secs(timeout_seconds);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LLMError::Configuration(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            endpoint,
            model,
            provider: "openai".to_string(),
            timeout,
            max_retries,
            backoff: Duration::from_millis(250),
        })
    }

    pub fn from_config(config: &ProviderConfig) -> LLMResult<Self> {
        let mut client = Self::new(
            config.resolve_api_key()?,
            config.resolved_endpoint()?,
            config.model.clone(),
            config.timeout_seconds,
            config.max_retries,
        )?;
        client.provider = config.provider.name().to_string();
        Ok(client)
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    fn parse_response(
        &self,
        response_data: Value,
        model: String,
        retry_count: u32,
        started: Instant,
    ) -> LLMResult<ProviderResponse> {
        let content = response_data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                LLMError::Provider("Failed to extract content from response".to_string())
            })?;

        let usage = match response_data.get("usage") {
            Some(usage_data) => Usage {
                prompt_tokens: usage_data["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                completion_tokens: usage_data["completion_tokens"].as_u64().unwrap_or(0) as u32,
                total_tokens: usage_data["total_tokens"].as_u64().unwrap_or(0) as u32,
            },
            None => Usage::default(),
        };

        let finish_reason = response_data["choices"][0]["finish_reason"]
            .as_str()
            .map(|s| s.to_string());

        Ok(ProviderResponse {
            content: content.to_string(),
            model: response_data["model"]
                .as_str()
                .map(str::to_string)
                .unwrap_or(model),
            usage,
            finish_reason,
            retry_count,
            processing_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn status_error(status: StatusCode, body: String) -> LLMError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                LLMError::Authentication(format!("{status}: {body}"))
            }
            StatusCode::TOO_MANY_REQUESTS => LLMError::RateLimit,
            _ => LLMError::Provider(format!("API error {status}: {body}")),
        }
    }

    /// One request with its body read to the end.
    async fn send_once(&self, payload: &Value) -> reqwest::Result<(StatusCode, String)> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    }

    /// Posts the payload, retrying transient failures (network, timeout,
    /// 429, 5xx) up to `max_retries` times. The timeout covers the whole
    /// attempt, body included.
    async fn execute_request_with_retry(&self, payload: &Value) -> LLMResult<(Value, u32)> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.backoff * 2_u32.pow((attempt - 1).min(3))).await;
                debug!(attempt, "Retrying LLM request");
            }

            match tokio::time::timeout(self.timeout, self.send_once(payload)).await {
                Ok(Ok((status, body))) => {
                    if status.is_success() {
                        let data = serde_json::from_str(&body).map_err(|e| {
                            LLMError::Serialisation(format!("Failed to parse response: {e}"))
                        })?;
                        return Ok((data, attempt));
                    }
                    let retryable =
                        status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS;
                    warn!(%status, attempt, retryable, "LLM request rejected");
                    last_error = Some(Self::status_error(status, body));
                    if !retryable {
                        break;
                    }
                }
                Ok(Err(e)) if e.is_timeout() => {
                    warn!(attempt, timeout_s = self.timeout.as_secs(), "LLM request timed out");
                    last_error = Some(LLMError::Timeout);
                }
                Ok(Err(e)) => {
                    warn!(attempt, error = %e, "LLM request failed");
                    last_error = Some(LLMError::Network(format!("Request failed: {e}")));
                }
                Err(_) => {
                    warn!(attempt, timeout_s = self.timeout.as_secs(), "LLM request timed out");
                    last_error = Some(LLMError::Timeout);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| LLMError::Internal("Unknown error".to_string())))
    }
}

#[async_trait]
impl ApiClient for OpenAIClient {
    async fn send_request(&self, request: ProviderRequest) -> LLMResult<ProviderResponse> {
        let started = Instant::now();
        let payload = serde_json::to_value(&request)
            .map_err(|e| LLMError::Serialisation(e.to_string()))?;
        debug!(
            request_id = %request.id,
            model = %request.model,
            image = request.has_image(),
            "Sending chat completion"
        );
        let (data, retries) = self.execute_request_with_retry(&payload).await?;
        self.parse_response(data, request.model, retries, started)
    }

    fn provider_name(&self) -> &str {
        &self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn health_check(&self) -> LLMResult<()> {
        let request = ProviderRequest::new(self.model.clone(), vec![Message::user("Hi")])
            .with_max_tokens(Some(10));
        self.send_request(request).await?;
        Ok(())
    }
}
