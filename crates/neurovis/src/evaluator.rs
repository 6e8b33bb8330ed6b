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

//! LLM-backed chart quality scoring from rendered images.

use crate::error::{EvaluationError, Result};
use crate::export::{ChartStore, ImageFormat};
use crate::llm::ApiClient;
use crate::schema::DataSchema;
use futures::stream::{self, StreamExt};
use llm_contracts::{Message, ProviderRequest};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub const EVALUATOR_PROMPT: &str = "You're part of visualization recommendation system. \
Rank how good a visualization is. Answer with a single number in the range 1-100, \
no other characters are allowed in the first line. Provide a brief explanation in the next line";

pub const SCORE_RANGE: std::ops::RangeInclusive<i64> = 1..=100;

/// Outcome of scoring one chart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Evaluation {
    Scored { score: i64, explanation: String },
    /// The first line of the response was not an integer.
    Unparsable { raw: String },
    /// The request itself failed.
    Unavailable { reason: String },
}

impl Evaluation {
    /// Parsed score, or `0` for non-scored outcomes.
    pub fn score(&self) -> i64 {
        match self {
            Evaluation::Scored { score, .. } => *score,
            _ => 0,
        }
    }

    pub fn explanation(&self) -> &str {
        match self {
            Evaluation::Scored { explanation, .. } => explanation,
            _ => "error",
        }
    }

    pub fn is_scored(&self) -> bool {
        matches!(self, Evaluation::Scored { .. })
    }

    pub fn in_range(&self) -> bool {
        matches!(self, Evaluation::Scored { score, .. } if SCORE_RANGE.contains(score))
    }
}

impl std::fmt::Display for Evaluation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Evaluation::Scored { score, explanation } => write!(f, "{score} ({explanation})"),
            Evaluation::Unparsable { .. } => f.write_str("unparsable"),
            Evaluation::Unavailable { reason } => write!(f, "unavailable: {reason}"),
        }
    }
}

/// Splits a response at its first newline: an integer score, then the explanation.
pub fn parse_evaluation(response: &str) -> Evaluation {
    let (first, rest) = response.split_once('\n').unwrap_or((response, ""));
    match first.trim().parse::<i64>() {
        Ok(score) => Evaluation::Scored {
            score,
            explanation: rest.trim().to_string(),
        },
        Err(_) => Evaluation::Unparsable {
            raw: response.to_string(),
        },
    }
}

pub struct ChartEvaluator {
    client: Arc<dyn ApiClient>,
    temperature: Option<f32>,
}

impl ChartEvaluator {
    pub fn new(client: Arc<dyn ApiClient>) -> Self {
        Self {
            client,
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn build_request(&self, schema: &DataSchema, image_base64: &str) -> ProviderRequest {
        let context = format!(
            "For context, here's the schema of the dataset for which the visualization was generated:\n{} \n",
            schema.to_prompt()
        );
        ProviderRequest::new(
            self.client.model(),
            vec![
                Message::system(EVALUATOR_PROMPT),
                Message::user(context),
                Message::user_image(ImageFormat::Png.mime_type(), image_base64),
            ],
        )
        .with_temperature(self.temperature)
    }

    /// Scores the PNG at `image`. Blank or unparsable responses fail soft; a missing
    /// image or a failed request is an error.
    pub async fn evaluate(&self, schema: &DataSchema, image: &Path) -> Result<Evaluation> {
        if !image.exists() {
            return Err(EvaluationError::ChartNotRendered {
                path: image.to_path_buf(),
            }
            .into());
        }
        let encoded = ChartStore::read_base64(image).map_err(EvaluationError::Io)?;
        let response = self
            .client
            .send_request(self.build_request(schema, &encoded))
            .await?;
        let text = response.content.trim();

        let evaluation = parse_evaluation(text);
        match &evaluation {
            Evaluation::Scored { score, .. } => {
                info!(chart = %image.display(), score, "Chart evaluated");
                if !evaluation.in_range() {
                    warn!(chart = %image.display(), score, "Score outside 1-100");
                }
            }
            _ => warn!(
                chart = %image.display(),
                response = %text,
                "Could not parse evaluation score"
            ),
        }
        Ok(evaluation)
    }

    /// Scores every image with at most `concurrency` requests in flight.
    /// Results keep input order; failed requests become `Unavailable`.
    pub async fn evaluate_batch(
        &self,
        schema: &DataSchema,
        images: &[PathBuf],
        concurrency: usize,
    ) -> Vec<Evaluation> {
        stream::iter(images)
            .map(|image| async move {
                match self.evaluate(schema, image).await {
                    Ok(evaluation) => evaluation,
                    Err(e) => {
                        warn!(chart = %image.display(), error = %e, "Evaluation unavailable");
                        Evaluation::Unavailable {
                            reason: e.to_string(),
                        }
                    }
                }
            })
            .buffered(concurrency.max(1))
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scored_response() {
        let evaluation = parse_evaluation("87\nGood contrast and clear trend");
        assert_eq!(
            evaluation,
            Evaluation::Scored {
                score: 87,
                explanation: "Good contrast and clear trend".into()
            }
        );
        assert!(evaluation.in_range());
    }

    #[test]
    fn test_unparsable_response_uses_sentinel() {
        let evaluation = parse_evaluation("not-a-number\nwhatever");
        assert!(matches!(evaluation, Evaluation::Unparsable { .. }));
        assert_eq!(evaluation.score(), 0);
        assert_eq!(evaluation.explanation(), "error");
    }

    #[test]
    fn test_blank_response_is_unparsable() {
        let evaluation = parse_evaluation("");
        assert_eq!(evaluation, Evaluation::Unparsable { raw: String::new() });
        assert_eq!(evaluation.score(), 0);
    }

    #[test]
    fn test_boundaries_parse_literally() {
        assert_eq!(parse_evaluation("1").score(), 1);
        assert_eq!(parse_evaluation("100").score(), 100);
        let zero = parse_evaluation("0");
        assert!(zero.is_scored());
        assert_eq!(zero.score(), 0);
        assert_eq!(zero.explanation(), "");
        assert!(!zero.in_range());
        assert!(!parse_evaluation("101\ntoo generous").in_range());
    }

    #[test]
    fn test_whitespace_around_score() {
        assert_eq!(parse_evaluation("  42 \r\n ok ").score(), 42);
        assert!(!parse_evaluation("Score: 42\nok").is_scored());
    }

    #[test]
    fn test_serialised_tag() {
        let json = serde_json::to_value(Evaluation::Unavailable {
            reason: "timeout".into(),
        })
        .unwrap();
        assert_eq!(json["status"], "unavailable");
    }
}
