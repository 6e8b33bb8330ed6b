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

//! LLM-backed column pair recommendation.

use crate::error::{RecommendationError, Result};
use crate::llm::{completion_text, ApiClient};
use crate::schema::DataSchema;
use llm_contracts::{Message, ProviderRequest};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

pub const RECOMMENDER_PROMPT: &str = "You're part of visualization recommendation system. \
You pick two features from a python dict file to plot, whose correlation is insightful. \
Answer in two words seperated by a space";

pub const DEFAULT_MIN_SIMILARITY: f64 = 0.6;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnPair {
    pub first: String,
    pub second: String,
}

impl ColumnPair {
    pub fn new(first: impl Into<String>, second: impl Into<String>) -> Self {
        Self {
            first: first.into(),
            second: second.into(),
        }
    }
}

impl std::fmt::Display for ColumnPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.first, self.second)
    }
}

impl From<(String, String)> for ColumnPair {
    fn from((first, second): (String, String)) -> Self {
        Self { first, second }
    }
}

/// Ratcliff/Obershelp similarity, `2 * matches / total length`, in `[0, 1]`.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_characters(&a, &b) as f64 / total as f64
}

fn matching_characters(a: &[char], b: &[char]) -> usize {
    let (i, j, k) = longest_match(a, b);
    if k == 0 {
        return 0;
    }
    k + matching_characters(&a[..i], &b[..j]) + matching_characters(&a[i + k..], &b[j + k..])
}

/// Longest common block; ties resolve to the earliest start in `a`, then `b`.
fn longest_match(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut prev = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        let mut cur = vec![0usize; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            if ca == cb {
                let k = prev[j] + 1;
                cur[j + 1] = k;
                if k > best.2 {
                    best = (i + 1 - k, j + 1 - k, k);
                }
            }
        }
        prev = cur;
    }
    best
}

/// Closest candidate and its similarity; the first candidate wins ties.
pub fn best_match<'a>(token: &str, candidates: &'a [String]) -> Option<(&'a str, f64)> {
    let mut best: Option<(&str, f64)> = None;
    for candidate in candidates {
        let score = similarity(token, candidate);
        match best {
            Some((_, s)) if score <= s => {}
            _ => best = Some((candidate, score)),
        }
    }
    best
}

/// Maps free text onto two distinct candidate columns.
pub fn parse_column_pair(
    response: &str,
    candidates: &[String],
    min_similarity: f64,
) -> std::result::Result<ColumnPair, RecommendationError> {
    if candidates.is_empty() {
        return Err(RecommendationError::NoCandidates);
    }

    let tokens: Vec<String> = response
        .split_whitespace()
        .map(|t| {
            t.trim_matches(|c: char| !(c.is_alphanumeric() || c == '_'))
                .to_lowercase()
        })
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.len() < 2 {
        return Err(RecommendationError::TooFewTokens {
            found: tokens.len(),
            response: response.to_string(),
        });
    }

    let resolve = |token: &str| match best_match(token, candidates) {
        Some((name, score)) if score >= min_similarity => {
            debug!(token, column = name, similarity = score, "Matched column");
            Ok(name.to_string())
        }
        other => Err(RecommendationError::NoMatch {
            token: token.to_string(),
            best: other.map(|(name, _)| name.to_string()),
            similarity: other.map(|(_, s)| s).unwrap_or(0.0),
        }),
    };

    let first = resolve(&tokens[0])?;
    let second = resolve(&tokens[1])?;
    if first == second {
        return Err(RecommendationError::SameColumn { column: first });
    }
    Ok(ColumnPair { first, second })
}

/// Asks the LLM which two chartable columns are worth plotting together.
pub struct ColumnRecommender {
    client: Arc<dyn ApiClient>,
    min_similarity: f64,
    temperature: Option<f32>,
}

impl ColumnRecommender {
    pub fn new(client: Arc<dyn ApiClient>) -> Self {
        Self {
            client,
            min_similarity: DEFAULT_MIN_SIMILARITY,
            temperature: None,
        }
    }

    pub fn with_min_similarity(mut self, min_similarity: f64) -> Self {
        self.min_similarity = min_similarity;
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn build_request(&self, schema: &DataSchema) -> ProviderRequest {
        ProviderRequest::new(
            self.client.model(),
            vec![
                Message::system(RECOMMENDER_PROMPT),
                Message::user(schema.to_prompt()),
            ],
        )
        .with_temperature(self.temperature)
    }

    pub async fn recommend(&self, schema: &DataSchema) -> Result<ColumnPair> {
        let candidates = schema.non_string_columns();
        if candidates.is_empty() {
            return Err(RecommendationError::NoCandidates.into());
        }

        let response = self.client.send_request(self.build_request(schema)).await?;
        let text = completion_text(self.client.provider_name(), &response)?;
        let pair = parse_column_pair(&text, &candidates, self.min_similarity)?;
        info!(response = %text, pair = %pair, "LLM recommended columns");
        Ok(pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<String> {
        vec!["wind".into(), "temp_max".into(), "precipitation".into()]
    }

    #[test]
    fn test_similarity_matches_difflib() {
        assert!((similarity("wnd", "wind") - 6.0 / 7.0).abs() < 1e-9);
        assert!((similarity("temp_mx", "temp_max") - 14.0 / 15.0).abs() < 1e-9);
        assert!((similarity("abcd", "bcde") - 0.75).abs() < 1e-9);
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("abc", "xyz"), 0.0);
    }

    #[test]
    fn test_fuzzy_pair() {
        let pair = parse_column_pair("wnd temp_mx", &columns(), DEFAULT_MIN_SIMILARITY).unwrap();
        assert_eq!(pair, ColumnPair::new("wind", "temp_max"));
    }

    #[test]
    fn test_punctuation_and_case() {
        let pair = parse_column_pair("`Wind`, Precipitation.", &columns(), 0.6).unwrap();
        assert_eq!(pair, ColumnPair::new("wind", "precipitation"));
    }

    #[test]
    fn test_too_few_tokens() {
        assert_eq!(
            parse_column_pair("wind", &columns(), 0.6),
            Err(RecommendationError::TooFewTokens {
                found: 1,
                response: "wind".into()
            })
        );
    }

    #[test]
    fn test_no_match_below_threshold() {
        match parse_column_pair("wind humidity", &columns(), 0.6) {
            Err(RecommendationError::NoMatch { token, similarity, .. }) => {
                assert_eq!(token, "humidity");
                assert!(similarity < 0.6);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_same_column_and_no_candidates() {
        assert_eq!(
            parse_column_pair("wind wnd", &columns(), 0.6),
            Err(RecommendationError::SameColumn {
                column: "wind".into()
            })
        );
        assert_eq!(
            parse_column_pair("a b", &[], 0.6),
            Err(RecommendationError::NoCandidates)
        );
    }

    #[test]
    fn test_ties_keep_candidate_order() {
        let candidates = vec!["ab".to_string(), "ba".to_string()];
        assert_eq!(best_match("a", &candidates).unwrap().0, "ab");
    }
}
