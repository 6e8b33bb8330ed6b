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

use crate::error::{ConfigError, ConfigResult};
use crate::export::ImageFormat;
use crate::facts::FacetChannel;
use crate::recommender::DEFAULT_MIN_SIMILARITY;
use crate::render::ViewConfig;
use crate::schema::SchemaConfig;
use crate::solver::SolverConfig;
use llm_contracts::ProviderConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisualizerConfig {
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub view: ViewConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub request: ChartRequestConfig,
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub renderer: RendererConfig,
    #[serde(default)]
    pub llm: ProviderConfig,
    #[serde(default)]
    pub recommendation: RecommendationConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_image_dir")]
    pub image_dir: PathBuf,
    /// Every rendered chart is saved once per format. The evaluator reads the PNG.
    #[serde(default = "default_formats")]
    pub formats: Vec<ImageFormat>,
    #[serde(default = "default_num_charts")]
    pub num_charts: usize,
}

fn default_image_dir() -> PathBuf {
    PathBuf::from("images")
}

fn default_formats() -> Vec<ImageFormat> {
    vec![ImageFormat::Svg, ImageFormat::Png]
}

fn default_num_charts() -> usize {
    1
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            image_dir: default_image_dir(),
            formats: default_formats(),
            num_charts: default_num_charts(),
        }
    }
}

/// Constraints added to every column pair request besides the two encodings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartRequestConfig {
    /// Facet channel to request; `null` asks for an unfaceted chart.
    #[serde(default = "default_facet")]
    pub facet: Option<FacetChannel>,
    #[serde(default)]
    pub mark: Option<String>,
}

fn default_facet() -> Option<FacetChannel> {
    Some(FacetChannel::Col)
}

impl Default for ChartRequestConfig {
    fn default() -> Self {
        Self {
            facet: default_facet(),
            mark: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    #[serde(default = "default_vl_convert")]
    pub vl_convert_binary: String,
}

fn default_vl_convert() -> String {
    "vl-convert".to_string()
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            vl_convert_binary: default_vl_convert(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationConfig {
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,
    #[serde(default)]
    pub temperature: Option<f32>,
}

fn default_min_similarity() -> f64 {
    DEFAULT_MIN_SIMILARITY
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            min_similarity: default_min_similarity(),
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub temperature: Option<f32>,
}

fn default_concurrency() -> usize {
    4
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            temperature: None,
        }
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidField {
        field: field.to_string(),
        reason: reason.into(),
    }
}

impl VisualizerConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileError {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_yaml_str(&content)?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Charts only: no raster output, so no LLM evaluation.
    pub fn for_offline() -> Self {
        Self {
            output: OutputConfig {
                formats: vec![ImageFormat::Svg, ImageFormat::VegaLite],
                ..OutputConfig::default()
            },
            ..Self::default()
        }
    }

    /// Many pairs per run: PNG only, lighter profiling, more requests in flight.
    pub fn for_batch_evaluation() -> Self {
        Self {
            schema: SchemaConfig::for_fast_profiling(),
            output: OutputConfig {
                formats: vec![ImageFormat::Png],
                ..OutputConfig::default()
            },
            evaluation: EvaluationConfig {
                concurrency: 8,
                ..EvaluationConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn produces_raster(&self) -> bool {
        self.output.formats.contains(&ImageFormat::Png)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.output.formats.is_empty() {
            return Err(invalid("output.formats", "must list at least one format"));
        }
        if self.output.num_charts == 0 {
            return Err(invalid("output.num_charts", "must be greater than 0"));
        }
        if self.view.continuous_width == 0 || self.view.continuous_height == 0 {
            return Err(invalid("view", "dimensions must be greater than 0"));
        }
        if self.solver.binary.trim().is_empty() {
            return Err(invalid("solver.binary", "must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.recommendation.min_similarity) {
            return Err(invalid(
                "recommendation.min_similarity",
                format!("{} is outside 0.0..=1.0", self.recommendation.min_similarity),
            ));
        }
        if self.evaluation.concurrency == 0 {
            return Err(invalid("evaluation.concurrency", "must be greater than 0"));
        }
        if !(0.0..=1.0).contains(&self.schema.type_confidence_threshold) {
            return Err(invalid(
                "schema.type_confidence_threshold",
                "must be within 0.0..=1.0",
            ));
        }
        self.llm.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = VisualizerConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config.output.image_dir, PathBuf::from("images"));
        assert_eq!(config.output.formats, vec![ImageFormat::Svg, ImageFormat::Png]);
        assert_eq!(config.view.continuous_width, 130);
        assert_eq!(config.solver.binary, "clingo");
        assert_eq!(config.recommendation.min_similarity, 0.6);
        assert_eq!(config.evaluation.concurrency, 4);
        assert_eq!(config.llm.max_retries, 1);
        assert_eq!(config.request.facet, Some(FacetChannel::Col));
        assert!(config.produces_raster());
    }

    #[test]
    fn test_partial_sections() {
        let yaml = r#"
output:
  image_dir: out/charts
  formats: [vega_lite, png]
view:
  continuous_width: 200
solver:
  program_dir: draco/asp
  time_limit_seconds: 30
request:
  facet: null
  mark: tick
llm:
  model: gpt-4o
  timeout_seconds: 20
"#;
        let config = VisualizerConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.output.formats[0], ImageFormat::VegaLite);
        assert_eq!(config.view.continuous_width, 200);
        assert_eq!(config.view.continuous_height, 130);
        assert_eq!(config.solver.time_limit_seconds, Some(30));
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.schema.max_sample_values, 5);
        assert_eq!(config.request.facet, None);
        assert_eq!(config.request.mark.as_deref(), Some("tick"));
    }

    #[test]
    fn test_validation() {
        let err = VisualizerConfig::from_yaml_str("evaluation:\n  concurrency: 0").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { .. }));
        let err =
            VisualizerConfig::from_yaml_str("recommendation:\n  min_similarity: 1.5").unwrap_err();
        assert!(err.to_string().contains("min_similarity"));
        assert!(VisualizerConfig::from_yaml_str("output:\n  formats: []").is_err());
    }

    #[test]
    fn test_presets() {
        assert!(!VisualizerConfig::for_offline().produces_raster());
        let batch = VisualizerConfig::for_batch_evaluation();
        assert!(batch.validate().is_ok());
        assert_eq!(batch.evaluation.concurrency, 8);
        assert_eq!(batch.schema.max_sample_values, 3);
    }

    #[test]
    fn test_sample_configuration_file() {
        let config =
            VisualizerConfig::from_yaml_str(include_str!("../../../config/neurovis.yml")).unwrap();
        assert_eq!(config.solver.time_limit_seconds, Some(60));
        assert_eq!(config.request.facet, Some(FacetChannel::Col));
        assert_eq!(config.schema.temporal_formats.len(), 7);
    }

    #[test]
    fn test_missing_file() {
        let err = VisualizerConfig::from_file(Path::new("/nonexistent/neurovis.yml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileError { .. }));
    }
}
