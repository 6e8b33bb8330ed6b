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

//! Neuro-symbolic chart recommendation.
//!
//! A dataframe's schema becomes solver facts; an answer-set solver completes a
//! partial chart request into cost-ranked specifications, which are rendered
//! to Vega-Lite and exported. An LLM can pick the columns to plot and score
//! the rendered charts from their images.

pub mod config;
pub mod dataset;
pub mod error;
pub mod evaluator;
pub mod export;
pub mod facts;
pub mod llm;
pub mod pipeline;
pub mod recommender;
pub mod render;
pub mod schema;
pub mod solver;

pub use config::VisualizerConfig;
pub use dataset::{load_dataset, DataSource, FileSource, InMemorySource};
pub use error::{
    ConfigError, EvaluationError, FactError, RecommendationError, RenderError, Result,
    SchemaError, SolverError, VisualizerError,
};
pub use evaluator::{parse_evaluation, ChartEvaluator, Evaluation};
pub use export::{ChartExporter, ChartStore, ImageFormat, VlConvertExporter};
pub use facts::{answer_set_to_spec, dict_to_facts, FacetChannel, Fact, PartialSpec};
pub use llm::{ApiClient, OpenAIClient};
pub use pipeline::{
    default_chart_label, ColumnStrategy, ComparisonReport, ComparisonRow, EvaluationStrategy,
    NeuroSymbolicVisualizer, PairReport, RenderedChart, VisualizerBuilder,
};
pub use recommender::{parse_column_pair, ColumnPair, ColumnRecommender};
pub use render::{ChartRenderer, VegaLiteRenderer, ViewConfig};
pub use schema::{DataSchema, FieldSchema, FieldType, SchemaExtractor};
pub use solver::{ClingoSolver, Model, SolverConfig, SpecSolver};
