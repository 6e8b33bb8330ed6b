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

use llm_contracts::LLMError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisualizerError {
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("Fact error: {0}")]
    Fact(#[from] FactError),
    #[error("Solver error: {0}")]
    Solver(#[from] SolverError),
    #[error("Render error: {0}")]
    Render(#[from] RenderError),
    #[error("Column recommendation error: {0}")]
    Recommendation(#[from] RecommendationError),
    #[error("Chart evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),
    #[error("LLM error: {0}")]
    Llm(#[from] LLMError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),
    #[error("Failed to read data file '{path}': {source}")]
    DataFileError {
        path: String,
        #[source]
        source: polars::error::PolarsError,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unsupported data format: {format}")]
    UnsupportedFormat { format: String },
    #[error("Columns collide after lower-casing: '{column}'")]
    DuplicateColumn { column: String },
    #[error("Empty dataset provided")]
    EmptyDataset,
    #[error("Field '{field}' not found in schema")]
    UnknownField { field: String },
    #[error("Field '{field}' has type string and cannot be encoded directly")]
    StringField { field: String },
}

#[derive(Error, Debug)]
pub enum FactError {
    #[error("Failed to parse atom '{input}' at position {position}: {reason}")]
    Parse {
        input: String,
        position: usize,
        reason: String,
    },
    #[error("Atom '{atom}' does not describe an entity or attribute")]
    UnexpectedAtom { atom: String },
    #[error("Entity '{id}' referenced before its parent '{parent}' was declared")]
    DanglingEntity { id: String, parent: String },
}

#[derive(Error, Debug)]
pub enum SolverError {
    #[error("Failed to launch solver '{binary}': {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Solver I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Solver exited with status {code}: {stderr}")]
    Failed { code: i32, stderr: String },
    #[error("Failed to parse solver output: {0}")]
    Output(#[from] serde_json::Error),
    #[error("Solver program directory '{path}' contains no .lp files")]
    ProgramNotFound { path: PathBuf },
    #[error("Solver found no completion for the specification ({result})")]
    NoCompletion { result: String },
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Completed specification has no view")]
    MissingView,
    #[error("Unsupported mark type: {mark}")]
    UnsupportedMark { mark: String },
    #[error("Encoding refers to unknown field '{field}'")]
    UnknownField { field: String },
    #[error("Failed to convert data for rendering: {0}")]
    Data(#[from] polars::error::PolarsError),
    #[error("Failed to launch exporter '{binary}': {source}")]
    ExporterSpawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Export to {format} failed with status {code}: {stderr}")]
    ExportFailed {
        format: String,
        code: i32,
        stderr: String,
    },
    #[error("Render I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON serialisation failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecommendationError {
    #[error("Expected two column names, found {found} in response {response:?}")]
    TooFewTokens { found: usize, response: String },
    #[error("Token '{token}' matches no column (best: {best:?}, similarity {similarity:.2})")]
    NoMatch {
        token: String,
        best: Option<String>,
        similarity: f64,
    },
    #[error("Both tokens resolved to the same column '{column}'")]
    SameColumn { column: String },
    #[error("Dataset has no non-string columns to recommend")]
    NoCandidates,
    #[error("No LLM client configured for column recommendation")]
    NoClient,
}

#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("Chart image '{path}' does not exist; render the pair first")]
    ChartNotRendered { path: PathBuf },
    #[error("No LLM client configured for {stage}")]
    NoClient { stage: &'static str },
    #[error("Failed to read chart image: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file '{path}': {source}")]
    FileError {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {field} {reason}")]
    InvalidField { field: String, reason: String },
    #[error("Invalid LLM configuration: {0}")]
    Llm(#[from] LLMError),
}

pub type Result<T> = std::result::Result<T, VisualizerError>;
pub type SchemaResult<T> = std::result::Result<T, SchemaError>;
pub type FactResult<T> = std::result::Result<T, FactError>;
pub type SolverResult<T> = std::result::Result<T, SolverError>;
pub type RenderResult<T> = std::result::Result<T, RenderError>;
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

impl VisualizerError {
    /// Errors after which a batch run may move on to the next column pair.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            VisualizerError::Recommendation(
                RecommendationError::TooFewTokens { .. }
                    | RecommendationError::NoMatch { .. }
                    | RecommendationError::SameColumn { .. }
                    | RecommendationError::NoCandidates
            ) | VisualizerError::Solver(SolverError::NoCompletion { .. })
                | VisualizerError::Evaluation(EvaluationError::ChartNotRendered { .. })
        ) || matches!(self, VisualizerError::Llm(e) if e.is_transient())
    }

    pub fn category(&self) -> &'static str {
        match self {
            VisualizerError::Schema(_) => "schema",
            VisualizerError::Fact(_) => "facts",
            VisualizerError::Solver(_) => "solver",
            VisualizerError::Render(_) => "render",
            VisualizerError::Recommendation(_) => "recommendation",
            VisualizerError::Evaluation(_) => "evaluation",
            VisualizerError::Llm(_) => "llm",
            VisualizerError::Config(_) => "config",
            VisualizerError::Io(_) => "io",
        }
    }
}
