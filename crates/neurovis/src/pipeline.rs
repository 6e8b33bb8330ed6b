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

//! The visualizer: schema facts in, ranked charts and LLM scores out.

use crate::config::{ChartRequestConfig, VisualizerConfig};
use crate::dataset::{load_dataset, DataSource};
use crate::error::{
    ConfigError, EvaluationError, RecommendationError, Result, SchemaError, VisualizerError,
};
use crate::evaluator::{ChartEvaluator, Evaluation};
use crate::export::{ChartExporter, ChartStore, ImageFormat, VlConvertExporter};
use crate::facts::{self, Fact, PartialSpec};
use crate::llm::{client_from_config, ApiClient};
use crate::recommender::{ColumnPair, ColumnRecommender};
use crate::render::{ChartRenderer, VegaLiteRenderer};
use crate::schema::{DataSchema, FieldType, SchemaExtractor};
use crate::solver::{ClingoSolver, Model, SpecSolver};
use itertools::Itertools;
use polars::prelude::DataFrame;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnStrategy {
    Fixed(ColumnPair),
    Llm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvaluationStrategy {
    #[default]
    CostOnly,
    CostAndLlm,
}

/// One completed, rendered and saved specification.
#[derive(Debug, Clone, Serialize)]
pub struct RenderedChart {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pair: Option<ColumnPair>,
    pub rank: usize,
    pub cost: i64,
    pub spec: Value,
    pub facts: Vec<Fact>,
    pub files: Vec<(ImageFormat, PathBuf)>,
}

impl RenderedChart {
    pub fn path(&self, format: ImageFormat) -> Option<&Path> {
        self.files
            .iter()
            .find(|(f, _)| *f == format)
            .map(|(_, p)| p.as_path())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PairReport {
    pub pair: ColumnPair,
    pub charts: Vec<RenderedChart>,
    pub evaluation: Option<Evaluation>,
}

impl PairReport {
    /// Cost of the best-ranked chart.
    pub fn cost(&self) -> Option<i64> {
        self.charts.first().map(|c| c.cost)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonRow {
    pub pair: ColumnPair,
    pub cost: Option<i64>,
    pub evaluation: Option<Evaluation>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ComparisonReport {
    pub rows: Vec<ComparisonRow>,
}

impl ComparisonReport {
    /// Lowest solver cost; the earlier pair wins ties.
    pub fn best_by_cost(&self) -> Option<&ComparisonRow> {
        self.rows
            .iter()
            .filter_map(|row| row.cost.map(|cost| (cost, row)))
            .min_by_key(|(cost, _)| *cost)
            .map(|(_, row)| row)
    }

    /// Highest parsed LLM score; the earlier pair wins ties.
    pub fn best_by_score(&self) -> Option<&ComparisonRow> {
        let mut best: Option<(i64, &ComparisonRow)> = None;
        for row in &self.rows {
            if let Some(evaluation @ Evaluation::Scored { .. }) = &row.evaluation {
                let score = evaluation.score();
                match best {
                    Some((s, _)) if score <= s => {}
                    _ => best = Some((score, row)),
                }
            }
        }
        best.map(|(_, row)| row)
    }

    pub fn table(&self) -> String {
        let mut out = format!("{:<32} {:>8} {:>6}  {}\n", "pair", "cost", "score", "explanation");
        out.push_str(&format!("{}\n", "-".repeat(72)));
        for row in &self.rows {
            let cost = row.cost.map_or_else(|| "-".to_string(), |c| c.to_string());
            let (score, note) = match (&row.evaluation, &row.error) {
                (_, Some(error)) => ("-".to_string(), error.clone()),
                (Some(evaluation), None) => {
                    (evaluation.score().to_string(), evaluation.explanation().to_string())
                }
                (None, None) => ("-".to_string(), String::new()),
            };
            out.push_str(&format!(
                "{:<32} {:>8} {:>6}  {}\n",
                row.pair.to_string(),
                cost,
                score,
                note.lines().next().unwrap_or_default()
            ));
        }
        out
    }
}

pub struct VisualizerBuilder {
    config: VisualizerConfig,
    solver: Option<Arc<dyn SpecSolver>>,
    renderer: Option<Arc<dyn ChartRenderer>>,
    exporter: Option<Arc<dyn ChartExporter>>,
    client: Option<Arc<dyn ApiClient>>,
    column_strategy: Option<ColumnStrategy>,
    evaluation_strategy: EvaluationStrategy,
}

impl Default for VisualizerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl VisualizerBuilder {
    pub fn new() -> Self {
        Self {
            config: VisualizerConfig::default(),
            solver: None,
            renderer: None,
            exporter: None,
            client: None,
            column_strategy: None,
            evaluation_strategy: EvaluationStrategy::CostOnly,
        }
    }

    pub fn config(mut self, config: VisualizerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn solver(mut self, solver: Arc<dyn SpecSolver>) -> Self {
        self.solver = Some(solver);
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn ChartRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn exporter(mut self, exporter: Arc<dyn ChartExporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn llm_client(mut self, client: Arc<dyn ApiClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Without a strategy, `run` asks the LLM when a client is available.
    /// Batch comparison does not need one.
    pub fn column_strategy(mut self, strategy: ColumnStrategy) -> Self {
        self.column_strategy = Some(strategy);
        self
    }

    pub fn evaluation_strategy(mut self, strategy: EvaluationStrategy) -> Self {
        self.evaluation_strategy = strategy;
        self
    }

    fn needs_llm(&self) -> bool {
        self.column_strategy == Some(ColumnStrategy::Llm)
            || self.evaluation_strategy == EvaluationStrategy::CostAndLlm
    }

    /// Loads the data, extracts the schema and wires the collaborators.
    /// Missing collaborators fall back to the configured production ones.
    pub fn build(self, source: &dyn DataSource) -> Result<NeuroSymbolicVisualizer> {
        let config = self.config.clone();
        config.validate()?;
        if self.evaluation_strategy == EvaluationStrategy::CostAndLlm && !config.produces_raster() {
            return Err(ConfigError::InvalidField {
                field: "output.formats".into(),
                reason: "must include png when charts are scored by the LLM".into(),
            }
            .into());
        }

        let client = match (&self.client, self.needs_llm()) {
            (Some(client), _) => Some(client.clone()),
            (None, true) => Some(client_from_config(&config.llm)?),
            (None, false) => None,
        };

        let data = load_dataset(source)?;
        let schema = SchemaExtractor::with_config(config.schema.clone()).extract(&data)?;
        let schema_facts = schema.to_facts();
        info!(
            source = %source.describe(),
            summary = %schema.summary(),
            facts = schema_facts.len(),
            "Schema extracted"
        );

        let store = ChartStore::new(&config.output.image_dir);
        store.ensure_dir()?;

        let solver = self
            .solver
            .unwrap_or_else(|| Arc::new(ClingoSolver::new(config.solver.clone())));
        let renderer = self
            .renderer
            .unwrap_or_else(|| Arc::new(VegaLiteRenderer::new(config.view)));
        let exporter = self.exporter.unwrap_or_else(|| {
            Arc::new(VlConvertExporter::new(config.renderer.vl_convert_binary.clone()))
        });

        let recommender = client.clone().map(|c| {
            ColumnRecommender::new(c)
                .with_min_similarity(config.recommendation.min_similarity)
                .with_temperature(config.recommendation.temperature)
        });
        let evaluator = client.map(|c| {
            ChartEvaluator::new(c).with_temperature(config.evaluation.temperature)
        });

        Ok(NeuroSymbolicVisualizer {
            data,
            schema,
            schema_facts,
            solver,
            renderer,
            exporter,
            store,
            recommender,
            evaluator,
            column_strategy: self.column_strategy,
            evaluation_strategy: self.evaluation_strategy,
            config,
        })
    }
}

pub struct NeuroSymbolicVisualizer {
    data: DataFrame,
    schema: DataSchema,
    schema_facts: Vec<Fact>,
    solver: Arc<dyn SpecSolver>,
    renderer: Arc<dyn ChartRenderer>,
    exporter: Arc<dyn ChartExporter>,
    store: ChartStore,
    recommender: Option<ColumnRecommender>,
    evaluator: Option<ChartEvaluator>,
    column_strategy: Option<ColumnStrategy>,
    evaluation_strategy: EvaluationStrategy,
    config: VisualizerConfig,
}

pub fn default_chart_label(index: usize) -> String {
    format!("CHART {}", index + 1)
}

impl NeuroSymbolicVisualizer {
    pub fn builder() -> VisualizerBuilder {
        VisualizerBuilder::new()
    }

    pub fn schema(&self) -> &DataSchema {
        &self.schema
    }

    pub fn schema_facts(&self) -> &[Fact] {
        &self.schema_facts
    }

    pub fn data(&self) -> &DataFrame {
        &self.data
    }

    pub fn store(&self) -> &ChartStore {
        &self.store
    }

    /// Chartable columns: every non-string field, in schema order.
    pub fn all_columns(&self) -> Vec<String> {
        self.schema.non_string_columns()
    }

    /// Partial specification for a pair: the schema, one view with one mark,
    /// both columns encoded, and the configured facet.
    pub fn pair_request(&self, pair: &ColumnPair) -> Vec<Fact> {
        let ChartRequestConfig { facet, mark } = &self.config.request;
        let mut spec = PartialSpec::new(&self.schema_facts);
        if let Some(mark) = mark {
            spec = spec.mark_type(mark);
        }
        spec = spec.encode(&pair.first).encode(&pair.second);
        if let Some(channel) = facet {
            spec = spec.facet(*channel);
        }
        spec.into_facts()
    }

    fn check_column(&self, column: &str) -> Result<()> {
        match self.schema.field(column) {
            None => Err(SchemaError::UnknownField {
                field: column.to_string(),
            }
            .into()),
            Some(field) if field.field_type == FieldType::String => Err(SchemaError::StringField {
                field: column.to_string(),
            }
            .into()),
            Some(_) => Ok(()),
        }
    }

    pub async fn select_columns(&self) -> Result<ColumnPair> {
        match self.column_strategy.as_ref().unwrap_or(&ColumnStrategy::Llm) {
            ColumnStrategy::Fixed(pair) => {
                self.check_column(&pair.first)?;
                self.check_column(&pair.second)?;
                Ok(pair.clone())
            }
            ColumnStrategy::Llm => {
                let recommender = self
                    .recommender
                    .as_ref()
                    .ok_or(RecommendationError::NoClient)?;
                recommender.recommend(&self.schema).await
            }
        }
    }

    /// Renders and saves the first `num` models; extra models are ignored.
    fn render_models<F>(
        &self,
        models: &[Model],
        num: usize,
        pair: Option<&ColumnPair>,
        labeler: F,
    ) -> Result<Vec<RenderedChart>>
    where
        F: Fn(usize) -> String,
    {
        if models.len() > num {
            debug!(returned = models.len(), num, "Solver returned extra models");
        }
        let models = &models[..models.len().min(num)];
        let mut charts = Vec::with_capacity(models.len());
        for (rank, model) in models.iter().enumerate() {
            let label = labeler(rank);
            let spec = model.spec()?;
            let chart = self.renderer.render(&spec, &self.data)?;

            let mut files = Vec::with_capacity(self.config.output.formats.len());
            for format in &self.config.output.formats {
                let path = self.store.labeled_path(&label, *format);
                self.exporter.export(&chart, *format, &path)?;
                debug!(path = %path.display(), "Saved chart");
                files.push((*format, path));
            }
            info!(chart = %label, cost = model.cost, "Chart rendered");

            charts.push(RenderedChart {
                facts: facts::dict_to_facts(&spec),
                label,
                pair: pair.cloned(),
                rank,
                cost: model.cost,
                spec,
                files,
            });
        }
        Ok(charts)
    }

    /// Completes an arbitrary partial specification into up to `num` charts
    /// saved as `<label>.<ext>`, in solver order.
    pub fn complete_spec<F>(&self, spec: &[Fact], num: usize, labeler: F) -> Result<Vec<RenderedChart>>
    where
        F: Fn(usize) -> String,
    {
        let models = self.solver.complete(spec, num)?;
        self.render_models(&models, num, None, labeler)
    }

    /// Up to `num` charts for the pair, best first.
    pub fn recommend_charts(&self, pair: &ColumnPair, num: usize) -> Result<Vec<RenderedChart>> {
        self.check_column(&pair.first)?;
        self.check_column(&pair.second)?;
        let request = self.pair_request(pair);
        debug!(pair = %pair, facts = request.len(), "Completing pair specification");
        let models = self.solver.complete(&request, num)?;
        self.render_models(&models, num, Some(pair), |rank| {
            ChartStore::pair_label(&pair.first, &pair.second, rank)
        })
    }

    pub fn recommend_chart(&self, pair: &ColumnPair) -> Result<RenderedChart> {
        self.recommend_charts(pair, 1)?
            .into_iter()
            .next()
            .ok_or_else(|| {
                VisualizerError::Solver(crate::error::SolverError::NoCompletion {
                    result: "no models".into(),
                })
            })
    }

    /// Scores the best-ranked PNG of a pair. The pair must have been rendered.
    pub async fn eval_chart(&self, pair: &ColumnPair) -> Result<Evaluation> {
        let evaluator = self.evaluator.as_ref().ok_or(EvaluationError::NoClient {
            stage: "chart evaluation",
        })?;
        let path = self
            .store
            .pair_path(&pair.first, &pair.second, 0, ImageFormat::Png);
        evaluator.evaluate(&self.schema, &path).await
    }

    /// Column selection, completion and rendering, then scoring when asked for.
    pub async fn run(&self) -> Result<PairReport> {
        let pair = self.select_columns().await?;
        info!(pair = %pair, "Columns selected");
        let charts = self.recommend_charts(&pair, self.config.output.num_charts)?;
        let evaluation = match self.evaluation_strategy {
            EvaluationStrategy::CostOnly => None,
            EvaluationStrategy::CostAndLlm => Some(self.eval_chart(&pair).await?),
        };
        Ok(PairReport {
            pair,
            charts,
            evaluation,
        })
    }

    /// Every pairwise combination of chartable columns. Pairs the solver
    /// cannot complete are reported and skipped.
    pub async fn compare_all(&self) -> Result<ComparisonReport> {
        let pairs: Vec<ColumnPair> = self
            .all_columns()
            .into_iter()
            .tuple_combinations::<(String, String)>()
            .map(ColumnPair::from)
            .collect();
        info!(pairs = pairs.len(), "Comparing column pairs");

        let mut rows = Vec::with_capacity(pairs.len());
        let mut images = Vec::new();
        for pair in pairs {
            match self.recommend_chart(&pair) {
                Ok(chart) => {
                    if let Some(png) = chart.path(ImageFormat::Png) {
                        images.push((rows.len(), png.to_path_buf()));
                    }
                    rows.push(ComparisonRow {
                        pair,
                        cost: Some(chart.cost),
                        evaluation: None,
                        error: None,
                    });
                }
                Err(e) if e.is_recoverable() => {
                    warn!(pair = %pair, error = %e, "Skipping pair");
                    rows.push(ComparisonRow {
                        pair,
                        cost: None,
                        evaluation: None,
                        error: Some(e.to_string()),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        if self.evaluation_strategy == EvaluationStrategy::CostAndLlm {
            let evaluator = self.evaluator.as_ref().ok_or(EvaluationError::NoClient {
                stage: "chart evaluation",
            })?;
            let paths: Vec<PathBuf> = images.iter().map(|(_, p)| p.clone()).collect();
            let evaluations = evaluator
                .evaluate_batch(&self.schema, &paths, self.config.evaluation.concurrency)
                .await;
            for ((row, _), evaluation) in images.iter().zip(evaluations) {
                rows[*row].evaluation = Some(evaluation);
            }
        }

        Ok(ComparisonReport { rows })
    }
}
