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

#![allow(dead_code)]

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use llm_contracts::{
    ContentPart, LLMError, LLMResult, MessageContent, ProviderRequest, ProviderResponse, Usage,
};
use neurovis::{
    ChartExporter, Fact, ImageFormat, Model, SolverError, SpecSolver, VisualizerConfig,
};
use neurovis::error::{RenderResult, SolverResult};
use neurovis::llm::ApiClient;
use polars::prelude::*;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn weather() -> PolarsResult<DataFrame> {
    df!(
        "Date" => ["2012-01-01", "2012-01-02", "2012-01-03", "2012-01-04"],
        "precipitation" => [0.0, 10.9, 0.8, 20.3],
        "temp_max" => [12.8, 10.6, 11.7, 12.2],
        "wind" => [4.7, 4.5, 2.3, 4.7],
        "weather" => ["drizzle", "rain", "rain", "rain"]
    )
}

pub fn config_in(dir: &Path) -> VisualizerConfig {
    let mut config = VisualizerConfig::default();
    config.output.image_dir = dir.join("images");
    config
}

const MARKS: [&str; 5] = ["point", "tick", "line", "bar", "area"];

/// Completes a request deterministically: one model per entry of `MARKS`
/// up to `available`, each encoding the requested fields on x and y.
pub struct StubSolver {
    pub available: usize,
    pub honor_limit: bool,
    pub requests: Mutex<Vec<Vec<Fact>>>,
}

impl StubSolver {
    pub fn new(available: usize) -> Self {
        Self {
            available,
            honor_limit: true,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Returns every available model whatever `num_models` asks for.
    pub fn ignoring_limit(available: usize) -> Self {
        Self {
            honor_limit: false,
            ..Self::new(available)
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl SpecSolver for StubSolver {
    fn complete(&self, facts: &[Fact], num_models: usize) -> SolverResult<Vec<Model>> {
        self.requests.lock().unwrap().push(facts.to_vec());
        let fields: Vec<&str> = facts
            .iter()
            .filter_map(|f| f.strip_prefix("attribute((encoding,field),"))
            .filter_map(|rest| rest.split_once(',').map(|(_, v)| v.trim_end_matches(").")))
            .collect();

        let limit = if self.honor_limit { num_models } else { usize::MAX };
        let count = limit.min(self.available).min(MARKS.len());
        if count == 0 {
            return Err(SolverError::NoCompletion {
                result: "UNSATISFIABLE".into(),
            });
        }
        Ok((0..count)
            .map(|i| {
                let mut answer_set = vec![
                    "entity(view,root,v0)".to_string(),
                    "attribute((view,coordinates),v0,cartesian)".to_string(),
                    "entity(mark,v0,m0)".to_string(),
                    format!("attribute((mark,type),m0,{})", MARKS[i]),
                ];
                for (k, (field, channel)) in fields.iter().zip(["x", "y"]).enumerate() {
                    answer_set.push(format!("entity(encoding,m0,e{k})"));
                    answer_set.push(format!("attribute((encoding,channel),e{k},{channel})"));
                    answer_set.push(format!("attribute((encoding,field),e{k},{field})"));
                }
                Model {
                    answer_set,
                    cost: 10 + i as i64,
                    number: i + 1,
                }
            })
            .collect())
    }
}

/// Writes the chart document to every requested path, whatever the format.
#[derive(Default)]
pub struct FileExporter {
    pub exports: AtomicUsize,
    pub written: Mutex<Vec<(ImageFormat, PathBuf)>>,
}

impl ChartExporter for FileExporter {
    fn export(&self, chart: &Value, format: ImageFormat, path: &Path) -> RenderResult<()> {
        std::fs::write(path, serde_json::to_vec(chart)?)?;
        self.exports.fetch_add(1, Ordering::SeqCst);
        self.written
            .lock()
            .unwrap()
            .push((format, path.to_path_buf()));
        Ok(())
    }
}

type Responder = Box<dyn Fn(&ProviderRequest) -> LLMResult<String> + Send + Sync>;
type Delay = Box<dyn Fn(&ProviderRequest) -> Duration + Send + Sync>;

pub struct ScriptedClient {
    responder: Responder,
    delay: Option<Delay>,
    pub requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedClient {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&ProviderRequest) -> LLMResult<String> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Sleeps before answering, per request.
    pub fn with_delay<F>(mut self, delay: F) -> Self
    where
        F: Fn(&ProviderRequest) -> Duration + Send + Sync + 'static,
    {
        self.delay = Some(Box::new(delay));
        self
    }

    pub fn always(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_| Ok(text.clone()))
    }

    pub fn failing() -> Self {
        Self::new(|_| Err(LLMError::Network("connection reset".into())))
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ApiClient for ScriptedClient {
    async fn send_request(&self, request: ProviderRequest) -> LLMResult<ProviderResponse> {
        if let Some(delay) = &self.delay {
            tokio::time::sleep(delay(&request)).await;
        }
        let content = (self.responder)(&request)?;
        self.requests.lock().unwrap().push(request.clone());
        Ok(ProviderResponse {
            content,
            model: request.model,
            usage: Usage::default(),
            finish_reason: Some("stop".into()),
            retry_count: 0,
            processing_time_ms: 1,
        })
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn health_check(&self) -> LLMResult<()> {
        Ok(())
    }
}

/// Encoded fields of the chart image attached to a request. With
/// `FileExporter` the image is the chart document itself.
pub fn image_fields(request: &ProviderRequest) -> Vec<String> {
    let url = request
        .messages
        .iter()
        .find_map(|message| match &message.content {
            MessageContent::Parts(parts) => parts.iter().find_map(|part| match part {
                ContentPart::ImageUrl { image_url } => Some(image_url.url.clone()),
                _ => None,
            }),
            MessageContent::Text(_) => None,
        })
        .expect("request carries an image");
    let encoded = url.split_once(',').expect("data url").1;
    let chart: Value = serde_json::from_slice(&STANDARD.decode(encoded).unwrap()).unwrap();
    let mut fields = Vec::new();
    collect_fields(&chart, &mut fields);
    fields
}

fn collect_fields(value: &Value, fields: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                match (key.as_str(), child) {
                    ("data", _) => {}
                    ("field", Value::String(field)) => fields.push(field.clone()),
                    _ => collect_fields(child, fields),
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_fields(item, fields)),
        _ => {}
    }
}
