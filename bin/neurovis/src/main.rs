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

mod args;

use anyhow::{Context, Result};
use args::{parse_facet, Args, Command, DataArgs};
use clap::Parser;
use neurovis::llm::client_from_config;
use neurovis::solver::dump_facts;
use neurovis::{
    default_chart_label, load_dataset, ColumnPair, ColumnStrategy, ComparisonReport,
    EvaluationStrategy, FileSource, NeuroSymbolicVisualizer, PairReport, SchemaExtractor,
    VisualizerConfig,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(args: &Args) {
    let filter = if args.debug {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("debug,reqwest=info,hyper=info,hyper_util=info"))
    } else if let Some(level) = &args.log_level {
        EnvFilter::new(format!("{},reqwest=warn,hyper=warn", level.as_str()))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,reqwest=warn,hyper=warn,hyper_util=warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(args: &Args, image_dir: Option<&PathBuf>) -> Result<VisualizerConfig> {
    let mut config = match &args.config {
        Some(path) => VisualizerConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => VisualizerConfig::default(),
    };
    if let Some(dir) = image_dir {
        config.output.image_dir = dir.clone();
    }
    Ok(config)
}

fn source(data: &DataArgs) -> Result<FileSource> {
    FileSource::new(&data.data).with_context(|| format!("opening {}", data.data.display()))
}

fn print_pair_report(report: &PairReport) {
    println!("Columns: {} / {}", report.pair.first, report.pair.second);
    for chart in &report.charts {
        let files: Vec<String> = chart
            .files
            .iter()
            .map(|(_, path)| path.display().to_string())
            .collect();
        println!("  #{} cost {:>4}  {}", chart.rank + 1, chart.cost, files.join(", "));
    }
    if let Some(evaluation) = &report.evaluation {
        println!("LLM score: {}", evaluation.score());
        println!("Explanation: {}", evaluation.explanation());
    }
}

fn print_comparison(report: &ComparisonReport) {
    print!("{}", report.table());
    if let Some(row) = report.best_by_cost() {
        println!("Best by cost:  {} ({})", row.pair, row.cost.unwrap_or_default());
    }
    if let Some(row) = report.best_by_score() {
        let score = row.evaluation.as_ref().map(|e| e.score()).unwrap_or_default();
        println!("Best by score: {} ({score})", row.pair);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    init_tracing(&args);

    match &args.command {
        Command::Schema { data, facts } => {
            let config = load_config(&args, data.image_dir.as_ref())?;
            let df = load_dataset(&source(data)?)?;
            let schema = SchemaExtractor::with_config(config.schema).extract(&df)?;
            if data.json {
                println!("{}", serde_json::to_string_pretty(&schema)?);
            } else {
                print!("{}", schema.summary().report());
                println!("Chartable columns: {}", schema.non_string_columns().join(", "));
            }
            if *facts {
                for fact in schema.to_facts() {
                    println!("{fact}");
                }
            }
        }
        Command::Recommend {
            data,
            x,
            y,
            num,
            evaluate,
        } => {
            let mut config = load_config(&args, data.image_dir.as_ref())?;
            if let Some(num) = num {
                config.output.num_charts = *num;
            }
            let strategy = match (x, y) {
                (Some(x), Some(y)) => ColumnStrategy::Fixed(ColumnPair::new(x, y)),
                _ => ColumnStrategy::Llm,
            };
            let evaluation = if *evaluate {
                EvaluationStrategy::CostAndLlm
            } else {
                EvaluationStrategy::CostOnly
            };
            let visualizer = NeuroSymbolicVisualizer::builder()
                .config(config)
                .column_strategy(strategy)
                .evaluation_strategy(evaluation)
                .build(&source(data)?)?;
            let report = visualizer.run().await?;
            if data.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_pair_report(&report);
            }
        }
        Command::Complete {
            data,
            x,
            y,
            num,
            facet,
            dump_facts: dump_path,
        } => {
            let mut config = load_config(&args, data.image_dir.as_ref())?;
            if let Some(facet) = facet {
                config.request.facet = parse_facet(facet).map_err(anyhow::Error::msg)?;
            }
            let pair = ColumnPair::new(x, y);
            let visualizer = NeuroSymbolicVisualizer::builder()
                .config(config)
                .column_strategy(ColumnStrategy::Fixed(pair.clone()))
                .build(&source(data)?)?;
            let request = visualizer.pair_request(&pair);
            if let Some(path) = dump_path {
                dump_facts(&request, path)?;
                info!(path = %path.display(), "Wrote request facts");
            }
            let charts = visualizer.complete_spec(&request, *num, default_chart_label)?;
            if data.json {
                println!("{}", serde_json::to_string_pretty(&charts)?);
            } else {
                for chart in &charts {
                    println!("{} COST: {}", chart.label, chart.cost);
                }
            }
        }
        Command::Compare { data, evaluate } => {
            let config = load_config(&args, data.image_dir.as_ref())?;
            let evaluation = if *evaluate {
                EvaluationStrategy::CostAndLlm
            } else {
                EvaluationStrategy::CostOnly
            };
            let visualizer = NeuroSymbolicVisualizer::builder()
                .config(config)
                .evaluation_strategy(evaluation)
                .build(&source(data)?)?;
            let report = visualizer.compare_all().await?;
            if data.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_comparison(&report);
            }
        }
        Command::Health => {
            let config = load_config(&args, None)?;
            let client = client_from_config(&config.llm)?;
            client
                .health_check()
                .await
                .with_context(|| format!("{} did not answer", client.provider_name()))?;
            println!("{} ({}) is reachable", client.provider_name(), client.model());
        }
    }
    Ok(())
}
