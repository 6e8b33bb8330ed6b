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

use clap::{Args as ClapArgs, Parser, Subcommand};
use neurovis::FacetChannel;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "neurovis")]
#[command(about = "Recommend, render and score charts for a tabular dataset")]
#[command(version)]
pub struct Args {
    /// YAML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, default_value_t = false)]
    pub debug: bool,

    #[arg(long, global = true, value_enum, help = "Set the logging level")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct DataArgs {
    /// CSV, Parquet or JSON file
    #[arg(long)]
    pub data: PathBuf,

    /// Overrides `output.image_dir`
    #[arg(long)]
    pub image_dir: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the extracted schema and, optionally, its solver facts
    Schema {
        #[command(flatten)]
        data: DataArgs,
        #[arg(long, default_value_t = false)]
        facts: bool,
    },
    /// Pick a column pair (LLM unless both --x and --y are given), render it
    /// and optionally score it
    Recommend {
        #[command(flatten)]
        data: DataArgs,
        #[arg(long, requires = "y")]
        x: Option<String>,
        #[arg(long, requires = "x")]
        y: Option<String>,
        #[arg(long)]
        num: Option<usize>,
        #[arg(long, default_value_t = false)]
        evaluate: bool,
    },
    /// Complete a two-column request into labelled charts
    Complete {
        #[command(flatten)]
        data: DataArgs,
        #[arg(long)]
        x: String,
        #[arg(long)]
        y: String,
        #[arg(long, default_value_t = 5)]
        num: usize,
        /// Facet channel (`col`, `row`) or `none`; defaults to `request.facet`
        #[arg(long)]
        facet: Option<String>,
        /// Also write the request facts to this file
        #[arg(long)]
        dump_facts: Option<PathBuf>,
    },
    /// Render every pair of chartable columns and rank them
    Compare {
        #[command(flatten)]
        data: DataArgs,
        #[arg(long, default_value_t = false)]
        evaluate: bool,
    },
    /// Send a minimal request to the configured LLM provider
    Health,
}

pub fn parse_facet(value: &str) -> Result<Option<FacetChannel>, String> {
    match value {
        "none" => Ok(None),
        other => other.parse().map(Some),
    }
}

#[derive(clap::ValueEnum, Clone, Debug)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}
