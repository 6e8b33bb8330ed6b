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

use crate::error::{SchemaError, SchemaResult};
use crate::facts::{self, Fact};
use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Field kinds in the solver's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Number,
    String,
    Datetime,
    Boolean,
}

impl FieldType {
    pub fn solver_name(&self) -> &'static str {
        match self {
            FieldType::Number => "number",
            FieldType::String => "string",
            FieldType::Datetime => "datetime",
            FieldType::Boolean => "boolean",
        }
    }

    /// The analytic kind used when describing the field to people and LLMs.
    pub fn analytic_kind(&self) -> &'static str {
        match self {
            FieldType::Number => "quantitative",
            FieldType::String => "string",
            FieldType::Datetime => "temporal",
            FieldType::Boolean => "categorical",
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.solver_name())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub max_sample_values: usize,
    pub type_confidence_threshold: f64,
    pub temporal_formats: Vec<String>,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            max_sample_values: 5,
            type_confidence_threshold: 0.8,
            temporal_formats: vec![
                "%Y-%m-%d".to_string(),
                "%Y-%m-%d %H:%M:%S".to_string(),
                "%Y-%m-%dT%H:%M:%S".to_string(),
                "%Y-%m-%dT%H:%M:%SZ".to_string(),
                "%m/%d/%Y".to_string(),
                "%d/%m/%Y".to_string(),
                "%Y%m%d".to_string(),
            ],
        }
    }
}

impl SchemaConfig {
    pub fn for_fast_profiling() -> Self {
        Self {
            max_sample_values: 3,
            type_confidence_threshold: 0.7,
            temporal_formats: vec!["%Y-%m-%d".to_string(), "%Y-%m-%d %H:%M:%S".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub unique: usize,
    pub entropy: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub std: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skew: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freq: Option<usize>,
    #[serde(default)]
    pub sample_values: Vec<String>,
    #[serde(skip)]
    pub type_confidence: f64,
}

impl FieldSchema {
    fn fact_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("name".into(), json!(self.name));
        obj.insert("type".into(), json!(self.field_type.solver_name()));
        obj.insert("unique".into(), json!(self.unique));
        obj.insert("entropy".into(), json!(self.entropy));
        let optional = [
            ("min", self.min),
            ("max", self.max),
            ("std", self.std),
            ("skew", self.skew),
        ];
        for (key, value) in optional {
            if let Some(v) = value {
                obj.insert(key.into(), json!(v));
            }
        }
        if let Some(freq) = self.freq {
            obj.insert("freq".into(), json!(freq));
        }
        Value::Object(obj)
    }
}

/// Field metadata for one dataset. Built once and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSchema {
    pub number_rows: usize,
    #[serde(rename = "field")]
    pub fields: Vec<FieldSchema>,
}

impl DataSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Columns that can be placed on an encoding channel: every field that
    /// is not a string, in schema order.
    pub fn non_string_columns(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| f.field_type != FieldType::String)
            .map(|f| f.name.clone())
            .collect()
    }

    pub fn string_columns(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| f.field_type == FieldType::String)
            .map(|f| f.name.clone())
            .collect()
    }

    /// Nested form consumed by [`facts::dict_to_facts`]. Sample values stay out.
    pub fn fact_value(&self) -> Value {
        json!({
            "number_rows": self.number_rows,
            "field": self.fields.iter().map(FieldSchema::fact_value).collect::<Vec<_>>(),
        })
    }

    pub fn to_facts(&self) -> Vec<Fact> {
        facts::dict_to_facts(&self.fact_value())
    }

    pub fn to_prompt(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| format!("{self:?}"))
    }

    pub fn summary(&self) -> SchemaSummary {
        let count = |t: FieldType| self.fields.iter().filter(|f| f.field_type == t).count();
        SchemaSummary {
            number_rows: self.number_rows,
            total_fields: self.fields.len(),
            number_count: count(FieldType::Number),
            string_count: count(FieldType::String),
            datetime_count: count(FieldType::Datetime),
            boolean_count: count(FieldType::Boolean),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaSummary {
    pub number_rows: usize,
    pub total_fields: usize,
    pub number_count: usize,
    pub string_count: usize,
    pub datetime_count: usize,
    pub boolean_count: usize,
}

impl SchemaSummary {
    pub fn report(&self) -> String {
        let mut report = String::new();
        report.push_str("Schema Summary\n==============\n");
        report.push_str(&format!("Rows: {}\n", self.number_rows));
        report.push_str(&format!("Fields: {}\n", self.total_fields));
        report.push_str(&format!("  - Number: {}\n", self.number_count));
        report.push_str(&format!("  - Datetime: {}\n", self.datetime_count));
        report.push_str(&format!("  - Boolean: {}\n", self.boolean_count));
        report.push_str(&format!("  - String: {}\n", self.string_count));
        report.push_str(&format!(
            "Column pairs to compare: {}\n",
            self.pair_count()
        ));
        report
    }

    pub fn pair_count(&self) -> usize {
        let n = self.total_fields - self.string_count;
        n * n.saturating_sub(1) / 2
    }
}

impl std::fmt::Display for SchemaSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} rows, {} fields ({} chartable)",
            self.number_rows,
            self.total_fields,
            self.total_fields - self.string_count
        )
    }
}

pub struct SchemaExtractor {
    config: SchemaConfig,
}

impl SchemaExtractor {
    pub fn new() -> Self {
        Self {
            config: SchemaConfig::default(),
        }
    }

    pub fn with_config(config: SchemaConfig) -> Self {
        Self { config }
    }

    pub fn extract(&self, df: &DataFrame) -> SchemaResult<DataSchema> {
        if df.width() == 0 {
            return Err(SchemaError::EmptyDataset);
        }
        let fields = df
            .get_columns()
            .par_iter()
            .map(|column| self.profile_column(column.as_materialized_series()))
            .collect::<SchemaResult<Vec<_>>>()?;
        let schema = DataSchema {
            number_rows: df.height(),
            fields,
        };
        info!(summary = %schema.summary(), "Extracted schema");
        Ok(schema)
    }

    fn profile_column(&self, series: &Series) -> SchemaResult<FieldSchema> {
        let name = series.name().to_string();
        let (field_type, type_confidence) = self.detect_field_type(series)?;
        let counts = value_counts(series)?;
        let mut field = FieldSchema {
            name,
            field_type,
            unique: series.n_unique()?,
            entropy: (entropy(&counts) * 1000.0).round() as i64,
            min: None,
            max: None,
            std: None,
            skew: None,
            freq: None,
            sample_values: self.sample_values(series)?,
            type_confidence,
        };
        match field_type {
            FieldType::Number => {
                let s_float = series.cast(&DataType::Float64)?;
                let ca = s_float.f64()?;
                field.min = ca.min().map(|v| v.round() as i64);
                field.max = ca.max().map(|v| v.round() as i64);
                field.std = ca.std(1).map(|v| v.round() as i64);
                let values: Vec<f64> = ca.into_iter().flatten().collect();
                field.skew = skewness(&values).map(|v| (v * 1000.0).round() as i64);
            }
            FieldType::String => {
                field.freq = counts.values().copied().max();
            }
            FieldType::Datetime | FieldType::Boolean => {}
        }
        debug!(
            field = %field.name,
            field_type = %field.field_type,
            confidence = field.type_confidence,
            unique = field.unique,
            "Profiled column"
        );
        Ok(field)
    }

    fn detect_field_type(&self, series: &Series) -> SchemaResult<(FieldType, f64)> {
        match series.dtype() {
            DataType::Boolean => return Ok((FieldType::Boolean, 1.0)),
            DataType::Date | DataType::Datetime(_, _) => return Ok((FieldType::Datetime, 1.0)),
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64 => return Ok((FieldType::Number, 1.0)),
            _ => {}
        }
        let non_null_count = series.len() - series.null_count();
        if non_null_count == 0 {
            return Ok((FieldType::String, 0.0));
        }
        if let Ok(s_float) = series.cast(&DataType::Float64) {
            let successful_casts = s_float.len() - s_float.null_count();
            let confidence = successful_casts as f64 / non_null_count as f64;
            if confidence >= self.config.type_confidence_threshold {
                return Ok((FieldType::Number, confidence));
            }
        }
        let s_str = series.cast(&DataType::String)?;
        let values: Vec<&str> = s_str.str()?.into_iter().flatten().collect();
        let temporal_confidence = self.temporal_confidence(&values);
        if temporal_confidence >= self.config.type_confidence_threshold {
            return Ok((FieldType::Datetime, temporal_confidence));
        }
        Ok((FieldType::String, 1.0 - temporal_confidence))
    }

    fn temporal_confidence(&self, values: &[&str]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        self.config
            .temporal_formats
            .iter()
            .map(|format| {
                let parsed = values
                    .iter()
                    .filter(|v| parse_datetime(v, format))
                    .count();
                parsed as f64 / values.len() as f64
            })
            .fold(0.0, f64::max)
    }

    /// First distinct values in row order.
    fn sample_values(&self, series: &Series) -> SchemaResult<Vec<String>> {
        let str_series = series.cast(&DataType::String)?;
        let mut seen = HashSet::new();
        Ok(str_series
            .str()?
            .into_iter()
            .flatten()
            .filter(|v| seen.insert(*v))
            .take(self.config.max_sample_values)
            .map(String::from)
            .collect())
    }
}

impl Default for SchemaExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_datetime(value: &str, format: &str) -> bool {
    NaiveDateTime::parse_from_str(value, format).is_ok()
        || NaiveDate::parse_from_str(value, format).is_ok()
}

fn value_counts(series: &Series) -> SchemaResult<HashMap<String, usize>> {
    let s_str = series.cast(&DataType::String)?;
    let mut counts = HashMap::new();
    for value in s_str.str()?.into_iter().flatten() {
        *counts.entry(value.to_string()).or_insert(0) += 1;
    }
    Ok(counts)
}

/// Shannon entropy (natural log) of a frequency table.
fn entropy(counts: &HashMap<String, usize>) -> f64 {
    let total: usize = counts.values().sum();
    if total == 0 {
        return 0.0;
    }
    counts
        .values()
        .map(|&c| {
            let p = c as f64 / total as f64;
            -p * p.ln()
        })
        .sum()
}

/// Adjusted Fisher-Pearson sample skewness.
fn skewness(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 3 {
        return None;
    }
    let nf = n as f64;
    let mean = values.iter().sum::<f64>() / nf;
    let m2 = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / nf;
    if m2 < 1e-12 {
        return Some(0.0);
    }
    let m3 = values.iter().map(|v| (v - mean).powi(3)).sum::<f64>() / nf;
    let g1 = m3 / m2.powf(1.5);
    Some((nf * (nf - 1.0)).sqrt() / (nf - 2.0) * g1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weather() -> DataFrame {
        df!(
            "date" => ["2012-01-01", "2012-01-02", "2012-01-03", "2012-01-04"],
            "precipitation" => [0.0, 10.9, 0.8, 20.3],
            "temp_max" => [12.8, 10.6, 11.7, 12.2],
            "wind" => [4.7, 4.5, 2.3, 4.7],
            "weather" => ["drizzle", "rain", "rain", "rain"]
        )
        .unwrap()
    }

    #[test]
    fn test_detects_field_types() {
        let schema = SchemaExtractor::new().extract(&weather()).unwrap();
        let types: Vec<_> = schema.fields.iter().map(|f| f.field_type).collect();
        assert_eq!(
            types,
            vec![
                FieldType::Datetime,
                FieldType::Number,
                FieldType::Number,
                FieldType::Number,
                FieldType::String
            ]
        );
        assert_eq!(schema.number_rows, 4);
    }

    #[test]
    fn test_non_string_columns_keep_schema_order() {
        let schema = SchemaExtractor::new().extract(&weather()).unwrap();
        assert_eq!(
            schema.non_string_columns(),
            vec!["date", "precipitation", "temp_max", "wind"]
        );
        assert_eq!(schema.string_columns(), vec!["weather"]);
    }

    #[test]
    fn test_string_statistics() {
        let schema = SchemaExtractor::new().extract(&weather()).unwrap();
        let weather = schema.field("weather").unwrap();
        assert_eq!(weather.unique, 2);
        assert_eq!(weather.freq, Some(3));
        assert!(weather.min.is_none());
        // -(0.25 ln 0.25 + 0.75 ln 0.75) = 0.5623
        assert_eq!(weather.entropy, 562);
    }

    #[test]
    fn test_number_statistics() {
        let schema = SchemaExtractor::new().extract(&weather()).unwrap();
        let wind = schema.field("wind").unwrap();
        assert_eq!(wind.min, Some(2));
        assert_eq!(wind.max, Some(5));
        assert_eq!(wind.unique, 3);
        assert!(wind.freq.is_none());
    }

    #[test]
    fn test_numeric_strings_are_numbers() {
        let df = df!("n" => ["1", "2", "3.5", "4"]).unwrap();
        let schema = SchemaExtractor::new().extract(&df).unwrap();
        assert_eq!(schema.fields[0].field_type, FieldType::Number);
    }

    #[test]
    fn test_boolean_column() {
        let df = df!("flag" => [true, false, true]).unwrap();
        let schema = SchemaExtractor::new().extract(&df).unwrap();
        assert_eq!(schema.fields[0].field_type, FieldType::Boolean);
        assert_eq!(schema.fields[0].field_type.analytic_kind(), "categorical");
        assert_eq!(schema.non_string_columns(), vec!["flag"]);
    }

    #[test]
    fn test_facts_exclude_samples() {
        let schema = SchemaExtractor::new().extract(&weather()).unwrap();
        let facts = schema.to_facts();
        assert_eq!(facts[0], "attribute(number_rows,root,4).");
        assert!(facts.contains(&"entity(field,root,0).".to_string()));
        assert!(facts.contains(&"attribute((field,name),0,date).".to_string()));
        assert!(facts.contains(&"attribute((field,type),4,string).".to_string()));
        assert!(!facts.iter().any(|f| f.contains("sample_values")));
    }

    #[test]
    fn test_prompt_includes_samples() {
        let schema = SchemaExtractor::new().extract(&weather()).unwrap();
        let prompt = schema.to_prompt();
        assert!(prompt.contains("\"sample_values\""));
        assert!(prompt.contains("drizzle"));
        let weather = schema.field("weather").unwrap();
        assert_eq!(weather.sample_values, vec!["drizzle", "rain"]);
    }

    #[test]
    fn test_skewness_symmetric_is_zero() {
        let skew = skewness(&[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert!(skew.abs() < 1e-9);
        assert!(skewness(&[1.0, 2.0]).is_none());
    }

    #[test]
    fn test_summary_pair_count() {
        let schema = SchemaExtractor::new().extract(&weather()).unwrap();
        let summary = schema.summary();
        assert_eq!(summary.number_count, 3);
        assert_eq!(summary.datetime_count, 1);
        assert_eq!(summary.pair_count(), 6);
    }
}
