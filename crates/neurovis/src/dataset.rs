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

//! Dataset loading. Every source is normalised through [`lowercase_columns`]
//! because column names become solver constants, which must start lower-case.

use crate::error::{SchemaError, SchemaResult};
use polars::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub trait DataSource {
    fn load(&self) -> SchemaResult<DataFrame>;

    fn describe(&self) -> String {
        "in-memory dataset".to_string()
    }
}

impl<F> DataSource for F
where
    F: Fn() -> PolarsResult<DataFrame>,
{
    fn load(&self) -> SchemaResult<DataFrame> {
        Ok(self()?)
    }
}

/// Wraps an already materialised frame.
pub struct InMemorySource(pub DataFrame);

impl DataSource for InMemorySource {
    fn load(&self) -> SchemaResult<DataFrame> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Parquet,
    Json,
}

impl FileFormat {
    pub fn from_path(path: &Path) -> SchemaResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "csv" => Ok(FileFormat::Csv),
            "parquet" | "pq" => Ok(FileFormat::Parquet),
            "json" => Ok(FileFormat::Json),
            other => Err(SchemaError::UnsupportedFormat {
                format: if other.is_empty() {
                    path.display().to_string()
                } else {
                    other.to_string()
                },
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    format: FileFormat,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> SchemaResult<Self> {
        let path = path.into();
        let format = FileFormat::from_path(&path)?;
        Ok(Self { path, format })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> PolarsResult<DataFrame> {
        let file = File::open(&self.path)?;
        match self.format {
            FileFormat::Csv => CsvReader::new(file).finish(),
            FileFormat::Parquet => ParquetReader::new(file).finish(),
            FileFormat::Json => JsonReader::new(file).finish(),
        }
    }
}

impl DataSource for FileSource {
    fn load(&self) -> SchemaResult<DataFrame> {
        self.read().map_err(|source| SchemaError::DataFileError {
            path: self.path.display().to_string(),
            source,
        })
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Lower-cases every column name. Applying it twice is the same as once.
pub fn lowercase_columns(mut df: DataFrame) -> SchemaResult<DataFrame> {
    let names: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.to_lowercase())
        .collect();
    let mut seen = HashSet::with_capacity(names.len());
    for name in &names {
        if !seen.insert(name.as_str()) {
            return Err(SchemaError::DuplicateColumn {
                column: name.clone(),
            });
        }
    }
    df.set_column_names(names.iter().map(String::as_str))?;
    Ok(df)
}

/// Loads a source and normalises its column names.
pub fn load_dataset(source: &dyn DataSource) -> SchemaResult<DataFrame> {
    let df = source.load()?;
    if df.width() == 0 {
        return Err(SchemaError::EmptyDataset);
    }
    let df = lowercase_columns(df)?;
    info!(
        source = %source.describe(),
        rows = df.height(),
        columns = df.width(),
        "Loaded dataset"
    );
    debug!(columns = ?df.get_column_names(), "Normalised column names");
    Ok(df)
}
