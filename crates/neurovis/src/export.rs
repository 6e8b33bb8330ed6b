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

//! Chart export to files and the on-disk artifact layout.

use crate::error::{RenderError, RenderResult};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageFormat {
    Svg,
    Png,
    VegaLite,
}

impl ImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Svg => "svg",
            ImageFormat::Png => "png",
            ImageFormat::VegaLite => "vl.json",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Svg => "image/svg+xml",
            ImageFormat::Png => "image/png",
            ImageFormat::VegaLite => "application/json",
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Writes a rendered chart document to `path` in the requested format.
pub trait ChartExporter: Send + Sync {
    fn export(&self, chart: &Value, format: ImageFormat, path: &Path) -> RenderResult<()>;
}

/// Exports through the `vl-convert` command line tool.
#[derive(Debug, Clone)]
pub struct VlConvertExporter {
    binary: String,
}

impl Default for VlConvertExporter {
    fn default() -> Self {
        Self::new("vl-convert")
    }
}

impl VlConvertExporter {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn convert(&self, command: &str, chart: &Value, format: ImageFormat, path: &Path) -> RenderResult<()> {
        let mut input = tempfile::Builder::new()
            .prefix("neurovis-")
            .suffix(".vl.json")
            .tempfile()?;
        input.write_all(serde_json::to_string(chart)?.as_bytes())?;
        input.flush()?;

        debug!(binary = %self.binary, command, output = %path.display(), "Converting chart");
        let output = Command::new(&self.binary)
            .arg(command)
            .arg("-i")
            .arg(input.path())
            .arg("-o")
            .arg(path)
            .output()
            .map_err(|source| RenderError::ExporterSpawn {
                binary: self.binary.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(RenderError::ExportFailed {
                format: format.to_string(),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }
}

impl ChartExporter for VlConvertExporter {
    fn export(&self, chart: &Value, format: ImageFormat, path: &Path) -> RenderResult<()> {
        match format {
            ImageFormat::VegaLite => write_json(chart, path),
            ImageFormat::Svg => self.convert("vl2svg", chart, format, path),
            ImageFormat::Png => self.convert("vl2png", chart, format, path),
        }
    }
}

pub fn write_json(chart: &Value, path: &Path) -> RenderResult<()> {
    std::fs::write(path, serde_json::to_string_pretty(chart)?)?;
    Ok(())
}

/// Artifact folder: one file per chart and format, named after the column pair.
#[derive(Debug, Clone)]
pub struct ChartStore {
    dir: PathBuf,
}

impl ChartStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure_dir(&self) -> std::io::Result<()> {
        if !self.dir.exists() {
            info!(dir = %self.dir.display(), "Creating image folder");
        }
        std::fs::create_dir_all(&self.dir)
    }

    /// `<col1>-<col2>` for the best chart, `<col1>-<col2>-<rank+1>` after it.
    pub fn pair_label(col1: &str, col2: &str, rank: usize) -> String {
        if rank == 0 {
            format!("{col1}-{col2}")
        } else {
            format!("{col1}-{col2}-{}", rank + 1)
        }
    }

    pub fn pair_path(&self, col1: &str, col2: &str, rank: usize, format: ImageFormat) -> PathBuf {
        self.labeled_path(&Self::pair_label(col1, col2, rank), format)
    }

    pub fn labeled_path(&self, label: &str, format: ImageFormat) -> PathBuf {
        self.dir.join(format!("{label}.{}", format.extension()))
    }

    pub fn read_base64(path: &Path) -> std::io::Result<String> {
        Ok(STANDARD.encode(std::fs::read(path)?))
    }
}
