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

//! Specification completion through an external answer-set solver.

use crate::error::{FactResult, SolverError, SolverResult};
use crate::facts::{self, Fact};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;
use tracing::{debug, info, warn};

/// One completed specification as returned by the solver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub answer_set: Vec<String>,
    /// First optimization level; lower is better.
    pub cost: i64,
    /// Position in solver output, starting at 1.
    pub number: usize,
}

impl Model {
    pub fn spec(&self) -> FactResult<Value> {
        facts::answer_set_to_spec(&self.answer_set)
    }
}

/// Produces up to `num_models` ranked completions of a partial specification,
/// best first. An empty result is an error.
pub trait SpecSolver: Send + Sync {
    fn complete(&self, facts: &[Fact], num_models: usize) -> SolverResult<Vec<Model>>;

    fn name(&self) -> &str {
        "solver"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    #[serde(default = "default_binary")]
    pub binary: String,
    /// Directory holding the `.lp` program files, loaded in file-name order.
    #[serde(default = "default_program_dir")]
    pub program_dir: PathBuf,
    #[serde(default)]
    pub time_limit_seconds: Option<u64>,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_binary() -> String {
    "clingo".to_string()
}

fn default_program_dir() -> PathBuf {
    PathBuf::from("asp")
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            program_dir: default_program_dir(),
            time_limit_seconds: None,
            extra_args: Vec::new(),
        }
    }
}

/// Runs `clingo` as a subprocess with the program files and facts on stdin.
#[derive(Debug, Clone)]
pub struct ClingoSolver {
    config: SolverConfig,
}

// clingo exit codes: 10/20/30 report satisfiability, 1 and 2 mark interrupted
// or incomplete searches; 33 and above are errors.
const FIRST_ERROR_CODE: i32 = 33;

impl ClingoSolver {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    pub fn program_files(&self) -> SolverResult<Vec<PathBuf>> {
        let dir = &self.config.program_dir;
        let not_found = || SolverError::ProgramNotFound { path: dir.clone() };
        let entries = std::fs::read_dir(dir).map_err(|_| not_found())?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "lp") {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(not_found());
        }
        files.sort();
        Ok(files)
    }

    pub fn arguments(&self, programs: &[PathBuf], num_models: usize) -> Vec<String> {
        let mut args: Vec<String> = programs
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        args.push("-".to_string());
        args.extend([
            "--outf=2".to_string(),
            "--opt-mode=optN".to_string(),
            "--quiet=1".to_string(),
            format!("--models={num_models}"),
        ]);
        if let Some(limit) = self.config.time_limit_seconds {
            args.push(format!("--time-limit={limit}"));
        }
        args.extend(self.config.extra_args.iter().cloned());
        args
    }

    fn run(&self, args: &[String], input: &str) -> SolverResult<String> {
        let mut child = Command::new(&self.config.binary)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| SolverError::Spawn {
                binary: self.config.binary.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes())?;
        }
        let output = child.wait_with_output()?;
        let code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if code < 0 || code >= FIRST_ERROR_CODE {
            return Err(SolverError::Failed { code, stderr });
        }
        if !stderr.trim().is_empty() {
            debug!(stderr = %stderr.trim(), "clingo diagnostics");
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl SpecSolver for ClingoSolver {
    fn complete(&self, facts: &[Fact], num_models: usize) -> SolverResult<Vec<Model>> {
        let programs = self.program_files()?;
        let args = self.arguments(&programs, num_models);
        debug!(binary = %self.config.binary, ?args, facts = facts.len(), "Running solver");

        let start = Instant::now();
        let stdout = self.run(&args, &facts.join("\n"))?;
        let models = parse_output(&stdout, num_models)?;
        info!(
            models = models.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Solver completed specification"
        );
        Ok(models)
    }

    fn name(&self) -> &str {
        "clingo"
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ClingoOutput {
    #[serde(default)]
    result: String,
    #[serde(default)]
    call: Vec<ClingoCall>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ClingoCall {
    #[serde(default)]
    witnesses: Vec<Witness>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Witness {
    #[serde(default)]
    value: Vec<String>,
    #[serde(default)]
    costs: Vec<i64>,
}

/// Parses clingo's `--outf=2` JSON into at most `num_models` models, in
/// output order.
pub fn parse_output(stdout: &str, num_models: usize) -> SolverResult<Vec<Model>> {
    let output: ClingoOutput = serde_json::from_str(stdout)?;
    let models: Vec<Model> = output
        .call
        .into_iter()
        .flat_map(|call| call.witnesses)
        .take(num_models)
        .enumerate()
        .map(|(i, witness)| Model {
            cost: witness.costs.first().copied().unwrap_or(0),
            answer_set: witness.value,
            number: i + 1,
        })
        .collect();

    if models.is_empty() {
        warn!(result = %output.result, "Solver returned no models");
        return Err(SolverError::NoCompletion {
            result: output.result,
        });
    }
    Ok(models)
}

/// Writes the facts to a file, for inspecting a failing request by hand.
pub fn dump_facts(facts: &[Fact], path: &Path) -> SolverResult<()> {
    std::fs::write(path, facts.join("\n"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const OUTPUT: &str = r#"{
      "Solver": "clingo version 5.7.1",
      "Input": ["define.lp", "-"],
      "Call": [
        {
          "Witnesses": [
            {
              "Value": ["entity(view,root,v0)", "entity(mark,v0,m0)", "attribute((mark,type),m0,tick)"],
              "Costs": [7, 2]
            },
            {
              "Value": ["entity(view,root,v0)", "entity(mark,v0,m0)", "attribute((mark,type),m0,point)"],
              "Costs": [9, 0]
            }
          ]
        }
      ],
      "Result": "OPTIMUM FOUND",
      "Models": {"Number": 2, "More": "no", "Optimum": "yes"}
    }"#;

    #[test]
    fn test_parse_output_keeps_solver_order() {
        let models = parse_output(OUTPUT, 5).unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].cost, 7);
        assert_eq!(models[0].number, 1);
        assert_eq!(models[1].cost, 9);
        let spec = models[1].spec().unwrap();
        assert_eq!(spec["view"][0]["mark"][0]["type"], "point");
    }

    #[test]
    fn test_parse_output_truncates() {
        let models = parse_output(OUTPUT, 1).unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].cost, 7);
    }

    #[test]
    fn test_unsatisfiable_is_no_completion() {
        let out = r#"{"Call": [{}], "Result": "UNSATISFIABLE"}"#;
        match parse_output(out, 3) {
            Err(SolverError::NoCompletion { result }) => assert_eq!(result, "UNSATISFIABLE"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_missing_costs_default_to_zero() {
        let out = r#"{"Call": [{"Witnesses": [{"Value": ["a"]}]}], "Result": "SATISFIABLE"}"#;
        assert_eq!(parse_output(out, 1).unwrap()[0].cost, 0);
    }

    #[test]
    fn test_arguments() {
        let solver = ClingoSolver::new(SolverConfig {
            time_limit_seconds: Some(10),
            ..SolverConfig::default()
        });
        let args = solver.arguments(&[PathBuf::from("asp/define.lp")], 3);
        assert_eq!(
            args,
            vec![
                "asp/define.lp",
                "-",
                "--outf=2",
                "--opt-mode=optN",
                "--quiet=1",
                "--models=3",
                "--time-limit=10"
            ]
        );
    }

    #[test]
    fn test_program_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["soft.lp", "define.lp", "notes.txt"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        let solver = ClingoSolver::new(SolverConfig {
            program_dir: dir.path().to_path_buf(),
            ..SolverConfig::default()
        });
        let files = solver.program_files().unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["define.lp", "soft.lp"]);
    }

    #[test]
    fn test_missing_program_dir() {
        let solver = ClingoSolver::new(SolverConfig {
            program_dir: PathBuf::from("/nonexistent/asp"),
            ..SolverConfig::default()
        });
        assert!(matches!(
            solver.complete(&[], 1),
            Err(SolverError::ProgramNotFound { .. })
        ));
    }
}
