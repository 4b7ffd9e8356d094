//! Benchmark reports.
//!
//! In benchmark mode every rank appends one JSON line per timed section to
//! `<install root>/bench-raw/rank-<r>.jsonl`:
//!
//! ```json
//! {"file": "pkg.tests.test_fft.test_forward", "variant": "test_forward[64]",
//!  "tag": "fft", "rank": 0, "elapsed": 0.0123, "attrs": {"n": 64}}
//! ```
//!
//! After the run these are merged into one report per test function,
//! written to `<bench dir>/<file>.json`:
//!
//! ```json
//! {
//!   "config": {"source_version": "0.3.1", "git_hash": "a1b2c3d", "host": "...",
//!              "system": "Linux", "python_version": "3.11.4",
//!              "datetime": "2024-05-01 12:00:00", "commsize": 4},
//!   "tests": ["test_forward_0", "test_forward_1"],
//!   "tags": ["fft"],
//!   "test_forward_0": {"fft": [0.0123, 0.0119, 0.0125, 0.0121],
//!                      "testname": "test_forward[64]", "attrs": {"n": 64}},
//!   ...
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::process::{Command, Output, ProcessRunner};

/// Errors while collecting or writing benchmark results.
#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}:{line}: invalid benchmark record: {source}", .path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize benchmark report: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One timed section on one rank.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RawRecord {
    /// Output file stem: module plus the test function name.
    pub file: String,
    /// Test id including parametrization.
    pub variant: String,
    pub tag: String,
    pub rank: usize,
    pub elapsed: f64,
    #[serde(default)]
    pub attrs: Map<String, Value>,
}

/// Reads every `*.jsonl` file in `dir`, in file name order.
pub fn read_raw(dir: &Path) -> Result<Vec<RawRecord>, BenchError> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|source| BenchError::Io {
            path: dir.to_path_buf(),
            source,
        })?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
        .collect();
    files.sort();

    let mut records = Vec::new();
    for path in files {
        let content = std::fs::read_to_string(&path).map_err(|source| BenchError::Io {
            path: path.clone(),
            source,
        })?;
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(line).map_err(|source| BenchError::Parse {
                path: path.clone(),
                line: idx + 1,
                source,
            })?;
            records.push(record);
        }
    }
    Ok(records)
}

/// Run-wide metadata stored under `config` in every report.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BenchHeader {
    pub source_version: Option<String>,
    pub git_hash: Option<String>,
    pub host: Option<String>,
    pub system: Option<String>,
    pub python_version: Option<String>,
    pub datetime: String,
    pub commsize: usize,
}

const MACHINE_INFO: &str = "import json, platform
print(json.dumps({'host': platform.node(), 'system': platform.system(),
                  'python_version': '.'.join(platform.python_version_tuple())}))";

#[derive(Deserialize)]
struct MachineInfo {
    host: Option<String>,
    system: Option<String>,
    python_version: Option<String>,
}

impl BenchHeader {
    /// Gathers version, git and machine information. Every probe is best
    /// effort; a failing one leaves its field `null`.
    pub async fn gather<R: ProcessRunner>(
        runner: &R,
        python: &str,
        root: &Path,
        commsize: usize,
    ) -> Self {
        let source_version = capture_last_line(
            runner,
            Command::new(python)
                .args(["setup.py", "--version"])
                .working_dir(root),
        )
        .await;

        let git_hash = capture_last_line(
            runner,
            Command::new("git")
                .args(["rev-parse", "--short", "HEAD"])
                .working_dir(root),
        )
        .await;

        let machine = capture_last_line(runner, Command::new(python).args(["-c", MACHINE_INFO]))
            .await
            .and_then(|line| serde_json::from_str::<MachineInfo>(&line).ok());

        let (host, system, python_version) = match machine {
            Some(m) => (m.host, m.system, m.python_version),
            None => (None, None, None),
        };

        Self {
            source_version,
            git_hash,
            host,
            system,
            python_version,
            datetime: chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            commsize,
        }
    }
}

async fn capture_last_line<R: ProcessRunner>(runner: &R, cmd: Command) -> Option<String> {
    match runner.run(&cmd, &Output::Capture).await {
        Ok(result) if result.success() => result
            .stdout
            .lines()
            .map(str::trim)
            .rfind(|l| !l.is_empty())
            .map(str::to_string),
        Ok(result) => {
            debug!("'{}' exited with {}", cmd.to_shell_string(), result.exit_code);
            None
        }
        Err(e) => {
            debug!("{}", e);
            None
        }
    }
}

/// One parametrized variant of a test function.
#[derive(Debug, Clone, PartialEq)]
struct VariantReport {
    testname: String,
    /// Per tag, one value per reporting rank, in rank order.
    values: BTreeMap<String, Vec<(usize, f64)>>,
    attrs: Map<String, Value>,
}

/// Merged benchmark results, one entry per output file.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkReport {
    header: BenchHeader,
    /// Output file stem to variants in first-seen order.
    files: BTreeMap<String, Vec<VariantReport>>,
}

impl BenchmarkReport {
    /// Groups raw records by output file, variant and tag.
    pub fn collect(header: BenchHeader, records: Vec<RawRecord>) -> Self {
        let mut files: BTreeMap<String, Vec<VariantReport>> = BTreeMap::new();

        for record in records {
            let variants = files.entry(record.file).or_default();
            let idx = match variants.iter().position(|v| v.testname == record.variant) {
                Some(idx) => idx,
                None => {
                    variants.push(VariantReport {
                        testname: record.variant,
                        values: BTreeMap::new(),
                        attrs: Map::new(),
                    });
                    variants.len() - 1
                }
            };

            let variant = &mut variants[idx];
            variant
                .values
                .entry(record.tag)
                .or_default()
                .push((record.rank, record.elapsed));
            if record.rank == 0 || variant.attrs.is_empty() {
                variant.attrs.extend(record.attrs);
            }
        }

        for variants in files.values_mut() {
            for variant in variants.iter_mut() {
                for values in variant.values.values_mut() {
                    values.sort_by_key(|(rank, _)| *rank);
                }
            }
        }

        Self { header, files }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Output file stems, sorted.
    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// The JSON document for one output file.
    pub fn to_json(&self, file: &str) -> Option<Value> {
        let variants = self.files.get(file)?;
        let function = file.rsplit('.').next().unwrap_or(file);

        let mut doc = Map::new();
        doc.insert("config".into(), json!(self.header));

        let mut tests = Vec::new();
        let mut first_tags: Option<Vec<String>> = None;
        for (i, variant) in variants.iter().enumerate() {
            let key = format!("{}_{}", function, i);

            let mut entry = Map::new();
            for (tag, values) in &variant.values {
                let values: Vec<f64> = values.iter().map(|(_, v)| *v).collect();
                entry.insert(tag.clone(), json!(values));
            }
            entry.insert("testname".into(), json!(variant.testname));
            entry.insert("attrs".into(), Value::Object(variant.attrs.clone()));

            first_tags.get_or_insert_with(|| variant.values.keys().cloned().collect());
            tests.push(key.clone());
            doc.insert(key, Value::Object(entry));
        }

        doc.insert("tests".into(), json!(tests));
        doc.insert("tags".into(), json!(first_tags.unwrap_or_default()));
        Some(Value::Object(doc))
    }

    /// Writes `<dir>/<file>.json` for every output file.
    pub fn write(&self, dir: &Path) -> Result<Vec<PathBuf>, BenchError> {
        std::fs::create_dir_all(dir).map_err(|source| BenchError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut written = Vec::new();
        for file in self.files() {
            let Some(doc) = self.to_json(file) else {
                warn!("No benchmark results for {}", file);
                continue;
            };
            let path = dir.join(format!("{}.json", file));
            let content = serde_json::to_string(&doc)?;
            std::fs::write(&path, content).map_err(|source| BenchError::Io {
                path: path.clone(),
                source,
            })?;
            written.push(path);
        }
        Ok(written)
    }
}
