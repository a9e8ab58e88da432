//! Test plan file: which engines to build and which jobs to run.
//!
//! ```toml
//! retention = 5
//! report_dir = "reports"
//!
//! [[engines]]
//! name = "soft-a"
//! backend = "rustcrypto"
//! allows_export = true
//!
//! [correctness]
//! threads = 4
//! iterations = 10          # omit for soak mode
//! sleep_ms = 0
//!
//! [[correctness.tests]]
//! primitive = "aes-cbc-enc"
//! key_size = 128
//! min_payload = 1
//! max_payload = 1024
//!
//! [perf]
//! max_threads = 4
//! iterations = 1000
//! timeout_secs = 300
//!
//! [[perf.tests]]
//! primitive = "hkdf"
//! key_size = 256
//! min_payload = 32
//! max_payload = 32
//! ```

use crate::correctness::{CorrectnessConfig, CorrectnessTest};
use crate::error::Result;
use crate::perf::PerfConfig;
use crate::store::DEFAULT_RETENTION;
use cipherbench_engine::{EngineConfig, Primitive};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_retention() -> usize {
    DEFAULT_RETENTION
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_timeout_secs() -> u64 {
    300
}

/// Root of the test plan file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestPlan {
    #[serde(default = "default_retention")]
    pub retention: usize,
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,
    pub engines: Vec<EngineConfig>,
    pub correctness: Option<CorrectnessPlan>,
    pub perf: Option<PerfPlan>,
}

impl TestPlan {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let plan: TestPlan = toml::from_str(&raw)?;
        Ok(plan)
    }
}

/// Correctness suite section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CorrectnessPlan {
    pub threads: usize,
    /// Omitted means soak mode: sweep until stopped.
    pub iterations: Option<u64>,
    #[serde(default)]
    pub sleep_ms: u64,
    pub tests: Vec<CorrectnessTest>,
}

impl CorrectnessPlan {
    pub fn to_config(&self) -> CorrectnessConfig {
        CorrectnessConfig {
            threads: self.threads,
            iterations: self.iterations,
            sleep: Duration::from_millis(self.sleep_ms),
            tests: self.tests.clone(),
        }
    }
}

/// One perf measurement target.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PerfTest {
    pub primitive: Primitive,
    pub key_size: usize,
    pub min_payload: usize,
    pub max_payload: usize,
}

/// Perf suite section. Each test is swept over thread counts
/// `1..=max_threads` on every configured engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PerfPlan {
    pub max_threads: usize,
    pub iterations: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    pub tests: Vec<PerfTest>,
}

impl PerfPlan {
    /// Per-rung config for one test at one thread count.
    pub fn to_config(&self, test: &PerfTest, threads: usize) -> PerfConfig {
        PerfConfig {
            primitive: test.primitive,
            key_size: test.key_size,
            min_payload: test.min_payload,
            max_payload: test.max_payload,
            threads,
            iterations: self.iterations,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}
