//! Job harness for cross-engine correctness and performance testing.
//!
//! Two job kinds run against a configured set of [`CryptoEngine`]
//! implementations:
//!
//! - correctness jobs share one key across the engine set and verify
//!   that every (encrypting, decrypting) engine pair round-trips, or
//!   that every engine derives identical output;
//! - perf jobs hammer one (engine, primitive) combination with a fixed
//!   worker count and record per-operation timestamps.
//!
//! The [`store::ResultStore`] is the submission façade: it issues job
//! ids, runs jobs on background threads and retains the most recent
//! results for polling.

pub mod config;
pub mod correctness;
pub mod error;
pub mod job;
pub mod perf;
pub mod pool;
pub mod report;
pub mod stats;
pub mod store;

pub use cipherbench_engine::CryptoEngine;
pub use config::{CorrectnessPlan, PerfPlan, PerfTest, TestPlan};
pub use correctness::{
    CorrectnessConfig, CorrectnessJob, CorrectnessReport, CorrectnessTest, PairReport,
};
pub use error::{HarnessError, Result};
pub use job::{JobState, StopSignal};
pub use perf::{run_thread_sweep, PerfConfig, PerfJob, PerfPage, SweepRun, DEFAULT_PERF_TIMEOUT};
pub use report::ReportWriter;
pub use stats::{throughput_buckets, LatencySummary, ThroughputBucket};
pub use store::{Catalog, JobSubmission, ResultStore, DEFAULT_RETENTION};
