//! Error types for the job harness.

use cipherbench_engine::EngineError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, HarnessError>;

/// Errors surfaced by job setup and scheduling.
///
/// Worker-time failures never appear here: they are translated into
/// result mutations (pair tallies, sticky exceptions) instead of being
/// propagated to the submitter.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The correctness matrix needs at least one engine that can export
    /// raw key material so a single key can be shared across the set.
    #[error("no engine in the set allows key export")]
    NoExportingEngine,

    /// A job configuration failed validation before any worker started.
    #[error("invalid job configuration: {0}")]
    InvalidConfig(String),

    /// A job submission referenced an engine name that is not configured.
    #[error("unknown engine: {0}")]
    UnknownEngine(String),

    /// A result query referenced a job id that was never issued or has
    /// been evicted by the retention policy.
    #[error("unknown job id: {0}")]
    UnknownJob(u64),

    /// A result query used the wrong accessor for the job's kind.
    #[error("job {id} is not a {expected} job")]
    WrongJobKind { id: u64, expected: &'static str },

    /// The worker pool could not be built or fed.
    #[error("worker scheduling failed: {0}")]
    Scheduling(String),

    /// A setup-time engine failure (key generation, import).
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Report file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The test plan file could not be parsed.
    #[error("test plan parse error: {0}")]
    PlanParse(#[from] toml::de::Error),
}
