//! Job submission façade and bounded result retention.
//!
//! The store owns the engine set, hands out monotonically increasing job
//! ids and keeps the results of the most recent jobs. Submission is
//! asynchronous: the job runs on a background thread and callers poll
//! results by id. A job that fails setup gets no id and leaves no entry.

use crate::correctness::{CorrectnessConfig, CorrectnessJob, CorrectnessReport, CorrectnessResult};
use crate::error::{HarnessError, Result};
use crate::job::StopSignal;
use crate::perf::{PerfConfig, PerfJob, PerfPage, PerfResult};
use cipherbench_engine::{CryptoEngine, Primitive};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Results kept per store before the oldest is evicted.
pub const DEFAULT_RETENTION: usize = 5;

enum JobRecord {
    Correctness {
        result: Arc<CorrectnessResult>,
        stop: Arc<StopSignal>,
    },
    Perf {
        result: Arc<PerfResult>,
    },
}

/// Acknowledgement returned on successful submission.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSubmission {
    pub job_id: u64,
    pub summary: String,
}

/// Entry in the engine catalog.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineInfo {
    pub name: String,
    pub allows_export: bool,
}

/// Entry in the primitive catalog.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrimitiveInfo {
    pub id: &'static str,
    pub display_name: &'static str,
}

/// What this harness instance can test, for clients building requests.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    pub primitives: Vec<PrimitiveInfo>,
    pub engines: Vec<EngineInfo>,
}

/// Owns the engine set and the retained job results.
pub struct ResultStore {
    engines: Vec<Arc<dyn CryptoEngine>>,
    retention: usize,
    next_id: AtomicU64,
    jobs: Mutex<std::collections::BTreeMap<u64, JobRecord>>,
}

impl ResultStore {
    pub fn new(engines: Vec<Arc<dyn CryptoEngine>>, retention: usize) -> Result<Self> {
        if retention == 0 {
            return Err(HarnessError::InvalidConfig(
                "retention must keep at least one job".to_string(),
            ));
        }
        Ok(Self {
            engines,
            retention,
            next_id: AtomicU64::new(1),
            jobs: Mutex::new(std::collections::BTreeMap::new()),
        })
    }

    pub fn with_default_retention(engines: Vec<Arc<dyn CryptoEngine>>) -> Result<Self> {
        Self::new(engines, DEFAULT_RETENTION)
    }

    pub fn engines(&self) -> &[Arc<dyn CryptoEngine>] {
        &self.engines
    }

    fn engine_by_name(&self, name: &str) -> Result<Arc<dyn CryptoEngine>> {
        self.engines
            .iter()
            .find(|e| e.name() == name)
            .cloned()
            .ok_or_else(|| HarnessError::UnknownEngine(name.to_string()))
    }

    /// Insert a record under a fresh id, evicting the oldest entries
    /// past the retention limit. Ids are only issued here, so a job
    /// rejected at setup never consumes one.
    fn insert(&self, record: JobRecord) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut jobs = self.jobs.lock().expect("job map poisoned");
        jobs.insert(id, record);
        while jobs.len() > self.retention {
            if let Some((&oldest, _)) = jobs.first_key_value() {
                // A still-running soak job must not keep sweeping after
                // its results become unreachable.
                if let Some(JobRecord::Correctness { stop, .. }) = jobs.remove(&oldest) {
                    stop.trigger();
                }
                warn!(job_id = oldest, "evicted oldest job result");
            }
        }
        id
    }

    /// Validate, start and register a correctness job. Setup errors are
    /// returned to the caller and nothing is registered.
    pub fn submit_correctness(&self, config: CorrectnessConfig) -> Result<JobSubmission> {
        let summary = format!(
            "correctness: {} tests, {} threads, {}",
            config.tests.len(),
            config.threads,
            match config.iterations {
                Some(n) => format!("{n} iterations"),
                None => "soak".to_string(),
            }
        );
        let job = CorrectnessJob::new(config, &self.engines)?;
        let result = job.result();
        let stop = job.stop_signal();
        job.spawn()?;
        let job_id = self.insert(JobRecord::Correctness { result, stop });
        info!(job_id, %summary, "correctness job submitted");
        Ok(JobSubmission { job_id, summary })
    }

    /// Validate, start and register a perf job against one engine.
    pub fn submit_perf(&self, engine_name: &str, config: PerfConfig) -> Result<JobSubmission> {
        let engine = self.engine_by_name(engine_name)?;
        let summary = format!(
            "perf: {} {} key_size={} {} threads x {} iterations",
            engine_name, config.primitive, config.key_size, config.threads, config.iterations
        );
        let job = PerfJob::new(engine, config)?;
        let result = job.result();
        job.spawn()?;
        let job_id = self.insert(JobRecord::Perf { result });
        info!(job_id, %summary, "perf job submitted");
        Ok(JobSubmission { job_id, summary })
    }

    /// Point-in-time correctness report for a retained job.
    pub fn correctness_report(&self, job_id: u64) -> Result<CorrectnessReport> {
        let jobs = self.jobs.lock().expect("job map poisoned");
        match jobs.get(&job_id) {
            Some(JobRecord::Correctness { result, .. }) => Ok(result.snapshot()),
            Some(JobRecord::Perf { .. }) => Err(HarnessError::WrongJobKind {
                id: job_id,
                expected: "correctness",
            }),
            None => Err(HarnessError::UnknownJob(job_id)),
        }
    }

    /// Paginated perf samples for a retained job.
    pub fn perf_page(&self, job_id: u64, offset: usize, count: usize) -> Result<PerfPage> {
        let jobs = self.jobs.lock().expect("job map poisoned");
        match jobs.get(&job_id) {
            Some(JobRecord::Perf { result }) => Ok(result.page(offset, count)),
            Some(JobRecord::Correctness { .. }) => Err(HarnessError::WrongJobKind {
                id: job_id,
                expected: "perf",
            }),
            None => Err(HarnessError::UnknownJob(job_id)),
        }
    }

    /// Full perf result handle, for statistics and report files.
    pub fn perf_result(&self, job_id: u64) -> Result<Arc<PerfResult>> {
        let jobs = self.jobs.lock().expect("job map poisoned");
        match jobs.get(&job_id) {
            Some(JobRecord::Perf { result }) => Ok(Arc::clone(result)),
            Some(JobRecord::Correctness { .. }) => Err(HarnessError::WrongJobKind {
                id: job_id,
                expected: "perf",
            }),
            None => Err(HarnessError::UnknownJob(job_id)),
        }
    }

    /// Signal a soak correctness job to stop after its current sweep.
    pub fn stop_job(&self, job_id: u64) -> Result<()> {
        let jobs = self.jobs.lock().expect("job map poisoned");
        match jobs.get(&job_id) {
            Some(JobRecord::Correctness { stop, .. }) => {
                stop.trigger();
                info!(job_id, "stop requested");
                Ok(())
            }
            Some(JobRecord::Perf { .. }) => Err(HarnessError::WrongJobKind {
                id: job_id,
                expected: "correctness",
            }),
            None => Err(HarnessError::UnknownJob(job_id)),
        }
    }

    /// Primitive and engine catalog for clients building requests.
    pub fn catalog(&self) -> Catalog {
        Catalog {
            primitives: Primitive::ALL
                .iter()
                .map(|p| PrimitiveInfo {
                    id: p.id(),
                    display_name: p.display_name(),
                })
                .collect(),
            engines: self
                .engines
                .iter()
                .map(|e| EngineInfo {
                    name: e.name().to_string(),
                    allows_export: e.allows_export(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correctness::CorrectnessTest;
    use crate::job::JobState;
    use crate::perf::DEFAULT_PERF_TIMEOUT;
    use cipherbench_engine::SoftwareEngine;
    use std::thread;
    use std::time::{Duration, Instant};

    fn store() -> ResultStore {
        let engines: Vec<Arc<dyn CryptoEngine>> = vec![
            Arc::new(SoftwareEngine::new("a", true)),
            Arc::new(SoftwareEngine::new("b", false)),
        ];
        ResultStore::with_default_retention(engines).unwrap()
    }

    fn quick_perf() -> PerfConfig {
        PerfConfig {
            primitive: Primitive::AesCbcEnc,
            key_size: 128,
            min_payload: 16,
            max_payload: 16,
            threads: 1,
            iterations: 5,
            timeout: DEFAULT_PERF_TIMEOUT,
        }
    }

    fn quick_correctness() -> CorrectnessConfig {
        CorrectnessConfig {
            threads: 1,
            iterations: Some(2),
            sleep: Duration::ZERO,
            tests: vec![CorrectnessTest {
                primitive: Primitive::AesCbcEnc,
                key_size: 128,
                min_payload: 16,
                max_payload: 16,
            }],
        }
    }

    fn wait_done(check: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !check() {
            assert!(Instant::now() < deadline, "job did not finish in time");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_ids_are_monotonic_from_one() {
        let store = store();
        let first = store.submit_perf("a", quick_perf()).unwrap();
        let second = store.submit_correctness(quick_correctness()).unwrap();
        assert_eq!(first.job_id, 1);
        assert_eq!(second.job_id, 2);
    }

    #[test]
    fn test_correctness_submission_and_report() {
        let store = store();
        let ack = store.submit_correctness(quick_correctness()).unwrap();
        wait_done(|| {
            store.correctness_report(ack.job_id).unwrap().state == JobState::Completed
        });

        let report = store.correctness_report(ack.job_id).unwrap();
        assert_eq!(report.completed, 2);
        assert_eq!(report.results.len(), 4);
    }

    #[test]
    fn test_perf_submission_and_pagination() {
        let store = store();
        let ack = store.submit_perf("a", quick_perf()).unwrap();
        wait_done(|| store.perf_page(ack.job_id, 0, 0).unwrap().completed == 5);

        let page = store.perf_page(ack.job_id, 2, 10).unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.samples.len(), 3);
    }

    #[test]
    fn test_rejected_job_leaves_no_entry() {
        let store = store();
        let bad = CorrectnessConfig {
            threads: 0,
            ..quick_correctness()
        };
        assert!(store.submit_correctness(bad).is_err());

        // The failed submission consumed no id and stored nothing.
        let ack = store.submit_perf("a", quick_perf()).unwrap();
        assert_eq!(ack.job_id, 1);
        assert!(matches!(
            store.correctness_report(99),
            Err(HarnessError::UnknownJob(99))
        ));
    }

    #[test]
    fn test_unknown_engine_rejected() {
        let store = store();
        assert!(matches!(
            store.submit_perf("hsm", quick_perf()),
            Err(HarnessError::UnknownEngine(_))
        ));
    }

    #[test]
    fn test_retention_evicts_oldest() {
        let store = store();
        let mut ids = Vec::new();
        for _ in 0..7 {
            ids.push(store.submit_perf("a", quick_perf()).unwrap().job_id);
        }

        // Only the newest five survive.
        assert!(matches!(
            store.perf_page(ids[0], 0, 1),
            Err(HarnessError::UnknownJob(_))
        ));
        assert!(matches!(
            store.perf_page(ids[1], 0, 1),
            Err(HarnessError::UnknownJob(_))
        ));
        for &id in &ids[2..] {
            assert!(store.perf_page(id, 0, 1).is_ok());
        }
    }

    #[test]
    fn test_stop_requires_correctness_job() {
        let store = store();
        let perf = store.submit_perf("a", quick_perf()).unwrap();
        assert!(matches!(
            store.stop_job(perf.job_id),
            Err(HarnessError::WrongJobKind { .. })
        ));

        let soak = store
            .submit_correctness(CorrectnessConfig {
                iterations: None,
                sleep: Duration::from_millis(5),
                ..quick_correctness()
            })
            .unwrap();
        store.stop_job(soak.job_id).unwrap();
        wait_done(|| {
            store.correctness_report(soak.job_id).unwrap().state == JobState::Completed
        });
    }

    #[test]
    fn test_catalog_lists_engines_and_primitives() {
        let catalog = store().catalog();
        assert_eq!(catalog.primitives.len(), Primitive::ALL.len());
        assert_eq!(catalog.engines.len(), 2);
        assert!(catalog.engines[0].allows_export);
        assert!(!catalog.engines[1].allows_export);
    }
}
