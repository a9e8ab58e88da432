//! Performance sampling jobs.
//!
//! One perf job measures a single (engine, primitive) combination under a
//! fixed worker count for a fixed iteration budget. Everything except the
//! engine call itself happens outside the timed region: payloads, the IV
//! and (for decrypt variants) ciphertexts are pre-computed at setup.

use crate::error::{HarnessError, Result};
use crate::job::{ExceptionSlot, JobClock, JobState, StateCell};
use crate::pool::WorkerPool;
use cipherbench_engine::{CryptoEngine, KeyHandle, Primitive};
use rand::{Rng, RngCore};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::info;

/// Hard ceiling applied when the configuration does not set one.
pub const DEFAULT_PERF_TIMEOUT: Duration = Duration::from_secs(300);

/// Configuration for one perf run.
#[derive(Debug, Clone)]
pub struct PerfConfig {
    pub primitive: Primitive,
    pub key_size: usize,
    pub min_payload: usize,
    pub max_payload: usize,
    pub threads: usize,
    pub iterations: u64,
    pub timeout: Duration,
}

impl PerfConfig {
    fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(HarnessError::InvalidConfig(
                "thread count must be at least 1".to_string(),
            ));
        }
        if self.iterations == 0 {
            return Err(HarnessError::InvalidConfig(
                "iteration count must be positive".to_string(),
            ));
        }
        if self.min_payload > self.max_payload {
            return Err(HarnessError::InvalidConfig(format!(
                "min payload {} exceeds max payload {}",
                self.min_payload, self.max_payload
            )));
        }
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.threads * self.iterations as usize
    }
}

struct SampleTable {
    starts: Vec<u64>,
    ends: Vec<u64>,
}

/// Live result of a perf run: a pre-sized table of (start, end)
/// timestamps in milliseconds plus a sticky error.
///
/// Slot reservation and the table write happen under one lock, so two
/// workers can never claim the same index and `completed` never exceeds
/// the table capacity.
pub struct PerfResult {
    total: usize,
    state: StateCell,
    error: ExceptionSlot,
    table: Mutex<SampleTable>,
}

impl PerfResult {
    fn new(total: usize) -> Self {
        Self {
            total,
            state: StateCell::new(),
            error: ExceptionSlot::new(),
            table: Mutex::new(SampleTable {
                starts: Vec::with_capacity(total),
                ends: Vec::with_capacity(total),
            }),
        }
    }

    fn record_sample(&self, start_ms: u64, end_ms: u64) {
        let mut table = self.table.lock().expect("sample table poisoned");
        if table.starts.len() < self.total {
            table.starts.push(start_ms);
            table.ends.push(end_ms);
        }
    }

    /// Table capacity (threads x iterations).
    pub fn total(&self) -> usize {
        self.total
    }

    /// Samples recorded so far. Never exceeds `total()`.
    pub fn completed(&self) -> usize {
        self.table.lock().expect("sample table poisoned").starts.len()
    }

    pub fn state(&self) -> JobState {
        self.state.get()
    }

    pub fn last_error(&self) -> Option<String> {
        self.error.get()
    }

    /// Paginated view for the reporting façade.
    pub fn page(&self, offset: usize, count: usize) -> PerfPage {
        let table = self.table.lock().expect("sample table poisoned");
        let completed = table.starts.len();
        let end = offset.saturating_add(count).min(completed);
        let samples = (offset.min(completed)..end)
            .map(|i| PerfSample {
                start_ms: table.starts[i],
                end_ms: table.ends[i],
            })
            .collect();
        PerfPage {
            total: self.total,
            completed,
            last_error: self.error.get_or_empty(),
            samples,
        }
    }

    /// Full copy of the completed samples, for statistics derivation.
    pub fn samples(&self) -> Vec<(u64, u64)> {
        let table = self.table.lock().expect("sample table poisoned");
        table
            .starts
            .iter()
            .copied()
            .zip(table.ends.iter().copied())
            .collect()
    }
}

/// One recorded operation.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerfSample {
    pub start_ms: u64,
    pub end_ms: u64,
}

/// Wire shape of a paginated perf result query.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerfPage {
    pub total: usize,
    pub completed: usize,
    pub last_error: String,
    pub samples: Vec<PerfSample>,
}

struct PerfShared {
    engine: Arc<dyn CryptoEngine>,
    config: PerfConfig,
    key: KeyHandle,
    iv: Vec<u8>,
    /// size -> operation input: plaintext, or a pre-computed ciphertext
    /// for decrypt variants so the timed path measures only the decrypt.
    inputs: HashMap<usize, Vec<u8>>,
    result: Arc<PerfResult>,
    clock: JobClock,
}

fn one_iteration(shared: &PerfShared) {
    let size = if shared.config.min_payload == shared.config.max_payload {
        shared.config.min_payload
    } else {
        rand::thread_rng().gen_range(shared.config.min_payload..=shared.config.max_payload)
    };
    let input = &shared.inputs[&size];

    let start = shared.clock.now_ms();
    let outcome = shared
        .engine
        .execute(shared.config.primitive, &shared.key, input, &shared.iv);
    let end = shared.clock.now_ms();

    match outcome {
        Ok(_) => shared.result.record_sample(start, end),
        // The iteration is abandoned; sibling workers continue.
        Err(e) => shared.result.error.record(&e),
    }
}

/// A configured perf job, ready to run.
pub struct PerfJob {
    shared: Arc<PerfShared>,
}

impl std::fmt::Debug for PerfJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerfJob").finish_non_exhaustive()
    }
}

impl PerfJob {
    /// Resolve the key and pre-compute all operation inputs. Every
    /// configuration or setup failure surfaces here, before any worker
    /// starts or any timestamp is taken.
    pub fn new(engine: Arc<dyn CryptoEngine>, config: PerfConfig) -> Result<Self> {
        config.validate()?;

        let key = engine.generate_key(config.primitive, config.key_size)?;

        let mut iv = vec![0u8; config.primitive.iv_len()];
        rand::thread_rng().fill_bytes(&mut iv);

        let mut inputs = HashMap::new();
        for size in config.min_payload..=config.max_payload {
            let mut plaintext = vec![0u8; size];
            rand::thread_rng().fill_bytes(&mut plaintext);
            let input = match config.primitive.encrypt_counterpart() {
                Some(enc) => engine.execute(enc, &key, &plaintext, &iv)?,
                None => plaintext,
            };
            inputs.insert(size, input);
        }

        let result = Arc::new(PerfResult::new(config.capacity()));
        Ok(Self {
            shared: Arc::new(PerfShared {
                engine,
                config,
                key,
                iv,
                inputs,
                result,
                clock: JobClock::new(),
            }),
        })
    }

    /// Live result handle, pollable while the job runs.
    pub fn result(&self) -> Arc<PerfResult> {
        Arc::clone(&self.shared.result)
    }

    /// Run to completion (or the timeout ceiling) on the calling thread.
    pub fn run(self) {
        let shared = self.shared;
        let result = Arc::clone(&shared.result);
        result.state.set(JobState::Running);

        let pool = match WorkerPool::new("perf", shared.config.threads) {
            Ok(pool) => pool,
            Err(e) => {
                result.error.record(&e);
                result.state.set(JobState::Failed);
                return;
            }
        };

        let mut dispatch_failed = false;
        for _ in 0..shared.config.threads {
            let shared = Arc::clone(&shared);
            if let Err(e) = pool.submit(move || {
                for _ in 0..shared.config.iterations {
                    one_iteration(&shared);
                }
            }) {
                result.error.record(&e);
                dispatch_failed = true;
                break;
            }
        }

        let timeout = shared.config.timeout;
        let drained = pool.join_timeout(timeout);
        if !drained {
            let message = format!(
                "perf job timed out after {}s with {}/{} samples",
                timeout.as_secs(),
                result.completed(),
                result.total()
            );
            result.error.record(&message);
            result.state.set(JobState::Failed);
        } else if dispatch_failed {
            result.state.set(JobState::Failed);
        } else {
            result.state.set(JobState::Completed);
        }

        info!(
            engine = shared.engine.name(),
            primitive = %shared.config.primitive,
            threads = shared.config.threads,
            completed = result.completed(),
            total = result.total(),
            state = ?result.state(),
            "perf job finished"
        );
    }

    /// Run on a background thread, returning control to the caller
    /// immediately (the façade polls the result by job id).
    pub fn spawn(self) -> Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name("perf-job".to_string())
            .spawn(move || self.run())
            .map_err(|e| HarnessError::Scheduling(format!("spawn failed: {e}")))
    }
}

/// Result of one rung of a thread-count sweep.
pub struct SweepRun {
    pub threads: usize,
    pub result: Arc<PerfResult>,
}

/// Repeat the measurement at thread counts `1..=max_threads` to
/// characterize throughput scaling. Runs sequentially so rungs do not
/// contend with each other.
pub fn run_thread_sweep(
    engine: &Arc<dyn CryptoEngine>,
    config: &PerfConfig,
    max_threads: usize,
) -> Result<Vec<SweepRun>> {
    if max_threads == 0 {
        return Err(HarnessError::InvalidConfig(
            "sweep needs at least one thread count".to_string(),
        ));
    }
    let mut runs = Vec::with_capacity(max_threads);
    for threads in 1..=max_threads {
        let rung_config = PerfConfig {
            threads,
            ..config.clone()
        };
        let job = PerfJob::new(Arc::clone(engine), rung_config)?;
        let result = job.result();
        job.run();
        runs.push(SweepRun { threads, result });
    }
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cipherbench_engine::{EngineError, KeyMaterial, SoftwareEngine};

    fn aes_perf(threads: usize, iterations: u64) -> PerfConfig {
        PerfConfig {
            primitive: Primitive::AesCbcEnc,
            key_size: 128,
            min_payload: 16,
            max_payload: 64,
            threads,
            iterations,
            timeout: DEFAULT_PERF_TIMEOUT,
        }
    }

    fn soft_engine() -> Arc<dyn CryptoEngine> {
        Arc::new(SoftwareEngine::new("soft", true))
    }

    #[test]
    fn test_single_thread_hundred_iterations() {
        let job = PerfJob::new(soft_engine(), aes_perf(1, 100)).unwrap();
        let result = job.result();
        job.run();

        assert_eq!(result.completed(), 100);
        assert_eq!(result.total(), 100);
        assert_eq!(result.state(), JobState::Completed);
        assert_eq!(result.last_error(), None);
        for (start, end) in result.samples() {
            assert!(end >= start);
        }
    }

    #[test]
    fn test_multi_thread_fills_table_exactly() {
        let job = PerfJob::new(soft_engine(), aes_perf(4, 50)).unwrap();
        let result = job.result();
        job.run();

        assert_eq!(result.total(), 200);
        assert_eq!(result.completed(), 200);
        assert_eq!(result.samples().len(), 200);
    }

    #[test]
    fn test_decrypt_variant_precomputes_ciphertext() {
        let config = PerfConfig {
            primitive: Primitive::AesCbcDec,
            ..aes_perf(2, 20)
        };
        let job = PerfJob::new(soft_engine(), config).unwrap();
        let result = job.result();
        job.run();

        // Decrypting the pre-computed ciphertexts must never fail.
        assert_eq!(result.completed(), 40);
        assert_eq!(result.last_error(), None);
    }

    #[test]
    fn test_per_operation_error_is_sticky_not_fatal() {
        // 300-byte payloads do not fit RSA-1024 OAEP: every operation
        // fails, the job still completes with zero samples.
        let config = PerfConfig {
            primitive: Primitive::RsaEnc,
            key_size: 1024,
            min_payload: 300,
            max_payload: 300,
            threads: 2,
            iterations: 5,
            timeout: DEFAULT_PERF_TIMEOUT,
        };
        let job = PerfJob::new(soft_engine(), config).unwrap();
        let result = job.result();
        job.run();

        assert_eq!(result.completed(), 0);
        assert!(result.last_error().is_some());
        assert_eq!(result.state(), JobState::Completed);
    }

    #[test]
    fn test_pagination() {
        let job = PerfJob::new(soft_engine(), aes_perf(1, 30)).unwrap();
        let result = job.result();
        job.run();

        let page = result.page(0, 10);
        assert_eq!(page.samples.len(), 10);
        assert_eq!(page.total, 30);
        assert_eq!(page.completed, 30);

        let tail = result.page(25, 10);
        assert_eq!(tail.samples.len(), 5);

        let past_end = result.page(100, 10);
        assert!(past_end.samples.is_empty());
    }

    #[test]
    fn test_page_wire_shape() {
        let job = PerfJob::new(soft_engine(), aes_perf(1, 2)).unwrap();
        let result = job.result();
        job.run();

        let json = serde_json::to_value(result.page(0, 1)).unwrap();
        assert_eq!(json["total"], 2);
        assert_eq!(json["completed"], 2);
        assert_eq!(json["lastError"], "");
        assert!(json["samples"][0]["startMs"].is_u64());
        assert!(json["samples"][0]["endMs"].is_u64());
    }

    #[test]
    fn test_unsupported_primitive_fails_at_setup() {
        let engine: Arc<dyn CryptoEngine> =
            Arc::new(cipherbench_engine::RingEngine::new("ring", false));
        let err = PerfJob::new(engine, aes_perf(1, 10)).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::Engine(EngineError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_sweep_produces_one_result_per_thread_count() {
        let engine = soft_engine();
        let runs = run_thread_sweep(&engine, &aes_perf(1, 10), 3).unwrap();
        assert_eq!(runs.len(), 3);
        for (i, run) in runs.iter().enumerate() {
            assert_eq!(run.threads, i + 1);
            assert_eq!(run.result.total(), (i + 1) * 10);
            assert_eq!(run.result.completed(), run.result.total());
        }
    }

    /// Engine wrapper that stalls every operation, for timeout testing.
    struct SlowEngine {
        inner: SoftwareEngine,
        delay: Duration,
    }

    impl CryptoEngine for SlowEngine {
        fn name(&self) -> &str {
            self.inner.name()
        }
        fn allows_export(&self) -> bool {
            self.inner.allows_export()
        }
        fn generate_key(
            &self,
            primitive: Primitive,
            key_size: usize,
        ) -> cipherbench_engine::Result<KeyHandle> {
            self.inner.generate_key(primitive, key_size)
        }
        fn export_key(&self, handle: &KeyHandle) -> cipherbench_engine::Result<KeyMaterial> {
            self.inner.export_key(handle)
        }
        fn import_key(
            &self,
            primitive: Primitive,
            material: &KeyMaterial,
        ) -> cipherbench_engine::Result<KeyHandle> {
            self.inner.import_key(primitive, material)
        }
        fn execute(
            &self,
            primitive: Primitive,
            key: &KeyHandle,
            buffer: &[u8],
            iv: &[u8],
        ) -> cipherbench_engine::Result<Vec<u8>> {
            thread::sleep(self.delay);
            self.inner.execute(primitive, key, buffer, iv)
        }
    }

    #[test]
    fn test_timeout_marks_failed_but_keeps_samples() {
        let engine: Arc<dyn CryptoEngine> = Arc::new(SlowEngine {
            inner: SoftwareEngine::new("slow", true),
            delay: Duration::from_millis(40),
        });
        let config = PerfConfig {
            timeout: Duration::from_millis(200),
            ..aes_perf(1, 1000)
        };
        let job = PerfJob::new(engine, config).unwrap();
        let result = job.result();
        job.run();

        assert_eq!(result.state(), JobState::Failed);
        let completed = result.completed();
        assert!(completed < result.total());
        assert!(result.last_error().unwrap().contains("timed out"));
        // Collected samples stay valid and queryable.
        let page = result.page(0, completed);
        assert_eq!(page.samples.len(), completed);
    }
}
