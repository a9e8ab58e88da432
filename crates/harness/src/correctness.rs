//! Cross-engine correctness matrix.
//!
//! For every configured test the harness shares one key across the
//! engine set, then repeatedly checks that every (encrypting-engine,
//! decrypting-engine) pair round-trips a random payload, or that every
//! engine derives identical output for derivation primitives. A failing
//! pair records a fail tally and never aborts the rest of the sweep.

use crate::error::{HarnessError, Result};
use crate::job::{ExceptionSlot, JobState, StateCell, StopSignal};
use crate::pool::WorkerPool;
use cipherbench_engine::{CryptoEngine, EngineError, KeyHandle, Primitive};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// One correctness test: a primitive suite, key size and payload range.
///
/// `primitive` names the encrypting variant (or the derivation); the
/// decrypting role is derived from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectnessTest {
    pub primitive: Primitive,
    pub key_size: usize,
    pub min_payload: usize,
    pub max_payload: usize,
}

/// Configuration for a correctness job.
///
/// `iterations: None` makes this a soak job: workers sweep until the
/// stop signal fires or the process shuts down.
#[derive(Debug, Clone)]
pub struct CorrectnessConfig {
    pub threads: usize,
    pub iterations: Option<u64>,
    pub sleep: Duration,
    pub tests: Vec<CorrectnessTest>,
}

impl CorrectnessConfig {
    fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(HarnessError::InvalidConfig(
                "thread count must be at least 1".to_string(),
            ));
        }
        if self.iterations == Some(0) {
            return Err(HarnessError::InvalidConfig(
                "iteration count must be positive".to_string(),
            ));
        }
        if self.tests.is_empty() {
            return Err(HarnessError::InvalidConfig(
                "at least one test is required".to_string(),
            ));
        }
        for test in &self.tests {
            if test.min_payload > test.max_payload {
                return Err(HarnessError::InvalidConfig(format!(
                    "{}: min payload {} exceeds max payload {}",
                    test.primitive, test.min_payload, test.max_payload
                )));
            }
            if test.primitive.is_decrypt() {
                return Err(HarnessError::InvalidConfig(format!(
                    "{}: configure the encrypting variant, the decrypting role is implied",
                    test.primitive
                )));
            }
        }
        Ok(())
    }
}

/// One engine participating in a prepared test, holding its local handle
/// to the shared key.
struct Participant {
    engine: Arc<dyn CryptoEngine>,
    key: KeyHandle,
}

/// A test with its shared key resolved into every participating engine.
struct PreparedTest {
    test: CorrectnessTest,
    participants: Vec<Participant>,
}

/// Share one key across the engine set for `test`.
///
/// The first exporting engine that supports the primitive generates the
/// key; every other engine imports the exported material. Engines that
/// cannot service the primitive are excluded from this test (logged as a
/// gap). Runs entirely before any worker starts: every error here is a
/// setup error.
fn prepare_test(
    test: &CorrectnessTest,
    engines: &[Arc<dyn CryptoEngine>],
) -> Result<PreparedTest> {
    let exporters: Vec<&Arc<dyn CryptoEngine>> =
        engines.iter().filter(|e| e.allows_export()).collect();
    if exporters.is_empty() {
        return Err(HarnessError::NoExportingEngine);
    }

    let mut source: Option<(&Arc<dyn CryptoEngine>, KeyHandle)> = None;
    let mut last_unsupported = None;
    for &engine in &exporters {
        match engine.generate_key(test.primitive, test.key_size) {
            Ok(key) => {
                source = Some((engine, key));
                break;
            }
            Err(e @ EngineError::Unsupported { .. }) => last_unsupported = Some(e),
            Err(e) => return Err(e.into()),
        }
    }
    let (source_engine, source_key) = match source {
        Some(s) => s,
        None => return Err(last_unsupported.expect("no exporter outcome").into()),
    };
    let material = source_engine.export_key(&source_key)?;

    let mut participants = Vec::with_capacity(engines.len());
    for engine in engines {
        if Arc::ptr_eq(engine, source_engine) {
            participants.push(Participant {
                engine: Arc::clone(engine),
                key: source_key.clone(),
            });
            continue;
        }
        match engine.import_key(test.primitive, &material) {
            Ok(key) => participants.push(Participant {
                engine: Arc::clone(engine),
                key,
            }),
            Err(EngineError::Unsupported { .. }) | Err(EngineError::KeyMaterialMismatch(_)) => {
                warn!(
                    engine = engine.name(),
                    primitive = %test.primitive,
                    "engine cannot service this primitive, excluded from test"
                );
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!(
        primitive = %test.primitive,
        key_size = test.key_size,
        source = source_engine.name(),
        participants = participants.len(),
        "prepared correctness test"
    );
    Ok(PreparedTest {
        test: test.clone(),
        participants,
    })
}

type PairId = (Primitive, String, String);

#[derive(Debug, Clone, Default)]
struct PairTally {
    pass: u64,
    fail: u64,
    last_error: Option<String>,
}

/// Live, concurrently mutated result of a correctness job.
///
/// The tally key set is fixed at construction, so readers never observe
/// a missing pair; tallies only ever grow.
pub struct CorrectnessResult {
    state: StateCell,
    completed: AtomicU64,
    error: ExceptionSlot,
    tallies: Mutex<BTreeMap<PairId, PairTally>>,
}

impl CorrectnessResult {
    fn new(prepared: &[PreparedTest]) -> Self {
        let mut tallies = BTreeMap::new();
        for test in prepared {
            let primitive = test.test.primitive;
            if primitive.is_derivation() {
                for p in &test.participants {
                    let name = p.engine.name().to_string();
                    tallies.insert((primitive, name.clone(), name), PairTally::default());
                }
            } else {
                for enc in &test.participants {
                    for dec in &test.participants {
                        tallies.insert(
                            (
                                primitive,
                                enc.engine.name().to_string(),
                                dec.engine.name().to_string(),
                            ),
                            PairTally::default(),
                        );
                    }
                }
            }
        }
        Self {
            state: StateCell::new(),
            completed: AtomicU64::new(0),
            error: ExceptionSlot::new(),
            tallies: Mutex::new(tallies),
        }
    }

    fn record_pass(&self, primitive: Primitive, enc: &str, dec: &str) {
        let mut tallies = self.tallies.lock().expect("tally map poisoned");
        if let Some(tally) = tallies.get_mut(&(primitive, enc.to_string(), dec.to_string())) {
            tally.pass += 1;
        }
    }

    fn record_fail(&self, primitive: Primitive, enc: &str, dec: &str, error: String) {
        let mut tallies = self.tallies.lock().expect("tally map poisoned");
        if let Some(tally) = tallies.get_mut(&(primitive, enc.to_string(), dec.to_string())) {
            tally.fail += 1;
            tally.last_error = Some(error);
        }
    }

    fn next_iteration(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    /// Completed full sweeps across all workers.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> JobState {
        self.state.get()
    }

    /// Sticky job-level error, if any.
    pub fn last_error(&self) -> Option<String> {
        self.error.get()
    }

    /// Consistent point-in-time view for the reporting façade. Safe to
    /// call while workers are writing.
    pub fn snapshot(&self) -> CorrectnessReport {
        let tallies = self.tallies.lock().expect("tally map poisoned");
        let results = tallies
            .iter()
            .map(|((primitive, enc, dec), tally)| PairReport {
                primitive: *primitive,
                enc_engine: enc.clone(),
                dec_engine: dec.clone(),
                pass: tally.pass,
                fail: tally.fail,
                last_error: tally.last_error.clone().unwrap_or_default(),
            })
            .collect();
        CorrectnessReport {
            state: self.state.get(),
            completed: self.completed(),
            last_error: self.error.get_or_empty(),
            results,
        }
    }
}

/// Per-pair tallies for the reporting façade.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairReport {
    pub primitive: Primitive,
    pub enc_engine: String,
    pub dec_engine: String,
    pub pass: u64,
    pub fail: u64,
    pub last_error: String,
}

/// Wire shape of a correctness result query.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectnessReport {
    pub state: JobState,
    pub completed: u64,
    pub last_error: String,
    pub results: Vec<PairReport>,
}

fn sweep_derivation(test: &PreparedTest, payload: &[u8], result: &CorrectnessResult) {
    let primitive = test.test.primitive;
    let reference = &test.participants[0];
    let expected = reference
        .engine
        .execute(primitive, &reference.key, payload, &[]);

    for p in &test.participants {
        let name = p.engine.name();
        match (&expected, p.engine.execute(primitive, &p.key, payload, &[])) {
            (Ok(want), Ok(got)) if *want == got => result.record_pass(primitive, name, name),
            (Ok(_), Ok(_)) => result.record_fail(
                primitive,
                name,
                name,
                format!("derived output differs from {}", reference.engine.name()),
            ),
            (_, Err(e)) => result.record_fail(primitive, name, name, e.to_string()),
            (Err(e), Ok(_)) => result.record_fail(
                primitive,
                name,
                name,
                format!("reference engine {} failed: {e}", reference.engine.name()),
            ),
        }
    }
}

fn sweep_pairs(test: &PreparedTest, payload: &[u8], result: &CorrectnessResult) {
    let enc_primitive = test.test.primitive;
    let dec_primitive = enc_primitive
        .decrypt_counterpart()
        .expect("validated: primitive has a decrypting counterpart");

    for enc in &test.participants {
        // Fresh IV per encrypting operation, reused only for the
        // matching decrypts in this comparison.
        let mut iv = vec![0u8; enc_primitive.iv_len()];
        rand::thread_rng().fill_bytes(&mut iv);

        let ciphertext = match enc.engine.execute(enc_primitive, &enc.key, payload, &iv) {
            Ok(ct) => ct,
            Err(e) => {
                // The whole row is unverifiable this iteration; the
                // remaining pairs must still be visited.
                for dec in &test.participants {
                    result.record_fail(
                        enc_primitive,
                        enc.engine.name(),
                        dec.engine.name(),
                        format!("encrypt failed: {e}"),
                    );
                }
                continue;
            }
        };

        for dec in &test.participants {
            match dec.engine.execute(dec_primitive, &dec.key, &ciphertext, &iv) {
                Ok(plaintext) if plaintext == payload => {
                    result.record_pass(enc_primitive, enc.engine.name(), dec.engine.name())
                }
                Ok(_) => result.record_fail(
                    enc_primitive,
                    enc.engine.name(),
                    dec.engine.name(),
                    "recovered plaintext differs from original".to_string(),
                ),
                Err(e) => result.record_fail(
                    enc_primitive,
                    enc.engine.name(),
                    dec.engine.name(),
                    e.to_string(),
                ),
            }
        }
    }
}

/// One full pass over every configured test and pair.
fn run_sweep(prepared: &[PreparedTest], result: &CorrectnessResult) {
    for test in prepared {
        let size = if test.test.min_payload == test.test.max_payload {
            test.test.min_payload
        } else {
            rand::thread_rng().gen_range(test.test.min_payload..=test.test.max_payload)
        };
        let mut payload = vec![0u8; size];
        rand::thread_rng().fill_bytes(&mut payload);

        if test.test.primitive.is_derivation() {
            sweep_derivation(test, &payload, result);
        } else {
            sweep_pairs(test, &payload, result);
        }
    }
    result.next_iteration();
}

fn worker_loop(
    prepared: &[PreparedTest],
    result: &CorrectnessResult,
    stop: &StopSignal,
    iterations: Option<u64>,
    sleep: Duration,
) {
    let mut done = 0u64;
    loop {
        if stop.is_triggered() {
            break;
        }
        run_sweep(prepared, result);
        done += 1;
        if let Some(budget) = iterations {
            if done >= budget {
                break;
            }
        }
        if !sleep.is_zero() && !stop.sleep(sleep) {
            break;
        }
    }
}

/// A configured correctness job, ready to run.
pub struct CorrectnessJob {
    config: CorrectnessConfig,
    prepared: Arc<Vec<PreparedTest>>,
    result: Arc<CorrectnessResult>,
    stop: Arc<StopSignal>,
}

impl std::fmt::Debug for CorrectnessJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrectnessJob").finish_non_exhaustive()
    }
}

impl CorrectnessJob {
    /// Resolve keys and pre-populate the tally map. All configuration
    /// errors surface here, before any worker exists.
    pub fn new(config: CorrectnessConfig, engines: &[Arc<dyn CryptoEngine>]) -> Result<Self> {
        config.validate()?;
        let prepared = config
            .tests
            .iter()
            .map(|t| prepare_test(t, engines))
            .collect::<Result<Vec<_>>>()?;
        let result = Arc::new(CorrectnessResult::new(&prepared));
        Ok(Self {
            config,
            prepared: Arc::new(prepared),
            result,
            stop: Arc::new(StopSignal::new()),
        })
    }

    /// Live result handle, pollable while the job runs.
    pub fn result(&self) -> Arc<CorrectnessResult> {
        Arc::clone(&self.result)
    }

    /// Stop signal for soak jobs.
    pub fn stop_signal(&self) -> Arc<StopSignal> {
        Arc::clone(&self.stop)
    }

    /// Run to completion on the calling thread.
    pub fn run(self) {
        self.result.state.set(JobState::Running);

        let pool = match WorkerPool::new("correctness", self.config.threads) {
            Ok(pool) => pool,
            Err(e) => {
                self.result.error.record(&e);
                self.result.state.set(JobState::Failed);
                return;
            }
        };

        for _ in 0..self.config.threads {
            let prepared = Arc::clone(&self.prepared);
            let result = Arc::clone(&self.result);
            let stop = Arc::clone(&self.stop);
            let iterations = self.config.iterations;
            let sleep = self.config.sleep;
            if let Err(e) = pool.submit(move || {
                worker_loop(&prepared, &result, &stop, iterations, sleep)
            }) {
                // Stop dispatching, but let already-running workers finish.
                self.result.error.record(&e);
                self.result.state.set(JobState::Failed);
                break;
            }
        }

        pool.join();
        if self.result.state.get() != JobState::Failed {
            self.result.state.set(JobState::Completed);
        }
        info!(
            completed = self.result.completed(),
            state = ?self.result.state(),
            "correctness job finished"
        );
    }

    /// Run on a background thread, returning control to the caller
    /// immediately (the façade polls the result by job id).
    pub fn spawn(self) -> Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name("correctness-job".to_string())
            .spawn(move || self.run())
            .map_err(|e| HarnessError::Scheduling(format!("spawn failed: {e}")))
    }
}
