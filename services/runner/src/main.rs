//! Batch runner: executes a test plan file end to end.
//!
//! Reads the toml plan, builds the engine set, runs the correctness
//! suite, then sweeps every perf test over thread counts and writes the
//! latency/throughput report files.

use anyhow::{bail, Context, Result};
use cipherbench_engine::{build_engines, EngineError};
use cipherbench_harness::{
    CorrectnessPlan, HarnessError, JobState, LatencySummary, PerfPlan, ReportWriter, ResultStore,
    TestPlan,
};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config_path = parse_config_path(&args)?;
    let plan = TestPlan::load(&config_path)
        .with_context(|| format!("failed to load test plan {}", config_path.display()))?;

    let engines = build_engines(&plan.engines).context("failed to build engine set")?;
    let store = ResultStore::new(engines, plan.retention)?;

    if let Some(correctness) = &plan.correctness {
        run_correctness(&store, correctness)?;
    }
    if let Some(perf) = &plan.perf {
        run_perf_sweep(&store, perf, &plan.report_dir)?;
    }

    info!("test plan complete");
    Ok(())
}

fn parse_config_path(args: &[String]) -> Result<PathBuf> {
    let mut args_iter = args.iter();
    while let Some(arg) = args_iter.next() {
        if arg == "--config" {
            if let Some(path) = args_iter.next() {
                return Ok(PathBuf::from(path));
            }
            bail!("--config was provided without a path");
        }
    }
    bail!("missing required --config <path> argument");
}

/// Run the correctness suite to completion and fail the process if any
/// pair recorded a mismatch.
fn run_correctness(store: &ResultStore, plan: &CorrectnessPlan) -> Result<()> {
    let ack = store.submit_correctness(plan.to_config())?;
    info!(job_id = ack.job_id, summary = %ack.summary, "correctness suite started");
    if plan.iterations.is_none() {
        info!("soak mode: running until interrupted");
    }

    loop {
        let report = store.correctness_report(ack.job_id)?;
        match report.state {
            JobState::Completed | JobState::Failed => break,
            _ => thread::sleep(POLL_INTERVAL),
        }
    }

    let report = store.correctness_report(ack.job_id)?;
    let mut failures = 0u64;
    for pair in &report.results {
        if pair.fail > 0 {
            failures += pair.fail;
            warn!(
                primitive = %pair.primitive,
                enc = %pair.enc_engine,
                dec = %pair.dec_engine,
                fail = pair.fail,
                error = %pair.last_error,
                "pair mismatch"
            );
        } else {
            info!(
                primitive = %pair.primitive,
                enc = %pair.enc_engine,
                dec = %pair.dec_engine,
                pass = pair.pass,
                "pair verified"
            );
        }
    }
    info!(completed = report.completed, pairs = report.results.len(), "correctness suite finished");

    if report.state == JobState::Failed {
        bail!("correctness job failed: {}", report.last_error);
    }
    if failures > 0 {
        bail!("{failures} pair mismatches recorded");
    }
    Ok(())
}

/// Sweep every perf test over thread counts `1..=max_threads` on every
/// engine, writing one latency and one throughput file per run.
fn run_perf_sweep(store: &ResultStore, plan: &PerfPlan, report_dir: &Path) -> Result<()> {
    let engine_names: Vec<String> = store
        .engines()
        .iter()
        .map(|e| e.name().to_string())
        .collect();

    for test in &plan.tests {
        for name in &engine_names {
            for threads in 1..=plan.max_threads {
                let config = plan.to_config(test, threads);
                let ack = match store.submit_perf(name, config) {
                    Ok(ack) => ack,
                    Err(HarnessError::Engine(EngineError::Unsupported { .. })) => {
                        warn!(engine = %name, primitive = %test.primitive, "primitive not supported, skipping");
                        break;
                    }
                    Err(e) => return Err(e.into()),
                };
                info!(job_id = ack.job_id, summary = %ack.summary, "perf run started");

                let result = store.perf_result(ack.job_id)?;
                loop {
                    match result.state() {
                        JobState::Completed | JobState::Failed => break,
                        _ => thread::sleep(POLL_INTERVAL),
                    }
                }
                if result.state() == JobState::Failed {
                    bail!(
                        "perf run {} failed: {}",
                        ack.job_id,
                        result.last_error().unwrap_or_default()
                    );
                }

                let samples = result.samples();
                if let Some(summary) = LatencySummary::from_samples(&samples) {
                    info!(
                        engine = %name,
                        primitive = %test.primitive,
                        threads,
                        count = summary.count,
                        min_ms = summary.min_ms,
                        median_ms = summary.median_ms,
                        p95_ms = summary.p95_ms,
                        p99_ms = summary.p99_ms,
                        max_ms = summary.max_ms,
                        "latency summary"
                    );
                }
                if let Some(error) = result.last_error() {
                    warn!(job_id = ack.job_id, %error, "perf run recorded operation errors");
                }

                let writer = ReportWriter::new(report_dir, ack.job_id)?;
                writer.write_run(name, test.primitive, &samples)?;
            }
        }
    }
    Ok(())
}
