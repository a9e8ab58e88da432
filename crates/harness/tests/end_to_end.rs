//! Full-stack runs: plan file -> engines -> store -> jobs -> reports.

use cipherbench_engine::{build_engines, Backend, EngineConfig, Primitive};
use cipherbench_harness::{
    CorrectnessConfig, CorrectnessTest, JobState, LatencySummary, PerfConfig, ReportWriter,
    ResultStore, TestPlan, DEFAULT_PERF_TIMEOUT,
};
use std::fs;
use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};

fn mixed_engine_set() -> Vec<std::sync::Arc<dyn cipherbench_engine::CryptoEngine>> {
    build_engines(&[
        EngineConfig {
            name: "soft-a".to_string(),
            backend: Backend::Rustcrypto,
            allows_export: true,
        },
        EngineConfig {
            name: "soft-b".to_string(),
            backend: Backend::Rustcrypto,
            allows_export: false,
        },
        EngineConfig {
            name: "ring".to_string(),
            backend: Backend::Ring,
            allows_export: false,
        },
    ])
    .unwrap()
}

fn wait_for(check: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(30);
    while !check() {
        assert!(Instant::now() < deadline, "job did not finish in time");
        thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn correctness_matrix_across_backends() {
    let store = ResultStore::with_default_retention(mixed_engine_set()).unwrap();

    let ack = store
        .submit_correctness(CorrectnessConfig {
            threads: 2,
            iterations: Some(5),
            sleep: Duration::ZERO,
            tests: vec![
                CorrectnessTest {
                    primitive: Primitive::AesCbcEnc,
                    key_size: 256,
                    min_payload: 0,
                    max_payload: 512,
                },
                CorrectnessTest {
                    primitive: Primitive::Hkdf,
                    key_size: 256,
                    min_payload: 1,
                    max_payload: 64,
                },
                CorrectnessTest {
                    primitive: Primitive::RsaEnc,
                    key_size: 1024,
                    min_payload: 1,
                    max_payload: 32,
                },
            ],
        })
        .unwrap();

    wait_for(|| store.correctness_report(ack.job_id).unwrap().state == JobState::Completed);
    let report = store.correctness_report(ack.job_id).unwrap();

    assert_eq!(report.completed, 10);
    assert!(report.last_error.is_empty());

    // AES and RSA: the ring backend is excluded, leaving the two
    // rustcrypto engines (4 ordered pairs each). HKDF: all three
    // engines participate as diagonal pairs.
    let pairs_for = |p: Primitive| report.results.iter().filter(|r| r.primitive == p).count();
    assert_eq!(pairs_for(Primitive::AesCbcEnc), 4);
    assert_eq!(pairs_for(Primitive::RsaEnc), 4);
    assert_eq!(pairs_for(Primitive::Hkdf), 3);

    for r in &report.results {
        assert_eq!(r.fail, 0, "{} {}→{}: {}", r.primitive, r.enc_engine, r.dec_engine, r.last_error);
        assert_eq!(r.pass, 10);
    }
}

#[test]
fn perf_run_feeds_stats_and_reports() {
    let store = ResultStore::with_default_retention(mixed_engine_set()).unwrap();

    let ack = store
        .submit_perf(
            "soft-a",
            PerfConfig {
                primitive: Primitive::AesCbcEnc,
                key_size: 128,
                min_payload: 64,
                max_payload: 64,
                threads: 2,
                iterations: 50,
                timeout: DEFAULT_PERF_TIMEOUT,
            },
        )
        .unwrap();

    wait_for(|| store.perf_page(ack.job_id, 0, 0).unwrap().completed == 100);

    let result = store.perf_result(ack.job_id).unwrap();
    assert_eq!(result.state(), JobState::Completed);
    let samples = result.samples();
    assert_eq!(samples.len(), 100);

    let summary = LatencySummary::from_samples(&samples).unwrap();
    assert_eq!(summary.count, 100);
    assert!(summary.min_ms <= summary.median_ms);
    assert!(summary.median_ms <= summary.p95_ms);
    assert!(summary.p95_ms <= summary.max_ms);

    let dir = tempfile::tempdir().unwrap();
    let writer = ReportWriter::new(dir.path(), ack.job_id).unwrap();
    let (latency, throughput) = writer
        .write_run("soft-a", Primitive::AesCbcEnc, &samples)
        .unwrap();

    let latency_body = fs::read_to_string(latency).unwrap();
    assert_eq!(latency_body.lines().count(), 101);
    assert!(latency_body.starts_with("index\tstart_ms\tend_ms\tlatency_ms\n"));

    let throughput_body = fs::read_to_string(throughput).unwrap();
    assert!(throughput_body.starts_with("second\tops\n"));
    let total_ops: u64 = throughput_body
        .lines()
        .skip(1)
        .map(|l| l.split('\t').nth(1).unwrap().parse::<u64>().unwrap())
        .sum();
    assert_eq!(total_ops, 100);
}

#[test]
fn plan_file_drives_a_full_run() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(
        br#"
        retention = 3

        [[engines]]
        name = "soft"
        backend = "rustcrypto"
        allows_export = true

        [[engines]]
        name = "ring"
        backend = "ring"

        [correctness]
        threads = 1
        iterations = 2

        [[correctness.tests]]
        primitive = "hkdf"
        key_size = 256
        min_payload = 8
        max_payload = 8

        [perf]
        max_threads = 2
        iterations = 10

        [[perf.tests]]
        primitive = "hkdf"
        key_size = 256
        min_payload = 16
        max_payload = 16
    "#,
    )
    .unwrap();

    let plan = TestPlan::load(file.path()).unwrap();
    let engines = build_engines(&plan.engines).unwrap();
    let store = ResultStore::new(engines, plan.retention).unwrap();

    let correctness = plan.correctness.as_ref().unwrap();
    let ack = store.submit_correctness(correctness.to_config()).unwrap();
    wait_for(|| store.correctness_report(ack.job_id).unwrap().state == JobState::Completed);
    let report = store.correctness_report(ack.job_id).unwrap();
    assert_eq!(report.completed, 2);
    // Both backends derive, byte for byte, the same output.
    assert!(report.results.iter().all(|r| r.fail == 0));

    let perf = plan.perf.as_ref().unwrap();
    for threads in 1..=perf.max_threads {
        for test in &perf.tests {
            let config = perf.to_config(test, threads);
            for engine in store.engines() {
                let name = engine.name().to_string();
                let ack = store.submit_perf(&name, config.clone()).unwrap();
                let expected = threads * perf.iterations as usize;
                wait_for(|| {
                    store.perf_page(ack.job_id, 0, 0).unwrap().completed == expected
                });
            }
        }
    }
}

#[test]
fn export_forbidden_set_is_rejected_before_any_work() {
    let engines = build_engines(&[EngineConfig {
        name: "sealed".to_string(),
        backend: Backend::Rustcrypto,
        allows_export: false,
    }])
    .unwrap();
    let store = ResultStore::with_default_retention(engines).unwrap();

    let err = store
        .submit_correctness(CorrectnessConfig {
            threads: 1,
            iterations: Some(1),
            sleep: Duration::ZERO,
            tests: vec![CorrectnessTest {
                primitive: Primitive::AesCbcEnc,
                key_size: 128,
                min_payload: 16,
                max_payload: 16,
            }],
        })
        .unwrap_err();
    assert!(err.to_string().contains("export"));

    // The rejection left no retained job behind.
    assert!(store.correctness_report(1).is_err());
}
