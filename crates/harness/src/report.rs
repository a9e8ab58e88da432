//! TSV report files for perf runs.
//!
//! One perf run produces two files under the report directory, named by
//! run id, engine and primitive: a per-sample latency table and a
//! per-second throughput table. Tab-separated with a header row, ready
//! for a spreadsheet or gnuplot.

use crate::error::Result;
use crate::stats::throughput_buckets;
use cipherbench_engine::Primitive;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Writes report files for a batch of perf runs sharing one run id.
pub struct ReportWriter {
    dir: PathBuf,
    run_id: u64,
}

impl ReportWriter {
    /// Create the report directory if needed.
    pub fn new(dir: impl Into<PathBuf>, run_id: u64) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, run_id })
    }

    fn file_path(&self, engine: &str, primitive: Primitive, kind: &str) -> PathBuf {
        self.dir
            .join(format!("run{}-{}-{}-{}.tsv", self.run_id, engine, primitive, kind))
    }

    /// Write both files for one run and return their paths
    /// (latency first, throughput second).
    pub fn write_run(
        &self,
        engine: &str,
        primitive: Primitive,
        samples: &[(u64, u64)],
    ) -> Result<(PathBuf, PathBuf)> {
        let latency_path = self.file_path(engine, primitive, "latency");
        write_latency_file(&latency_path, samples)?;

        let throughput_path = self.file_path(engine, primitive, "throughput");
        write_throughput_file(&throughput_path, samples)?;

        info!(
            engine,
            primitive = %primitive,
            samples = samples.len(),
            latency = %latency_path.display(),
            throughput = %throughput_path.display(),
            "report files written"
        );
        Ok((latency_path, throughput_path))
    }
}

fn write_latency_file(path: &Path, samples: &[(u64, u64)]) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "index\tstart_ms\tend_ms\tlatency_ms")?;
    for (index, &(start, end)) in samples.iter().enumerate() {
        writeln!(out, "{index}\t{start}\t{end}\t{}", end.saturating_sub(start))?;
    }
    out.flush()?;
    Ok(())
}

fn write_throughput_file(path: &Path, samples: &[(u64, u64)]) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "second\tops")?;
    for bucket in throughput_buckets(samples) {
        writeln!(out, "{}\t{}", bucket.second, bucket.ops)?;
    }
    out.flush()?;
    Ok(())
}
