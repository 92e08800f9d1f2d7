//
//
use anyhow::{bail, Context, Result};
use std::time::Instant;
use strides_formats::{FormatFactory, NdArray, StreamingFormat};
use strides_storage::{MemoryBackend, PosixBackend, StorageBackend};
use tracing::{debug, info};

use crate::config::{BackendKind, RoundTripConfig};
use crate::metrics::Metrics;
use crate::sample;

/// Outcome of writing an array out and reading it back.
#[derive(Debug, Clone)]
pub struct RoundTripReport {
    pub original: NdArray,
    pub recovered: NdArray,
    pub location: String,
    pub bytes_written: usize,
}

impl RoundTripReport {
    /// `recovered[i, j] == original[i, j]` for every index.
    pub fn logically_equal(&self) -> bool {
        self.original.logically_eq(&self.recovered)
    }

    /// The recovered array has the original's physical layout too.
    pub fn layout_preserved(&self) -> bool {
        self.original.memory_order() == self.recovered.memory_order()
    }

    pub fn ensure_equal(&self) -> Result<()> {
        if !self.logically_equal() {
            bail!(
                "Recovered array differs from the original\noriginal:\n{}\nrecovered:\n{}",
                self.original,
                self.recovered
            );
        }
        Ok(())
    }
}

/// Encode a tree, store it, fetch it back and decode it, collecting timings.
pub struct Runner<B, F> {
    backend: B,
    format: F,
    metrics: Metrics,
}

impl<B, F> Runner<B, F>
where
    B: StorageBackend,
    F: StreamingFormat,
{
    pub fn new(backend: B, format: F) -> Self {
        Runner { backend, format, metrics: Metrics::new() }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Store `original` under `tree_key` in a fresh tree at `object_key`,
    /// then reopen it as an independent tree.
    pub fn run_once(&mut self, object_key: &str, tree_key: &str, original: NdArray) -> Result<RoundTripReport> {
        let start = Instant::now();
        let tree = strides_formats::Tree::new().with(tree_key, original.clone());

        // 1) encode
        let t0 = Instant::now();
        let bytes = self
            .format
            .to_bytes(&tree)
            .with_context(|| format!("Failed to encode tree as {}", self.format.file_extension()))?;
        self.metrics.record_encode_time(t0.elapsed());

        // 2) write via backend
        let t1 = Instant::now();
        self.backend
            .put(object_key, &bytes)
            .with_context(|| format!("Failed to write {}", self.backend.location(object_key)))?;
        self.metrics.record_write_time(t1.elapsed());
        self.metrics.record_bytes_written(bytes.len() as u64);
        info!("Wrote {} bytes to {}", bytes.len(), self.backend.location(object_key));

        // 3) read back via backend
        let t2 = Instant::now();
        let data = self
            .backend
            .get(object_key)
            .with_context(|| format!("Failed to read {}", self.backend.location(object_key)))?;
        self.metrics.record_read_time(t2.elapsed());
        self.metrics.record_bytes_read(data.len() as u64);

        // 4) decode into a new tree
        let t3 = Instant::now();
        let reopened = self
            .format
            .from_bytes(&data)
            .with_context(|| format!("Failed to decode {}", self.backend.location(object_key)))?;
        self.metrics.record_decode_time(t3.elapsed());

        let recovered = reopened.array(tree_key)?.clone();
        self.metrics.record_total_time(start.elapsed());
        debug!(
            "Recovered {} array {:?} with layout {:?}",
            recovered.dtype(),
            recovered.shape(),
            recovered.memory_order()
        );

        Ok(RoundTripReport {
            original,
            recovered,
            location: self.backend.location(object_key),
            bytes_written: bytes.len(),
        })
    }
}

/// Run the round trip a config describes against its own backend.
pub fn run_round_trip(config: &RoundTripConfig) -> Result<(RoundTripReport, Metrics)> {
    config.validate()?;
    let format = FormatFactory::create_format(&config.format, config.storage()?)?;
    let original = sample::build_array(&config.array)?;
    info!(
        "Round trip of {} array {:?} ({} order) as {}",
        original.dtype(),
        original.shape(),
        original.storage_order(),
        format.format_metadata().name
    );

    match config.backend_kind() {
        BackendKind::File => {
            let (backend, key) = PosixBackend::for_file(config.output_path())
                .with_context(|| format!("Invalid output path {}", config.output))?;
            let mut runner = Runner::new(backend, format);
            let report = runner.run_once(&key, &config.key, original)?;
            Ok((report, runner.metrics().clone()))
        }
        BackendKind::Memory => {
            let mut runner = Runner::new(MemoryBackend::new(), format);
            let report = runner.run_once(config.output_path(), &config.key, original)?;
            Ok((report, runner.metrics().clone()))
        }
    }
}
