use std::path::PathBuf;
use anyhow::Result;
use ndarray::IxDyn;
use strides_core::{run_round_trip, sample, RoundTripConfig, Runner};
use strides_formats::{ArrayStorage, AsdfFile, AsdfFormat, MemoryOrder, NpzFormat};
use strides_storage::{MemoryBackend, PosixBackend, StorageBackend};
use tempfile::tempdir;

fn fixture_path(name: &str) -> PathBuf {
    // CARGO_MANIFEST_DIR for this crate → crates/core
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

#[test]
fn fortran_sample_survives_asdf_file_round_trip() -> Result<()> {
    let dir = tempdir()?;
    let mut config = RoundTripConfig::from_yaml_file(fixture_path("strides.yaml"))?;
    assert_eq!(config.output, "/tmp/strides.asdf");
    config.output = dir.path().join("strides.asdf").display().to_string();

    let (report, metrics) = run_round_trip(&config)?;

    let original = report.original.as_array::<i64>().unwrap();
    let recovered = report.recovered.as_array::<i64>().unwrap();
    for i in 0..2 {
        for j in 0..3 {
            assert_eq!(recovered[IxDyn(&[i, j])], original[IxDyn(&[i, j])], "element [{}, {}]", i, j);
        }
    }
    assert!(report.logically_equal());
    assert!(report.layout_preserved());
    assert_eq!(report.recovered.memory_order(), Some(MemoryOrder::F));

    // The file on disk is an independent copy that reopens on its own.
    let reopened = AsdfFile::open(dir.path().join("strides.asdf"))?;
    assert_eq!(reopened.tree().array("array")?, &report.original);

    assert_eq!(metrics.files_processed, 1);
    assert_eq!(metrics.bytes_written as usize, report.bytes_written);
    assert_eq!(metrics.bytes_read, metrics.bytes_written);
    Ok(())
}

#[test]
fn inline_storage_in_memory_keeps_values_but_not_layout() -> Result<()> {
    let config = RoundTripConfig::from_yaml_file(fixture_path("float_inline.yaml"))?;
    let (report, _) = run_round_trip(&config)?;

    assert!(report.logically_equal());
    assert!(!report.layout_preserved());
    assert_eq!(report.location, "memory://float_inline.asdf");
    Ok(())
}

#[test]
fn npz_round_trip_through_posix_backend() -> Result<()> {
    let dir = tempdir()?;
    let original = sample::build_array(&strides_core::ArraySpec::default())?;
    let mut runner = Runner::new(PosixBackend::new(dir.path()), NpzFormat::new());

    let report = runner.run_once("nested/strides.npz", "array", original)?;
    report.ensure_equal()?;
    assert!(report.layout_preserved());
    assert!(runner.backend().exists("nested/strides.npz"));
    Ok(())
}

#[test]
fn every_layout_and_storage_combination_is_logically_equal() -> Result<()> {
    for order in ["C", "F"] {
        for storage in [ArrayStorage::Internal, ArrayStorage::Inline] {
            let mut spec = strides_core::ArraySpec::default();
            spec.order = order.to_string();
            let original = sample::build_array(&spec)?;

            let mut runner = Runner::new(MemoryBackend::new(), AsdfFormat::new(storage));
            let report = runner.run_once("strides.asdf", "array", original)?;
            assert!(report.logically_equal(), "order {} storage {:?}", order, storage);
        }
    }
    Ok(())
}

#[test]
fn missing_key_after_reload_is_an_error() -> Result<()> {
    let backend = MemoryBackend::new();
    backend.put("broken.asdf", b"#ASDF 1.0.0\n%YAML 1.1\n--- {other: 1}\n...\n")?;

    let format = AsdfFormat::new(ArrayStorage::Internal);
    let tree = strides_formats::StreamingFormat::from_bytes(&format, &backend.get("broken.asdf")?)?;
    assert!(tree.array("array").is_err());
    Ok(())
}

#[test]
fn invalid_config_is_rejected_before_writing() {
    let mut config = RoundTripConfig::default();
    config.output = "memory://x.asdf".into();
    config.array.values.pop();
    assert!(run_round_trip(&config).is_err());
}

#[test]
fn empty_leading_axis_round_trips_in_both_storages() -> Result<()> {
    for storage in ["internal", "inline"] {
        let mut config = RoundTripConfig::default();
        config.output = "memory://empty.asdf".into();
        config.storage = storage.into();
        config.array.shape = vec![0, 3];
        config.array.values.clear();

        let (report, _) = run_round_trip(&config)?;
        assert_eq!(report.recovered.shape(), &[0, 3], "storage {}", storage);
        report.ensure_equal()?;
    }
    Ok(())
}
