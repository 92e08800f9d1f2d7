// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/core/src/config/round_trip.rs
use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use serde_yaml::Value;
use std::path::Path;
use strides_formats::array::element_count;
use strides_formats::{ArrayStorage, DataType, FormatFactory, MemoryOrder};

pub const DEFAULT_OUTPUT: &str = "/tmp/strides.asdf";

/// One round trip: which array, which file format, where to put it.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "snake_case")]
pub struct RoundTripConfig {
    pub output: String,                 // path, file:// or memory:// URI
    pub format: String,                 // "asdf" | "npz"
    pub storage: String,                // ASDF array storage: "internal" | "inline"
    pub key: String,                    // tree key holding the array
    pub array: ArraySpec,
}

/// The array to build. `values` are listed in logical row-major order
/// whatever `order` says about memory layout.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ArraySpec {
    pub dtype: String,
    pub order: String,
    pub shape: Vec<usize>,
    pub values: Vec<Value>,
}

impl Default for RoundTripConfig {
    fn default() -> Self {
        Self {
            output: DEFAULT_OUTPUT.to_string(),
            format: "asdf".to_string(),
            storage: "internal".to_string(),
            key: "array".to_string(),
            array: ArraySpec::default(),
        }
    }
}

impl Default for ArraySpec {
    fn default() -> Self {
        Self {
            dtype: "int64".to_string(),
            order: "F".to_string(),
            shape: vec![2, 3],
            values: [11i64, 12, 13, 21, 22, 23].into_iter().map(Value::from).collect(),
        }
    }
}

/// Where the output lives, decided from the `output` URI scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    File,
    Memory,
}

impl RoundTripConfig {
    pub fn from_yaml(yaml_str: &str) -> Result<Self> {
        serde_yaml::from_str(yaml_str).map_err(|e| anyhow::anyhow!("Failed to parse round-trip config: {}", e))
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        Self::from_yaml(&text)
    }

    pub fn backend_kind(&self) -> BackendKind {
        if self.output.starts_with("memory://") {
            BackendKind::Memory
        } else {
            BackendKind::File
        }
    }

    /// Output with any scheme stripped.
    pub fn output_path(&self) -> &str {
        self.output
            .strip_prefix("memory://")
            .or_else(|| self.output.strip_prefix("file://"))
            .unwrap_or(&self.output)
    }

    pub fn storage(&self) -> Result<ArrayStorage> {
        self.storage.parse()
    }

    /// Check every field can be interpreted before any work starts.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.output_path().is_empty(), "output must name a file");
        ensure!(!self.key.is_empty(), "key must not be empty");
        ensure!(
            FormatFactory::supported_formats().contains(&self.format.to_lowercase().as_str()),
            "Unsupported format '{}', expected one of {:?}",
            self.format,
            FormatFactory::supported_formats()
        );
        self.storage()?;
        self.array.validate()
    }
}

impl ArraySpec {
    pub fn dtype(&self) -> Result<DataType> {
        self.dtype.parse()
    }

    pub fn order(&self) -> Result<MemoryOrder> {
        self.order.parse()
    }

    pub fn validate(&self) -> Result<()> {
        self.dtype()?;
        self.order()?;
        let expected = element_count(&self.shape)?;
        ensure!(
            expected == self.values.len(),
            "shape {:?} needs {} values, config lists {}",
            self.shape,
            expected,
            self.values.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_the_fortran_sample() {
        let config = RoundTripConfig::default();
        config.validate().unwrap();
        assert_eq!(config.output_path(), "/tmp/strides.asdf");
        assert_eq!(config.backend_kind(), BackendKind::File);
        assert_eq!(config.array.order().unwrap(), MemoryOrder::F);
        assert_eq!(config.array.dtype().unwrap(), DataType::Int64);
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = RoundTripConfig::from_yaml("output: memory://x.asdf\narray:\n  order: C\n").unwrap();
        assert_eq!(config.backend_kind(), BackendKind::Memory);
        assert_eq!(config.output_path(), "x.asdf");
        assert_eq!(config.array.order().unwrap(), MemoryOrder::C);
        assert_eq!(config.array.shape, vec![2, 3]);
        assert_eq!(config.format, "asdf");
    }

    #[test]
    fn validation_catches_bad_fields() {
        let mut config = RoundTripConfig::default();
        config.array.shape = vec![4, 4];
        assert!(config.validate().unwrap_err().to_string().contains("needs 16 values"));

        let mut config = RoundTripConfig::default();
        config.array.shape = vec![usize::MAX, 2];
        assert!(config.validate().unwrap_err().to_string().contains("too many elements"));

        let mut config = RoundTripConfig::default();
        config.array.shape = vec![0, 3];
        config.array.values.clear();
        config.validate().unwrap();

        let mut config = RoundTripConfig::default();
        config.format = "hdf5".into();
        assert!(config.validate().is_err());

        let mut config = RoundTripConfig::default();
        config.storage = "external".into();
        assert!(config.validate().is_err());
    }
}
