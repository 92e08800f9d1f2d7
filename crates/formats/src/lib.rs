// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/formats/src/lib.rs
//
pub mod array;
pub mod asdf;
pub mod npz;
pub mod tree;

pub use array::{ByteOrder, DataType, Element, MemoryOrder, NdArray};
pub use asdf::{ArrayStorage, AsdfFile, AsdfFormat};
pub use npz::NpzFormat;
pub use tree::{Node, Tree};

/// A file format that stores a [`Tree`].
pub trait Format {
    /// Write `tree` to `path`.
    fn write(&self, tree: &Tree, path: &std::path::Path) -> anyhow::Result<()>;
    /// Read the tree stored at `path`.
    fn read(&self, path: &std::path::Path) -> anyhow::Result<Tree>;
}

/// A trait that extends Format for in-memory operation, so trees can be
/// handed to any storage backend as bytes.
pub trait StreamingFormat: Format {
    /// Encode `tree` into the bytes of a complete file.
    fn to_bytes(&self, tree: &Tree) -> anyhow::Result<Vec<u8>>;

    /// Decode the bytes of a complete file.
    fn from_bytes(&self, data: &[u8]) -> anyhow::Result<Tree>;

    /// Get the expected file extension for this format
    fn file_extension(&self) -> &'static str;

    fn format_metadata(&self) -> FormatMetadata;
}

impl<T: Format + ?Sized> Format for Box<T> {
    fn write(&self, tree: &Tree, path: &std::path::Path) -> anyhow::Result<()> {
        (**self).write(tree, path)
    }

    fn read(&self, path: &std::path::Path) -> anyhow::Result<Tree> {
        (**self).read(path)
    }
}

impl<T: StreamingFormat + ?Sized> StreamingFormat for Box<T> {
    fn to_bytes(&self, tree: &Tree) -> anyhow::Result<Vec<u8>> {
        (**self).to_bytes(tree)
    }

    fn from_bytes(&self, data: &[u8]) -> anyhow::Result<Tree> {
        (**self).from_bytes(data)
    }

    fn file_extension(&self) -> &'static str {
        (**self).file_extension()
    }

    fn format_metadata(&self) -> FormatMetadata {
        (**self).format_metadata()
    }
}

/// Static facts about a format.
#[derive(Debug, Clone)]
pub struct FormatMetadata {
    pub name: &'static str,
    pub is_binary: bool,
    /// Column-major arrays come back column-major.
    pub preserves_layout: bool,
    /// Non-array tree entries can be stored.
    pub supports_metadata: bool,
}

/// Format factory for creating format instances from config strings
pub struct FormatFactory;

impl FormatFactory {
    /// Create a format instance; `storage` only applies to ASDF.
    pub fn create_format(
        format_name: &str,
        storage: ArrayStorage,
    ) -> anyhow::Result<Box<dyn StreamingFormat>> {
        match format_name.to_lowercase().as_str() {
            "asdf" => Ok(Box::new(AsdfFormat::new(storage))),
            "npz" => Ok(Box::new(NpzFormat::new())),
            _ => {
                anyhow::bail!("Unsupported format: {}", format_name)
            }
        }
    }

    /// Get all supported format names
    pub fn supported_formats() -> Vec<&'static str> {
        vec!["asdf", "npz"]
    }
}
