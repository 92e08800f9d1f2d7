// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/formats/src/npz.rs

use anyhow::{bail, Context, Result};
use ndarray::ArrayD;
use ndarray_npy::{ReadNpyExt, ReadableElement, WriteNpyExt};
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;
use tracing::debug;
use zip::{write::FileOptions, CompressionMethod, ZipArchive, ZipWriter};

use crate::array::{each_array, each_dtype, DataType, Element, NdArray};
use crate::tree::{Node, Tree};
use crate::{Format, FormatMetadata, StreamingFormat};

/// NPZ format: a ZIP archive holding one `.npy` member per array.
///
/// Nested mappings become `/`-separated member names. The npy header
/// carries `fortran_order`, so column-major arrays come back column-major.
pub struct NpzFormat {
    compression: CompressionMethod,
}

impl NpzFormat {
    pub fn new() -> Self {
        Self {
            compression: CompressionMethod::Deflated,
        }
    }

    /// Members are stored uncompressed, like `numpy.savez`.
    pub fn stored() -> Self {
        Self {
            compression: CompressionMethod::Stored,
        }
    }

    fn encode<W: Write + Seek>(&self, tree: &Tree, writer: W) -> Result<()> {
        check_arrays_only(tree, "")?;

        let mut zip = ZipWriter::new(writer);
        let options = FileOptions::<()>::default()
            .compression_method(self.compression)
            .unix_permissions(0o644);

        for (path, array) in tree.arrays() {
            let member = format!("{}.npy", path);

            // Write array to memory buffer first
            let mut buffer = Vec::new();
            each_array!(array, a => a.write_npy(&mut buffer))
                .with_context(|| format!("Failed to serialize array {}", member))?;

            zip.start_file(member.as_str(), options)
                .with_context(|| format!("Failed to start ZIP file entry for {}", member))?;
            zip.write_all(&buffer)
                .with_context(|| format!("Failed to write array {} to ZIP", member))?;
            debug!("Wrote {} ({} bytes)", member, buffer.len());
        }

        zip.finish()
            .with_context(|| "Failed to finalize NPZ ZIP archive")?;
        Ok(())
    }

    fn decode<R: Read + Seek>(&self, reader: R) -> Result<Tree> {
        let mut archive = ZipArchive::new(reader).with_context(|| "Failed to read NPZ as ZIP archive")?;

        let mut tree = Tree::new();
        for i in 0..archive.len() {
            let mut entry = archive
                .by_index(i)
                .with_context(|| format!("Failed to read ZIP entry {}", i))?;
            let name = entry.name().to_string();
            let Some(path) = name.strip_suffix(".npy") else {
                bail!("NPZ contains non-.npy file: {}", name);
            };

            let mut bytes = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut bytes)
                .with_context(|| format!("Failed to read {} from ZIP", name))?;
            let array = read_any_npy(&bytes).with_context(|| format!("Failed to parse {}", name))?;
            insert_path(&mut tree, path, array)?;
        }
        Ok(tree)
    }
}

impl Default for NpzFormat {
    fn default() -> Self {
        Self::new()
    }
}

fn check_arrays_only(tree: &Tree, prefix: &str) -> Result<()> {
    for (key, node) in tree.iter() {
        match node {
            Node::Array(_) => {}
            Node::Mapping(child) => check_arrays_only(child, &format!("{}{}/", prefix, key))?,
            Node::Scalar(_) | Node::Sequence(_) => {
                bail!("NPZ can only store arrays; '{}{}' is not an array", prefix, key)
            }
        }
    }
    Ok(())
}

fn insert_path(tree: &mut Tree, path: &str, array: NdArray) -> Result<()> {
    match path.split_once('/') {
        None => {
            tree.insert(path, array);
        }
        Some((head, rest)) => {
            let mut child = match tree.remove(head) {
                Some(Node::Mapping(t)) => t,
                Some(_) => bail!("NPZ member path '{}' collides with an array", path),
                None => Tree::new(),
            };
            insert_path(&mut child, rest, array)?;
            tree.insert(head, child);
        }
    }
    Ok(())
}

fn read_typed<T: Element + ReadableElement>(bytes: &[u8]) -> Result<ArrayD<T>> {
    Ok(ArrayD::<T>::read_npy(bytes)?)
}

/// The npy header names the element type; try each supported one.
fn read_any_npy(bytes: &[u8]) -> Result<NdArray> {
    let mut last_error = None;
    for dtype in DataType::ALL {
        match each_dtype!(dtype, read_typed(bytes)) {
            Ok(array) => return Ok(array),
            Err(e) => last_error = Some(e),
        }
    }
    match last_error {
        Some(e) => Err(e.context("npy element type is not supported")),
        None => bail!("npy element type is not supported"),
    }
}

impl Format for NpzFormat {
    fn write(&self, tree: &Tree, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create NPZ file at {:?}", path))?;
        self.encode(tree, file)
    }

    fn read(&self, path: &Path) -> Result<Tree> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open NPZ file at {:?}", path))?;
        self.decode(file)
    }
}

impl StreamingFormat for NpzFormat {
    fn to_bytes(&self, tree: &Tree) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        self.encode(tree, &mut cursor)?;
        Ok(cursor.into_inner())
    }

    fn from_bytes(&self, data: &[u8]) -> Result<Tree> {
        self.decode(Cursor::new(data))
    }

    fn file_extension(&self) -> &'static str {
        "npz"
    }

    fn format_metadata(&self) -> FormatMetadata {
        FormatMetadata {
            name: "npz",
            is_binary: true,
            preserves_layout: true,
            supports_metadata: false,
        }
    }
}
