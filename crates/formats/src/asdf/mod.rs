// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/formats/src/asdf/mod.rs
//
// ASDF (Advanced Scientific Data Format) reader and writer.
//
// A file is a YAML tree followed by binary blocks:
//
//   #ASDF 1.0.0
//   #ASDF_STANDARD 1.5.0
//   %YAML 1.1
//   %TAG ! tag:stsci.edu:asdf/
//   --- !core/asdf-1.1.0
//   <tree>
//   ...
//   <blocks>
//   #ASDF BLOCK INDEX
//   <offsets>

pub mod block;
pub mod yaml;

use anyhow::{bail, ensure, Context, Result};
use serde_yaml::{Mapping, Value};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::tree::Tree;
use crate::{Format, FormatMetadata, StreamingFormat};
use block::Block;
use yaml::{TreeDecoder, TreeEncoder};

pub const ASDF_MAGIC: &[u8] = b"#ASDF ";
pub const FILE_FORMAT_VERSION: &str = "1.0.0";
pub const STANDARD_VERSION: &str = "1.5.0";
pub const ROOT_TAG: &str = "core/asdf-1.1.0";
const TAG_DIRECTIVE: &str = "%TAG ! tag:stsci.edu:asdf/";

/// Keys the writer owns at the top of every tree.
const RESERVED_KEYS: [&str; 2] = ["asdf_library", "history"];

/// Where array elements go when a tree is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArrayStorage {
    /// Binary blocks after the tree; keeps the physical layout through `strides`.
    #[default]
    Internal,
    /// Nested YAML lists inside the tree; only the logical content survives.
    Inline,
}

impl std::str::FromStr for ArrayStorage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "internal" => Ok(ArrayStorage::Internal),
            "inline" => Ok(ArrayStorage::Inline),
            _ => bail!("Unknown array storage '{}', expected internal or inline", s),
        }
    }
}

/// An ASDF file held in memory: its tree plus writer metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct AsdfFile {
    tree: Tree,
    storage: ArrayStorage,
    library: Option<Value>,
    blocks: Vec<Block>,
}

impl AsdfFile {
    pub fn new(tree: Tree) -> Self {
        Self {
            tree,
            storage: ArrayStorage::default(),
            library: None,
            blocks: Vec::new(),
        }
    }

    pub fn with_storage(mut self, storage: ArrayStorage) -> Self {
        self.storage = storage;
        self
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn into_tree(self) -> Tree {
        self.tree
    }

    /// The `asdf_library` entry of a file that was read, if it had one.
    pub fn library(&self) -> Option<&Value> {
        self.library.as_ref()
    }

    /// Blocks found when the file was read.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Serialize to `path`, replacing any existing file.
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.to_bytes()?;
        std::fs::write(path, &bytes)
            .with_context(|| format!("Failed to write ASDF file at {:?}", path))?;
        info!("Wrote {} bytes to {:?}", bytes.len(), path);
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        for key in RESERVED_KEYS {
            if self.tree.get(key).is_some() {
                warn!("Tree key '{}' is reserved and will be replaced", key);
            }
        }

        let mut blocks = Vec::new();
        let user = TreeEncoder::new(self.storage, &mut blocks).encode_tree(&self.tree);

        let mut root = Mapping::new();
        root.insert("asdf_library".into(), yaml::software_entry());
        for (key, value) in user {
            if key.as_str().is_some_and(|k| RESERVED_KEYS.contains(&k)) {
                continue;
            }
            root.insert(key, value);
        }
        let body = serde_yaml::to_string(&Value::Mapping(root))
            .with_context(|| "Failed to serialize ASDF tree to YAML")?;

        let mut out = Vec::with_capacity(body.len() + 256);
        out.extend_from_slice(ASDF_MAGIC);
        out.extend_from_slice(FILE_FORMAT_VERSION.as_bytes());
        out.extend_from_slice(format!("\n#ASDF_STANDARD {}\n%YAML 1.1\n{}\n", STANDARD_VERSION, TAG_DIRECTIVE).as_bytes());
        out.extend_from_slice(format!("--- !{}\n", ROOT_TAG).as_bytes());
        out.extend_from_slice(body.as_bytes());
        out.extend_from_slice(b"...\n");

        if !blocks.is_empty() {
            let mut offsets = Vec::with_capacity(blocks.len());
            for data in &blocks {
                offsets.push(out.len());
                block::write_block(&mut out, data);
            }
            block::write_block_index(&mut out, &offsets);
        }

        debug!("Encoded tree with {} entries and {} blocks", self.tree.len(), blocks.len());
        Ok(out)
    }

    /// Read the file at `path` into a new, independent tree.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to open ASDF file at {:?}", path))?;
        Self::from_bytes(&bytes).with_context(|| format!("Failed to parse ASDF file at {:?}", path))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ensure!(bytes.starts_with(ASDF_MAGIC), "Not an ASDF file: missing '#ASDF' header");
        let version_end = bytes.iter().position(|&b| b == b'\n').unwrap_or(bytes.len());
        let version = String::from_utf8_lossy(&bytes[ASDF_MAGIC.len()..version_end]);
        debug!("ASDF file format version {}", version.trim());

        let (tree_bytes, rest_offset) = split_tree(bytes);
        let blocks = block::read_blocks(&bytes[rest_offset..], rest_offset)?;
        if let Some(index) = block::read_block_index(bytes) {
            if let Err(e) = block::check_block_index(&blocks, &index) {
                warn!("{}", e);
            }
        }

        let text = std::str::from_utf8(tree_bytes).context("ASDF tree is not valid UTF-8")?;
        let document = parse_document(text)?;
        let root = match document {
            Value::Tagged(t) => {
                if yaml::tag_name(&t.tag) != ROOT_TAG {
                    debug!("Root tag is {}", t.tag);
                }
                t.value
            }
            other => other,
        };
        let mapping = match root {
            Value::Mapping(m) => m,
            Value::Null => bail!("ASDF file has an empty tree"),
            other => bail!("ASDF tree root must be a mapping, found {:?}", other),
        };

        let mut library = None;
        let mut user = Mapping::new();
        for (key, value) in mapping {
            let name = key.as_str().unwrap_or_default().to_string();
            if name == "asdf_library" {
                library = Some(value);
            } else if !RESERVED_KEYS.contains(&name.as_str()) {
                user.insert(key, value);
            }
        }

        let tree = TreeDecoder::new(&blocks).decode_tree(&user)?;
        debug!("Decoded tree with {} entries from {} blocks", tree.len(), blocks.len());

        Ok(Self {
            tree,
            storage: ArrayStorage::Internal,
            library,
            blocks,
        })
    }
}

/// Split the file into the YAML tree and the offset where blocks may start.
fn split_tree(bytes: &[u8]) -> (&[u8], usize) {
    for end in [&b"\n...\n"[..], &b"\n...\r\n"[..]] {
        if let Some(pos) = block::find(bytes, end) {
            return (&bytes[..pos + 1], pos + end.len());
        }
    }
    match block::find(bytes, &block::BLOCK_MAGIC) {
        Some(pos) => (&bytes[..pos], pos),
        None => (bytes, bytes.len()),
    }
}

/// Parse the tree text. The `%TAG` directive is dropped so the shorthand
/// `!core/...` tags stay visible as local tags.
fn parse_document(text: &str) -> Result<Value> {
    let yaml: String = text
        .lines()
        .filter(|line| !line.starts_with("%TAG"))
        .map(|line| format!("{}\n", line))
        .collect();
    serde_yaml::from_str(&yaml).with_context(|| "Failed to parse ASDF tree YAML")
}

/// [`Format`] adapter writing trees as ASDF files.
pub struct AsdfFormat {
    storage: ArrayStorage,
}

impl AsdfFormat {
    pub fn new(storage: ArrayStorage) -> Self {
        AsdfFormat { storage }
    }
}

impl Format for AsdfFormat {
    fn write(&self, tree: &Tree, path: &Path) -> Result<()> {
        AsdfFile::new(tree.clone()).with_storage(self.storage).write_to(path)
    }

    fn read(&self, path: &Path) -> Result<Tree> {
        Ok(AsdfFile::open(path)?.into_tree())
    }
}

impl StreamingFormat for AsdfFormat {
    fn to_bytes(&self, tree: &Tree) -> Result<Vec<u8>> {
        AsdfFile::new(tree.clone()).with_storage(self.storage).to_bytes()
    }

    fn from_bytes(&self, data: &[u8]) -> Result<Tree> {
        Ok(AsdfFile::from_bytes(data)?.into_tree())
    }

    fn file_extension(&self) -> &'static str {
        "asdf"
    }

    fn format_metadata(&self) -> FormatMetadata {
        FormatMetadata {
            name: "asdf",
            is_binary: self.storage == ArrayStorage::Internal,
            preserves_layout: self.storage == ArrayStorage::Internal,
            supports_metadata: true,
        }
    }
}
