// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/formats/src/asdf/yaml.rs
//
// Conversion between `Tree` and the tagged YAML document of an ASDF file.

use anyhow::{bail, ensure, Context, Result};
use serde_yaml::value::{Tag, TaggedValue};
use serde_yaml::{Mapping, Value};

use super::block::Block;
use super::ArrayStorage;
use crate::array::{contiguous_strides, element_count, ByteOrder, DataType, MemoryOrder, NdArray};
use crate::tree::{Node, Tree};

pub const NDARRAY_TAG: &str = "core/ndarray-1.0.0";
pub const SOFTWARE_TAG: &str = "core/software-1.0.0";

/// Strip the leading `!` serde_yaml may keep on a tag.
pub fn tag_name(tag: &Tag) -> String {
    tag.to_string().trim_start_matches('!').to_string()
}

fn tagged(tag: &str, value: Value) -> Value {
    Value::Tagged(Box::new(TaggedValue {
        tag: Tag::new(tag),
        value,
    }))
}

/// `asdf_library` entry describing this writer.
pub fn software_entry() -> Value {
    let mut m = Mapping::new();
    m.insert("name".into(), env!("CARGO_PKG_NAME").into());
    m.insert("version".into(), env!("CARGO_PKG_VERSION").into());
    tagged(SOFTWARE_TAG, Value::Mapping(m))
}

/// Serialize `tree` to YAML, appending array buffers to `blocks` for
/// internal storage.
pub struct TreeEncoder<'a> {
    storage: ArrayStorage,
    blocks: &'a mut Vec<Vec<u8>>,
}

impl<'a> TreeEncoder<'a> {
    pub fn new(storage: ArrayStorage, blocks: &'a mut Vec<Vec<u8>>) -> Self {
        Self { storage, blocks }
    }

    pub fn encode_tree(&mut self, tree: &Tree) -> Mapping {
        let mut m = Mapping::new();
        for (key, node) in tree.iter() {
            m.insert(Value::from(key), self.encode_node(node));
        }
        m
    }

    fn encode_node(&mut self, node: &Node) -> Value {
        match node {
            Node::Array(array) => self.encode_array(array),
            Node::Scalar(value) => value.clone(),
            Node::Mapping(tree) => Value::Mapping(self.encode_tree(tree)),
            Node::Sequence(items) => Value::Sequence(items.iter().map(|n| self.encode_node(n)).collect()),
        }
    }

    fn encode_array(&mut self, array: &NdArray) -> Value {
        let mut m = Mapping::new();
        let shape = Value::Sequence(array.shape().iter().map(|&d| Value::from(d as u64)).collect());

        match self.storage {
            ArrayStorage::Internal => {
                let byte_order = ByteOrder::native();
                m.insert("source".into(), Value::from(self.blocks.len() as u64));
                self.blocks.push(array.raw_bytes(byte_order));
                m.insert("datatype".into(), array.dtype().name().into());
                m.insert("byteorder".into(), byte_order.name().into());
                m.insert("shape".into(), shape);

                let strides = array.storage_strides();
                if strides != contiguous_strides(array.shape(), array.dtype().item_size(), MemoryOrder::C) {
                    m.insert(
                        "strides".into(),
                        Value::Sequence(strides.into_iter().map(Value::from).collect()),
                    );
                }
            }
            ArrayStorage::Inline => {
                m.insert("data".into(), array.to_yaml_data());
                m.insert("datatype".into(), array.dtype().name().into());
                m.insert("shape".into(), shape);
            }
        }

        tagged(NDARRAY_TAG, Value::Mapping(m))
    }
}

/// Rebuild a [`Tree`] from a parsed document, resolving array blocks.
pub struct TreeDecoder<'a> {
    blocks: &'a [Block],
}

impl<'a> TreeDecoder<'a> {
    pub fn new(blocks: &'a [Block]) -> Self {
        Self { blocks }
    }

    pub fn decode_tree(&self, mapping: &Mapping) -> Result<Tree> {
        let mut tree = Tree::new();
        for (key, value) in mapping {
            let key = match key.as_str() {
                Some(k) => k.to_string(),
                None => serde_yaml::to_string(key)?.trim_end().to_string(),
            };
            let node = self
                .decode_node(value)
                .with_context(|| format!("Failed to decode tree entry '{}'", key))?;
            tree.insert(key, node);
        }
        Ok(tree)
    }

    fn decode_node(&self, value: &Value) -> Result<Node> {
        Ok(match value {
            Value::Tagged(t) if tag_name(&t.tag).starts_with("core/ndarray-") => {
                let Value::Mapping(m) = &t.value else {
                    bail!("ndarray node must be a mapping");
                };
                Node::Array(self.decode_array(m)?)
            }
            Value::Mapping(m) => Node::Mapping(self.decode_tree(m)?),
            Value::Sequence(items) => Node::Sequence(
                items
                    .iter()
                    .map(|v| self.decode_node(v))
                    .collect::<Result<Vec<_>>>()?,
            ),
            other => Node::Scalar(other.clone()),
        })
    }

    fn decode_array(&self, m: &Mapping) -> Result<NdArray> {
        let dtype = match m.get("datatype") {
            Some(Value::String(name)) => DataType::from_name(name)?,
            Some(Value::Sequence(_)) => bail!("Structured datatypes are not supported"),
            Some(other) => bail!("Invalid datatype {:?}", other),
            None => bail!("ndarray node has no datatype"),
        };

        if let Some(data) = m.get("data") {
            let array = NdArray::from_yaml_data(dtype, data)?;
            if let Some(shape) = m.get("shape") {
                let declared: Vec<usize> = parse_shape(shape)?.iter().map(|d| d.unwrap_or(0)).collect();
                // `[]` carries no shape beyond its first axis.
                if array.is_empty() && element_count(&declared)? == 0 {
                    return NdArray::from_yaml_values(dtype, &declared, &[], MemoryOrder::C);
                }
                ensure!(
                    declared == array.shape(),
                    "Inline data has shape {:?}, node declares {:?}",
                    array.shape(),
                    declared
                );
            }
            return Ok(array);
        }

        let source = match m.get("source") {
            Some(Value::Number(n)) => n
                .as_u64()
                .with_context(|| format!("Invalid block source {}", n))? as usize,
            Some(Value::String(uri)) => bail!("External array source '{}' is not supported", uri),
            Some(other) => bail!("Invalid array source {:?}", other),
            None => bail!("ndarray node has neither data nor source"),
        };
        let block = self
            .blocks
            .get(source)
            .with_context(|| format!("Array refers to block {} but the file has {}", source, self.blocks.len()))?;
        ensure!(
            !block.header.is_compressed(),
            "Block {} uses unsupported compression '{}'",
            source,
            block.header.compression_name()
        );

        let byte_order = match m.get("byteorder").and_then(Value::as_str) {
            Some(name) => ByteOrder::from_name(name)?,
            None => ByteOrder::native(),
        };
        let offset = match m.get("offset") {
            Some(v) => v.as_u64().with_context(|| format!("Invalid offset {:?}", v))? as usize,
            None => 0,
        };

        let declared = parse_shape(m.get("shape").context("ndarray node has no shape")?)?;
        let shape = resolve_streamed_shape(&declared, dtype, block.data.len().saturating_sub(offset))?;

        let strides = match m.get("strides") {
            Some(Value::Sequence(items)) => items
                .iter()
                .map(|v| v.as_i64().with_context(|| format!("Invalid stride {:?}", v)))
                .collect::<Result<Vec<_>>>()?,
            Some(other) => bail!("Invalid strides {:?}", other),
            None => contiguous_strides(&shape, dtype.item_size(), MemoryOrder::C),
        };

        NdArray::from_strided_bytes(dtype, byte_order, &shape, &strides, offset, &block.data)
            .with_context(|| format!("Failed to read array from block {}", source))
    }
}

/// Shape entries; `None` marks the `*` placeholder of a streamed block.
fn parse_shape(value: &Value) -> Result<Vec<Option<usize>>> {
    let Value::Sequence(items) = value else {
        bail!("Invalid shape {:?}", value);
    };
    items
        .iter()
        .enumerate()
        .map(|(i, v)| match v {
            Value::String(s) if s == "*" && i == 0 => Ok(None),
            other => other
                .as_u64()
                .map(|d| Some(d as usize))
                .with_context(|| format!("Invalid shape entry {:?}", other)),
        })
        .collect()
}

fn resolve_streamed_shape(declared: &[Option<usize>], dtype: DataType, available: usize) -> Result<Vec<usize>> {
    if declared.first() != Some(&None) {
        return Ok(declared.iter().map(|d| d.unwrap_or(0)).collect());
    }
    let rest: Vec<usize> = declared[1..].iter().map(|d| d.unwrap_or(0)).collect();
    let row = element_count(&rest)?
        .checked_mul(dtype.item_size())
        .with_context(|| format!("Streamed row shape {:?} is too large", rest))?;
    ensure!(row > 0, "Streamed array has an empty row shape");
    let mut shape = vec![available / row];
    shape.extend(rest);
    Ok(shape)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asdf::block::BlockHeader;

    fn block(data: Vec<u8>) -> Block {
        Block {
            header: BlockHeader::for_data(data.len()),
            offset: 0,
            data,
        }
    }

    #[test]
    fn encodes_fortran_strides_only_when_needed() {
        let f = NdArray::from_shape_vec(&[2, 3], vec![1i16, 2, 3, 4, 5, 6], MemoryOrder::F).unwrap();
        let c = f.to_memory_order(MemoryOrder::C).unwrap();
        let tree = Tree::new().with("f", f).with("c", c);

        let mut blocks = Vec::new();
        let m = TreeEncoder::new(ArrayStorage::Internal, &mut blocks).encode_tree(&tree);
        assert_eq!(blocks.len(), 2);

        let Some(Value::Tagged(f_node)) = m.get("f") else { panic!("f is not tagged") };
        assert_eq!(tag_name(&f_node.tag), NDARRAY_TAG);
        let strides: Vec<i64> = f_node.value["strides"]
            .as_sequence()
            .unwrap()
            .iter()
            .map(|v| v.as_i64().unwrap())
            .collect();
        assert_eq!(strides, vec![2, 4]);
        assert_eq!(f_node.value["source"].as_u64(), Some(0));

        let Some(Value::Tagged(c_node)) = m.get("c") else { panic!("c is not tagged") };
        assert!(c_node.value.get("strides").is_none());
    }

    #[test]
    fn decodes_streamed_shape() {
        let mut data = Vec::new();
        for v in 0u32..8 {
            data.extend_from_slice(&v.to_le_bytes());
        }
        let blocks = vec![block(data)];
        let node: Mapping = serde_yaml::from_str(
            "{source: 0, datatype: uint32, byteorder: little, shape: ['*', 2]}",
        )
        .unwrap();
        let array = TreeDecoder::new(&blocks).decode_array(&node).unwrap();
        assert_eq!(array.shape(), &[4, 2]);
    }

    #[test]
    fn rejects_missing_block_and_external_source() {
        let decoder = TreeDecoder::new(&[]);
        let node: Mapping =
            serde_yaml::from_str("{source: 3, datatype: int64, byteorder: little, shape: [1]}").unwrap();
        assert!(decoder.decode_array(&node).unwrap_err().to_string().contains("block 3"));

        let node: Mapping =
            serde_yaml::from_str("{source: other.asdf, datatype: int64, shape: [1]}").unwrap();
        assert!(decoder.decode_array(&node).unwrap_err().to_string().contains("External"));
    }

    #[test]
    fn empty_inline_array_keeps_declared_shape() {
        let empty = NdArray::from_yaml_values(DataType::Int64, &[0, 3], &[], MemoryOrder::F).unwrap();
        let tree = Tree::new().with("array", empty);

        let mut blocks = Vec::new();
        let m = TreeEncoder::new(ArrayStorage::Inline, &mut blocks).encode_tree(&tree);
        assert!(blocks.is_empty());

        let back = TreeDecoder::new(&[]).decode_tree(&m).unwrap();
        let array = back.array("array").unwrap();
        assert_eq!(array.shape(), &[0, 3]);
        assert_eq!(array.dtype(), DataType::Int64);

        let node: Mapping = serde_yaml::from_str("{data: [], datatype: int8, shape: [2, 2]}").unwrap();
        assert!(TreeDecoder::new(&[]).decode_array(&node).is_err());
    }

    #[test]
    fn compressed_block_is_rejected_by_codec_name() {
        let mut header = BlockHeader::for_data(8);
        header.compression = *b"zlib";
        let blocks = vec![Block {
            header,
            offset: 0,
            data: vec![0; 8],
        }];
        let node: Mapping =
            serde_yaml::from_str("{source: 0, datatype: int64, byteorder: little, shape: [1]}").unwrap();
        let err = TreeDecoder::new(&blocks).decode_array(&node).unwrap_err();
        assert!(err.to_string().contains("zlib"));
    }

    #[test]
    fn absurd_streamed_row_is_an_error() {
        let blocks = vec![block(vec![0; 8])];
        let node: Mapping = serde_yaml::from_str(
            "{source: 0, datatype: int64, byteorder: little, shape: ['*', 4294967296, 4294967296]}",
        )
        .unwrap();
        assert!(TreeDecoder::new(&blocks).decode_array(&node).is_err());
    }

    #[test]
    fn inline_shape_must_match_data() {
        let node: Mapping =
            serde_yaml::from_str("{data: [[1, 2], [3, 4]], datatype: int8, shape: [2, 2]}").unwrap();
        let array = TreeDecoder::new(&[]).decode_array(&node).unwrap();
        assert_eq!(array.shape(), &[2, 2]);

        let node: Mapping =
            serde_yaml::from_str("{data: [[1, 2], [3, 4]], datatype: int8, shape: [4]}").unwrap();
        assert!(TreeDecoder::new(&[]).decode_array(&node).is_err());
    }
}
