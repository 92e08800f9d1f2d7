// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/formats/src/asdf/block.rs
//
// Binary blocks that follow the YAML tree.

use anyhow::{bail, ensure, Context, Result};
use tracing::{debug, warn};

/// Magic bytes opening every block.
pub const BLOCK_MAGIC: [u8; 4] = [0xd3, b'B', b'L', b'K'];

/// Size of the header fields this crate writes, excluding magic and the size field itself.
pub const BLOCK_HEADER_SIZE: u16 = 48;

/// Flag bit: the block's data runs to the end of the file.
pub const STREAMED_FLAG: u32 = 0x1;

pub const BLOCK_INDEX_MARKER: &[u8] = b"#ASDF BLOCK INDEX";

/// Block header.
///
/// Layout (big-endian, 6 + 48 bytes):
/// - Bytes 0-3: magic `\xd3BLK`
/// - Bytes 4-5: header size (u16)
/// - Bytes 6-9: flags (u32)
/// - Bytes 10-13: compression code, all zero when uncompressed
/// - Bytes 14-21: allocated size (u64)
/// - Bytes 22-29: used size (u64)
/// - Bytes 30-37: data size (u64)
/// - Bytes 38-53: MD5 checksum of the used data, all zero when not computed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub flags: u32,
    pub compression: [u8; 4],
    pub allocated_size: u64,
    pub used_size: u64,
    pub data_size: u64,
    pub checksum: [u8; 16],
}

impl BlockHeader {
    /// Header for an uncompressed, fully used block of `len` bytes.
    pub fn for_data(len: usize) -> Self {
        let len = len as u64;
        Self {
            flags: 0,
            compression: [0; 4],
            allocated_size: len,
            used_size: len,
            data_size: len,
            checksum: [0; 16],
        }
    }

    pub fn is_streamed(&self) -> bool {
        self.flags & STREAMED_FLAG != 0
    }

    pub fn is_compressed(&self) -> bool {
        self.compression != [0; 4]
    }

    /// Compression code as text, e.g. `zlib` or `lz4`.
    pub fn compression_name(&self) -> String {
        String::from_utf8_lossy(&self.compression)
            .trim_end_matches('\0')
            .to_string()
    }

    pub fn has_checksum(&self) -> bool {
        self.checksum != [0; 16]
    }

    pub fn to_bytes(&self) -> [u8; 6 + BLOCK_HEADER_SIZE as usize] {
        let mut bytes = [0u8; 6 + BLOCK_HEADER_SIZE as usize];
        bytes[0..4].copy_from_slice(&BLOCK_MAGIC);
        bytes[4..6].copy_from_slice(&BLOCK_HEADER_SIZE.to_be_bytes());
        bytes[6..10].copy_from_slice(&self.flags.to_be_bytes());
        bytes[10..14].copy_from_slice(&self.compression);
        bytes[14..22].copy_from_slice(&self.allocated_size.to_be_bytes());
        bytes[22..30].copy_from_slice(&self.used_size.to_be_bytes());
        bytes[30..38].copy_from_slice(&self.data_size.to_be_bytes());
        bytes[38..54].copy_from_slice(&self.checksum);
        bytes
    }

    /// Parse a header at the start of `bytes`. Returns the header and the
    /// number of bytes it occupies, which may exceed 54 when a newer writer
    /// appended fields.
    pub fn parse(bytes: &[u8]) -> Result<(Self, usize)> {
        ensure!(bytes.len() >= 6, "Truncated block header");
        ensure!(bytes[0..4] == BLOCK_MAGIC, "Invalid block magic {:02x?}", &bytes[0..4]);

        let header_size = u16::from_be_bytes([bytes[4], bytes[5]]) as usize;
        ensure!(
            header_size >= BLOCK_HEADER_SIZE as usize,
            "Block header size {} is smaller than {}",
            header_size,
            BLOCK_HEADER_SIZE
        );
        let total = 6 + header_size;
        ensure!(bytes.len() >= total, "Truncated block header: need {} bytes, have {}", total, bytes.len());

        let field = |range: std::ops::Range<usize>| -> [u8; 8] {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[range]);
            buf
        };
        let mut flags = [0u8; 4];
        flags.copy_from_slice(&bytes[6..10]);
        let mut compression = [0u8; 4];
        compression.copy_from_slice(&bytes[10..14]);
        let mut checksum = [0u8; 16];
        checksum.copy_from_slice(&bytes[38..54]);

        let header = Self {
            flags: u32::from_be_bytes(flags),
            compression,
            allocated_size: u64::from_be_bytes(field(14..22)),
            used_size: u64::from_be_bytes(field(22..30)),
            data_size: u64::from_be_bytes(field(30..38)),
            checksum,
        };
        ensure!(
            header.used_size <= header.allocated_size,
            "Block uses {} bytes but only allocates {}",
            header.used_size,
            header.allocated_size
        );
        Ok((header, total))
    }
}

/// A block read from a file.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub header: BlockHeader,
    /// File offset of the block's magic bytes.
    pub offset: usize,
    pub data: Vec<u8>,
}

/// Encode one block (header followed by its data).
pub fn write_block(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(&BlockHeader::for_data(data.len()).to_bytes());
    out.extend_from_slice(data);
}

/// Encode the optional block index that closes a file.
pub fn write_block_index(out: &mut Vec<u8>, offsets: &[usize]) {
    out.extend_from_slice(BLOCK_INDEX_MARKER);
    out.extend_from_slice(b"\n%YAML 1.1\n---\n");
    for offset in offsets {
        out.extend_from_slice(format!("- {}\n", offset).as_bytes());
    }
    out.extend_from_slice(b"...\n");
}

/// Read every block from `bytes`, which starts right after the YAML tree.
/// `base` is the file offset of `bytes[0]`.
pub fn read_blocks(bytes: &[u8], base: usize) -> Result<Vec<Block>> {
    let mut blocks = Vec::new();
    let Some(mut pos) = find(bytes, &BLOCK_MAGIC) else {
        return Ok(blocks);
    };

    while pos < bytes.len() {
        if !bytes[pos..].starts_with(&BLOCK_MAGIC) {
            if !bytes[pos..].starts_with(BLOCK_INDEX_MARKER) {
                debug!("Ignoring {} trailing bytes after block {}", bytes.len() - pos, blocks.len());
            }
            break;
        }

        let (header, header_len) = BlockHeader::parse(&bytes[pos..])
            .with_context(|| format!("Failed to parse block {} header", blocks.len()))?;
        let data_start = pos + header_len;

        let data_end = if header.is_streamed() {
            bytes.len()
        } else {
            usize::try_from(header.used_size)
                .ok()
                .and_then(|used| data_start.checked_add(used))
                .filter(|&end| end <= bytes.len())
                .with_context(|| {
                    format!(
                        "Block {} is truncated: needs {} bytes of data, {} available",
                        blocks.len(),
                        header.used_size,
                        bytes.len().saturating_sub(data_start)
                    )
                })?
        };

        if header.has_checksum() {
            debug!("Block {} carries a checksum; not verified", blocks.len());
        }

        blocks.push(Block {
            header,
            offset: base + pos,
            data: bytes[data_start..data_end].to_vec(),
        });

        if header.is_streamed() {
            break;
        }
        pos = usize::try_from(header.allocated_size)
            .ok()
            .and_then(|allocated| data_start.checked_add(allocated))
            .filter(|&end| end <= bytes.len())
            .with_context(|| format!("Block {} allocates past end of file", blocks.len() - 1))?;
    }

    Ok(blocks)
}

/// Parse the block index if the file ends with one.
pub fn read_block_index(bytes: &[u8]) -> Option<Vec<usize>> {
    let start = rfind(bytes, BLOCK_INDEX_MARKER)?;
    let text = std::str::from_utf8(&bytes[start + BLOCK_INDEX_MARKER.len()..]).ok()?;
    match serde_yaml::from_str::<Vec<usize>>(text) {
        Ok(offsets) => Some(offsets),
        Err(e) => {
            warn!("Ignoring unreadable block index: {}", e);
            None
        }
    }
}

/// Compare the blocks found by scanning with the offsets in the index.
pub fn check_block_index(blocks: &[Block], index: &[usize]) -> Result<()> {
    let scanned: Vec<usize> = blocks.iter().map(|b| b.offset).collect();
    if scanned != index {
        bail!("Block index {:?} disagrees with block offsets {:?}", index, scanned);
    }
    Ok(())
}

pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header = BlockHeader::for_data(48);
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..4], &BLOCK_MAGIC);
        assert_eq!(u16::from_be_bytes([bytes[4], bytes[5]]), 48);

        let (parsed, len) = BlockHeader::parse(&bytes).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(len, 54);
        assert!(!parsed.is_compressed());
        assert!(!parsed.is_streamed());
    }

    #[test]
    fn header_rejects_bad_magic_and_truncation() {
        let mut bytes = BlockHeader::for_data(8).to_bytes();
        assert!(BlockHeader::parse(&bytes[..20]).is_err());
        bytes[0] = b'X';
        assert!(BlockHeader::parse(&bytes).is_err());
    }

    #[test]
    fn blocks_and_index() {
        let mut out = b"   ".to_vec();
        let mut offsets = Vec::new();
        for data in [&b"abcd"[..], &b"efghij"[..]] {
            offsets.push(100 + out.len());
            write_block(&mut out, data);
        }
        write_block_index(&mut out, &offsets);

        let blocks = read_blocks(&out, 100).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].data, b"abcd");
        assert_eq!(blocks[1].data, b"efghij");

        let index = read_block_index(&out).unwrap();
        assert_eq!(index, offsets);
        check_block_index(&blocks, &index).unwrap();
    }

    #[test]
    fn streamed_block_runs_to_end() {
        let mut header = BlockHeader::for_data(0);
        header.flags = STREAMED_FLAG;
        let mut out = header.to_bytes().to_vec();
        out.extend_from_slice(&[1, 2, 3, 4, 5]);

        let blocks = read_blocks(&out, 0).unwrap();
        assert_eq!(blocks[0].data, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn oversized_allocation_is_an_error() {
        let mut header = BlockHeader::for_data(0);
        header.allocated_size = u64::MAX;
        let out = header.to_bytes().to_vec();
        let err = read_blocks(&out, 0).unwrap_err();
        assert!(format!("{:#}", err).contains("allocates past end of file"));

        let mut header = BlockHeader::for_data(4);
        header.used_size = u64::MAX;
        header.allocated_size = u64::MAX;
        let mut out = header.to_bytes().to_vec();
        out.extend_from_slice(&[0; 4]);
        let err = read_blocks(&out, 0).unwrap_err();
        assert!(format!("{:#}", err).contains("truncated"));
    }

    #[test]
    fn checksum_is_kept_but_not_verified() {
        let mut header = BlockHeader::for_data(3);
        header.checksum = [0xab; 16];
        let mut out = header.to_bytes().to_vec();
        out.extend_from_slice(b"xyz");

        let blocks = read_blocks(&out, 0).unwrap();
        assert!(blocks[0].header.has_checksum());
        assert_eq!(blocks[0].data, b"xyz");
    }

    #[test]
    fn truncated_block_is_an_error() {
        let mut out = Vec::new();
        write_block(&mut out, &[0u8; 16]);
        out.truncate(out.len() - 4);
        let err = read_blocks(&out, 0).unwrap_err();
        assert!(format!("{:#}", err).contains("truncated"));
    }
}
