//! Wire layout of a CQDB chunk.
//!
//! ```text
//! header:  magic "CQDB" (4B), size u32, flags u32, byteorder u32,
//!          backlink count u32, backlink offset u32
//! table:   256 x (bucket offset u32, slot count u32)
//! records: id i32, key length u32 (incl. NUL), key bytes, NUL
//! buckets: slot count x (hash u32, record offset u32)
//! backlinks: backlink count x record offset u32
//! ```
//!
//! Every integer is little-endian. All offsets are relative to the chunk start.

use crate::error::OpenError;

pub const MAGIC: [u8; 4] = *b"CQDB";

/// Sentinel stored in every header; a reader that decodes a different value
/// is looking at a chunk laid out with other assumptions.
pub const BYTEORDER_CHECK: u32 = 0x6244_5371;

/// Fan-out of the first-level hash. Load-bearing for the fixed table size.
pub const NUM_TABLES: usize = 256;

pub const HEADER_SIZE: usize = 24;
pub const TABLE_REF_SIZE: usize = 8;
pub const SLOT_SIZE: usize = 8;
pub const RECORD_PREFIX_SIZE: usize = 8;

/// Bytes preceding the first record: header plus table-of-references.
pub const CHUNK_PREFIX_SIZE: usize = HEADER_SIZE + NUM_TABLES * TABLE_REF_SIZE;

/// Chunk flag: the writer was asked to omit the backlink array.
pub const FLAG_ONEWAY: u32 = 0x0000_0001;

#[must_use]
pub fn encode_u32(value: u32) -> [u8; 4] {
    value.to_le_bytes()
}

#[must_use]
pub fn decode_u32(bytes: [u8; 4]) -> u32 {
    u32::from_le_bytes(bytes)
}

/// Reads a little-endian `u32` at `pos`, or `None` when it would overrun `buf`.
pub(crate) fn read_u32_at(buf: &[u8], pos: usize) -> Option<u32> {
    let end = pos.checked_add(4)?;
    let bytes: [u8; 4] = buf.get(pos..end)?.try_into().ok()?;
    Some(decode_u32(bytes))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub size: u32,
    pub flags: u32,
    pub byteorder: u32,
    pub backlink_count: u32,
    pub backlink_offset: u32,
}

impl Header {
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&MAGIC);
        out[4..8].copy_from_slice(&encode_u32(self.size));
        out[8..12].copy_from_slice(&encode_u32(self.flags));
        out[12..16].copy_from_slice(&encode_u32(self.byteorder));
        out[16..20].copy_from_slice(&encode_u32(self.backlink_count));
        out[20..24].copy_from_slice(&encode_u32(self.backlink_offset));
        out
    }

    /// Decodes and validates a header from the start of `buf`.
    ///
    /// # Errors
    /// Returns an [`OpenError`] if the buffer is shorter than the chunk
    /// prefix, the magic or byte-order sentinel do not match, or the declared
    /// size is inconsistent with the buffer.
    pub fn decode(buf: &[u8]) -> Result<Self, OpenError> {
        if buf.len() < CHUNK_PREFIX_SIZE {
            return Err(OpenError::TooSmall {
                required: CHUNK_PREFIX_SIZE,
                actual: buf.len(),
            });
        }
        let mut found = [0u8; 4];
        found.copy_from_slice(&buf[0..4]);
        if found != MAGIC {
            return Err(OpenError::BadMagic { found });
        }
        let field = |pos: usize| read_u32_at(buf, pos).unwrap_or_default();
        let header = Self {
            size: field(4),
            flags: field(8),
            byteorder: field(12),
            backlink_count: field(16),
            backlink_offset: field(20),
        };
        if header.byteorder != BYTEORDER_CHECK {
            return Err(OpenError::ByteOrder {
                expected: BYTEORDER_CHECK,
                found: header.byteorder,
            });
        }
        let declared = header.size as usize;
        if declared > buf.len() || declared < CHUNK_PREFIX_SIZE {
            return Err(OpenError::SizeMismatch {
                declared: header.size,
                available: buf.len(),
            });
        }
        Ok(header)
    }
}

/// One entry of the table-of-references.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableRef {
    pub offset: u32,
    pub num: u32,
}

impl TableRef {
    #[must_use]
    pub fn encode(&self) -> [u8; TABLE_REF_SIZE] {
        let mut out = [0u8; TABLE_REF_SIZE];
        out[0..4].copy_from_slice(&encode_u32(self.offset));
        out[4..8].copy_from_slice(&encode_u32(self.num));
        out
    }

    pub(crate) fn decode_at(buf: &[u8], pos: usize) -> Option<Self> {
        Some(Self {
            offset: read_u32_at(buf, pos)?,
            num: read_u32_at(buf, pos + 4)?,
        })
    }

    /// Byte position of entry `index` inside a chunk.
    #[must_use]
    pub fn position(index: usize) -> usize {
        HEADER_SIZE + index * TABLE_REF_SIZE
    }
}

/// A bucket slot. An offset of zero marks the slot as empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Slot {
    pub hash: u32,
    pub offset: u32,
}

impl Slot {
    #[must_use]
    pub fn is_occupied(&self) -> bool {
        self.offset != 0
    }

    #[must_use]
    pub fn encode(&self) -> [u8; SLOT_SIZE] {
        let mut out = [0u8; SLOT_SIZE];
        out[0..4].copy_from_slice(&encode_u32(self.hash));
        out[4..8].copy_from_slice(&encode_u32(self.offset));
        out
    }

    pub(crate) fn decode_at(buf: &[u8], pos: usize) -> Option<Self> {
        Some(Self {
            hash: read_u32_at(buf, pos)?,
            offset: read_u32_at(buf, pos + 4)?,
        })
    }
}

/// Encodes the fixed prefix of a record; the key bytes and NUL follow it.
#[must_use]
pub fn encode_record_prefix(id: i32, key_len_with_nul: u32) -> [u8; RECORD_PREFIX_SIZE] {
    let mut out = [0u8; RECORD_PREFIX_SIZE];
    out[0..4].copy_from_slice(&id.to_le_bytes());
    out[4..8].copy_from_slice(&encode_u32(key_len_with_nul));
    out
}

/// Decodes the record at `offset`, returning its id and key bytes without
/// the trailing terminator.
pub(crate) fn decode_record(buf: &[u8], offset: u32) -> Option<(i32, &[u8])> {
    let pos = offset as usize;
    if pos < CHUNK_PREFIX_SIZE || pos >= buf.len() {
        return None;
    }
    let id = i32::from_le_bytes(buf.get(pos..pos + 4)?.try_into().ok()?);
    let ksize = read_u32_at(buf, pos + 4)? as usize;
    if ksize == 0 {
        return None;
    }
    let start = pos + RECORD_PREFIX_SIZE;
    let key = buf.get(start..start.checked_add(ksize)?)?;
    Some((id, &key[..ksize - 1]))
}
