use tracing::debug;

use crate::codec::{
    decode_record, read_u32_at, Header, Slot, TableRef, FLAG_ONEWAY, NUM_TABLES, SLOT_SIZE,
};
use crate::error::OpenError;
use crate::hash::{hash_key, KeyHasher, Lookup3};

/// Read-only view over a sealed chunk.
///
/// The reader borrows the caller's buffer; keys returned by
/// [`Reader::to_key`] point into that buffer and live as long as it does.
/// Bucket and backlink tables are copied out at open time, so queries never
/// touch the header again and a reader can be shared freely across threads.
pub struct Reader<'a, H: KeyHasher = Lookup3> {
    chunk: &'a [u8],
    header: Header,
    tables: Vec<Vec<Slot>>,
    backlinks: Vec<u32>,
    num: usize,
    hasher: H,
}

impl<'a> Reader<'a, Lookup3> {
    /// Opens the chunk at the start of `buffer`. Bytes past the chunk's
    /// declared size are ignored.
    ///
    /// # Errors
    /// Returns an [`OpenError`] when the buffer does not hold a well-formed
    /// chunk; no partially usable reader is ever returned.
    pub fn open(buffer: &'a [u8]) -> Result<Self, OpenError> {
        Self::open_with_hasher(buffer, Lookup3::default())
    }
}

impl<'a, H: KeyHasher> Reader<'a, H> {
    /// Opens a chunk that was written with `hasher`.
    ///
    /// # Errors
    /// Returns an [`OpenError`] when the buffer does not hold a well-formed
    /// chunk.
    pub fn open_with_hasher(buffer: &'a [u8], hasher: H) -> Result<Self, OpenError> {
        let header = Header::decode(buffer)?;
        let chunk = &buffer[..header.size as usize];

        let mut tables = Vec::with_capacity(NUM_TABLES);
        let mut num = 0usize;
        for index in 0..NUM_TABLES {
            let position = TableRef::position(index);
            let entry = TableRef::decode_at(chunk, position).ok_or(OpenError::Truncated {
                what: "table reference",
                offset: u32::try_from(position).unwrap_or(u32::MAX),
            })?;
            if entry.offset == 0 {
                tables.push(Vec::new());
                continue;
            }
            let slots = read_bucket(chunk, entry)?;
            num += slots.len() / 2;
            tables.push(slots);
        }

        let backlinks = if header.backlink_offset == 0 {
            Vec::new()
        } else {
            read_backlinks(chunk, &header)?
        };

        debug!(
            size = header.size,
            records = num,
            backlinks = backlinks.len(),
            "chunk opened"
        );
        Ok(Self {
            chunk,
            header,
            tables,
            backlinks,
            num,
            hasher,
        })
    }

    /// Looks up the id stored for `key`.
    #[must_use]
    pub fn to_id(&self, key: impl AsRef<[u8]>) -> Option<i32> {
        let key = key.as_ref();
        let hash = hash_key(&self.hasher, key);
        let table = &self.tables[hash as usize % NUM_TABLES];
        let n = table.len();
        if n == 0 {
            return None;
        }

        let mut k = (hash >> 8) as usize % n;
        for _ in 0..n {
            let slot = table[k];
            if !slot.is_occupied() {
                return None;
            }
            if slot.hash == hash {
                if let Some((id, stored)) = decode_record(self.chunk, slot.offset) {
                    if stored == key {
                        return Some(id);
                    }
                }
            }
            k = (k + 1) % n;
        }
        None
    }

    /// Returns the key stored for `id`, without its terminator.
    ///
    /// Always `None` for one-way chunks.
    #[must_use]
    pub fn to_key(&self, id: i32) -> Option<&'a [u8]> {
        let index = usize::try_from(id).ok()?;
        let offset = *self.backlinks.get(index)?;
        if offset == 0 {
            return None;
        }
        decode_record(self.chunk, offset).map(|(_, key)| key)
    }

    /// [`Reader::to_key`] for keys that are valid UTF-8.
    #[must_use]
    pub fn to_str(&self, id: i32) -> Option<&'a str> {
        self.to_key(id)
            .and_then(|key| std::str::from_utf8(key).ok())
    }

    /// Number of records in the chunk, computed at open time.
    #[must_use]
    pub fn num_records(&self) -> usize {
        self.num
    }

    /// Size of the chunk in bytes, header included. A chunk written right
    /// after this one in the same stream starts at this offset.
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.header.size as usize
    }

    #[must_use]
    pub fn flags(&self) -> u32 {
        self.header.flags
    }

    #[must_use]
    pub fn is_one_way(&self) -> bool {
        self.header.flags & FLAG_ONEWAY != 0
    }

    #[must_use]
    pub fn has_backlinks(&self) -> bool {
        !self.backlinks.is_empty()
    }

    /// Length of the backlink array, i.e. one past the highest stored id.
    #[must_use]
    pub fn backlink_count(&self) -> usize {
        self.backlinks.len()
    }

    /// Slot count of each of the 256 buckets, zero for absent buckets.
    #[must_use]
    pub fn bucket_sizes(&self) -> Vec<usize> {
        self.tables.iter().map(Vec::len).collect()
    }

    /// Every `(key, id)` pair, in bucket order.
    pub fn records(&self) -> impl Iterator<Item = (&'a [u8], i32)> + '_ {
        let chunk = self.chunk;
        self.tables
            .iter()
            .flatten()
            .filter(|slot| slot.is_occupied())
            .filter_map(move |slot| decode_record(chunk, slot.offset))
            .map(|(id, key)| (key, id))
    }
}

fn read_bucket(chunk: &[u8], entry: TableRef) -> Result<Vec<Slot>, OpenError> {
    let truncated = OpenError::Truncated {
        what: "bucket",
        offset: entry.offset,
    };
    let start = entry.offset as usize;
    let len = (entry.num as usize)
        .checked_mul(SLOT_SIZE)
        .ok_or_else(|| truncated.clone())?;
    if start.checked_add(len).map_or(true, |end| end > chunk.len()) {
        return Err(truncated);
    }
    (0..entry.num as usize)
        .map(|k| Slot::decode_at(chunk, start + k * SLOT_SIZE).ok_or_else(|| truncated.clone()))
        .collect()
}

fn read_backlinks(chunk: &[u8], header: &Header) -> Result<Vec<u32>, OpenError> {
    let truncated = OpenError::Truncated {
        what: "backlink array",
        offset: header.backlink_offset,
    };
    let start = header.backlink_offset as usize;
    let count = header.backlink_count as usize;
    let len = count.checked_mul(4).ok_or_else(|| truncated.clone())?;
    if start.checked_add(len).map_or(true, |end| end > chunk.len()) {
        return Err(truncated);
    }
    (0..count)
        .map(|i| read_u32_at(chunk, start + i * 4).ok_or_else(|| truncated.clone()))
        .collect()
}
