use std::io::{Seek, SeekFrom, Write};
use std::num::NonZeroU32;

use tracing::{debug, trace, warn};

use crate::codec::{
    encode_record_prefix, encode_u32, Header, Slot, TableRef, BYTEORDER_CHECK, CHUNK_PREFIX_SIZE,
    FLAG_ONEWAY, NUM_TABLES, RECORD_PREFIX_SIZE, SLOT_SIZE,
};
use crate::error::{Error, Result};
use crate::hash::{hash_key, KeyHasher, Lookup3};

/// Options fixed at writer creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterOptions {
    /// Omit the backlink array; the chunk then only answers key → id.
    pub one_way: bool,
    /// Extra bits stored verbatim in the header flag word.
    pub flags: u32,
}

impl WriterOptions {
    #[must_use]
    pub fn one_way() -> Self {
        Self {
            one_way: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn chunk_flags(&self) -> u32 {
        if self.one_way {
            self.flags | FLAG_ONEWAY
        } else {
            self.flags & !FLAG_ONEWAY
        }
    }
}

/// Streams records into a chunk and seals it on [`Writer::close`].
///
/// The writer does not detect duplicate keys or duplicate ids; inserting
/// either twice produces a chunk whose lookups for them are unspecified.
pub struct Writer<W: Write + Seek, H: KeyHasher = Lookup3> {
    out: W,
    hasher: H,
    flags: u32,
    /// Absolute stream position of the chunk start.
    begin: u64,
    /// Offset of the next record, relative to `begin`.
    cur: u32,
    tables: Vec<Vec<Slot>>,
    backlinks: Option<Vec<Option<NonZeroU32>>>,
    backlink_num: u32,
    records: usize,
    failure: Option<String>,
}

impl<W: Write + Seek> Writer<W, Lookup3> {
    /// Starts a chunk at the stream's current position.
    ///
    /// # Errors
    /// Returns [`Error::FileTell`] or [`Error::FileSeek`] if the stream cannot
    /// report or move its cursor.
    pub fn create(out: W, options: WriterOptions) -> Result<Self> {
        Self::create_with_hasher(out, options, Lookup3::default())
    }
}

impl<W: Write + Seek, H: KeyHasher> Writer<W, H> {
    /// Starts a chunk that hashes keys with `hasher`. Readers must be opened
    /// with the same hasher.
    ///
    /// # Errors
    /// Returns [`Error::FileTell`] or [`Error::FileSeek`] if the stream cannot
    /// report or move its cursor.
    pub fn create_with_hasher(mut out: W, options: WriterOptions, hasher: H) -> Result<Self> {
        let begin = out.stream_position().map_err(Error::FileTell)?;
        out.seek(SeekFrom::Start(begin + CHUNK_PREFIX_SIZE as u64))
            .map_err(Error::FileSeek)?;
        debug!(begin, one_way = options.one_way, "chunk writer created");
        Ok(Self {
            out,
            hasher,
            flags: options.chunk_flags(),
            begin,
            cur: prefix_size(),
            tables: vec![Vec::new(); NUM_TABLES],
            backlinks: (!options.one_way).then(Vec::new),
            backlink_num: 0,
            records: 0,
            failure: None,
        })
    }

    /// Appends the association `key` ↔ `id`.
    ///
    /// Any error leaves the writer poisoned: later `put` calls and
    /// [`Writer::close`] return [`Error::Poisoned`].
    ///
    /// # Errors
    /// [`Error::InvalidId`] for negative ids, [`Error::OutOfMemory`] when a
    /// table cannot grow, [`Error::FileWrite`] when the record cannot be
    /// written, and [`Error::ChunkTooLarge`] when offsets would overflow.
    pub fn put(&mut self, key: impl AsRef<[u8]>, id: i32) -> Result<()> {
        if let Some(reason) = &self.failure {
            return Err(Error::Poisoned(reason.clone()));
        }
        let result = self.append(key.as_ref(), id);
        if let Err(err) = &result {
            warn!(id, error = %err, "chunk writer poisoned");
            self.failure = Some(err.to_string());
        }
        result
    }

    /// Number of records appended so far.
    #[must_use]
    pub fn num_records(&self) -> usize {
        self.records
    }

    /// Seals the chunk and hands the stream back, positioned at the end of
    /// the chunk so further chunks can follow it.
    ///
    /// # Errors
    /// [`Error::Poisoned`] if an earlier `put` failed (nothing is flushed);
    /// otherwise any stream failure while writing buckets, backlinks or the
    /// header. A failure here leaves the chunk unusable.
    pub fn close(mut self) -> Result<W> {
        if let Some(reason) = self.failure.take() {
            warn!(records = self.records, "discarding poisoned chunk writer");
            return Err(Error::Poisoned(reason));
        }

        let bucket_bytes: u64 = self
            .tables
            .iter()
            .map(|table| table.len() as u64 * 2 * SLOT_SIZE as u64)
            .sum();
        let backlink_bytes = match &self.backlinks {
            Some(_) => u64::from(self.backlink_num) * 4,
            None => 0,
        };
        let total = u64::from(self.cur) + bucket_bytes + backlink_bytes;
        let size = u32::try_from(total).map_err(|_| Error::ChunkTooLarge(total))?;

        for table in &self.tables {
            if table.is_empty() {
                continue;
            }
            let slots = distribute(table);
            let mut buf = Vec::with_capacity(slots.len() * SLOT_SIZE);
            for slot in &slots {
                buf.extend_from_slice(&slot.encode());
            }
            self.out.write_all(&buf).map_err(Error::FileWrite)?;
        }

        let refs = table_refs(&self.tables, self.cur);
        let mut backlink_offset = 0;
        let mut backlink_count = 0;
        if let Some(links) = &self.backlinks {
            if self.backlink_num > 0 {
                // Backlinks start right after the last bucket.
                backlink_offset = size - self.backlink_num * 4;
                backlink_count = self.backlink_num;
                let mut buf = Vec::with_capacity(self.backlink_num as usize * 4);
                for link in &links[..self.backlink_num as usize] {
                    buf.extend_from_slice(&encode_u32(link.map_or(0, NonZeroU32::get)));
                }
                self.out.write_all(&buf).map_err(Error::FileWrite)?;
            }
        }

        let end = self.out.stream_position().map_err(Error::FileTell)?;
        debug_assert_eq!(end - self.begin, u64::from(size));

        let header = Header {
            size,
            flags: self.flags,
            byteorder: BYTEORDER_CHECK,
            backlink_count,
            backlink_offset,
        };
        let mut prefix = Vec::with_capacity(CHUNK_PREFIX_SIZE);
        prefix.extend_from_slice(&header.encode());
        for entry in &refs {
            prefix.extend_from_slice(&entry.encode());
        }

        self.out
            .seek(SeekFrom::Start(self.begin))
            .map_err(Error::FileSeek)?;
        self.out.write_all(&prefix).map_err(Error::FileWrite)?;
        self.out
            .seek(SeekFrom::Start(end))
            .map_err(Error::FileSeek)?;

        debug!(
            records = self.records,
            size,
            buckets = refs.iter().filter(|entry| entry.offset != 0).count(),
            backlinks = backlink_count,
            "chunk sealed"
        );
        Ok(self.out)
    }

    fn append(&mut self, key: &[u8], id: i32) -> Result<()> {
        let hash = hash_key(&self.hasher, key);
        let index = u32::try_from(id).map_err(|_| Error::InvalidId(id))?;

        let ksize = key.len() as u64 + 1;
        let next = u64::from(self.cur) + RECORD_PREFIX_SIZE as u64 + ksize;
        let next = u32::try_from(next).map_err(|_| Error::ChunkTooLarge(next))?;
        #[allow(clippy::cast_possible_truncation)]
        let ksize = ksize as u32;

        let class = (hash % NUM_TABLES as u32) as usize;
        reserve_slot(&mut self.tables[class])?;
        if let Some(links) = &mut self.backlinks {
            reserve_backlink(links, index as usize)?;
        }

        let offset = self.cur;
        let mut record = Vec::with_capacity(RECORD_PREFIX_SIZE + ksize as usize);
        record.extend_from_slice(&encode_record_prefix(id, ksize));
        record.extend_from_slice(key);
        record.push(0);
        self.out.write_all(&record).map_err(Error::FileWrite)?;

        self.tables[class].push(Slot { hash, offset });
        if let Some(links) = &mut self.backlinks {
            links[index as usize] = NonZeroU32::new(offset);
            self.backlink_num = self.backlink_num.max(index + 1);
        }
        self.cur = next;
        self.records += 1;
        trace!(id, class, offset, "record appended");
        Ok(())
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn prefix_size() -> u32 {
    CHUNK_PREFIX_SIZE as u32
}

/// Grows a class table by `(capacity + 1) * 2` once it is full.
fn reserve_slot(table: &mut Vec<Slot>) -> Result<()> {
    if table.len() < table.capacity() {
        return Ok(());
    }
    let target = (table.capacity() + 1) * 2;
    table
        .try_reserve_exact(target - table.len())
        .map_err(|_| Error::OutOfMemory("bucket"))
}

/// Doubles the backlink array until `index` fits, zero-filling new slots.
fn reserve_backlink(links: &mut Vec<Option<NonZeroU32>>, index: usize) -> Result<()> {
    if index < links.len() {
        return Ok(());
    }
    let mut size = links.len();
    while size <= index {
        size = size.max(1) * 2;
    }
    links
        .try_reserve_exact(size - links.len())
        .map_err(|_| Error::OutOfMemory("backlink"))?;
    links.resize(size, None);
    Ok(())
}

/// Places a class's entries into `2 * len` slots by linear probing from
/// `(hash >> 8) % n`.
fn distribute(table: &[Slot]) -> Vec<Slot> {
    let n = table.len() * 2;
    let mut slots = vec![Slot::default(); n];
    for entry in table {
        let mut k = (entry.hash >> 8) as usize % n;
        while slots[k].is_occupied() {
            k = (k + 1) % n;
        }
        slots[k] = *entry;
    }
    slots
}

/// Replays bucket sizes from `first` to find where each bucket landed.
#[allow(clippy::cast_possible_truncation)]
fn table_refs(tables: &[Vec<Slot>], first: u32) -> Vec<TableRef> {
    let mut next = first;
    tables
        .iter()
        .map(|table| {
            if table.is_empty() {
                return TableRef::default();
            }
            let num = (table.len() * 2) as u32;
            let entry = TableRef { offset: next, num };
            next += num * SLOT_SIZE as u32;
            entry
        })
        .collect()
}
