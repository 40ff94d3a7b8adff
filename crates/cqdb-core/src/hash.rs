//! Key hashing.
//!
//! Writers and readers must agree on the exact function and seed; the default
//! is Bob Jenkins' lookup3 `hashlittle` with seed 0, hashed over the key bytes
//! followed by a NUL terminator.

/// A 32-bit hash over raw key bytes.
pub trait KeyHasher {
    fn hash(&self, bytes: &[u8]) -> u32;
}

/// lookup3 `hashlittle`, byte-at-a-time so the result never depends on the
/// host's alignment or endianness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Lookup3 {
    pub seed: u32,
}

impl Lookup3 {
    #[must_use]
    pub const fn with_seed(seed: u32) -> Self {
        Self { seed }
    }
}

impl KeyHasher for Lookup3 {
    fn hash(&self, bytes: &[u8]) -> u32 {
        hashlittle(bytes, self.seed)
    }
}

impl<H: KeyHasher + ?Sized> KeyHasher for &H {
    fn hash(&self, bytes: &[u8]) -> u32 {
        (**self).hash(bytes)
    }
}

#[inline]
fn mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    *a = a.wrapping_sub(*c);
    *a ^= c.rotate_left(4);
    *c = c.wrapping_add(*b);
    *b = b.wrapping_sub(*a);
    *b ^= a.rotate_left(6);
    *a = a.wrapping_add(*c);
    *c = c.wrapping_sub(*b);
    *c ^= b.rotate_left(8);
    *b = b.wrapping_add(*a);
    *a = a.wrapping_sub(*c);
    *a ^= c.rotate_left(16);
    *c = c.wrapping_add(*b);
    *b = b.wrapping_sub(*a);
    *b ^= a.rotate_left(19);
    *a = a.wrapping_add(*c);
    *c = c.wrapping_sub(*b);
    *c ^= b.rotate_left(4);
    *b = b.wrapping_add(*a);
}

#[inline]
fn finish(a: &mut u32, b: &mut u32, c: &mut u32) {
    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(14));
    *a ^= *c;
    *a = a.wrapping_sub(c.rotate_left(11));
    *b ^= *a;
    *b = b.wrapping_sub(a.rotate_left(25));
    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(16));
    *a ^= *c;
    *a = a.wrapping_sub(c.rotate_left(4));
    *b ^= *a;
    *b = b.wrapping_sub(a.rotate_left(14));
    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(24));
}

#[inline]
fn word(block: &[u8]) -> u32 {
    let mut bytes = [0u8; 4];
    bytes[..block.len()].copy_from_slice(block);
    u32::from_le_bytes(bytes)
}

/// lookup3 `hashlittle(key, length, initval)`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn hashlittle(key: &[u8], seed: u32) -> u32 {
    let init = 0xdead_beef_u32
        .wrapping_add(key.len() as u32)
        .wrapping_add(seed);
    let (mut a, mut b, mut c) = (init, init, init);

    let mut rest = key;
    while rest.len() > 12 {
        a = a.wrapping_add(word(&rest[0..4]));
        b = b.wrapping_add(word(&rest[4..8]));
        c = c.wrapping_add(word(&rest[8..12]));
        mix(&mut a, &mut b, &mut c);
        rest = &rest[12..];
    }

    if rest.is_empty() {
        return c;
    }

    let mut tail = [0u8; 12];
    tail[..rest.len()].copy_from_slice(rest);
    a = a.wrapping_add(word(&tail[0..4]));
    b = b.wrapping_add(word(&tail[4..8]));
    c = c.wrapping_add(word(&tail[8..12]));
    finish(&mut a, &mut b, &mut c);
    c
}

/// Keys shorter than this are terminated on the stack.
const INLINE_KEY: usize = 64;

/// Hashes `key` the way chunks store it: key bytes followed by one NUL.
/// Only keys of `INLINE_KEY` bytes or more allocate.
pub(crate) fn hash_key<H: KeyHasher + ?Sized>(hasher: &H, key: &[u8]) -> u32 {
    if key.len() < INLINE_KEY {
        let mut buf = [0u8; INLINE_KEY];
        buf[..key.len()].copy_from_slice(key);
        return hasher.hash(&buf[..=key.len()]);
    }
    let mut buf = Vec::with_capacity(key.len() + 1);
    buf.extend_from_slice(key);
    buf.push(0);
    hasher.hash(&buf)
}
