use std::io;

pub(crate) mod codes {
    pub const INVALID_ID: &str = "CQ100";
    pub const OUT_OF_MEMORY: &str = "CQ101";
    pub const FILE_IO: &str = "CQ110";
    pub const CHUNK_TOO_LARGE: &str = "CQ120";
    pub const POISONED: &str = "CQ130";
    pub const MALFORMED: &str = "CQ200";
}

/// Errors surfaced while building a chunk.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("[CQ100] identifier {0} is negative")]
    InvalidId(i32),
    #[error("[CQ101] out of memory while growing the {0} table")]
    OutOfMemory(&'static str),
    #[error("[CQ110] failed to write chunk data: {0}")]
    FileWrite(#[source] io::Error),
    #[error("[CQ110] failed to seek within the output stream: {0}")]
    FileSeek(#[source] io::Error),
    #[error("[CQ110] failed to query the output stream position: {0}")]
    FileTell(#[source] io::Error),
    #[error("[CQ120] chunk exceeds the 4 GiB offset range ({0} bytes)")]
    ChunkTooLarge(u64),
    #[error("[CQ130] writer is unusable after an earlier failure: {0}")]
    Poisoned(String),
}

impl Error {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidId(_) => codes::INVALID_ID,
            Self::OutOfMemory(_) => codes::OUT_OF_MEMORY,
            Self::FileWrite(_) | Self::FileSeek(_) | Self::FileTell(_) => codes::FILE_IO,
            Self::ChunkTooLarge(_) => codes::CHUNK_TOO_LARGE,
            Self::Poisoned(_) => codes::POISONED,
        }
    }
}

/// Reasons a buffer is refused by [`crate::Reader::open`].
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum OpenError {
    #[error("[CQ200] buffer holds {actual} bytes, a chunk needs at least {required}")]
    TooSmall { required: usize, actual: usize },
    #[error("[CQ200] unrecognized chunk magic {found:?}")]
    BadMagic { found: [u8; 4] },
    #[error("[CQ200] byte-order check mismatch (expected {expected:#010x}, found {found:#010x})")]
    ByteOrder { expected: u32, found: u32 },
    #[error("[CQ200] chunk declares {declared} bytes but {available} are available")]
    SizeMismatch { declared: u32, available: usize },
    #[error("[CQ200] {what} at offset {offset} runs past the end of the chunk")]
    Truncated { what: &'static str, offset: u32 },
}

impl OpenError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        codes::MALFORMED
    }
}

pub type Result<T> = std::result::Result<T, Error>;
