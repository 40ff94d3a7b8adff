//! Constant quark database: an immutable, read-optimized dictionary that maps
//! strings to dense integer ids and back.
//!
//! A chunk is produced once by a [`Writer`] and then served by any number of
//! [`Reader`]s over the sealed bytes:
//!
//! ```
//! use std::io::Cursor;
//! use cqdb_core::{Reader, Writer, WriterOptions};
//!
//! let mut writer = Writer::create(Cursor::new(Vec::new()), WriterOptions::default())?;
//! writer.put("alpha", 10)?;
//! writer.put("beta", 20)?;
//! let bytes = writer.close()?.into_inner();
//!
//! let db = Reader::open(&bytes)?;
//! assert_eq!(db.to_id("beta"), Some(20));
//! assert_eq!(db.to_str(10), Some("alpha"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod codec;
pub mod error;
pub mod hash;
mod reader;
mod writer;

pub use error::{Error, OpenError, Result};
pub use hash::{hashlittle, KeyHasher, Lookup3};
pub use reader::Reader;
pub use writer::{Writer, WriterOptions};
