//! `shale`: an embedded, crash-safe, log-structured key-value storage engine.
//!
//! Every write is appended to an immutable, CRC-checked record in the active
//! data file; an in-memory (or durable) index maps each live key straight to
//! its byte offset. Recovery replays the data files in file-id order; `Merge`
//! periodically rewrites the still-live records into a compact new generation
//! of files. See [`Engine`] for the primary entry point.

mod batch;
mod data_file;
mod engine;
mod error;
mod index;
mod io;
mod iterator;
mod merge;
mod options;
mod record;
mod varint;

pub use batch::WriteBatch;
pub use engine::{Engine, Stat};
pub use error::{Error, Result};
pub use iterator::Iterator;
pub use options::{IndexType, IteratorOptions, Options, WriteBatchOptions};
