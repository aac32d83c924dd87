//! Accepts diverse input shapes from a caller and produces the uniform
//! `Entry` descriptor the rest of the pipeline operates on.

use std::pin::Pin;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;

use crate::error::BoxError;

/// A lazy byte producer backing a file entry's payload.
pub type ByteSource = Pin<Box<dyn Stream<Item = Result<Bytes, BoxError>> + Send>>;

/// A lazy, possibly-fallible producer of entries, polled one item at a time
/// as the archive is drained so a caller whose entry discovery itself needs
/// to await I/O (a paginated directory listing, say) can suspend between
/// items instead of blocking the executor.
pub type EntrySourceStream = Pin<Box<dyn Stream<Item = Result<EntrySource, BoxError>> + Send>>;

const DEFAULT_FILE_MODE: u32 = 0o664;
const DEFAULT_DIR_MODE: u32 = 0o775;

/// An archive entry's name, as supplied by the caller.
#[derive(Debug, Clone)]
pub enum EntryName {
    /// Text name; encoded to UTF-8 and (unless suppressed) flagged as such.
    Text(String),
    /// Opaque byte name; passed through unchanged, UTF-8 flag left clear
    /// unless the caller set `buffers_are_utf8`.
    Raw(Vec<u8>),
}

impl EntryName {
    fn encoded_bytes(&self) -> &[u8] {
        match self {
            EntryName::Text(s) => s.as_bytes(),
            EntryName::Raw(b) => b,
        }
    }

    fn is_buffer(&self) -> bool {
        matches!(self, EntryName::Raw(_))
    }
}

/// What an entry contains.
pub enum EntryInput {
    /// No payload; a folder entry (archive path conventionally ends `/`).
    Directory,
    /// A file's lazy byte source, with an optional declared size (used by
    /// the predictor and to decide per-entry ZIP64 before draining).
    Data {
        source: ByteSource,
        declared_size: Option<u64>,
        /// Reshapes the pump's output chunking to these boundaries instead
        /// of the source's natural chunk sizes.
        first_part_size: Option<u64>,
        last_part_size: Option<u64>,
    },
}

/// One item as supplied by the caller, before normalization.
pub struct EntrySource {
    pub name: EntryName,
    pub input: EntryInput,
    pub last_modified: Option<DateTime<Utc>>,
    pub mode: Option<u32>,
}

impl EntrySource {
    /// Convenience constructor for a directory entry.
    pub fn directory(name: impl Into<String>) -> Self {
        EntrySource {
            name: EntryName::Text(name.into()),
            input: EntryInput::Directory,
            last_modified: None,
            mode: None,
        }
    }

    /// Convenience constructor for an in-memory file entry.
    pub fn bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let declared_size = Some(data.len() as u64);
        let source: ByteSource = Box::pin(futures::stream::once(async move { Ok(data) }));
        EntrySource {
            name: EntryName::Text(name.into()),
            input: EntryInput::Data { source, declared_size, first_part_size: None, last_part_size: None },
            last_modified: None,
            mode: None,
        }
    }
}

/// Options recognized by `make_zip`/`make_zip_iterator`.
#[derive(Clone, Debug, Default)]
pub struct ZipOptions {
    /// If true, names supplied as raw bytes are also flagged UTF-8.
    pub buffers_are_utf8: bool,
    /// Extra general-purpose flag bits ORed into every local/central header.
    pub extra_flags: u16,
}

/// A normalized entry, ready for the record assembler and pump.
pub struct Entry {
    pub encoded_name: Vec<u8>,
    pub name_is_buffer: bool,
    pub is_file: bool,
    pub mod_date: DateTime<Utc>,
    pub mode: u32,
    pub byte_source: Option<ByteSource>,
    pub declared_size: Option<u64>,
    pub first_part_size: Option<u64>,
    pub last_part_size: Option<u64>,
    pub utf8_flag: bool,
}

impl Entry {
    pub fn general_purpose_flags(&self, extra_flags: u16) -> u16 {
        let mut flags: u16 = 0;
        if self.is_file {
            flags |= 1 << 3; // bit 3: sizes/CRC deferred to a data descriptor
        }
        if self.utf8_flag {
            flags |= 1 << 11;
        }
        flags | extra_flags
    }

    pub fn external_attributes(&self) -> u32 {
        (self.mode << 16) | if self.is_file { 0 } else { 0x10 }
    }
}

/// Normalizes a caller-supplied `EntrySource` into an `Entry`.
pub fn normalize(source: EntrySource, options: &ZipOptions) -> Entry {
    let is_file = matches!(source.input, EntryInput::Data { .. });
    let name_is_buffer = source.name.is_buffer();
    let utf8_flag = match &source.name {
        EntryName::Text(_) => true,
        EntryName::Raw(_) => options.buffers_are_utf8,
    };
    let encoded_name = source.name.encoded_bytes().to_vec();
    let mode = source.mode.unwrap_or(if is_file { DEFAULT_FILE_MODE } else { DEFAULT_DIR_MODE });
    let mod_date = source.last_modified.unwrap_or_else(Utc::now);

    let (byte_source, declared_size, first_part_size, last_part_size) = match source.input {
        EntryInput::Directory => (None, None, None, None),
        EntryInput::Data { source, declared_size, first_part_size, last_part_size } => {
            (Some(source), declared_size, first_part_size, last_part_size)
        }
    };

    Entry {
        encoded_name,
        name_is_buffer,
        is_file,
        mod_date,
        mode,
        byte_source,
        declared_size,
        first_part_size,
        last_part_size,
        utf8_flag,
    }
}
