//! Lazy, pull-driven streaming ZIP (with ZIP64) encoder over heterogeneous
//! byte sources.
//!
//! The archive is produced as a `futures::Stream` of `Bytes` chunks; no
//! entry's payload and no prefix of the archive is ever materialized in
//! memory beyond what a downstream consumer has not yet pulled. Compression
//! is intentionally out of scope: every entry is stored (method 0).

mod binio;
mod crc;
mod datetime;
mod entry;
mod error;
mod orchestrator;
mod predictor;
mod pump;
mod record;
mod resume;

pub use entry::{ByteSource, EntryInput, EntryName, EntrySource, EntrySourceStream, ZipOptions};
pub use error::{BoxError, ZipError};
pub use orchestrator::ZipStream;
pub use predictor::{predict_size, PredictorItem};
pub use resume::{AbortSignal, CentralDirectorySnapshot, EntryMetadata, ResumeState};

use futures::channel::oneshot;
use futures::Stream;

/// Resolves to every entry's final metadata once the archive stream has
/// been fully drained, or to the error that terminated it early.
pub type EntriesFuture = oneshot::Receiver<Result<Vec<EntryMetadata>, ZipError>>;

/// Builds a ZIP stream from an eagerly-known list of entries.
pub fn make_zip(entries: Vec<EntrySource>, options: ZipOptions) -> ZipStream {
    ZipStream::new(Box::pin(futures::stream::iter(entries.into_iter().map(Ok))), options)
}

/// Builds a ZIP stream from a lazily-produced, possibly-fallible sequence of
/// entries: the stream is polled one item at a time as the archive is
/// drained, so callers can discover entries incrementally (and fail
/// mid-discovery, e.g. a directory walk that hits a permission error, or
/// suspend between items awaiting their own I/O, e.g. a paginated listing)
/// instead of collecting them into a `Vec` upfront. An `Err` item surfaces
/// on the output stream as `ZipError::IteratorFailure` and aborts the
/// archive; dropping the returned `ZipStream` drops this entry stream too,
/// which is this crate's cancel hook for whatever cleanup the stream's own
/// `Drop` impl performs.
pub fn make_zip_iterator(
    entries: impl Stream<Item = Result<EntrySource, BoxError>> + Send + 'static,
    options: ZipOptions,
) -> ZipStream {
    ZipStream::new(Box::pin(entries), options)
}

/// Like `make_zip`, but also returns a future resolving to every entry's
/// metadata once the archive is fully written, or to the terminal error.
pub fn make_zip_with_entries(entries: Vec<EntrySource>, options: ZipOptions) -> (ZipStream, EntriesFuture) {
    ZipStream::with_entries_future(Box::pin(futures::stream::iter(entries.into_iter().map(Ok))), options)
}

/// Resumes a previously paused archive from a `ResumeState` snapshot.
/// `entries` supplies only the items that had not yet been written when the
/// archive was paused; the snapshot itself carries no index into the
/// original list.
pub fn resume_zip(
    entries: Vec<EntrySource>,
    options: ZipOptions,
    abort: AbortSignal,
    resume: ResumeState,
) -> ZipStream {
    ZipStream::resuming(Box::pin(futures::stream::iter(entries.into_iter().map(Ok))), options, abort, resume)
}
