//! Pause/resume snapshotting and cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;

/// Per-entry metadata made available once an entry has been fully written,
/// via `onEntry`/the `EntriesFuture` returned by `make_zip_with_entries`
/// once an entry has been fully written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryMetadata {
    pub filename: Vec<u8>,
    pub offset: u64,
    pub data_offset: u64,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub compression_method: u16,
    pub flags: u16,
    pub header_size: u32,
}

/// An immutable snapshot of the central directory bytes accumulated so
/// far. `Bytes` is refcounted, so cloning before handing a snapshot to a
/// caller callback is cheap and the caller can never observe later
/// mutation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CentralDirectorySnapshot(Bytes);

impl CentralDirectorySnapshot {
    pub fn new(bytes: Bytes) -> Self {
        CentralDirectorySnapshot(bytes)
    }

    /// A cheap, independent clone of the snapshot's bytes.
    pub fn bytes(&self) -> Bytes {
        self.0.clone()
    }
}

/// Everything needed to resume a paused archive: where the byte stream
/// left off, what the central directory looked like at that point, how
/// many entries had already been fully written, and whether any of them
/// had already required ZIP64. The caller passes the remaining entries
/// separately (to whichever `resume_zip`/`ZipStream::resuming` call takes
/// this state), so this struct itself stays the lean, serializable O(1)
/// pause state spec.md §6's `resume` option describes, not a copy of every
/// completed entry's metadata.
#[derive(Clone, Debug)]
pub struct ResumeState {
    pub archive_offset: u64,
    pub central_directory: CentralDirectorySnapshot,
    pub previous_file_count: u64,
    pub archive_needs_zip64: bool,
}

/// A cooperative cancellation token, checked at entry boundaries and pump
/// iterations (no bespoke cancellation-token crate is pulled in just for
/// this).
#[derive(Clone, Debug, Default)]
pub struct AbortSignal {
    aborted: Arc<AtomicBool>,
    reason: Arc<Mutex<Option<String>>>,
}

impl AbortSignal {
    pub fn new() -> Self {
        AbortSignal::default()
    }

    pub fn abort(&self, reason: Option<String>) {
        *self.reason.lock().unwrap() = reason;
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn abort_signal_starts_clear_and_reports_reason_once_aborted() {
        let signal = AbortSignal::new();
        assert!(!signal.is_aborted());
        signal.abort(Some("caller cancelled".into()));
        assert!(signal.is_aborted());
        assert_eq!(signal.reason().as_deref(), Some("caller cancelled"));
    }

    #[test]
    fn abort_signal_clones_share_state() {
        let signal = AbortSignal::new();
        let clone = signal.clone();
        signal.abort(None);
        assert!(clone.is_aborted());
    }

    #[test]
    fn central_directory_snapshot_clone_is_independent_value() {
        let snapshot = CentralDirectorySnapshot::new(Bytes::from_static(b"central directory bytes"));
        let clone = snapshot.clone();
        assert_eq!(snapshot.bytes(), clone.bytes());
    }

    #[test]
    fn resume_state_carries_all_four_fields() {
        let state = ResumeState {
            archive_offset: 1024,
            central_directory: CentralDirectorySnapshot::new(Bytes::from_static(b"cd")),
            previous_file_count: 1,
            archive_needs_zip64: false,
        };
        assert_eq!(state.archive_offset, 1024);
        assert_eq!(state.previous_file_count, 1);
        assert!(!state.archive_needs_zip64);
    }
}
