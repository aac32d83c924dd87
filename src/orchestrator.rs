//! The archive orchestrator: a hand-written `futures::Stream` state machine
//! assembling a complete ZIP byte-for-byte from a sequence of entries,
//! without ever materializing the archive.
//!
//! Deliberately not an `async fn`: pause/resume needs an
//! explicit enum of producer states so it can snapshot
//! "where we are" without a generator's opaque state, concatenating
//! precomputed `Bytes` parts generalizes into "drive one entry's
//! header/data/descriptor, then the next, then the central directory,
//! then the terminator records".

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::channel::oneshot;
use futures::Stream;
use log::{debug, trace, warn};

use crate::entry::{normalize, Entry, EntrySourceStream, ZipOptions};
use crate::error::ZipError;
use crate::pump::{FileDataPump, PartShaping};
use crate::record::{
    archive_needs_zip64, central_directory_header, data_descriptor, end_of_central_directory,
    entry_needs_zip64, local_file_header, zip64_eocd, zip64_locator,
};
use crate::resume::{AbortSignal, CentralDirectorySnapshot, EntryMetadata, ResumeState};

/// Per-entry producer state: `Pending` is folded into
/// `NextEntry`/`InEntry` below; an `ActiveEntry` only exists once an entry
/// has left `Pending`.
enum EntryPhase {
    /// `HeaderEmitted` is about to happen: the local header for this entry
    /// has not yet been returned from `poll_next`.
    HeaderPending,
    /// `DataStreaming`: draining the entry's byte source through the pump.
    Streaming(FileDataPump),
    /// `DataFinalized` → about to emit the trailing data descriptor.
    DescriptorPending { crc: u32, size: u64 },
}

struct ActiveEntry {
    entry: Entry,
    local_header_offset: u64,
}

/// Per-archive producer state.
enum ArchiveState {
    Idle,
    NextEntry,
    InEntry(ActiveEntry, EntryPhase),
    CentralDirectory { index: usize },
    Zip64Eocd,
    Zip64Locator,
    Eocd,
    Done,
    Aborted,
}

type OnEntry = Box<dyn FnMut(&EntryMetadata) + Send>;
type OnCentralRecordUpdate = Box<dyn FnMut(&CentralDirectorySnapshot) + Send>;

/// A lazy, pull-driven producer of ZIP bytes. Implements `futures::Stream`
/// directly; downstream consumers drive it by polling, one chunk at a time,
/// with no intermediate buffering of entry payloads, and never more than
/// one entry's byte source open at a time.
pub struct ZipStream {
    entries: EntrySourceStream,
    options: ZipOptions,
    abort: AbortSignal,

    offset: u64,
    num_entries: u64,
    any_entry_needed_zip64: bool,
    zip64_used: bool,
    central_directory_bytes: Vec<Bytes>,
    central_directory_size: u64,
    metadata: Vec<EntryMetadata>,

    on_entry: Option<OnEntry>,
    on_central_record_update: Option<OnCentralRecordUpdate>,
    metadata_tx: Option<oneshot::Sender<Result<Vec<EntryMetadata>, ZipError>>>,

    state: ArchiveState,
}

impl ZipStream {
    fn new_inner(
        entries: EntrySourceStream,
        options: ZipOptions,
        abort: AbortSignal,
        resume: Option<ResumeState>,
        metadata_tx: Option<oneshot::Sender<Result<Vec<EntryMetadata>, ZipError>>>,
    ) -> Self {
        let (offset, central_directory_bytes, central_directory_size, num_entries, any_entry_needed_zip64) = match resume {
            Some(r) => {
                let size = r.central_directory.bytes().len() as u64;
                (r.archive_offset, vec![r.central_directory.bytes()], size, r.previous_file_count, r.archive_needs_zip64)
            }
            None => (0, Vec::new(), 0, 0, false),
        };

        ZipStream {
            entries,
            options,
            abort,
            offset,
            num_entries,
            any_entry_needed_zip64,
            zip64_used: false,
            central_directory_bytes,
            central_directory_size,
            metadata: Vec::new(),
            on_entry: None,
            on_central_record_update: None,
            metadata_tx,
            state: ArchiveState::Idle,
        }
    }

    pub fn new(entries: EntrySourceStream, options: ZipOptions) -> Self {
        ZipStream::new_inner(entries, options, AbortSignal::new(), None, None)
    }

    pub fn with_abort(entries: EntrySourceStream, options: ZipOptions, abort: AbortSignal) -> Self {
        ZipStream::new_inner(entries, options, abort, None, None)
    }

    pub fn resuming(entries: EntrySourceStream, options: ZipOptions, abort: AbortSignal, resume: ResumeState) -> Self {
        ZipStream::new_inner(entries, options, abort, Some(resume), None)
    }

    pub fn with_entries_future(
        entries: EntrySourceStream,
        options: ZipOptions,
    ) -> (Self, oneshot::Receiver<Result<Vec<EntryMetadata>, ZipError>>) {
        let (tx, rx) = oneshot::channel();
        (ZipStream::new_inner(entries, options, AbortSignal::new(), None, Some(tx)), rx)
    }

    pub fn on_entry(&mut self, f: impl FnMut(&EntryMetadata) + Send + 'static) {
        self.on_entry = Some(Box::new(f));
    }

    pub fn on_central_record_update(&mut self, f: impl FnMut(&CentralDirectorySnapshot) + Send + 'static) {
        self.on_central_record_update = Some(Box::new(f));
    }

    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    /// A snapshot sufficient to resume this archive later. The caller is
    /// responsible for supplying the entries that have not yet been written
    /// to whichever `resume_zip`/`ZipStream::resuming` call consumes this
    /// state.
    pub fn snapshot(&self) -> ResumeState {
        ResumeState {
            archive_offset: self.offset,
            central_directory: CentralDirectorySnapshot::new(concat_bytes(&self.central_directory_bytes)),
            previous_file_count: self.num_entries,
            archive_needs_zip64: self.any_entry_needed_zip64,
        }
    }

    fn central_directory_snapshot(&self) -> CentralDirectorySnapshot {
        CentralDirectorySnapshot::new(concat_bytes(&self.central_directory_bytes))
    }

    fn finish_metadata_future(&mut self, result: Result<Vec<EntryMetadata>, ZipError>) {
        if let Some(tx) = self.metadata_tx.take() {
            let _ = tx.send(result);
        }
    }
}

fn concat_bytes(parts: &[Bytes]) -> Bytes {
    let mut buf = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
    for part in parts {
        buf.extend_from_slice(part);
    }
    Bytes::from(buf)
}

impl Stream for ZipStream {
    type Item = Result<Bytes, ZipError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.abort.is_aborted() && !matches!(this.state, ArchiveState::Done | ArchiveState::Aborted) {
                let reason = this.abort.reason();
                warn!("zip stream aborted: {:?}", reason);
                this.state = ArchiveState::Aborted;
                this.finish_metadata_future(Err(ZipError::aborted(reason.clone())));
                return Poll::Ready(Some(Err(ZipError::aborted(reason))));
            }

            match &mut this.state {
                ArchiveState::Aborted | ArchiveState::Done => return Poll::Ready(None),

                ArchiveState::Idle => {
                    this.state = ArchiveState::NextEntry;
                }

                ArchiveState::NextEntry => match Pin::new(&mut this.entries).poll_next(cx) {
                    Poll::Ready(Some(Ok(source))) => {
                        let entry = normalize(source, &this.options);
                        this.num_entries += 1;
                        let local_header_offset = this.offset;
                        this.state = ArchiveState::InEntry(
                            ActiveEntry { entry, local_header_offset },
                            EntryPhase::HeaderPending,
                        );
                    }
                    Poll::Ready(Some(Err(e))) => {
                        warn!("entry iterator failed: {}", e);
                        this.state = ArchiveState::Aborted;
                        let msg = e.to_string();
                        this.finish_metadata_future(Err(ZipError::IteratorFailure(msg.clone().into())));
                        return Poll::Ready(Some(Err(ZipError::IteratorFailure(e))));
                    }
                    Poll::Ready(None) => {
                        debug!("all entries drained, starting central directory ({} entries)", this.num_entries);
                        this.state = ArchiveState::CentralDirectory { index: 0 };
                    }
                    Poll::Pending => return Poll::Pending,
                },

                ArchiveState::InEntry(active, phase) => match phase {
                    EntryPhase::HeaderPending => {
                        let header = local_file_header(&active.entry, this.options.extra_flags);
                        this.offset += header.len() as u64;
                        trace!("emitted local header ({} bytes) at offset {}", header.len(), active.local_header_offset);

                        if active.entry.is_file {
                            let shaping = PartShaping {
                                first_part_size: active.entry.first_part_size,
                                last_part_size: active.entry.last_part_size,
                            };
                            let source = active
                                .entry
                                .byte_source
                                .take()
                                .expect("file entry normalized without a byte source");
                            *phase = EntryPhase::Streaming(FileDataPump::new(source, shaping));
                        } else {
                            *phase = EntryPhase::DescriptorPending { crc: 0, size: 0 };
                        }
                        return Poll::Ready(Some(Ok(header)));
                    }

                    EntryPhase::Streaming(pump) => match Pin::new(pump).poll_next(cx) {
                        Poll::Ready(Some(Ok(chunk))) => {
                            this.offset += chunk.len() as u64;
                            return Poll::Ready(Some(Ok(chunk)));
                        }
                        Poll::Ready(Some(Err(e))) => {
                            this.state = ArchiveState::Aborted;
                            let for_future = match &e {
                                ZipError::MalformedInput(msg) => ZipError::MalformedInput(msg.clone()),
                                ZipError::SourceFailure(_) => ZipError::SourceFailure(e.to_string().into()),
                                ZipError::Aborted { reason } => ZipError::Aborted { reason: reason.clone() },
                                ZipError::IteratorFailure(_) => ZipError::IteratorFailure(e.to_string().into()),
                            };
                            this.finish_metadata_future(Err(for_future));
                            return Poll::Ready(Some(Err(e)));
                        }
                        Poll::Ready(None) => {
                            let crc = pump.crc();
                            let size = pump.bytes_drained();
                            if let Some(declared) = active.entry.declared_size {
                                if declared != size {
                                    let msg = format!(
                                        "entry declared size {} but drained {} bytes",
                                        declared, size
                                    );
                                    warn!("{}", msg);
                                    this.state = ArchiveState::Aborted;
                                    this.finish_metadata_future(Err(ZipError::MalformedInput(msg.clone())));
                                    return Poll::Ready(Some(Err(ZipError::MalformedInput(msg))));
                                }
                            }
                            *phase = EntryPhase::DescriptorPending { crc, size };
                        }
                        Poll::Pending => return Poll::Pending,
                    },

                    EntryPhase::DescriptorPending { crc, size } => {
                        let (crc, size) = (*crc, *size);
                        let local_header_offset = active.local_header_offset;
                        let needs_zip64 = entry_needs_zip64(size, size, local_header_offset);
                        this.any_entry_needed_zip64 |= needs_zip64;

                        let mut descriptor = Bytes::new();
                        if active.entry.is_file {
                            descriptor = data_descriptor(crc, size, size, needs_zip64);
                            this.offset += descriptor.len() as u64;
                        }

                        let central_header = central_directory_header(
                            &active.entry,
                            this.options.extra_flags,
                            crc,
                            size,
                            size,
                            local_header_offset,
                        );
                        this.central_directory_size += central_header.len() as u64;
                        let header_size = (crate::record::LOCAL_HEADER_FIXED_SIZE + active.entry.encoded_name.len()) as u32;
                        this.central_directory_bytes.push(central_header);

                        let metadata = EntryMetadata {
                            filename: active.entry.encoded_name.clone(),
                            offset: local_header_offset,
                            data_offset: local_header_offset + header_size as u64,
                            compressed_size: size,
                            uncompressed_size: size,
                            crc32: crc,
                            compression_method: 0,
                            flags: active.entry.general_purpose_flags(this.options.extra_flags),
                            header_size,
                        };
                        if let Some(on_entry) = this.on_entry.as_mut() {
                            on_entry(&metadata);
                        }
                        if let Some(on_update) = this.on_central_record_update.as_mut() {
                            on_update(&this.central_directory_snapshot());
                        }
                        this.metadata.push(metadata);

                        this.state = ArchiveState::NextEntry;
                        if !descriptor.is_empty() {
                            return Poll::Ready(Some(Ok(descriptor)));
                        }
                        // Folder entries have no descriptor to emit; loop
                        // straight to the next entry (no data descriptors
                        // for folders, per the excluded-features list).
                    }
                },

                ArchiveState::CentralDirectory { index } => {
                    if *index < this.central_directory_bytes.len() {
                        let chunk = this.central_directory_bytes[*index].clone();
                        this.offset += chunk.len() as u64;
                        *index += 1;
                        return Poll::Ready(Some(Ok(chunk)));
                    }
                    let needs_zip64 = archive_needs_zip64(
                        this.any_entry_needed_zip64,
                        this.num_entries,
                        this.central_directory_size,
                        this.offset - this.central_directory_size,
                    );
                    this.zip64_used = needs_zip64;
                    this.state = if needs_zip64 { ArchiveState::Zip64Eocd } else { ArchiveState::Eocd };
                }

                ArchiveState::Zip64Eocd => {
                    let central_directory_offset = this.offset - this.central_directory_size;
                    let record = zip64_eocd(this.num_entries, this.central_directory_size, central_directory_offset);
                    this.offset += record.len() as u64;
                    this.state = ArchiveState::Zip64Locator;
                    return Poll::Ready(Some(Ok(record)));
                }

                ArchiveState::Zip64Locator => {
                    let zip64_eocd_offset = this.offset - crate::record::ZIP64_EOCD_RECORD_SIZE as u64;
                    let record = zip64_locator(zip64_eocd_offset);
                    this.offset += record.len() as u64;
                    this.state = ArchiveState::Eocd;
                    return Poll::Ready(Some(Ok(record)));
                }

                ArchiveState::Eocd => {
                    let zip64_trailer_size = if this.zip64_used {
                        (crate::record::ZIP64_EOCD_RECORD_SIZE + crate::record::ZIP64_LOCATOR_SIZE) as u64
                    } else {
                        0
                    };
                    let central_directory_offset = this.offset - this.central_directory_size - zip64_trailer_size;
                    let record = end_of_central_directory(this.num_entries, this.central_directory_size, central_directory_offset);
                    this.offset += record.len() as u64;
                    this.state = ArchiveState::Done;
                    debug!("archive complete: {} bytes, {} entries", this.offset, this.num_entries);
                    this.finish_metadata_future(Ok(this.metadata.clone()));
                    return Poll::Ready(Some(Ok(record)));
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::entry::{EntrySource, ZipOptions};
    use futures::StreamExt;

    async fn drain(stream: ZipStream) -> Vec<u8> {
        let mut out = Vec::new();
        let mut stream = Box::pin(stream);
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn small_archive_round_trips_through_zip_crate_layout() {
        let entries: Vec<EntrySource> = vec![
            EntrySource::bytes("foo.txt", &b"xx"[..]),
            EntrySource::directory("dir/"),
            EntrySource::bytes("bar.txt", &b"hello world"[..]),
        ];
        let stream = ZipStream::new(Box::pin(futures::stream::iter(entries.into_iter().map(Ok))), ZipOptions::default());
        let bytes = drain(stream).await;

        assert_eq!(&bytes[0..4], &crate::record::LOCAL_HEADER_SIGNATURE.to_le_bytes());
        assert!(bytes.windows(4).any(|w| w == crate::record::EOCD_SIGNATURE.to_le_bytes()));
        assert!(bytes.windows(4).any(|w| w == crate::record::CENTRAL_HEADER_SIGNATURE.to_le_bytes()));
    }

    #[tokio::test]
    async fn on_entry_callback_fires_once_per_entry_in_order() {
        let entries: Vec<EntrySource> = vec![
            EntrySource::bytes("a.txt", &b"1"[..]),
            EntrySource::bytes("b.txt", &b"22"[..]),
        ];
        let mut stream = ZipStream::new(Box::pin(futures::stream::iter(entries.into_iter().map(Ok))), ZipOptions::default());
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        stream.on_entry(move |m| seen_clone.lock().unwrap().push(m.filename.clone()));
        let _ = drain(stream).await;
        assert_eq!(*seen.lock().unwrap(), vec![b"a.txt".to_vec(), b"b.txt".to_vec()]);
    }

    #[tokio::test]
    async fn declared_size_mismatch_fails_with_malformed_input() {
        let source: crate::entry::ByteSource = Box::pin(futures::stream::once(async { Ok(Bytes::from_static(b"too long")) }));
        let bad = EntrySource {
            name: crate::entry::EntryName::Text("bad.txt".into()),
            input: crate::entry::EntryInput::Data { source, declared_size: Some(1), first_part_size: None, last_part_size: None },
            last_modified: None,
            mode: None,
        };
        let stream = ZipStream::new(Box::pin(futures::stream::once(async { Ok(bad) })), ZipOptions::default());
        let mut stream = Box::pin(stream);
        let mut saw_error = false;
        while let Some(chunk) = stream.next().await {
            if let Err(ZipError::MalformedInput(_)) = chunk {
                saw_error = true;
            }
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn iterator_failure_surfaces_as_iterator_failure_error() {
        let good = EntrySource::bytes("a.txt", &b"1"[..]);
        let boom: crate::error::BoxError = "directory walk failed".into();
        let entries = vec![Ok(good), Err(boom)];
        let stream = ZipStream::new(Box::pin(futures::stream::iter(entries)), ZipOptions::default());
        let mut stream = Box::pin(stream);
        let mut saw_iterator_failure = false;
        while let Some(chunk) = stream.next().await {
            if let Err(ZipError::IteratorFailure(_)) = chunk {
                saw_iterator_failure = true;
            }
        }
        assert!(saw_iterator_failure);
    }

    #[tokio::test]
    async fn abort_signal_stops_the_stream_with_an_aborted_error() {
        let entries: Vec<EntrySource> = vec![EntrySource::bytes("a.txt", &b"1"[..])];
        let mut stream = ZipStream::new(Box::pin(futures::stream::iter(entries.into_iter().map(Ok))), ZipOptions::default());
        let abort = stream.abort_signal();
        abort.abort(Some("caller cancelled".into()));
        let mut stream = Box::pin(stream);
        let first = stream.next().await.unwrap();
        assert!(matches!(first, Err(ZipError::Aborted { .. })));
    }

    #[tokio::test]
    async fn empty_archive_still_has_a_valid_eocd() {
        let stream =
            ZipStream::new(Box::pin(futures::stream::empty::<Result<EntrySource, crate::error::BoxError>>()), ZipOptions::default());
        let bytes = drain(stream).await;
        assert_eq!(bytes.len(), crate::record::EOCD_SIZE);
        assert_eq!(&bytes[0..4], &crate::record::EOCD_SIGNATURE.to_le_bytes());
    }

    const RESUME_SPECS: &[(&str, &[u8])] =
        &[("a.txt", b"alpha"), ("b.txt", b"bravo-bravo"), ("c.txt", b"charlie!"), ("d.txt", b"delta"), ("e.txt", b"echo!!")];

    fn resume_entries() -> Vec<EntrySource> {
        RESUME_SPECS.iter().map(|(name, data)| EntrySource::bytes(*name, data.to_vec())).collect()
    }

    /// Pausing after entry `k` and resuming with the remaining entries must
    /// byte-equal a single unpaused pass over the whole list.
    #[tokio::test]
    async fn pause_resume_equals_single_pass() {
        let full =
            drain(ZipStream::new(Box::pin(futures::stream::iter(resume_entries().into_iter().map(Ok))), ZipOptions::default()))
                .await;

        for k in 1..RESUME_SPECS.len() {
            let mut stream =
                ZipStream::new(Box::pin(futures::stream::iter(resume_entries().into_iter().map(Ok))), ZipOptions::default());
            let completed = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
            let snapshot = std::sync::Arc::new(std::sync::Mutex::new(None));
            {
                let completed = completed.clone();
                stream.on_entry(move |m| completed.lock().unwrap().push(m.clone()));
            }
            {
                let snapshot = snapshot.clone();
                stream.on_central_record_update(move |s| *snapshot.lock().unwrap() = Some(s.clone()));
            }

            let mut stream = Box::pin(stream);
            let mut phase1 = Vec::new();
            while let Some(chunk) = stream.next().await {
                phase1.extend_from_slice(&chunk.unwrap());
                if completed.lock().unwrap().len() == k {
                    break;
                }
            }

            let resume_state = ResumeState {
                archive_offset: phase1.len() as u64,
                central_directory: snapshot.lock().unwrap().clone().unwrap(),
                previous_file_count: k as u64,
                archive_needs_zip64: false,
            };
            let remaining: Vec<EntrySource> = resume_entries().into_iter().skip(k).collect();
            let phase2_stream = ZipStream::resuming(
                Box::pin(futures::stream::iter(remaining.into_iter().map(Ok))),
                ZipOptions::default(),
                AbortSignal::new(),
                resume_state,
            );
            let phase2 = drain(phase2_stream).await;

            let mut joined = phase1;
            joined.extend_from_slice(&phase2);
            assert_eq!(joined, full, "split at k={k} must byte-equal the unpaused archive");
        }
    }

    /// Crossing the 16-bit entry-count boundary must flip on the ZIP64
    /// terminator records (P7); staying under it must not.
    #[tokio::test]
    async fn entry_count_past_16_bit_boundary_uses_zip64_terminators() {
        let under = (0..10).map(|i| EntrySource::directory(format!("d{i}/"))).collect::<Vec<_>>();
        let bytes = drain(ZipStream::new(Box::pin(futures::stream::iter(under.into_iter().map(Ok))), ZipOptions::default())).await;
        assert!(!bytes.windows(4).any(|w| w == crate::record::ZIP64_EOCD_SIGNATURE.to_le_bytes()));

        let over = (0..70_000).map(|i| EntrySource::directory(format!("d{i}/"))).collect::<Vec<_>>();
        let bytes = drain(ZipStream::new(Box::pin(futures::stream::iter(over.into_iter().map(Ok))), ZipOptions::default())).await;
        assert!(bytes.windows(4).any(|w| w == crate::record::ZIP64_EOCD_SIGNATURE.to_le_bytes()));
        let eocd_pos = bytes.len() - crate::record::EOCD_SIZE;
        assert_eq!(&bytes[eocd_pos + 8..eocd_pos + 10], &0xFFFFu16.to_le_bytes());
    }

    /// Generates a small archive and checks it with external conformance
    /// tools, the same way a real-world ZIP reader would validate it.
    #[tokio::test]
    async fn conformance_checked_by_external_tools() {
        let entries: Vec<EntrySource> =
            vec![EntrySource::bytes("foo.txt", &b"xx"[..]), EntrySource::bytes("bar.txt", &b"Testing ZIP metadata!"[..])];
        let bytes = drain(ZipStream::new(Box::pin(futures::stream::iter(entries.into_iter().map(Ok))), ZipOptions::default())).await;

        let path = std::env::temp_dir().join("zip_stream_core_conformance_test.zip");
        std::fs::write(&path, &bytes).unwrap();

        for (tool, args) in [
            ("zipinfo", vec!["-v"]),
            ("unzip", vec!["-t"]),
            ("python3", vec!["-m", "zipfile", "-t"]),
        ] {
            match std::process::Command::new(tool).args(&args).arg(&path).status() {
                Ok(status) => assert!(status.success(), "{tool} reported the archive as invalid"),
                Err(_) => continue, // tool not installed in this environment; skip
            }
        }

        let _ = std::fs::remove_file(&path);
    }
}
