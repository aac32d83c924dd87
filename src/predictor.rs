//! Pure, byte-exact final-archive-size prediction.
//!
//! Mirrors the layout `orchestrator.rs` actually emits: local header,
//! data (declared size), data descriptor, per entry; then the central
//! directory; then the ZIP64 terminator records (if triggered); then the
//! classic end-of-central-directory record. Must be kept in lockstep with
//! `record.rs`'s record sizes or byte-exact prediction breaks.

use crate::entry::ZipOptions;
use crate::record::{
    entry_needs_zip64, archive_needs_zip64, CENTRAL_HEADER_FIXED_SIZE, DATA_DESCRIPTOR_SIZE_32,
    DATA_DESCRIPTOR_SIZE_64, EOCD_SIZE, LOCAL_HEADER_FIXED_SIZE, ZIP64_EOCD_RECORD_SIZE,
    ZIP64_EXTRA_FIELD_SIZE, ZIP64_LOCATOR_SIZE,
};

/// The subset of an entry's shape the predictor needs: nothing that
/// requires draining a byte source.
pub struct PredictorItem {
    pub name_len: usize,
    pub is_file: bool,
    /// Required when `is_file` is true; ignored for directories. A `None`
    /// here on a file item makes the whole prediction `None` (unknown).
    pub declared_size: Option<u64>,
}

/// Predicts the exact final archive length, or `None` if any file entry
/// lacks a declared size (the "unknown" case).
pub fn predict_size(items: &[PredictorItem], _options: &ZipOptions) -> Option<u64> {
    let mut offset: u64 = 0;
    let mut central_directory_size: u64 = 0;
    let mut any_entry_needed_zip64 = false;

    for item in items {
        let size = if item.is_file { item.declared_size? } else { 0 };
        let local_header_offset = offset;
        let needs_zip64 = entry_needs_zip64(size, size, local_header_offset);
        any_entry_needed_zip64 |= needs_zip64;

        let local_header_size = (LOCAL_HEADER_FIXED_SIZE + item.name_len) as u64;
        offset += local_header_size;

        if item.is_file {
            offset += size;
            offset += if needs_zip64 { DATA_DESCRIPTOR_SIZE_64 } else { DATA_DESCRIPTOR_SIZE_32 } as u64;
        }

        let extra_len = if needs_zip64 { ZIP64_EXTRA_FIELD_SIZE } else { 0 };
        central_directory_size += (CENTRAL_HEADER_FIXED_SIZE + item.name_len + extra_len) as u64;
    }

    let central_directory_offset = offset;
    let num_entries = items.len() as u64;
    let needs_archive_zip64 = archive_needs_zip64(
        any_entry_needed_zip64,
        num_entries,
        central_directory_size,
        central_directory_offset,
    );

    let mut total = offset + central_directory_size;
    if needs_archive_zip64 {
        total += (ZIP64_EOCD_RECORD_SIZE + ZIP64_LOCATOR_SIZE) as u64;
    }
    total += EOCD_SIZE as u64;

    Some(total)
}
