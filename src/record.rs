//! Pure functions assembling each ZIP record byte-for-byte.
//!
//! Every record is built as a flat sequence of little-endian field writes
//! into a `BytesMut`, then frozen, with data descriptors, the UTF-8 name
//! flag, and independent per-field ZIP64 sentinels layered on top.

use bytes::{Bytes, BytesMut};

use crate::binio::{overflows_u32, put_bytes, put_u16, put_u32, put_u64, put_u8, sentinel_u32};
use crate::datetime::dos_date_time;
use crate::entry::Entry;

const VERSION_NEEDED: u16 = 0x002D; // 4.5, ZIP64-capable
const VERSION_MADE_BY: u16 = 0x032D; // unix host, 4.5
const ZIP64_EXTRA_TAG: u16 = 0x0001;

pub const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;
pub const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x0807_4b50;
pub const CENTRAL_HEADER_SIGNATURE: u32 = 0x0201_4b50;
pub const ZIP64_EOCD_SIGNATURE: u32 = 0x0606_4b50;
pub const ZIP64_LOCATOR_SIGNATURE: u32 = 0x0706_4b50;
pub const EOCD_SIGNATURE: u32 = 0x0605_4b50;

/// `headerSize = 30 + len(encodedName)`.
pub const LOCAL_HEADER_FIXED_SIZE: usize = 30;
pub const CENTRAL_HEADER_FIXED_SIZE: usize = 46;
pub const DATA_DESCRIPTOR_SIZE_32: usize = 16;
pub const DATA_DESCRIPTOR_SIZE_64: usize = 24;
pub const ZIP64_EXTRA_FIELD_SIZE: usize = 28; // 4-byte header + 24 bytes of data
pub const ZIP64_EOCD_RECORD_SIZE: usize = 56;
pub const ZIP64_LOCATOR_SIZE: usize = 20;
pub const EOCD_SIZE: usize = 22;

/// Builds the local file header for `entry`. Sizes/CRC are always zero
/// here (populated in the trailing data descriptor); `extra_flags` is
/// ORed into the general-purpose bit flag word.
pub fn local_file_header(entry: &Entry, extra_flags: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(LOCAL_HEADER_FIXED_SIZE + entry.encoded_name.len());

    put_u32(&mut buf, LOCAL_HEADER_SIGNATURE);
    put_u16(&mut buf, VERSION_NEEDED);
    put_u16(&mut buf, entry.general_purpose_flags(extra_flags));
    put_u16(&mut buf, 0); // compression method: STORE
    put_u32(&mut buf, dos_date_time(&entry.mod_date));
    put_u32(&mut buf, 0); // crc-32 (in data descriptor)
    put_u32(&mut buf, 0); // compressed size (in data descriptor)
    put_u32(&mut buf, 0); // uncompressed size (in data descriptor)
    put_u16(&mut buf, entry.encoded_name.len() as u16);
    put_u16(&mut buf, 0); // extra field length
    put_bytes(&mut buf, &entry.encoded_name);

    buf.freeze()
}

/// Builds the trailing data descriptor. Uses 64-bit size fields iff the
/// entry triggered per-entry ZIP64.
pub fn data_descriptor(crc: u32, compressed_size: u64, uncompressed_size: u64, zip64: bool) -> Bytes {
    let mut buf = BytesMut::with_capacity(if zip64 { DATA_DESCRIPTOR_SIZE_64 } else { DATA_DESCRIPTOR_SIZE_32 });

    put_u32(&mut buf, DATA_DESCRIPTOR_SIGNATURE);
    put_u32(&mut buf, crc);
    if zip64 {
        put_u64(&mut buf, compressed_size);
        put_u64(&mut buf, uncompressed_size);
    } else {
        put_u32(&mut buf, compressed_size as u32);
        put_u32(&mut buf, uncompressed_size as u32);
    }

    buf.freeze()
}

/// True iff any of the three size/offset values for this entry exceeds a
/// 32-bit field (the per-entry ZIP64 trigger rule).
pub fn entry_needs_zip64(uncompressed_size: u64, compressed_size: u64, local_header_offset: u64) -> bool {
    overflows_u32(uncompressed_size) || overflows_u32(compressed_size) || overflows_u32(local_header_offset)
}

/// Builds the central directory header for a completed entry.
#[allow(clippy::too_many_arguments)]
pub fn central_directory_header(
    entry: &Entry,
    extra_flags: u16,
    crc: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    local_header_offset: u64,
) -> Bytes {
    let needs_zip64 = entry_needs_zip64(uncompressed_size, compressed_size, local_header_offset);
    let extra_len = if needs_zip64 { ZIP64_EXTRA_FIELD_SIZE } else { 0 };
    let mut buf = BytesMut::with_capacity(CENTRAL_HEADER_FIXED_SIZE + entry.encoded_name.len() + extra_len);

    put_u32(&mut buf, CENTRAL_HEADER_SIGNATURE);
    put_u16(&mut buf, VERSION_MADE_BY);
    put_u16(&mut buf, VERSION_NEEDED);
    put_u16(&mut buf, entry.general_purpose_flags(extra_flags));
    put_u16(&mut buf, 0); // compression method: STORE
    put_u32(&mut buf, dos_date_time(&entry.mod_date));
    put_u32(&mut buf, crc);
    put_u32(&mut buf, sentinel_u32(compressed_size));
    put_u32(&mut buf, sentinel_u32(uncompressed_size));
    put_u16(&mut buf, entry.encoded_name.len() as u16);
    put_u16(&mut buf, extra_len as u16);
    put_u16(&mut buf, 0); // file comment length
    put_u16(&mut buf, 0); // disk number start
    put_u16(&mut buf, 0); // internal file attributes
    put_u32(&mut buf, entry.external_attributes());
    put_u32(&mut buf, sentinel_u32(local_header_offset));
    put_bytes(&mut buf, &entry.encoded_name);

    if needs_zip64 {
        put_bytes(&mut buf, &zip64_extra_field(uncompressed_size, compressed_size, local_header_offset));
    }

    buf.freeze()
}

/// The ZIP64 extended-information extra field (tag `0x0001`). All three
/// 64-bit values are always emitted together, even if only one overflows:
/// the byte layout the predictor and assembler must agree on.
pub fn zip64_extra_field(uncompressed_size: u64, compressed_size: u64, local_header_offset: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(ZIP64_EXTRA_FIELD_SIZE);

    put_u16(&mut buf, ZIP64_EXTRA_TAG);
    put_u16(&mut buf, 24); // size of this extra block's data
    put_u64(&mut buf, uncompressed_size);
    put_u64(&mut buf, compressed_size);
    put_u64(&mut buf, local_header_offset);

    buf.freeze()
}

/// The ZIP64 end-of-central-directory record.
pub fn zip64_eocd(num_entries: u64, central_directory_size: u64, central_directory_offset: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(ZIP64_EOCD_RECORD_SIZE);

    put_u32(&mut buf, ZIP64_EOCD_SIGNATURE);
    put_u64(&mut buf, (ZIP64_EOCD_RECORD_SIZE - 12) as u64); // size of record, after this field
    put_u16(&mut buf, VERSION_MADE_BY);
    put_u16(&mut buf, VERSION_NEEDED);
    put_u32(&mut buf, 0); // number of this disk
    put_u32(&mut buf, 0); // number of the disk with the start of the CD
    put_u64(&mut buf, num_entries); // entries on this disk
    put_u64(&mut buf, num_entries); // total entries
    put_u64(&mut buf, central_directory_size);
    put_u64(&mut buf, central_directory_offset);

    buf.freeze()
}

/// The ZIP64 end-of-central-directory locator.
pub fn zip64_locator(zip64_eocd_offset: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(ZIP64_LOCATOR_SIZE);

    put_u32(&mut buf, ZIP64_LOCATOR_SIGNATURE);
    put_u32(&mut buf, 0); // disk with the start of the zip64 EOCD
    put_u64(&mut buf, zip64_eocd_offset);
    put_u32(&mut buf, 1); // total number of disks

    buf.freeze()
}

/// The classic end-of-central-directory record, with `0xFFFF`/`0xFFFFFFFF`
/// sentinels when a field overflows its native width.
pub fn end_of_central_directory(num_entries: u64, central_directory_size: u64, central_directory_offset: u64) -> Bytes {
    use crate::binio::{overflows_u16, sentinel_u16};

    let mut buf = BytesMut::with_capacity(EOCD_SIZE);

    put_u32(&mut buf, EOCD_SIGNATURE);
    put_u16(&mut buf, 0); // number of this disk
    put_u16(&mut buf, 0); // number of the disk with the start of the CD
    let entries_16 = if overflows_u16(num_entries) { 0xFFFF } else { sentinel_u16(num_entries) };
    put_u16(&mut buf, entries_16); // entries on this disk
    put_u16(&mut buf, entries_16); // total entries
    put_u32(&mut buf, sentinel_u32(central_directory_size));
    put_u32(&mut buf, sentinel_u32(central_directory_offset));
    put_u16(&mut buf, 0); // comment length

    buf.freeze()
}

/// True iff the archive as a whole needs ZIP64 terminator records: any
/// entry triggered it, or the CD offset/size overflows 32 bits, or the
/// entry count overflows 16 bits.
pub fn archive_needs_zip64(
    any_entry_needed_zip64: bool,
    num_entries: u64,
    central_directory_size: u64,
    central_directory_offset: u64,
) -> bool {
    use crate::binio::overflows_u16;

    any_entry_needed_zip64
        || overflows_u16(num_entries)
        || overflows_u32(central_directory_size)
        || overflows_u32(central_directory_offset)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::entry::{normalize, EntryName, EntrySource, ZipOptions};
    use crate::entry::EntryInput;
    use chrono::{DateTime, Utc};

    fn appnote_entry() -> Entry {
        // Supplied as a raw byte name so the UTF-8 general-purpose bit
        // (bit 11) is clear by default unless explicitly requested. A real file
        // entry (not a folder) so bit 3 (data descriptor follows) is set.
        let source = EntrySource {
            name: EntryName::Raw(b"APPNOTE.TXT".to_vec()),
            input: EntryInput::Data {
                source: Box::pin(futures::stream::empty()),
                declared_size: Some(0),
                first_part_size: None,
                last_part_size: None,
            },
            last_modified: Some("2019-04-26T02:00:00Z".parse::<DateTime<Utc>>().unwrap()),
            mode: None,
        };
        normalize(source, &ZipOptions::default())
    }

    /// Local file header for APPNOTE.TXT, default options.
    #[test]
    fn s4_local_header_fields() {
        let entry = appnote_entry();
        let header = local_file_header(&entry, 0);

        assert_eq!(header.len(), LOCAL_HEADER_FIXED_SIZE + 11);
        assert_eq!(&header[0..4], &LOCAL_HEADER_SIGNATURE.to_le_bytes()); // 50 4b 03 04
        assert_eq!(&header[4..6], &VERSION_NEEDED.to_le_bytes()); // 2d 00
        assert_eq!(&header[6..8], &[0x08, 0x00]); // bit 3 only: data descriptor
        assert_eq!(&header[8..10], &[0x00, 0x00]); // method: STORE
        assert_eq!(&header[10..14], &[0x00, 0x10, 0x9a, 0x4e]); // mod time/date
        assert_eq!(&header[14..18], &[0; 4]); // crc, deferred
        assert_eq!(&header[18..22], &[0; 4]); // compressed size, deferred
        assert_eq!(&header[22..26], &[0; 4]); // uncompressed size, deferred
        assert_eq!(&header[26..28], &11u16.to_le_bytes()); // name length
        assert_eq!(&header[28..30], &0u16.to_le_bytes()); // extra length
        assert_eq!(&header[30..], b"APPNOTE.TXT");
    }

    /// An explicit extra-flags word ORs bit 11 in regardless
    /// of how the name was supplied.
    #[test]
    fn s5_extra_flags_set_bit_11() {
        let entry = appnote_entry();
        let header = local_file_header(&entry, 0x0808);
        assert_eq!(&header[6..8], &[0x08, 0x08]);
    }

    #[test]
    fn zip64_extra_field_layout() {
        let extra = zip64_extra_field(5_000_000_000, 5_000_000_000, 100);
        assert_eq!(extra.len(), ZIP64_EXTRA_FIELD_SIZE);
        assert_eq!(&extra[0..2], &ZIP64_EXTRA_TAG.to_le_bytes());
        assert_eq!(&extra[2..4], &24u16.to_le_bytes());
        assert_eq!(&extra[4..12], &5_000_000_000u64.to_le_bytes());
        assert_eq!(&extra[12..20], &5_000_000_000u64.to_le_bytes());
        assert_eq!(&extra[20..28], &100u64.to_le_bytes());
    }

    #[test]
    fn exactly_u32_max_minus_one_does_not_need_zip64() {
        assert!(!entry_needs_zip64(0xFFFF_FFFF, 0xFFFF_FFFF, 0));
    }

    #[test]
    fn exactly_two_pow_32_needs_zip64() {
        assert!(entry_needs_zip64(0x1_0000_0000, 0x1_0000_0000, 0));
    }

    #[test]
    fn eocd_uses_sentinels_past_16_bit_entry_count() {
        let eocd = end_of_central_directory(70_000, 10, 0);
        assert_eq!(&eocd[8..10], &0xFFFFu16.to_le_bytes());
        assert_eq!(&eocd[10..12], &0xFFFFu16.to_le_bytes());
    }

    #[test]
    fn empty_archive_eocd_has_zero_counts() {
        let eocd = end_of_central_directory(0, 0, 0);
        assert_eq!(eocd.len(), EOCD_SIZE);
        assert_eq!(&eocd[8..10], &0u16.to_le_bytes());
        assert_eq!(&eocd[12..16], &0u32.to_le_bytes());
    }
}
