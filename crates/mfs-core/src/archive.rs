//! Sequential decoding of MINIX `ar` archives.

use crate::parse_error_to_mfs;
use mfs_error::{MfsError, Result};
use mfs_ondisk::{AR_HEADER_LAYOUT, ArHeader, parse_archive_magic};
use mfs_types::{ByteOrder, MINIX_ARCHIVE_HEADER_SIZE};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Size of the leading archive magic.
const MAGIC_LEN: usize = 2;

/// A decoded member header plus its position in the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub name: String,
    pub date: u32,
    pub uid: u8,
    pub gid: u8,
    pub mode: u16,
    pub size: u32,
    /// 1 after an odd-sized payload, else 0.
    pub pad_size: u32,
    pub header_offset: usize,
    pub data_offset: usize,
}

impl fmt::Display for ArchiveEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MinixArchiveEntry(name={},size={:08x},date={:08x})",
            self.name, self.size, self.date
        )
    }
}

/// An archive held in memory.
///
/// Walking only decodes headers; payloads are sliced out on demand by
/// [`read`](Self::read). Each [`ArchiveWalk`] owns its own position, so
/// several walks over one archive do not interfere.
#[derive(Debug, Clone, Copy)]
pub struct Archive<'a> {
    data: &'a [u8],
    order: ByteOrder,
}

impl<'a> Archive<'a> {
    /// Open a little-endian archive.
    pub fn new(data: &'a [u8]) -> Result<Self> {
        Self::with_byte_order(data, ByteOrder::Little)
    }

    /// Open an archive whose 16-bit fields use `order`.
    pub fn with_byte_order(data: &'a [u8], order: ByteOrder) -> Result<Self> {
        parse_archive_magic(data, order).map_err(|e| parse_error_to_mfs(&e))?;
        Ok(Self { data, order })
    }

    #[must_use]
    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    /// Iterate member headers, skipping the symbol table.
    #[must_use]
    pub fn walk(&self) -> ArchiveWalk<'a> {
        ArchiveWalk {
            data: self.data,
            order: self.order,
            pos: MAGIC_LEN,
            done: false,
        }
    }

    /// Exactly `entry.size` payload bytes.
    pub fn read(&self, entry: &ArchiveEntry) -> Result<&'a [u8]> {
        payload_range(self.data, entry.data_offset, entry.size)
            .map(|range| &self.data[range])
            .ok_or_else(|| truncated_payload(&entry.name, entry.size, entry.data_offset))
    }
}

fn payload_range(data: &[u8], start: usize, size: u32) -> Option<std::ops::Range<usize>> {
    let end = start.checked_add(usize::try_from(size).ok()?)?;
    (end <= data.len()).then_some(start..end)
}

fn truncated_payload(name: &str, size: u32, offset: usize) -> MfsError {
    MfsError::Truncated(format!(
        "archive member {name:?} declares {size} bytes at offset {offset} past end of stream"
    ))
}

/// Header iterator over an [`Archive`].
///
/// End of stream exactly at a header boundary ends the walk. End of stream
/// inside a header or a payload yields one `Truncated` error and ends it.
/// A member whose header is complete but whose name is not ASCII yields an
/// `Encoding` error; the walk then continues with the next member.
#[derive(Debug, Clone)]
pub struct ArchiveWalk<'a> {
    data: &'a [u8],
    order: ByteOrder,
    pos: usize,
    done: bool,
}

impl ArchiveWalk<'_> {
    fn fail(&mut self, err: MfsError) -> Option<Result<ArchiveEntry>> {
        self.done = true;
        Some(Err(err))
    }
}

impl Iterator for ArchiveWalk<'_> {
    type Item = Result<ArchiveEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            // A missing final pad byte leaves `pos` one past the end.
            if self.done || self.pos >= self.data.len() {
                self.done = true;
                return None;
            }

            let header_offset = self.pos;
            let Some(raw) = self
                .data
                .get(header_offset..header_offset + MINIX_ARCHIVE_HEADER_SIZE)
            else {
                return self.fail(MfsError::Truncated(format!(
                    "archive header at offset {header_offset} cut short after {} bytes",
                    self.data.len() - header_offset
                )));
            };

            let size = match AR_HEADER_LAYOUT
                .view(raw, self.order)
                .and_then(|view| view.split_u32("ar_size_hi", "ar_size_lo"))
            {
                Ok(size) => size,
                Err(e) => return self.fail(parse_error_to_mfs(&e)),
            };
            let data_offset = header_offset + MINIX_ARCHIVE_HEADER_SIZE;
            let Some(range) = payload_range(self.data, data_offset, size) else {
                let name = String::from_utf8_lossy(mfs_types::trim_nul_padded(&raw[..14]))
                    .into_owned();
                return self.fail(truncated_payload(&name, size, data_offset));
            };
            let pad = usize::from(size & 1 == 1);
            self.pos = range.end + pad;

            let header = match ArHeader::parse(raw, self.order) {
                Ok(header) => header,
                Err(e) => return Some(Err(parse_error_to_mfs(&e))),
            };

            if header.is_symdef() {
                debug!(
                    offset = header_offset,
                    size = header.size,
                    "skipping archive symbol table"
                );
                continue;
            }

            return Some(Ok(ArchiveEntry {
                pad_size: header.pad_size(),
                name: header.name,
                date: header.date,
                uid: header.uid,
                gid: header.gid,
                mode: header.mode,
                size: header.size,
                header_offset,
                data_offset,
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mfs_error::ErrorKind;
    use mfs_harness::{ArchiveBuilder, ArchiveMember};

    fn names(archive: &Archive<'_>) -> Vec<String> {
        archive.walk().map(|e| e.unwrap().name).collect()
    }

    #[test]
    fn odd_payload_is_followed_by_pad() {
        let bytes = ArchiveBuilder::new()
            .member("lib.o", b"abc".to_vec())
            .member("next.o", b"wxyz".to_vec())
            .build()
            .unwrap();
        let ar = Archive::new(&bytes).unwrap();
        let entries: Vec<_> = ar.walk().collect::<Result<_>>().unwrap();
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].name, "lib.o");
        assert_eq!(entries[0].pad_size, 1);
        assert_eq!(ar.read(&entries[0]).unwrap(), b"abc");

        // Second header sits right after the pad byte.
        assert_eq!(entries[1].header_offset, 2 + 26 + 3 + 1);
        assert_eq!(entries[1].pad_size, 0);
        assert_eq!(ar.read(&entries[1]).unwrap(), b"wxyz");
    }

    #[test]
    fn header_fields_are_decoded() {
        for order in [ByteOrder::Little, ByteOrder::Big] {
            let mut m = ArchiveMember::new("crt0.o", vec![1_u8; 70_000]);
            m.date = 0x1234_5678;
            m.uid = 2;
            m.gid = 3;
            m.mode = 0o100_755;
            let bytes = ArchiveBuilder::new()
                .with_byte_order(order)
                .push(m)
                .build()
                .unwrap();
            let ar = Archive::with_byte_order(&bytes, order).unwrap();
            let entry = ar.walk().next().unwrap().unwrap();
            assert_eq!(entry.date, 0x1234_5678);
            assert_eq!((entry.uid, entry.gid, entry.mode), (2, 3, 0o100_755));
            assert_eq!(entry.size, 70_000);
            assert_eq!(ar.read(&entry).unwrap().len(), 70_000);
            assert_eq!(
                entry.to_string(),
                "MinixArchiveEntry(name=crt0.o,size=00011170,date=12345678)"
            );
        }
    }

    #[test]
    fn symbol_table_is_never_yielded() {
        for size in [0_usize, 1, 2, 7] {
            let bytes = ArchiveBuilder::new()
                .symdef(vec![0xEE_u8; size])
                .member("a.o", b"A".to_vec())
                .symdef(vec![0xEE_u8; size])
                .member("b.o", b"BB".to_vec())
                .build()
                .unwrap();
            let ar = Archive::new(&bytes).unwrap();
            assert_eq!(names(&ar), ["a.o", "b.o"], "symdef size {size}");
        }
    }

    #[test]
    fn empty_archive_ends_normally() {
        let bytes = ArchiveBuilder::new().build().unwrap();
        let ar = Archive::new(&bytes).unwrap();
        assert_eq!(ar.walk().count(), 0);
    }

    #[test]
    fn wrong_magic() {
        let err = Archive::new(&[0x00, 0x00, 0x00]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        let err = Archive::new(&[0x2C]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Truncation);
        // Correct bytes, wrong order.
        assert!(Archive::with_byte_order(&[0x2C, 0xFF], ByteOrder::Big).is_err());
    }

    #[test]
    fn truncated_header() {
        let mut bytes = ArchiveBuilder::new()
            .member("a.o", b"AA".to_vec())
            .member("b.o", b"BB".to_vec())
            .build()
            .unwrap();
        bytes.truncate(bytes.len() - 2 - 10);
        let ar = Archive::new(&bytes).unwrap();
        let results: Vec<_> = ar.walk().collect();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap().name, "a.o");
        assert_eq!(
            results[1].as_ref().unwrap_err().kind(),
            ErrorKind::Truncation
        );
    }

    #[test]
    fn truncated_payload_ends_walk() {
        let mut bytes = ArchiveBuilder::new()
            .member("a.o", vec![9_u8; 100])
            .build()
            .unwrap();
        bytes.truncate(bytes.len() - 1);
        let ar = Archive::new(&bytes).unwrap();
        let results: Vec<_> = ar.walk().collect();
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].as_ref().unwrap_err().kind(),
            ErrorKind::Truncation
        );
    }

    #[test]
    fn missing_final_pad_is_tolerated() {
        let mut bytes = ArchiveBuilder::new()
            .member("odd.o", b"xyz".to_vec())
            .build()
            .unwrap();
        bytes.pop();
        let ar = Archive::new(&bytes).unwrap();
        assert_eq!(names(&ar), ["odd.o"]);
    }

    #[test]
    fn read_rejects_out_of_range_entry() {
        let bytes = ArchiveBuilder::new()
            .member("a.o", b"AA".to_vec())
            .build()
            .unwrap();
        let ar = Archive::new(&bytes).unwrap();
        let mut entry = ar.walk().next().unwrap().unwrap();
        entry.size = 1000;
        assert_eq!(ar.read(&entry).unwrap_err().kind(), ErrorKind::Truncation);
    }

    #[test]
    fn non_ascii_member_is_skipped_with_error() {
        let bytes = ArchiveBuilder::new()
            .member(b"\xFF.o".as_slice(), b"x".to_vec())
            .member("ok.o", b"y".to_vec())
            .build()
            .unwrap();
        let ar = Archive::new(&bytes).unwrap();
        let results: Vec<_> = ar.walk().collect();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap_err().kind(), ErrorKind::Encoding);
        assert_eq!(results[1].as_ref().unwrap().name, "ok.o");
    }

    #[test]
    fn walks_are_independent() {
        let bytes = ArchiveBuilder::new()
            .member("a", b"1".to_vec())
            .member("b", b"2".to_vec())
            .build()
            .unwrap();
        let ar = Archive::new(&bytes).unwrap();
        let mut first = ar.walk();
        assert_eq!(first.next().unwrap().unwrap().name, "a");
        assert_eq!(names(&ar), ["a", "b"]);
        assert_eq!(first.next().unwrap().unwrap().name, "b");
        assert!(first.next().is_none());
    }
}
