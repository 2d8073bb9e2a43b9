#![forbid(unsafe_code)]
//! MINIX `ar` archive headers.
//!
//! An archive is a two-byte magic followed by members, each a 26-byte
//! header, `size` payload bytes and one pad byte when `size` is odd so the
//! next header starts word-aligned.

use crate::layout::{Field, FieldWidth, RecordLayout};
use mfs_types::{
    ByteOrder, MINIX_ARCHIVE_HEADER_SIZE, MINIX_ARCHIVE_MAGIC, MINIX_ARCHIVE_NAME_LEN,
    MINIX_ARCHIVE_SYMDEF, ParseError, ascii_name,
};
use serde::{Deserialize, Serialize};

/// `struct ar_hdr`. `ar_date` and `ar_size` are stored as two 16-bit
/// halves, high half first, each in the archive's byte order.
pub static AR_HEADER_LAYOUT: RecordLayout = RecordLayout {
    name: "ar_hdr",
    size: MINIX_ARCHIVE_HEADER_SIZE,
    fields: &[
        Field::new("ar_name", 0, FieldWidth::Bytes(MINIX_ARCHIVE_NAME_LEN)),
        Field::new("ar_date_hi", 14, FieldWidth::U16),
        Field::new("ar_date_lo", 16, FieldWidth::U16),
        Field::new("ar_uid", 18, FieldWidth::U8),
        Field::new("ar_gid", 19, FieldWidth::U8),
        Field::new("ar_mode", 20, FieldWidth::U16),
        Field::new("ar_size_hi", 22, FieldWidth::U16),
        Field::new("ar_size_lo", 24, FieldWidth::U16),
    ],
};

/// Check the two-byte archive magic at the start of `data`.
pub fn parse_archive_magic(data: &[u8], order: ByteOrder) -> Result<(), ParseError> {
    let magic = order.read_u16(data, 0)?;
    if magic != MINIX_ARCHIVE_MAGIC {
        return Err(ParseError::InvalidMagic {
            expected: u64::from(MINIX_ARCHIVE_MAGIC),
            actual: u64::from(magic),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArHeader {
    pub name: String,
    pub date: u32,
    pub uid: u8,
    pub gid: u8,
    pub mode: u16,
    pub size: u32,
}

impl ArHeader {
    pub fn parse(record: &[u8], order: ByteOrder) -> Result<Self, ParseError> {
        let view = AR_HEADER_LAYOUT.view(record, order)?;
        Ok(Self {
            name: ascii_name(view.bytes("ar_name")?, "ar_name")?.to_owned(),
            date: view.split_u32("ar_date_hi", "ar_date_lo")?,
            uid: view.u8("ar_uid")?,
            gid: view.u8("ar_gid")?,
            mode: view.u16("ar_mode")?,
            size: view.split_u32("ar_size_hi", "ar_size_lo")?,
        })
    }

    /// 1 when the payload is odd-sized, else 0.
    #[must_use]
    pub fn pad_size(&self) -> u32 {
        self.size & 1
    }

    /// Whether this member is the ranlib symbol index.
    #[must_use]
    pub fn is_symdef(&self) -> bool {
        self.name == MINIX_ARCHIVE_SYMDEF
    }
}
