#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ── MINIX v1 filesystem constants ───────────────────────────────────────────

/// Block size used by every MINIX v1 image we have seen in the wild.
pub const MINIX_BLOCK_SIZE: u32 = 1024;
/// Block 0 is the boot block; the superblock always lives in block 1.
pub const MINIX_SUPER_BLOCK: BlockNumber = BlockNumber(1);
/// `s_magic` for a v1 filesystem with 14-byte names.
pub const MINIX_SUPER_MAGIC: u16 = 0x137F;
/// `s_state` value written by a clean unmount.
pub const MINIX_VALID_FS: u16 = 0x0001;
/// On-disk size of one v1 inode record.
pub const MINIX_V1_INODE_SIZE: usize = 32;
/// On-disk size of one v1 directory entry.
pub const MINIX_V1_DIR_ENTRY_SIZE: usize = 16;
/// Maximum name length stored in a v1 directory entry.
pub const MINIX_V1_NAME_LEN: usize = 14;
/// Number of direct zone slots in a v1 inode.
pub const MINIX_V1_DIRECT_ZONES: usize = 7;

// ── MINIX archive constants ─────────────────────────────────────────────────

/// Two-byte magic at the start of a MINIX `ar` archive.
pub const MINIX_ARCHIVE_MAGIC: u16 = 0xFF2C;
/// Size of one archive member header.
pub const MINIX_ARCHIVE_HEADER_SIZE: usize = 26;
/// Maximum member name length.
pub const MINIX_ARCHIVE_NAME_LEN: usize = 14;
/// Reserved member name carrying the ranlib symbol index.
pub const MINIX_ARCHIVE_SYMDEF: &str = "__.SYMDEF";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockNumber(pub u64);

/// MINIX inode number (1-based; 0 marks an unused directory slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InodeNumber(pub u16);

/// Physical zone number. In v1 images a zone is exactly one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ZoneNumber(pub u16);

impl InodeNumber {
    pub const ROOT: Self = Self(1);

    #[must_use]
    pub fn is_unused(self) -> bool {
        self.0 == 0
    }
}

impl ZoneNumber {
    /// Zone 0 is never allocated to file data; it marks a hole.
    #[must_use]
    pub fn is_hole(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub fn to_block(self) -> BlockNumber {
        BlockNumber(u64::from(self.0))
    }
}

impl BlockNumber {
    /// Add a block count, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, count: u64) -> Option<Self> {
        self.0.checked_add(count).map(Self)
    }
}

/// Validated block size (must be a power of two in 512..=65536).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockSize(u32);

impl BlockSize {
    pub const MINIX: Self = Self(MINIX_BLOCK_SIZE);

    pub fn new(value: u32) -> Result<Self, ParseError> {
        if !value.is_power_of_two() || !(512..=65536).contains(&value) {
            return Err(ParseError::InvalidField {
                field: "block_size",
                reason: "must be power of two in 512..=65536",
            });
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // bounded by 65536
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Number of 16-bit zone entries that fit in one index block.
    #[must_use]
    pub fn zone_entries_per_block(self) -> usize {
        self.as_usize() / 2
    }

    /// Number of blocks needed to hold `bytes` (rounded up).
    #[must_use]
    pub fn blocks_for(self, bytes: u64) -> u64 {
        bytes.div_ceil(u64::from(self.0))
    }

    /// Byte offset of `block`, or `None` on overflow.
    #[must_use]
    pub fn block_to_byte(self, block: BlockNumber) -> Option<u64> {
        block.0.checked_mul(u64::from(self.0))
    }
}

impl Default for BlockSize {
    fn default() -> Self {
        Self::MINIX
    }
}

/// Byte order used for multi-byte fields of a record.
///
/// MINIX v1 kept the same field layout on every host and simply stored
/// integers in the host's native order, so Amiga/Atari images are
/// big-endian and PC images little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Big,
    Little,
}

impl ByteOrder {
    #[inline]
    pub fn read_u16(self, data: &[u8], offset: usize) -> Result<u16, ParseError> {
        let bytes = read_fixed::<2>(data, offset)?;
        Ok(match self {
            Self::Big => u16::from_be_bytes(bytes),
            Self::Little => u16::from_le_bytes(bytes),
        })
    }

    #[inline]
    pub fn read_u32(self, data: &[u8], offset: usize) -> Result<u32, ParseError> {
        let bytes = read_fixed::<4>(data, offset)?;
        Ok(match self {
            Self::Big => u32::from_be_bytes(bytes),
            Self::Little => u32::from_le_bytes(bytes),
        })
    }

    #[must_use]
    pub fn u16_bytes(self, value: u16) -> [u8; 2] {
        match self {
            Self::Big => value.to_be_bytes(),
            Self::Little => value.to_le_bytes(),
        }
    }

    #[must_use]
    pub fn u32_bytes(self, value: u32) -> [u8; 4] {
        match self {
            Self::Big => value.to_be_bytes(),
            Self::Little => value.to_le_bytes(),
        }
    }
}

impl fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Big => f.write_str("big-endian"),
            Self::Little => f.write_str("little-endian"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid magic: expected {expected:#x}, got {actual:#x}")]
    InvalidMagic { expected: u64, actual: u64 },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("integer conversion failed: {field}")]
    IntegerConversion { field: &'static str },
    #[error("non-ASCII bytes in {field}")]
    NonAscii { field: &'static str },
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_u8(data: &[u8], offset: usize) -> Result<u8, ParseError> {
    Ok(ensure_slice(data, offset, 1)?[0])
}

#[inline]
pub fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N], ParseError> {
    let bytes = ensure_slice(data, offset, N)?;
    let mut out = [0_u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

/// Cut a NUL-padded name field at the first NUL byte.
#[must_use]
pub fn trim_nul_padded(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    &bytes[..end]
}

/// Decode a NUL-padded name field, rejecting anything outside 7-bit ASCII.
pub fn ascii_name<'a>(bytes: &'a [u8], field: &'static str) -> Result<&'a str, ParseError> {
    let name = trim_nul_padded(bytes);
    if !name.is_ascii() {
        return Err(ParseError::NonAscii { field });
    }
    std::str::from_utf8(name).map_err(|_| ParseError::NonAscii { field })
}

/// Narrow a `u64` to `usize` with an explicit error path.
pub fn u64_to_usize(value: u64, field: &'static str) -> Result<usize, ParseError> {
    usize::try_from(value).map_err(|_| ParseError::IntegerConversion { field })
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for InodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ZoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BlockSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── POSIX file mode constants ────────────────────────────────────────────────

/// File type mask (upper 4 bits of mode).
pub const S_IFMT: u16 = 0o170_000;
/// Named pipe (FIFO).
pub const S_IFIFO: u16 = 0o010_000;
/// Character device.
pub const S_IFCHR: u16 = 0o020_000;
/// Directory.
pub const S_IFDIR: u16 = 0o040_000;
/// Block device.
pub const S_IFBLK: u16 = 0o060_000;
/// Regular file.
pub const S_IFREG: u16 = 0o100_000;
/// Symbolic link (reserved in MINIX 1.x).
pub const S_IFLNK: u16 = 0o120_000;
/// Permission, setuid, setgid and sticky bits.
pub const S_IMODE: u16 = 0o7777;
