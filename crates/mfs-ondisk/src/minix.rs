#![forbid(unsafe_code)]

use crate::layout::{Field, FieldWidth, RecordLayout};
use mfs_types::{
    BlockNumber, BlockSize, ByteOrder, InodeNumber, MINIX_SUPER_BLOCK, MINIX_SUPER_MAGIC,
    MINIX_V1_DIR_ENTRY_SIZE, MINIX_V1_DIRECT_ZONES, MINIX_V1_INODE_SIZE, MINIX_V1_NAME_LEN,
    MINIX_VALID_FS, ParseError, S_IFDIR, S_IFLNK, S_IFMT, S_IFREG, S_IMODE, ZoneNumber,
    ascii_name, trim_nul_padded,
};
use serde::{Deserialize, Serialize};

// ── Record layouts ──────────────────────────────────────────────────────────

/// `struct minix_super_block` (v1 fields only; the rest of block 1 is unused).
pub static SUPERBLOCK_LAYOUT: RecordLayout = RecordLayout {
    name: "minix_super_block",
    size: 24,
    fields: &[
        Field::new("s_ninodes", 0, FieldWidth::U16),
        Field::new("s_nzones", 2, FieldWidth::U16),
        Field::new("s_imap_blocks", 4, FieldWidth::U16),
        Field::new("s_zmap_blocks", 6, FieldWidth::U16),
        Field::new("s_firstdatazone", 8, FieldWidth::U16),
        Field::new("s_log_zone_size", 10, FieldWidth::U16),
        Field::new("s_max_size", 12, FieldWidth::U32),
        Field::new("s_magic", 16, FieldWidth::U16),
        Field::new("s_state", 18, FieldWidth::U16),
        Field::new("s_zones", 20, FieldWidth::U32),
    ],
};

/// `struct minix_inode`, the 32-byte v1 record with 8-bit gid.
pub static INODE_LAYOUT: RecordLayout = RecordLayout {
    name: "minix_inode",
    size: MINIX_V1_INODE_SIZE,
    fields: &[
        Field::new("i_mode", 0, FieldWidth::U16),
        Field::new("i_uid", 2, FieldWidth::U16),
        Field::new("i_size", 4, FieldWidth::U32),
        Field::new("i_time", 8, FieldWidth::U32),
        Field::new("i_gid", 12, FieldWidth::U8),
        Field::new("i_nlinks", 13, FieldWidth::U8),
        Field::new("i_zone0", 14, FieldWidth::U16),
        Field::new("i_zone1", 16, FieldWidth::U16),
        Field::new("i_zone2", 18, FieldWidth::U16),
        Field::new("i_zone3", 20, FieldWidth::U16),
        Field::new("i_zone4", 22, FieldWidth::U16),
        Field::new("i_zone5", 24, FieldWidth::U16),
        Field::new("i_zone6", 26, FieldWidth::U16),
        Field::new("i_indir_zone", 28, FieldWidth::U16),
        Field::new("i_dbl_indir_zone", 30, FieldWidth::U16),
    ],
};

/// `struct minix_dir_entry` with 14-byte names.
pub static DIR_ENTRY_LAYOUT: RecordLayout = RecordLayout {
    name: "minix_dir_entry",
    size: MINIX_V1_DIR_ENTRY_SIZE,
    fields: &[
        Field::new("inode", 0, FieldWidth::U16),
        Field::new("name", 2, FieldWidth::Bytes(MINIX_V1_NAME_LEN)),
    ],
};

/// Directory entry inode numbers are big-endian regardless of image order.
pub const DIR_ENTRY_BYTE_ORDER: ByteOrder = ByteOrder::Big;

const DIRECT_ZONE_FIELDS: [&str; MINIX_V1_DIRECT_ZONES] = [
    "i_zone0", "i_zone1", "i_zone2", "i_zone3", "i_zone4", "i_zone5", "i_zone6",
];

// ── Superblock ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinixSuperblock {
    pub ninodes: u16,
    pub nzones: u16,
    pub imap_blocks: u16,
    pub zmap_blocks: u16,
    pub first_data_zone: u16,
    pub log_zone_size: u16,
    pub max_size: u32,
    pub magic: u16,
    pub state: u16,
    pub zones: u32,
}

impl MinixSuperblock {
    /// Parse the superblock from the start of block 1.
    ///
    /// Only the magic is checked here; geometry is checked by
    /// [`validate`](Self::validate) and the state flag is never enforced.
    pub fn parse(block: &[u8], order: ByteOrder) -> Result<Self, ParseError> {
        let view = SUPERBLOCK_LAYOUT.view(block, order)?;
        let magic = view.u16("s_magic")?;
        if magic != MINIX_SUPER_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: u64::from(MINIX_SUPER_MAGIC),
                actual: u64::from(magic),
            });
        }

        Ok(Self {
            ninodes: view.u16("s_ninodes")?,
            nzones: view.u16("s_nzones")?,
            imap_blocks: view.u16("s_imap_blocks")?,
            zmap_blocks: view.u16("s_zmap_blocks")?,
            first_data_zone: view.u16("s_firstdatazone")?,
            log_zone_size: view.u16("s_log_zone_size")?,
            max_size: view.u32("s_max_size")?,
            magic,
            state: view.u16("s_state")?,
            zones: view.u32("s_zones")?,
        })
    }

    /// Whether the filesystem was cleanly unmounted.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.state & MINIX_VALID_FS != 0
    }

    /// First block of the inode bitmap (directly after the superblock).
    #[must_use]
    pub fn imap_start(&self) -> BlockNumber {
        BlockNumber(MINIX_SUPER_BLOCK.0 + 1)
    }

    /// First block of the zone bitmap.
    #[must_use]
    pub fn zmap_start(&self) -> BlockNumber {
        BlockNumber(self.imap_start().0 + u64::from(self.imap_blocks))
    }

    /// First block of the inode table.
    #[must_use]
    pub fn inode_table_start(&self) -> BlockNumber {
        BlockNumber(self.zmap_start().0 + u64::from(self.zmap_blocks))
    }

    #[must_use]
    pub fn inodes_per_block(block_size: BlockSize) -> u64 {
        u64::from(block_size.get()) / MINIX_V1_INODE_SIZE as u64
    }

    /// Blocks spanned by the inode table (inode 1 is the first record).
    #[must_use]
    pub fn inode_table_blocks(&self, block_size: BlockSize) -> u64 {
        u64::from(self.ninodes).div_ceil(Self::inodes_per_block(block_size))
    }

    /// First data zone implied by the map and table sizes.
    #[must_use]
    pub fn computed_first_data_zone(&self, block_size: BlockSize) -> u64 {
        self.inode_table_start().0 + self.inode_table_blocks(block_size)
    }

    /// Cross-check the declared layout against the computed one.
    pub fn validate(&self, block_size: BlockSize) -> Result<(), ParseError> {
        if u64::from(self.first_data_zone) != self.computed_first_data_zone(block_size) {
            return Err(ParseError::InvalidField {
                field: "s_firstdatazone",
                reason: "does not match boot + super + maps + inode table",
            });
        }
        if self.log_zone_size != 0 {
            return Err(ParseError::InvalidField {
                field: "s_log_zone_size",
                reason: "zones larger than one block are unsupported",
            });
        }
        if self.ninodes == 0 {
            return Err(ParseError::InvalidField {
                field: "s_ninodes",
                reason: "filesystem has no inodes",
            });
        }
        Ok(())
    }
}

// ── Inode ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinixInode {
    pub mode: u16,
    pub uid: u16,
    pub size: u32,
    pub time: u32,
    pub gid: u8,
    pub nlinks: u8,
    pub zones: [ZoneNumber; MINIX_V1_DIRECT_ZONES],
    pub indirect_zone: ZoneNumber,
    pub double_indirect_zone: ZoneNumber,
}

impl MinixInode {
    /// Parse one 32-byte inode record.
    pub fn parse(record: &[u8], order: ByteOrder) -> Result<Self, ParseError> {
        let view = INODE_LAYOUT.view(record, order)?;
        let mut zones = [ZoneNumber(0); MINIX_V1_DIRECT_ZONES];
        for (slot, name) in zones.iter_mut().zip(DIRECT_ZONE_FIELDS) {
            *slot = ZoneNumber(view.u16(name)?);
        }

        Ok(Self {
            mode: view.u16("i_mode")?,
            uid: view.u16("i_uid")?,
            size: view.u32("i_size")?,
            time: view.u32("i_time")?,
            gid: view.u8("i_gid")?,
            nlinks: view.u8("i_nlinks")?,
            zones,
            indirect_zone: ZoneNumber(view.u16("i_indir_zone")?),
            double_indirect_zone: ZoneNumber(view.u16("i_dbl_indir_zone")?),
        })
    }

    #[must_use]
    pub fn file_type_bits(&self) -> u16 {
        self.mode & S_IFMT
    }

    #[must_use]
    pub fn permission_bits(&self) -> u16 {
        self.mode & S_IMODE
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.file_type_bits() == S_IFDIR
    }

    #[must_use]
    pub fn is_regular(&self) -> bool {
        self.file_type_bits() == S_IFREG
    }

    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.file_type_bits() == S_IFLNK
    }

    /// Anything that is not a regular file: devices, fifos, links and
    /// directories alike.
    #[must_use]
    pub fn is_special(&self) -> bool {
        self.file_type_bits() != S_IFREG
    }

    /// Number of zones needed to hold `size` bytes.
    #[must_use]
    pub fn zone_count(&self, block_size: BlockSize) -> u64 {
        block_size.blocks_for(u64::from(self.size))
    }
}

// ── Directory entries ───────────────────────────────────────────────────────

/// One raw directory slot. `inode == 0` marks an unused slot; it is still
/// returned so callers decide how to treat it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinixDirEntry {
    pub inode: InodeNumber,
    /// Name bytes with NUL padding removed.
    pub name: Vec<u8>,
}

impl MinixDirEntry {
    pub fn parse(record: &[u8]) -> Result<Self, ParseError> {
        let view = DIR_ENTRY_LAYOUT.view(record, DIR_ENTRY_BYTE_ORDER)?;
        Ok(Self {
            inode: InodeNumber(view.u16("inode")?),
            name: trim_nul_padded(view.bytes("name")?).to_vec(),
        })
    }

    /// The name as ASCII text.
    pub fn name_str(&self) -> Result<&str, ParseError> {
        ascii_name(&self.name, "dir_entry_name")
    }

    /// The name with invalid bytes replaced.
    #[must_use]
    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    #[must_use]
    pub fn is_unused(&self) -> bool {
        self.inode.is_unused()
    }

    #[must_use]
    pub fn is_dot(&self) -> bool {
        self.name == b"."
    }

    #[must_use]
    pub fn is_dotdot(&self) -> bool {
        self.name == b".."
    }
}

/// Iterator over the fixed-size entries of a directory's data.
///
/// A trailing run shorter than one entry yields a single
/// `InsufficientData` error and ends the iteration.
pub struct DirEntryIter<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> DirEntryIter<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }
}

impl Iterator for DirEntryIter<'_> {
    type Item = Result<MinixDirEntry, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.data.len() {
            return None;
        }
        let record = &self.data[self.offset..];
        if record.len() < MINIX_V1_DIR_ENTRY_SIZE {
            let offset = self.offset;
            self.offset = self.data.len();
            return Some(Err(ParseError::InsufficientData {
                needed: MINIX_V1_DIR_ENTRY_SIZE,
                offset,
                actual: record.len(),
            }));
        }
        self.offset += MINIX_V1_DIR_ENTRY_SIZE;
        Some(MinixDirEntry::parse(record))
    }
}

#[must_use]
pub fn iter_dir_entries(data: &[u8]) -> DirEntryIter<'_> {
    DirEntryIter::new(data)
}

/// Decode every slot, unused ones included.
pub fn parse_dir_entries(data: &[u8]) -> Result<Vec<MinixDirEntry>, ParseError> {
    iter_dir_entries(data).collect()
}
