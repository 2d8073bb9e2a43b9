#![forbid(unsafe_code)]
//! Read-only decoding of MINIX v1 filesystem images and MINIX archives.
//!
//! [`MinixFs`] composes the block medium, the superblock and inode record
//! parsers, zone resolution and directory decoding into one opened image.
//! [`Archive`] decodes the sequential archive container independently.
//!
//! ```ignore
//! let fs = MinixFs::open_path("disk.img", &OpenOptions::default())?;
//! for entry in fs.walk(&WalkOptions::default()) {
//!     let entry = entry?;
//!     println!("{} : {}", entry.path, entry.ino);
//! }
//! ```

mod archive;
mod walk;

pub use archive::{Archive, ArchiveEntry, ArchiveWalk};
pub use walk::{Walk, WalkEntry, WalkOptions};

pub use mfs_block::BlockMedium;
pub use mfs_error::{ErrorKind, MfsError, Result};
pub use mfs_ondisk::{MinixDirEntry, MinixInode, MinixSuperblock};
pub use mfs_types::{BlockSize, ByteOrder, InodeNumber, ZoneNumber};
pub use mfs_zone::ZoneResolver;

use mfs_ondisk::parse_dir_entries;
use mfs_types::{MINIX_SUPER_BLOCK, MINIX_V1_INODE_SIZE, ParseError, S_IFMT, S_IMODE};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Options controlling how an image is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOptions {
    /// Block size in bytes. Only used when this crate builds the medium
    /// ([`MinixFs::from_bytes`], [`MinixFs::open_path`]).
    pub block_size: u32,
    /// Byte order of superblock, inode and zone index fields.
    pub byte_order: ByteOrder,
    /// Skip the first-data-zone and zone-size cross-checks. The magic is
    /// checked regardless.
    pub skip_validation: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            block_size: BlockSize::MINIX.get(),
            byte_order: ByteOrder::Big,
            skip_validation: false,
        }
    }
}

/// Crate-boundary conversion from parser errors to the user-facing taxonomy.
pub(crate) fn parse_error_to_mfs(e: &ParseError) -> MfsError {
    match e {
        ParseError::InsufficientData { .. } => MfsError::Truncated(e.to_string()),
        ParseError::NonAscii { .. } => MfsError::Encoding(e.to_string()),
        ParseError::InvalidMagic { .. }
        | ParseError::InvalidField { .. }
        | ParseError::IntegerConversion { .. } => MfsError::Format(e.to_string()),
    }
}

/// Decode the superblock held in block 1 of `medium`.
///
/// Checks the magic only. The state flag is not enforced.
pub fn decode_superblock(medium: &BlockMedium, order: ByteOrder) -> Result<MinixSuperblock> {
    let block = medium.read_block(MINIX_SUPER_BLOCK)?;
    MinixSuperblock::parse(block, order).map_err(|e| parse_error_to_mfs(&e))
}

/// Decode raw directory data into every slot it holds, unused ones included.
pub fn decode_dir_entries(data: &[u8]) -> Result<Vec<MinixDirEntry>> {
    parse_dir_entries(data).map_err(|e| parse_error_to_mfs(&e))
}

/// An inode together with its number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeRef {
    pub ino: InodeNumber,
    pub inode: MinixInode,
}

impl fmt::Display for InodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MinixInode(id={},mode={:04o},fmt={:06o},size={})",
            self.ino,
            self.inode.mode & S_IMODE,
            self.inode.mode & S_IFMT,
            self.inode.size
        )
    }
}

/// Allocation bitmap stored as 16-bit words in image byte order.
#[derive(Debug, Clone, Copy)]
pub struct Bitmap<'a> {
    data: &'a [u8],
    bits: u64,
    order: ByteOrder,
}

impl Bitmap<'_> {
    /// Number of meaningful bits (bit 0 is reserved).
    #[must_use]
    pub fn len(&self) -> u64 {
        self.bits
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Whether bit `n` is set. Bits past [`len`](Self::len) read as clear.
    #[must_use]
    pub fn is_set(&self, n: u64) -> bool {
        if n >= self.bits {
            return false;
        }
        let Ok(word_index) = usize::try_from(n / 16) else {
            return false;
        };
        self.order
            .read_u16(self.data, word_index * 2)
            .is_ok_and(|word| word & (1 << (n % 16)) != 0)
    }

    #[must_use]
    pub fn count_set(&self) -> u64 {
        (0..self.bits).filter(|&n| self.is_set(n)).count() as u64
    }
}

/// An opened MINIX v1 image.
///
/// Holds the decoded superblock and the resident medium. Every read is a
/// bounded computation over the immutable buffer, so one `MinixFs` can
/// serve any number of concurrent walks.
#[derive(Debug, Clone)]
pub struct MinixFs {
    medium: BlockMedium,
    superblock: MinixSuperblock,
    order: ByteOrder,
}

impl MinixFs {
    /// Open an image over an existing medium. The medium's block size is
    /// authoritative.
    pub fn open(medium: BlockMedium, options: &OpenOptions) -> Result<Self> {
        let order = options.byte_order;
        let superblock = decode_superblock(&medium, order)?;
        let block_size = medium.block_size();

        if !options.skip_validation {
            superblock
                .validate(block_size)
                .map_err(|e| parse_error_to_mfs(&e))?;
        }
        if !superblock.is_clean() {
            warn!(
                state = superblock.state,
                "filesystem was not cleanly unmounted; decoding anyway"
            );
        }

        debug!(
            %order,
            block_size = block_size.get(),
            ninodes = superblock.ninodes,
            nzones = superblock.nzones,
            imap_blocks = superblock.imap_blocks,
            zmap_blocks = superblock.zmap_blocks,
            first_data_zone = superblock.first_data_zone,
            "opened minix v1 filesystem"
        );

        Ok(Self {
            medium,
            superblock,
            order,
        })
    }

    /// Open an in-memory image.
    pub fn from_bytes(data: impl Into<Arc<[u8]>>, options: &OpenOptions) -> Result<Self> {
        let block_size = BlockSize::new(options.block_size).map_err(|e| parse_error_to_mfs(&e))?;
        Self::open(BlockMedium::from_bytes(data, block_size), options)
    }

    /// Read an image file fully into memory and open it.
    pub fn open_path(path: impl AsRef<Path>, options: &OpenOptions) -> Result<Self> {
        let block_size = BlockSize::new(options.block_size).map_err(|e| parse_error_to_mfs(&e))?;
        Self::open(BlockMedium::open(path, block_size)?, options)
    }

    #[must_use]
    pub fn superblock(&self) -> &MinixSuperblock {
        &self.superblock
    }

    #[must_use]
    pub fn medium(&self) -> &BlockMedium {
        &self.medium
    }

    #[must_use]
    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    #[must_use]
    pub fn block_size(&self) -> BlockSize {
        self.medium.block_size()
    }

    /// Decode inode `ino` (1-based) from the inode table.
    pub fn read_inode(&self, ino: InodeNumber) -> Result<MinixInode> {
        if ino.0 == 0 || ino.0 > self.superblock.ninodes {
            return Err(MfsError::OutOfRange {
                what: "inode",
                index: u64::from(ino.0),
                limit: u64::from(self.superblock.ninodes),
            });
        }

        let index = u64::from(ino.0 - 1);
        let per_block = MinixSuperblock::inodes_per_block(self.block_size());
        let block = self.superblock.inode_table_start().0 + index / per_block;
        let offset = usize::try_from(index % per_block)
            .map_err(|_| MfsError::Format(format!("inode {ino} offset overflow")))?
            * MINIX_V1_INODE_SIZE;

        let data = self.medium.read_block(mfs_types::BlockNumber(block))?;
        let record = data.get(offset..).ok_or_else(|| {
            MfsError::Truncated(format!("inode {ino} record lies past its table block"))
        })?;
        MinixInode::parse(record, self.order).map_err(|e| parse_error_to_mfs(&e))
    }

    pub fn inode_ref(&self, ino: InodeNumber) -> Result<InodeRef> {
        Ok(InodeRef {
            ino,
            inode: self.read_inode(ino)?,
        })
    }

    pub fn root_inode(&self) -> Result<InodeRef> {
        self.inode_ref(InodeNumber::ROOT)
    }

    #[must_use]
    pub fn zone_resolver(&self) -> ZoneResolver<'_> {
        ZoneResolver::new(&self.medium, self.order)
    }

    /// Ordered physical zone list of `inode`.
    pub fn resolve_zones(&self, inode: &MinixInode) -> Result<Vec<ZoneNumber>> {
        self.zone_resolver().resolve(inode)
    }

    /// The inode's contents, exactly `inode.size` bytes long.
    ///
    /// A zero zone number is a hole and reads as zeros. Block 0 is the boot
    /// block and is never returned as file data.
    pub fn read_data(&self, inode: &MinixInode) -> Result<Vec<u8>> {
        let size = usize::try_from(inode.size)
            .map_err(|_| MfsError::Format(format!("inode size {} exceeds usize", inode.size)))?;
        let block_size = self.block_size().as_usize();
        let mut data = Vec::with_capacity(size);

        for zone in self.resolve_zones(inode)? {
            let take = (size - data.len()).min(block_size);
            if zone.is_hole() {
                data.resize(data.len() + take, 0);
            } else {
                let block = self.medium.read_block(zone.to_block())?;
                data.extend_from_slice(&block[..take]);
            }
        }
        Ok(data)
    }

    /// Every raw slot of directory `dir`, including unused ones and the
    /// `.`/`..` entries.
    pub fn read_dir(&self, dir: &InodeRef) -> Result<Vec<MinixDirEntry>> {
        if !dir.inode.is_dir() {
            return Err(MfsError::NotDirectory(u64::from(dir.ino.0)));
        }
        decode_dir_entries(&self.read_data(&dir.inode)?)
    }

    /// Resolve a slash-separated path from the root directory.
    ///
    /// Empty components are ignored, so `""` and `"/"` name the root.
    pub fn lookup(&self, path: &str) -> Result<InodeRef> {
        let mut current = self.root_inode()?;
        let mut walked = String::new();

        for component in path.split('/').filter(|c| !c.is_empty()) {
            if !current.inode.is_dir() {
                return Err(MfsError::NotDirectory(u64::from(current.ino.0)));
            }
            walked.push('/');
            walked.push_str(component);

            let entry = self
                .read_dir(&current)?
                .into_iter()
                .find(|e| !e.is_unused() && e.name == component.as_bytes())
                .ok_or_else(|| MfsError::NotFound(walked.clone()))?;
            current = self.inode_ref(entry.inode)?;
        }

        Ok(current)
    }

    /// Inode allocation bitmap; bit `n` tracks inode `n`.
    pub fn inode_bitmap(&self) -> Result<Bitmap<'_>> {
        let sb = &self.superblock;
        let data = self
            .medium
            .read_blocks(sb.imap_start(), u64::from(sb.imap_blocks))?;
        Ok(Bitmap {
            data,
            bits: u64::from(sb.ninodes) + 1,
            order: self.order,
        })
    }

    /// Zone allocation bitmap; bit `n` tracks zone `first_data_zone + n - 1`.
    pub fn zone_bitmap(&self) -> Result<Bitmap<'_>> {
        let sb = &self.superblock;
        let data = self
            .medium
            .read_blocks(sb.zmap_start(), u64::from(sb.zmap_blocks))?;
        let bits = u64::from(sb.nzones).saturating_sub(u64::from(sb.first_data_zone)) + 1;
        Ok(Bitmap {
            data,
            bits,
            order: self.order,
        })
    }

    /// Depth-first walk of the tree below the root directory.
    #[must_use]
    pub fn walk(&self, options: &WalkOptions) -> Walk<'_> {
        Walk::new(self, self.root_inode(), String::new(), options.clone())
    }

    /// Depth-first walk below `dir`, with paths relative to it.
    #[must_use]
    pub fn walk_from(&self, dir: InodeRef, options: &WalkOptions) -> Walk<'_> {
        Walk::new(self, Ok(dir), String::new(), options.clone())
    }
}
