#![forbid(unsafe_code)]
//! On-disk format parsing for MINIX v1 filesystems and MINIX archives.
//!
//! Pure parsing crate: no I/O and no side effects. Every fixed-size record
//! (superblock, inode, directory entry, archive header) is described once
//! as a [`RecordLayout`] and decoded against a byte slice with a
//! selectable [`ByteOrder`](mfs_types::ByteOrder).

pub mod ar;
pub mod layout;
pub mod minix;

pub use ar::{AR_HEADER_LAYOUT, ArHeader, parse_archive_magic};
pub use layout::{Field, FieldWidth, RecordLayout, RecordView};
pub use minix::{
    DIR_ENTRY_BYTE_ORDER, DIR_ENTRY_LAYOUT, DirEntryIter, INODE_LAYOUT, MinixDirEntry, MinixInode,
    MinixSuperblock, SUPERBLOCK_LAYOUT, iter_dir_entries, parse_dir_entries,
};
