#![forbid(unsafe_code)]
//! Public API for decoding MINIX v1 filesystem images and MINIX archives.
//!
//! Re-exports `mfs-core` as the single dependency for downstream
//! consumers such as the `minixfs` command-line tool.

pub use mfs_core::*;
