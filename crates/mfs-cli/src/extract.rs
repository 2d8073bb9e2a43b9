//! Extraction glue: writing decoded trees and archives to a sink.

use anyhow::{Context, Result};
use mfs::{Archive, ByteOrder, MfsError, MinixFs, WalkEntry, WalkOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{info, warn};

/// Suffix of compressed archives that are unpacked in place.
pub const COMPRESSED_ARCHIVE_SUFFIX: &str = ".a.Z";

/// Turns a compressed payload back into raw bytes.
pub trait Decompressor {
    fn decompress(&self, name: &str, data: &[u8]) -> mfs::Result<Vec<u8>>;
}

/// Destination for extracted directories and files. Paths are relative.
pub trait ExtractSink {
    fn create_dir(&mut self, path: &Path) -> mfs::Result<()>;
    fn write_file(&mut self, path: &Path, data: &[u8]) -> mfs::Result<()>;
}

/// Pipes payloads through an external program, `gzip -dc` by default,
/// which understands `compress(1)` `.Z` streams.
#[derive(Debug, Clone)]
pub struct CommandDecompressor {
    program: String,
    args: Vec<String>,
}

impl Default for CommandDecompressor {
    fn default() -> Self {
        Self::new("gzip", ["-dc"])
    }
}

impl CommandDecompressor {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl Decompressor for CommandDecompressor {
    fn decompress(&self, name: &str, data: &[u8]) -> mfs::Result<Vec<u8>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| MfsError::Decompression(format!("{name}: no stdin pipe")))?;

        // Feed stdin from a second thread so a full stdout pipe cannot
        // stall the child.
        let output = std::thread::scope(|s| {
            let writer = s.spawn(move || stdin.write_all(data));
            let output = child.wait_with_output();
            let written = writer
                .join()
                .unwrap_or_else(|_| Err(std::io::Error::other("stdin writer panicked")));
            output.and_then(|out| written.map(|()| out))
        })?;

        if !output.status.success() {
            return Err(MfsError::Decompression(format!(
                "{name}: {} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }
}

/// Writes below a root directory on the host.
#[derive(Debug, Clone)]
pub struct HostSink {
    root: PathBuf,
}

impl HostSink {
    /// Create `root` if needed.
    pub fn new(root: impl Into<PathBuf>) -> mfs::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }
}

impl ExtractSink for HostSink {
    fn create_dir(&mut self, path: &Path) -> mfs::Result<()> {
        let full = self.root.join(path);
        if !full.is_dir() {
            info!(path = %full.display(), "creating dir");
            std::fs::create_dir(&full)?;
        }
        Ok(())
    }

    fn write_file(&mut self, path: &Path, data: &[u8]) -> mfs::Result<()> {
        let full = self.root.join(path);
        info!(path = %full.display(), bytes = data.len(), "extract file");
        std::fs::write(full, data)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct UnpackOptions {
    pub keep_archives: bool,
    /// Header byte order of archives found inside images.
    pub archive_byte_order: ByteOrder,
    pub walk: WalkOptions,
}

impl Default for UnpackOptions {
    fn default() -> Self {
        Self {
            keep_archives: false,
            archive_byte_order: ByteOrder::Little,
            walk: WalkOptions::default(),
        }
    }
}

/// Counters reported after an extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnpackStats {
    pub dirs: usize,
    pub files: usize,
    pub archives: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// A name that stays inside its parent when joined.
fn is_safe_component(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

/// Extract every walked node of `fs` into `sink`.
///
/// A node that fails to decode is logged and counted; extraction carries
/// on with its siblings.
pub fn unpack_image(
    fs: &MinixFs,
    options: &UnpackOptions,
    sink: &mut dyn ExtractSink,
    decompressor: &dyn Decompressor,
) -> Result<UnpackStats> {
    let mut stats = UnpackStats::default();
    for entry in fs.walk(&options.walk) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping undecodable entry");
                stats.failed += 1;
                continue;
            }
        };
        if let Err(e) = unpack_entry(fs, &entry, options, sink, decompressor, &mut stats) {
            warn!(path = %entry.path, error = %format!("{e:#}"), "extraction failed");
            stats.failed += 1;
        }
    }
    Ok(stats)
}

fn unpack_entry(
    fs: &MinixFs,
    entry: &WalkEntry,
    options: &UnpackOptions,
    sink: &mut dyn ExtractSink,
    decompressor: &dyn Decompressor,
    stats: &mut UnpackStats,
) -> Result<()> {
    let path = Path::new(&entry.path);
    if !entry.components().all(is_safe_component) {
        warn!(path = %entry.path, "refusing unsafe path");
        stats.skipped += 1;
        return Ok(());
    }

    if entry.inode.is_dir() {
        sink.create_dir(path)?;
        stats.dirs += 1;
    } else if entry.inode.is_regular() {
        let data = fs
            .read_data(&entry.inode)
            .with_context(|| format!("reading {}", entry.path))?;
        if entry.name.ends_with(COMPRESSED_ARCHIVE_SUFFIX) && !options.keep_archives {
            let dest = path.parent().unwrap_or(Path::new(""));
            let raw = decompressor
                .decompress(&entry.name, &data)
                .with_context(|| format!("decompressing {}", entry.path))?;
            stats.files +=
                unpack_archive(&entry.name, &raw, dest, options.archive_byte_order, sink)?;
            stats.archives += 1;
        } else {
            sink.write_file(path, &data)?;
            stats.files += 1;
        }
    } else {
        info!(path = %entry.path, mode = %format!("{:o}", entry.inode.mode), "skipping special file");
        stats.skipped += 1;
    }
    Ok(())
}

/// Write every member of archive `data` into `dest_dir`. Returns the
/// number of members written.
pub fn unpack_archive(
    name: &str,
    data: &[u8],
    dest_dir: &Path,
    order: ByteOrder,
    sink: &mut dyn ExtractSink,
) -> Result<usize> {
    info!(archive = name, dest = %dest_dir.display(), "unpack archive");
    let archive =
        Archive::with_byte_order(data, order).with_context(|| format!("opening archive {name}"))?;

    let mut written = 0;
    for entry in archive.walk() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(archive = name, error = %e, "skipping archive member");
                continue;
            }
        };
        if !is_safe_component(&entry.name) {
            warn!(archive = name, member = %entry.name, "refusing unsafe member name");
            continue;
        }
        let payload = archive.read(&entry)?;
        sink.write_file(&dest_dir.join(&entry.name), payload)?;
        written += 1;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mfs::OpenOptions;
    use mfs_harness::{ArchiveBuilder, MinixImageBuilder, ROOT_INO};
    use std::collections::BTreeMap;

    const CHAR_DEVICE: u16 = 0o020_600;

    #[derive(Default)]
    struct MemorySink {
        dirs: Vec<PathBuf>,
        files: BTreeMap<PathBuf, Vec<u8>>,
    }

    impl ExtractSink for MemorySink {
        fn create_dir(&mut self, path: &Path) -> mfs::Result<()> {
            self.dirs.push(path.to_path_buf());
            Ok(())
        }

        fn write_file(&mut self, path: &Path, data: &[u8]) -> mfs::Result<()> {
            self.files.insert(path.to_path_buf(), data.to_vec());
            Ok(())
        }
    }

    /// Treats payloads as already decompressed.
    struct Identity;

    impl Decompressor for Identity {
        fn decompress(&self, _name: &str, data: &[u8]) -> mfs::Result<Vec<u8>> {
            Ok(data.to_vec())
        }
    }

    struct Failing;

    impl Decompressor for Failing {
        fn decompress(&self, name: &str, _data: &[u8]) -> mfs::Result<Vec<u8>> {
            Err(MfsError::Decompression(format!("{name}: corrupt stream")))
        }
    }

    fn image_with_archive() -> MinixFs {
        let archive = ArchiveBuilder::new()
            .symdef(b"idx".to_vec())
            .member("a.c", b"int a;\n".to_vec())
            .member("b.c", b"int b;\n".to_vec())
            .build()
            .unwrap();
        let mut b = MinixImageBuilder::new();
        let src = b.add_dir(ROOT_INO, "src").unwrap();
        b.add_file(src, "lib.a.Z", &archive).unwrap();
        b.add_file(src, "README", b"readme\n").unwrap();
        b.add_special(ROOT_INO, "tty0", CHAR_DEVICE, 0x0400).unwrap();
        MinixFs::from_bytes(b.build().unwrap(), &OpenOptions::default()).unwrap()
    }

    #[test]
    fn archives_are_expanded_next_to_themselves() {
        let fs = image_with_archive();
        let mut sink = MemorySink::default();
        let stats = unpack_image(&fs, &UnpackOptions::default(), &mut sink, &Identity).unwrap();

        assert_eq!(sink.dirs, [PathBuf::from("src")]);
        let names: Vec<_> = sink.files.keys().cloned().collect();
        assert_eq!(
            names,
            [
                PathBuf::from("src/README"),
                PathBuf::from("src/a.c"),
                PathBuf::from("src/b.c"),
            ]
        );
        assert_eq!(sink.files[Path::new("src/a.c")], b"int a;\n");
        assert_eq!(
            stats,
            UnpackStats {
                dirs: 1,
                files: 3,
                archives: 1,
                skipped: 0,
                failed: 0,
            }
        );
    }

    #[test]
    fn archives_default_to_little_endian_headers() {
        assert_eq!(
            UnpackOptions::default().archive_byte_order,
            ByteOrder::Little
        );
    }

    fn image_with_payload(name: &str, payload: &[u8]) -> MinixFs {
        let mut b = MinixImageBuilder::new();
        let src = b.add_dir(ROOT_INO, "src").unwrap();
        b.add_file(src, name, payload).unwrap();
        b.add_file(src, "README", b"readme\n").unwrap();
        MinixFs::from_bytes(b.build().unwrap(), &OpenOptions::default()).unwrap()
    }

    #[test]
    fn wrong_endian_archive_is_reported_and_walk_continues() {
        let archive = ArchiveBuilder::new()
            .with_byte_order(ByteOrder::Big)
            .member("a.c", b"int a;\n".to_vec())
            .build()
            .unwrap();
        let fs = image_with_payload("lib.a.Z", &archive);
        let mut sink = MemorySink::default();
        let stats = unpack_image(&fs, &UnpackOptions::default(), &mut sink, &Identity).unwrap();

        assert_eq!(stats.failed, 1);
        assert_eq!(stats.archives, 0);
        assert!(!sink.files.contains_key(Path::new("src/a.c")));
        assert!(sink.files.contains_key(Path::new("src/README")));
    }

    #[test]
    fn corrupt_archive_is_reported_and_walk_continues() {
        let fs = image_with_payload("junk.a.Z", b"\x00\x01not an archive");
        let mut sink = MemorySink::default();
        let stats = unpack_image(&fs, &UnpackOptions::default(), &mut sink, &Identity).unwrap();

        assert_eq!(stats.failed, 1);
        assert_eq!(
            sink.files.keys().collect::<Vec<_>>(),
            [Path::new("src/README")]
        );
    }

    #[test]
    fn keep_archives_writes_them_verbatim() {
        let fs = image_with_archive();
        let mut sink = MemorySink::default();
        let opts = UnpackOptions {
            keep_archives: true,
            ..UnpackOptions::default()
        };
        let stats = unpack_image(&fs, &opts, &mut sink, &Failing).unwrap();
        assert!(sink.files.contains_key(Path::new("src/lib.a.Z")));
        assert_eq!(stats.archives, 0);
        assert_eq!(stats.files, 2);
    }

    #[test]
    fn decompression_failure_is_per_entry() {
        let fs = image_with_archive();
        let mut sink = MemorySink::default();
        let stats = unpack_image(&fs, &UnpackOptions::default(), &mut sink, &Failing).unwrap();
        assert_eq!(stats.failed, 1);
        assert!(sink.files.contains_key(Path::new("src/README")));
    }

    #[test]
    fn special_files_are_skipped_when_walked() {
        let fs = image_with_archive();
        let mut sink = MemorySink::default();
        let mut opts = UnpackOptions::default();
        opts.walk.include_special = true;
        let stats = unpack_image(&fs, &opts, &mut sink, &Identity).unwrap();
        assert_eq!(stats.skipped, 1);
        assert!(!sink.files.contains_key(Path::new("tty0")));
    }

    #[test]
    fn unsafe_member_names_are_refused() {
        let archive = ArchiveBuilder::new()
            .member("..", b"x".to_vec())
            .member("ok", b"y".to_vec())
            .build()
            .unwrap();
        let mut sink = MemorySink::default();
        let n = unpack_archive("t.a", &archive, Path::new("out"), ByteOrder::Little, &mut sink)
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(sink.files.keys().collect::<Vec<_>>(), [Path::new("out/ok")]);
    }

    #[test]
    fn host_sink_writes_below_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = HostSink::new(dir.path().join("out")).unwrap();
        sink.create_dir(Path::new("bin")).unwrap();
        sink.create_dir(Path::new("bin")).unwrap();
        sink.write_file(Path::new("bin/sh"), b"#!").unwrap();
        assert_eq!(std::fs::read(dir.path().join("out/bin/sh")).unwrap(), b"#!");
    }

    #[test]
    fn multiple_images_share_one_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = HostSink::new(dir.path()).unwrap();
        for (disk, file) in [("usr", "one"), ("usr", "two")] {
            let mut b = MinixImageBuilder::new();
            let d = b.add_dir(ROOT_INO, disk).unwrap();
            b.add_file(d, file, file.as_bytes()).unwrap();
            let fs = MinixFs::from_bytes(b.build().unwrap(), &OpenOptions::default()).unwrap();
            unpack_image(&fs, &UnpackOptions::default(), &mut sink, &Identity).unwrap();
        }
        assert_eq!(std::fs::read(dir.path().join("usr/one")).unwrap(), b"one");
        assert_eq!(std::fs::read(dir.path().join("usr/two")).unwrap(), b"two");
    }

    #[cfg(unix)]
    #[test]
    fn command_decompressor_pipes_through_program() {
        let cat = CommandDecompressor::new("cat", Vec::<String>::new());
        let data = vec![0x42_u8; 256 * 1024];
        assert_eq!(cat.decompress("blob", &data).unwrap(), data);

        let fail = CommandDecompressor::new("false", Vec::<String>::new());
        let err = fail.decompress("blob", b"x").unwrap_err();
        assert_eq!(err.kind(), mfs::ErrorKind::Format);
    }

    #[test]
    fn missing_program_is_an_io_error() {
        let missing = CommandDecompressor::new("/nonexistent/decompressor", ["-d"]);
        assert_eq!(
            missing.decompress("x", b"").unwrap_err().kind(),
            mfs::ErrorKind::Io
        );
    }
}
