//! Depth-first traversal of the directory tree.

use crate::{InodeRef, MinixFs, parse_error_to_mfs};
use mfs_error::{MfsError, Result};
use mfs_ondisk::{MinixDirEntry, MinixInode};
use mfs_types::InodeNumber;
use serde::{Deserialize, Serialize};

/// Filters applied by [`Walk`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkOptions {
    /// Yield directories themselves (before their contents).
    pub include_dirs: bool,
    /// Yield device nodes, fifos and symlinks.
    pub include_special: bool,
    /// Replace non-ASCII name bytes instead of failing the entry.
    pub lossy_names: bool,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            include_dirs: true,
            include_special: false,
            lossy_names: false,
        }
    }
}

/// One node produced by a walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkEntry {
    /// Slash-separated path relative to the walk root, e.g. `usr/bin/cc`.
    /// This is the full path including `name`; see [`parent`](Self::parent)
    /// for the directory prefix alone.
    pub path: String,
    pub name: String,
    pub ino: InodeNumber,
    pub inode: MinixInode,
}

impl WalkEntry {
    /// Path of the containing directory, empty for children of the walk
    /// root.
    #[must_use]
    pub fn parent(&self) -> &str {
        self.path.rsplit_once('/').map_or("", |(parent, _)| parent)
    }

    /// Path components, outermost first.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.path.split('/')
    }
}

struct Frame {
    ino: InodeNumber,
    /// Path prefix for children, empty or ending in `/`.
    prefix: String,
    entries: Vec<MinixDirEntry>,
    pos: usize,
}

/// Pull-based pre-order iterator over a directory tree.
///
/// Children are visited in on-disk slot order. Unused slots and the `.`
/// and `..` entries are skipped. A directory whose inode is already on the
/// ancestor chain is reported as an error instead of being entered. Errors
/// are per entry: after yielding one, the walk carries on with the next
/// sibling.
pub struct Walk<'fs> {
    fs: &'fs MinixFs,
    options: WalkOptions,
    stack: Vec<Frame>,
    pending: Option<MfsError>,
}

impl<'fs> Walk<'fs> {
    pub(crate) fn new(
        fs: &'fs MinixFs,
        root: Result<InodeRef>,
        prefix: String,
        options: WalkOptions,
    ) -> Self {
        let mut walk = Self {
            fs,
            options,
            stack: Vec::new(),
            pending: None,
        };
        match root.and_then(|dir| walk.enter(&dir, prefix)) {
            Ok(()) => {}
            Err(e) => walk.pending = Some(e),
        }
        walk
    }

    fn enter(&mut self, dir: &InodeRef, prefix: String) -> Result<()> {
        let entries = self.fs.read_dir(dir)?;
        self.stack.push(Frame {
            ino: dir.ino,
            prefix,
            entries,
            pos: 0,
        });
        Ok(())
    }

    fn on_ancestor_chain(&self, ino: InodeNumber) -> bool {
        self.stack.iter().any(|frame| frame.ino == ino)
    }

    fn entry_name(&self, entry: &MinixDirEntry) -> Result<String> {
        if self.options.lossy_names {
            Ok(entry.name_lossy())
        } else {
            entry
                .name_str()
                .map(str::to_owned)
                .map_err(|e| parse_error_to_mfs(&e))
        }
    }
}

impl Iterator for Walk<'_> {
    type Item = Result<WalkEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.pending.take() {
            return Some(Err(err));
        }

        loop {
            let frame = self.stack.last_mut()?;
            let Some(slot) = frame.entries.get(frame.pos).cloned() else {
                self.stack.pop();
                continue;
            };
            frame.pos += 1;
            let prefix = frame.prefix.clone();

            if slot.is_unused() || slot.is_dot() || slot.is_dotdot() {
                continue;
            }

            let name = match self.entry_name(&slot) {
                Ok(name) => name,
                Err(e) => return Some(Err(e)),
            };
            let path = format!("{prefix}{name}");
            let node = match self.fs.inode_ref(slot.inode) {
                Ok(node) => node,
                Err(e) => return Some(Err(e)),
            };

            if node.inode.is_dir() {
                if self.on_ancestor_chain(node.ino) {
                    return Some(Err(MfsError::Format(format!(
                        "directory cycle at {path}: inode {} is its own ancestor",
                        node.ino
                    ))));
                }
                if let Err(e) = self.enter(&node, format!("{path}/")) {
                    if !self.options.include_dirs {
                        return Some(Err(e));
                    }
                    self.pending = Some(e);
                }
                if !self.options.include_dirs {
                    continue;
                }
            } else if !node.inode.is_regular() && !self.options.include_special {
                continue;
            }

            return Some(Ok(WalkEntry {
                path,
                name,
                ino: node.ino,
                inode: node.inode,
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{MinixFs, OpenOptions, WalkEntry, WalkOptions};
    use mfs_error::ErrorKind;
    use mfs_harness::{MinixImageBuilder, ROOT_INO};
    use mfs_types::{S_IFBLK, S_IFIFO};

    fn open(b: &MinixImageBuilder) -> MinixFs {
        MinixFs::from_bytes(b.build().unwrap(), &OpenOptions::default()).unwrap()
    }

    fn paths(fs: &MinixFs, opts: &WalkOptions) -> Vec<String> {
        fs.walk(opts).map(|e| e.unwrap().path).collect()
    }

    #[test]
    fn entries_split_into_parent_and_name() {
        let mut b = MinixImageBuilder::new();
        let usr = b.add_dir(ROOT_INO, "usr").unwrap();
        let bin = b.add_dir(usr, "bin").unwrap();
        b.add_file(bin, "cc", b"cc").unwrap();
        let fs = open(&b);

        let split: Vec<_> = fs
            .walk(&WalkOptions::default())
            .map(|e| {
                let e = e.unwrap();
                (e.parent().to_owned(), e.name)
            })
            .collect();
        assert_eq!(
            split,
            [
                (String::new(), "usr".to_owned()),
                ("usr".to_owned(), "bin".to_owned()),
                ("usr/bin".to_owned(), "cc".to_owned()),
            ]
        );
    }

    #[test]
    fn pre_order_in_slot_order() {
        let mut b = MinixImageBuilder::new();
        b.add_file(ROOT_INO, "zeta", b"z").unwrap();
        let usr = b.add_dir(ROOT_INO, "usr").unwrap();
        let bin = b.add_dir(usr, "bin").unwrap();
        b.add_file(bin, "cc", b"cc").unwrap();
        b.add_file(usr, "README", b"r").unwrap();
        b.add_file(ROOT_INO, "alpha", b"a").unwrap();
        let fs = open(&b);

        assert_eq!(
            paths(&fs, &WalkOptions::default()),
            ["zeta", "usr", "usr/bin", "usr/bin/cc", "usr/README", "alpha"]
        );

        let files_only = WalkOptions {
            include_dirs: false,
            ..WalkOptions::default()
        };
        assert_eq!(
            paths(&fs, &files_only),
            ["zeta", "usr/bin/cc", "usr/README", "alpha"]
        );
    }

    #[test]
    fn entry_fields() {
        let mut b = MinixImageBuilder::new();
        let d = b.add_dir(ROOT_INO, "d").unwrap();
        let f = b.add_file(d, "f", b"12345").unwrap();
        let fs = open(&b);
        let entries: Vec<WalkEntry> = fs
            .walk(&WalkOptions::default())
            .collect::<Result<_, _>>()
            .unwrap();
        let last = entries.last().unwrap();
        assert_eq!(last.name, "f");
        assert_eq!(last.ino.0, f);
        assert_eq!(last.inode.size, 5);
        assert_eq!(last.components().collect::<Vec<_>>(), ["d", "f"]);
    }

    #[test]
    fn empty_directory_yields_only_itself() {
        let mut b = MinixImageBuilder::new();
        b.add_dir(ROOT_INO, "empty").unwrap();
        let fs = open(&b);
        assert_eq!(paths(&fs, &WalkOptions::default()), ["empty"]);
    }

    #[test]
    fn empty_root_yields_nothing() {
        let fs = open(&MinixImageBuilder::new());
        assert_eq!(fs.walk(&WalkOptions::default()).count(), 0);
    }

    #[test]
    fn unused_slots_are_skipped() {
        let mut b = MinixImageBuilder::new();
        b.add_file(ROOT_INO, "foo", b"").unwrap();
        b.link(ROOT_INO, "stale", 0).unwrap();
        b.add_file(ROOT_INO, "bar", b"").unwrap();
        let fs = open(&b);
        assert_eq!(paths(&fs, &WalkOptions::default()), ["foo", "bar"]);
    }

    #[test]
    fn special_files_need_opt_in() {
        let mut b = MinixImageBuilder::new();
        let dev = b.add_dir(ROOT_INO, "dev").unwrap();
        b.add_special(dev, "fd0", S_IFBLK | 0o666, 0x0200).unwrap();
        b.add_special(dev, "pipe", S_IFIFO | 0o600, 0).unwrap();
        b.add_file(dev, "MAKEDEV", b"#!/bin/sh\n").unwrap();
        let fs = open(&b);

        assert_eq!(paths(&fs, &WalkOptions::default()), ["dev", "dev/MAKEDEV"]);
        let all = WalkOptions {
            include_special: true,
            ..WalkOptions::default()
        };
        assert_eq!(
            paths(&fs, &all),
            ["dev", "dev/fd0", "dev/pipe", "dev/MAKEDEV"]
        );
    }

    #[test]
    fn ancestor_links_are_reported_not_followed() {
        let mut b = MinixImageBuilder::new();
        let a = b.add_dir(ROOT_INO, "a").unwrap();
        let inner = b.add_dir(a, "inner").unwrap();
        b.link(inner, "up", ROOT_INO).unwrap();
        b.link(inner, "self", inner).unwrap();
        b.add_file(inner, "after", b"x").unwrap();
        let fs = open(&b);

        let results: Vec<_> = fs.walk(&WalkOptions::default()).collect();
        assert_eq!(results.len(), 5);
        assert_eq!(results[0].as_ref().unwrap().path, "a");
        assert_eq!(results[1].as_ref().unwrap().path, "a/inner");
        for cycle in &results[2..4] {
            assert_eq!(cycle.as_ref().unwrap_err().kind(), ErrorKind::Format);
        }
        assert_eq!(results[4].as_ref().unwrap().path, "a/inner/after");
    }

    #[test]
    fn sibling_hard_links_are_walked_twice() {
        let mut b = MinixImageBuilder::new();
        let shared = b.add_dir(ROOT_INO, "shared").unwrap();
        b.add_file(shared, "f", b"").unwrap();
        b.link(ROOT_INO, "alias", shared).unwrap();
        let fs = open(&b);
        assert_eq!(
            paths(&fs, &WalkOptions::default()),
            ["shared", "shared/f", "alias", "alias/f"]
        );
    }

    #[test]
    fn non_ascii_names() {
        let mut b = MinixImageBuilder::new();
        b.add_file(ROOT_INO, b"caf\xE9".as_slice(), b"").unwrap();
        b.add_file(ROOT_INO, "ok", b"").unwrap();
        let fs = open(&b);

        let strict: Vec<_> = fs.walk(&WalkOptions::default()).collect();
        assert_eq!(strict.len(), 2);
        assert_eq!(strict[0].as_ref().unwrap_err().kind(), ErrorKind::Encoding);
        assert_eq!(strict[1].as_ref().unwrap().path, "ok");

        let lossy = WalkOptions {
            lossy_names: true,
            ..WalkOptions::default()
        };
        assert_eq!(paths(&fs, &lossy), ["caf\u{FFFD}", "ok"]);
    }

    #[test]
    fn dangling_entry_is_a_range_error() {
        let mut b = MinixImageBuilder::new();
        b.link(ROOT_INO, "ghost", 200).unwrap();
        b.add_file(ROOT_INO, "real", b"").unwrap();
        let fs = open(&b);
        let results: Vec<_> = fs.walk(&WalkOptions::default()).collect();
        assert_eq!(results[0].as_ref().unwrap_err().kind(), ErrorKind::Range);
        assert_eq!(results[1].as_ref().unwrap().path, "real");
    }

    #[test]
    fn walk_from_subdirectory() {
        let mut b = MinixImageBuilder::new();
        let usr = b.add_dir(ROOT_INO, "usr").unwrap();
        b.add_file(usr, "x", b"").unwrap();
        let fs = open(&b);
        let usr = fs.lookup("usr").unwrap();
        let got: Vec<_> = fs
            .walk_from(usr, &WalkOptions::default())
            .map(|e| e.unwrap().path)
            .collect();
        assert_eq!(got, ["x"]);
    }

    #[test]
    fn walking_a_file_fails_once() {
        let mut b = MinixImageBuilder::new();
        b.add_file(ROOT_INO, "f", b"").unwrap();
        let fs = open(&b);
        let f = fs.lookup("f").unwrap();
        let results: Vec<_> = fs.walk_from(f, &WalkOptions::default()).collect();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }
}
