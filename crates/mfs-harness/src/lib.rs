#![forbid(unsafe_code)]
//! Synthetic MINIX v1 images and MINIX archives for tests and benchmarks.
//!
//! Builders lay records out byte-for-byte the way the on-disk format
//! specifies, without going through the decoders they are used to test.

use anyhow::{Context, Result, bail, ensure};
use mfs_ondisk::MinixSuperblock;
use mfs_types::{
    ByteOrder, MINIX_ARCHIVE_HEADER_SIZE, MINIX_ARCHIVE_MAGIC, MINIX_ARCHIVE_NAME_LEN,
    MINIX_ARCHIVE_SYMDEF, MINIX_BLOCK_SIZE, MINIX_SUPER_MAGIC, MINIX_V1_DIR_ENTRY_SIZE,
    MINIX_V1_DIRECT_ZONES, MINIX_V1_INODE_SIZE, MINIX_V1_NAME_LEN, MINIX_VALID_FS, S_IFDIR,
    S_IFREG,
};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Inode number of the root directory.
pub const ROOT_INO: u16 = 1;

const BLOCK: usize = MINIX_BLOCK_SIZE as usize;
const INDEX_ENTRIES: usize = BLOCK / 2;
const BITS_PER_BLOCK: usize = BLOCK * 8;
/// `s_max_size` for 1 KiB zones: (7 + 512 + 512 * 512) * 1024.
const V1_MAX_SIZE: u32 = 268_966_912;

// ── Filesystem images ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum NodeKind {
    Dir(Vec<(Vec<u8>, u16)>),
    File { data: Vec<u8>, sparse: bool },
    Special { rdev: u16 },
}

#[derive(Debug, Clone)]
struct Node {
    mode: u16,
    nlinks: u8,
    kind: NodeKind,
}

/// Builds a complete MINIX v1 image with 1 KiB blocks.
///
/// Block 0 is left zeroed, block 1 holds the superblock, followed by the
/// inode map, zone map and inode table. Data zones are allocated in the
/// order inodes were added; index blocks follow the data they address.
///
/// ```ignore
/// let mut b = MinixImageBuilder::new();
/// let bin = b.add_dir(ROOT_INO, "bin")?;
/// b.add_file(bin, "sh", b"#!")?;
/// let image = b.build()?;
/// ```
#[derive(Debug, Clone)]
pub struct MinixImageBuilder {
    order: ByteOrder,
    ninodes: u16,
    magic: u16,
    state: u16,
    mtime: u32,
    first_data_zone_override: Option<u16>,
    /// `nodes[i]` is inode `i + 1`.
    nodes: Vec<Node>,
}

impl Default for MinixImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MinixImageBuilder {
    /// An image holding only the root directory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            order: ByteOrder::Big,
            ninodes: 64,
            magic: MINIX_SUPER_MAGIC,
            state: MINIX_VALID_FS,
            mtime: 0,
            first_data_zone_override: None,
            nodes: vec![Node {
                mode: S_IFDIR | 0o755,
                nlinks: 2,
                kind: NodeKind::Dir(vec![(b".".to_vec(), ROOT_INO), (b"..".to_vec(), ROOT_INO)]),
            }],
        }
    }

    #[must_use]
    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.order = order;
        self
    }

    #[must_use]
    pub fn with_ninodes(mut self, ninodes: u16) -> Self {
        self.ninodes = ninodes;
        self
    }

    #[must_use]
    pub fn with_magic(mut self, magic: u16) -> Self {
        self.magic = magic;
        self
    }

    #[must_use]
    pub fn with_state(mut self, state: u16) -> Self {
        self.state = state;
        self
    }

    #[must_use]
    pub fn with_mtime(mut self, mtime: u32) -> Self {
        self.mtime = mtime;
        self
    }

    /// Write this value into `s_firstdatazone` instead of the computed one.
    #[must_use]
    pub fn with_first_data_zone(mut self, zone: u16) -> Self {
        self.first_data_zone_override = Some(zone);
        self
    }

    pub fn add_dir(&mut self, parent: u16, name: impl AsRef<[u8]>) -> Result<u16> {
        let ino = self.next_ino()?;
        self.link(parent, name, ino)?;
        self.nodes.push(Node {
            mode: S_IFDIR | 0o755,
            nlinks: 2,
            kind: NodeKind::Dir(vec![(b".".to_vec(), ino), (b"..".to_vec(), parent)]),
        });
        let parent_node = self.node_mut(parent)?;
        parent_node.nlinks = parent_node.nlinks.saturating_add(1);
        Ok(ino)
    }

    pub fn add_file(&mut self, parent: u16, name: impl AsRef<[u8]>, data: &[u8]) -> Result<u16> {
        self.add_node(
            parent,
            name,
            S_IFREG | 0o644,
            NodeKind::File {
                data: data.to_vec(),
                sparse: false,
            },
        )
    }

    /// Like [`add_file`](Self::add_file), but every all-zero block is
    /// stored as a hole, and index blocks holding only holes are omitted.
    pub fn add_sparse_file(
        &mut self,
        parent: u16,
        name: impl AsRef<[u8]>,
        data: &[u8],
    ) -> Result<u16> {
        self.add_node(
            parent,
            name,
            S_IFREG | 0o644,
            NodeKind::File {
                data: data.to_vec(),
                sparse: true,
            },
        )
    }

    /// Add a device node or fifo. `mode` carries the file type bits; the
    /// device number goes in the first zone slot.
    pub fn add_special(
        &mut self,
        parent: u16,
        name: impl AsRef<[u8]>,
        mode: u16,
        rdev: u16,
    ) -> Result<u16> {
        self.add_node(parent, name, mode, NodeKind::Special { rdev })
    }

    /// Append a raw entry to directory `parent`. `ino` is not checked, so
    /// this can create unused slots, hard links and cycles.
    pub fn link(&mut self, parent: u16, name: impl AsRef<[u8]>, ino: u16) -> Result<()> {
        let name = name.as_ref();
        ensure!(
            name.len() <= MINIX_V1_NAME_LEN,
            "directory entry name {:?} exceeds {MINIX_V1_NAME_LEN} bytes",
            String::from_utf8_lossy(name)
        );
        match &mut self.node_mut(parent)?.kind {
            NodeKind::Dir(entries) => {
                entries.push((name.to_vec(), ino));
                Ok(())
            }
            _ => bail!("inode {parent} is not a directory"),
        }
    }

    fn add_node(
        &mut self,
        parent: u16,
        name: impl AsRef<[u8]>,
        mode: u16,
        kind: NodeKind,
    ) -> Result<u16> {
        let ino = self.next_ino()?;
        self.link(parent, name, ino)?;
        self.nodes.push(Node {
            mode,
            nlinks: 1,
            kind,
        });
        Ok(ino)
    }

    fn next_ino(&self) -> Result<u16> {
        u16::try_from(self.nodes.len() + 1).context("inode numbers exhausted")
    }

    fn node_mut(&mut self, ino: u16) -> Result<&mut Node> {
        let index = usize::from(ino)
            .checked_sub(1)
            .context("inode 0 is reserved")?;
        self.nodes
            .get_mut(index)
            .with_context(|| format!("inode {ino} does not exist"))
    }

    /// Serialize the image.
    pub fn build(&self) -> Result<Vec<u8>> {
        ensure!(
            self.nodes.len() <= usize::from(self.ninodes),
            "{} inodes do not fit in an inode table of {}",
            self.nodes.len(),
            self.ninodes
        );

        let contents: Vec<Vec<Option<Vec<u8>>>> =
            self.nodes.iter().map(|n| self.node_blocks(n)).collect();

        // Dry run to size the zone map.
        let mut dry = ZoneAlloc::new(1, self.order);
        for blocks in &contents {
            dry.place(blocks)?;
        }
        let data_zones = usize::try_from(dry.next - 1).context("zone count overflow")?;

        let imap_blocks = (usize::from(self.ninodes) + 1).div_ceil(BITS_PER_BLOCK);
        let itable_blocks = usize::from(self.ninodes).div_ceil(BLOCK / MINIX_V1_INODE_SIZE);
        let mut zmap_blocks = 1;
        let (first_data_zone, nzones) = loop {
            let first = 2 + imap_blocks + zmap_blocks + itable_blocks;
            let total = first + data_zones;
            let needed = (total - first + 1).div_ceil(BITS_PER_BLOCK);
            if needed <= zmap_blocks {
                break (first, total);
            }
            zmap_blocks = needed;
        };
        let nzones_u16 =
            u16::try_from(nzones).context("image exceeds 16-bit zone numbering")?;
        let first_u16 = u16::try_from(first_data_zone).context("first data zone overflow")?;

        let mut image = vec![0_u8; nzones * BLOCK];
        let o = self.order;

        // Superblock.
        let sb = BLOCK;
        let put16 = |img: &mut [u8], off: usize, v: u16| {
            img[off..off + 2].copy_from_slice(&o.u16_bytes(v));
        };
        let put32 = |img: &mut [u8], off: usize, v: u32| {
            img[off..off + 4].copy_from_slice(&o.u32_bytes(v));
        };
        put16(&mut image, sb, self.ninodes);
        put16(&mut image, sb + 2, nzones_u16);
        put16(&mut image, sb + 4, u16::try_from(imap_blocks)?);
        put16(&mut image, sb + 6, u16::try_from(zmap_blocks)?);
        put16(
            &mut image,
            sb + 8,
            self.first_data_zone_override.unwrap_or(first_u16),
        );
        put16(&mut image, sb + 10, 0);
        put32(&mut image, sb + 12, V1_MAX_SIZE);
        put16(&mut image, sb + 16, self.magic);
        put16(&mut image, sb + 18, self.state);

        // Data zones and inode records.
        let mut alloc = ZoneAlloc::new(u32::from(first_u16), o);
        let itable = (2 + imap_blocks + zmap_blocks) * BLOCK;
        for (i, (node, blocks)) in self.nodes.iter().zip(&contents).enumerate() {
            let mut slots = alloc.place(blocks)?;
            if let NodeKind::Special { rdev } = node.kind {
                slots.direct[0] = rdev;
            }
            let size: usize = blocks_size(node);
            let rec = itable + i * MINIX_V1_INODE_SIZE;
            put16(&mut image, rec, node.mode);
            put16(&mut image, rec + 2, 0);
            put32(&mut image, rec + 4, u32::try_from(size).context("file too large")?);
            put32(&mut image, rec + 8, self.mtime);
            image[rec + 12] = 0;
            image[rec + 13] = node.nlinks;
            for (slot, zone) in slots.direct.iter().enumerate() {
                put16(&mut image, rec + 14 + slot * 2, *zone);
            }
            put16(&mut image, rec + 28, slots.indirect);
            put16(&mut image, rec + 30, slots.double_indirect);
        }
        for (zone, block) in &alloc.writes {
            let off = usize::from(*zone) * BLOCK;
            image[off..off + block.len()].copy_from_slice(block);
        }

        // Bitmaps; bit 0 of each map is reserved and always set.
        let imap = 2 * BLOCK;
        for bit in 0..=self.nodes.len() {
            set_bit(&mut image[imap..imap + imap_blocks * BLOCK], bit, o);
        }
        let zmap = imap + imap_blocks * BLOCK;
        set_bit(&mut image[zmap..zmap + zmap_blocks * BLOCK], 0, o);
        for (zone, _) in &alloc.writes {
            let bit = usize::from(*zone) - first_data_zone + 1;
            set_bit(&mut image[zmap..zmap + zmap_blocks * BLOCK], bit, o);
        }

        Ok(image)
    }

    fn node_blocks(&self, node: &Node) -> Vec<Option<Vec<u8>>> {
        match &node.kind {
            NodeKind::Dir(entries) => {
                let mut data = Vec::with_capacity(entries.len() * MINIX_V1_DIR_ENTRY_SIZE);
                for (name, ino) in entries {
                    data.extend_from_slice(&ino.to_be_bytes());
                    let mut padded = [0_u8; MINIX_V1_NAME_LEN];
                    padded[..name.len()].copy_from_slice(name);
                    data.extend_from_slice(&padded);
                }
                split_blocks(&data, false)
            }
            NodeKind::File { data, sparse } => split_blocks(data, *sparse),
            NodeKind::Special { .. } => Vec::new(),
        }
    }
}

fn blocks_size(node: &Node) -> usize {
    match &node.kind {
        NodeKind::Dir(entries) => entries.len() * MINIX_V1_DIR_ENTRY_SIZE,
        NodeKind::File { data, .. } => data.len(),
        NodeKind::Special { .. } => 0,
    }
}

fn split_blocks(data: &[u8], sparse: bool) -> Vec<Option<Vec<u8>>> {
    data.chunks(BLOCK)
        .map(|chunk| {
            if sparse && chunk.iter().all(|&b| b == 0) {
                None
            } else {
                Some(chunk.to_vec())
            }
        })
        .collect()
}

/// Bitmaps are arrays of 16-bit words in image byte order.
fn set_bit(map: &mut [u8], bit: usize, order: ByteOrder) {
    let off = (bit / 16) * 2;
    let word = u16::from_be_bytes([map[off], map[off + 1]]);
    let word = match order {
        ByteOrder::Big => word,
        ByteOrder::Little => word.swap_bytes(),
    } | (1 << (bit % 16));
    map[off..off + 2].copy_from_slice(&order.u16_bytes(word));
}

struct ZoneSlots {
    direct: [u16; MINIX_V1_DIRECT_ZONES],
    indirect: u16,
    double_indirect: u16,
}

struct ZoneAlloc {
    next: u32,
    order: ByteOrder,
    writes: Vec<(u16, Vec<u8>)>,
}

impl ZoneAlloc {
    fn new(first: u32, order: ByteOrder) -> Self {
        Self {
            next: first,
            order,
            writes: Vec::new(),
        }
    }

    fn alloc(&mut self, block: Vec<u8>) -> Result<u16> {
        let zone = u16::try_from(self.next).context("image exceeds 16-bit zone numbering")?;
        self.next += 1;
        self.writes.push((zone, block));
        Ok(zone)
    }

    /// Index block for `zones`, or a hole when every entry is a hole.
    fn index(&mut self, zones: &[u16]) -> Result<u16> {
        if zones.iter().all(|&z| z == 0) {
            return Ok(0);
        }
        let mut block = vec![0_u8; BLOCK];
        for (i, zone) in zones.iter().enumerate() {
            block[i * 2..i * 2 + 2].copy_from_slice(&self.order.u16_bytes(*zone));
        }
        self.alloc(block)
    }

    fn place(&mut self, blocks: &[Option<Vec<u8>>]) -> Result<ZoneSlots> {
        ensure!(
            blocks.len() <= MINIX_V1_DIRECT_ZONES + INDEX_ENTRIES + INDEX_ENTRIES * INDEX_ENTRIES,
            "file of {} blocks exceeds the v1 zone graph",
            blocks.len()
        );
        let mut zones = Vec::with_capacity(blocks.len());
        for block in blocks {
            zones.push(match block {
                Some(bytes) => self.alloc(bytes.clone())?,
                None => 0,
            });
        }

        let mut slots = ZoneSlots {
            direct: [0; MINIX_V1_DIRECT_ZONES],
            indirect: 0,
            double_indirect: 0,
        };
        let direct = zones.len().min(MINIX_V1_DIRECT_ZONES);
        slots.direct[..direct].copy_from_slice(&zones[..direct]);

        let rest = &zones[direct..];
        let single = rest.len().min(INDEX_ENTRIES);
        if single > 0 {
            slots.indirect = self.index(&rest[..single])?;
        }

        let rest = &rest[single..];
        if !rest.is_empty() {
            let mut pointers = Vec::new();
            for chunk in rest.chunks(INDEX_ENTRIES) {
                pointers.push(self.index(chunk)?);
            }
            slots.double_indirect = self.index(&pointers)?;
        }
        Ok(slots)
    }
}

// ── Archives ────────────────────────────────────────────────────────────────

/// One member of a synthetic archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveMember {
    pub name: Vec<u8>,
    pub date: u32,
    pub uid: u8,
    pub gid: u8,
    pub mode: u16,
    pub data: Vec<u8>,
}

impl ArchiveMember {
    #[must_use]
    pub fn new(name: impl AsRef<[u8]>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.as_ref().to_vec(),
            date: 0,
            uid: 0,
            gid: 0,
            mode: S_IFREG | 0o644,
            data: data.into(),
        }
    }
}

/// Builds a MINIX archive: magic, then header, payload and pad per member.
#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    order: ByteOrder,
    members: Vec<ArchiveMember>,
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveBuilder {
    /// Little-endian archive with no members.
    #[must_use]
    pub fn new() -> Self {
        Self {
            order: ByteOrder::Little,
            members: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.order = order;
        self
    }

    #[must_use]
    pub fn member(self, name: impl AsRef<[u8]>, data: impl Into<Vec<u8>>) -> Self {
        self.push(ArchiveMember::new(name, data))
    }

    #[must_use]
    pub fn symdef(self, data: impl Into<Vec<u8>>) -> Self {
        self.member(MINIX_ARCHIVE_SYMDEF, data)
    }

    #[must_use]
    pub fn push(mut self, member: ArchiveMember) -> Self {
        self.members.push(member);
        self
    }

    pub fn build(&self) -> Result<Vec<u8>> {
        let o = self.order;
        let mut out = o.u16_bytes(MINIX_ARCHIVE_MAGIC).to_vec();
        for m in &self.members {
            ensure!(
                m.name.len() <= MINIX_ARCHIVE_NAME_LEN,
                "archive member name {:?} exceeds {MINIX_ARCHIVE_NAME_LEN} bytes",
                String::from_utf8_lossy(&m.name)
            );
            let size = u32::try_from(m.data.len()).context("member too large")?;
            let mut header = [0_u8; MINIX_ARCHIVE_HEADER_SIZE];
            header[..m.name.len()].copy_from_slice(&m.name);
            header[14..16].copy_from_slice(&o.u16_bytes(hi(m.date)));
            header[16..18].copy_from_slice(&o.u16_bytes(lo(m.date)));
            header[18] = m.uid;
            header[19] = m.gid;
            header[20..22].copy_from_slice(&o.u16_bytes(m.mode));
            header[22..24].copy_from_slice(&o.u16_bytes(hi(size)));
            header[24..26].copy_from_slice(&o.u16_bytes(lo(size)));
            out.extend_from_slice(&header);
            out.extend_from_slice(&m.data);
            if size & 1 == 1 {
                out.push(0);
            }
        }
        Ok(out)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn hi(value: u32) -> u16 {
    (value >> 16) as u16
}

#[allow(clippy::cast_possible_truncation)]
fn lo(value: u32) -> u16 {
    value as u16
}

// ── Sparse JSON fixtures ────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct SparseFixture {
    pub size: usize,
    pub writes: Vec<FixtureWrite>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FixtureWrite {
    pub offset: usize,
    pub hex: String,
}

pub fn load_sparse_fixture(path: &Path) -> Result<Vec<u8>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read fixture {}", path.display()))?;
    let fixture: SparseFixture = serde_json::from_str(&text)
        .with_context(|| format!("invalid fixture json {}", path.display()))?;

    let mut bytes = vec![0_u8; fixture.size];
    for write in fixture.writes {
        let payload = hex::decode(write.hex)
            .with_context(|| format!("invalid hex at offset {}", write.offset))?;

        let end = write
            .offset
            .checked_add(payload.len())
            .context("fixture offset overflow")?;
        if end > bytes.len() {
            bail!(
                "fixture write out of bounds: offset={} payload={} size={}",
                write.offset,
                payload.len(),
                bytes.len()
            );
        }

        bytes[write.offset..end].copy_from_slice(&payload);
    }

    Ok(bytes)
}

/// Parse the superblock held in block 1 of a sparse fixture.
pub fn validate_superblock_fixture(path: &Path, order: ByteOrder) -> Result<MinixSuperblock> {
    let data = load_sparse_fixture(path)?;
    let block = data
        .get(BLOCK..)
        .with_context(|| format!("fixture {} has no superblock", path.display()))?;
    MinixSuperblock::parse(block, order)
        .with_context(|| format!("failed superblock parse for fixture {}", path.display()))
}
