#![forbid(unsafe_code)]
//! Zone mapping: logical file block to physical zone resolution.
//!
//! A v1 inode addresses its data through three tiers:
//!
//! 1. seven direct zone slots in the inode itself,
//! 2. one indirect zone holding `block_size / 2` zone numbers,
//! 3. one double-indirect zone holding `block_size / 2` pointers to
//!    further indirect zones.
//!
//! Index entries are 16-bit and use the image byte order. A zero zone
//! number is a hole; a zero index pointer stands for an index block full
//! of holes and is never read from disk.

use mfs_block::BlockMedium;
use mfs_error::{MfsError, Result};
use mfs_ondisk::MinixInode;
use mfs_types::{BlockSize, ByteOrder, MINIX_V1_DIRECT_ZONES, ZoneNumber};
use tracing::trace;

/// Expands inode zone graphs against one medium.
#[derive(Debug, Clone, Copy)]
pub struct ZoneResolver<'m> {
    medium: &'m BlockMedium,
    order: ByteOrder,
}

impl<'m> ZoneResolver<'m> {
    #[must_use]
    pub fn new(medium: &'m BlockMedium, order: ByteOrder) -> Self {
        Self { medium, order }
    }

    fn block_size(&self) -> BlockSize {
        self.medium.block_size()
    }

    fn entries_per_block(&self) -> u64 {
        self.block_size().zone_entries_per_block() as u64
    }

    /// Largest zone count the three tiers can address.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        let per = self.entries_per_block();
        MINIX_V1_DIRECT_ZONES as u64 + per + per * per
    }

    /// Produce the ordered physical zone list for `inode`.
    ///
    /// The list has exactly `ceil(size / block_size)` entries. An inode whose
    /// size needs more zones than the graph can address is a format error.
    ///
    /// Zero entries are kept as holes. They denote zero-filled blocks and
    /// must not be read as block 0, which holds the boot sector.
    pub fn resolve(&self, inode: &MinixInode) -> Result<Vec<ZoneNumber>> {
        let target = inode.zone_count(self.block_size());
        let capacity = usize::try_from(target.min(self.capacity()))
            .map_err(|_| MfsError::Format("zone count exceeds addressable memory".to_owned()))?;
        let mut zones = Vec::with_capacity(capacity);
        let mut remaining = target;

        for zone in inode.zones {
            if remaining == 0 {
                break;
            }
            zones.push(zone);
            remaining -= 1;
        }

        if remaining > 0 {
            trace!(
                zone = inode.indirect_zone.0,
                remaining, "descending into indirect zone"
            );
            remaining = self.append_indirect(inode.indirect_zone, remaining, &mut zones)?;
        }

        if remaining > 0 {
            trace!(
                zone = inode.double_indirect_zone.0,
                remaining, "descending into double-indirect zone"
            );
            let pointers = self.index_entries(inode.double_indirect_zone)?;
            for pointer in pointers {
                remaining = self.append_indirect(pointer, remaining, &mut zones)?;
                if remaining == 0 {
                    break;
                }
            }
        }

        if remaining != 0 {
            return Err(MfsError::Format(format!(
                "inode size {} needs {target} zones but the zone graph addresses only {}",
                inode.size,
                target - remaining
            )));
        }
        Ok(zones)
    }

    /// Physical zone backing logical block `index` of `inode`.
    ///
    /// Returns `Ok(None)` past the end of the file. Unlike
    /// [`resolve`](Self::resolve) this reads at most two index blocks.
    pub fn map_logical(&self, inode: &MinixInode, index: u64) -> Result<Option<ZoneNumber>> {
        if index >= inode.zone_count(self.block_size()) {
            return Ok(None);
        }

        let direct = MINIX_V1_DIRECT_ZONES as u64;
        if index < direct {
            return Ok(Some(inode.zones[to_usize(index)?]));
        }

        let per = self.entries_per_block();
        let index = index - direct;
        if index < per {
            return self.entry(inode.indirect_zone, index).map(Some);
        }

        let index = index - per;
        if index < per * per {
            let pointer = self.entry(inode.double_indirect_zone, index / per)?;
            return self.entry(pointer, index % per).map(Some);
        }

        Err(MfsError::Format(format!(
            "logical block {} lies beyond the double-indirect tier",
            index + direct + per
        )))
    }

    fn append_indirect(
        &self,
        block: ZoneNumber,
        remaining: u64,
        zones: &mut Vec<ZoneNumber>,
    ) -> Result<u64> {
        let mut remaining = remaining;
        for zone in self.index_entries(block)? {
            zones.push(zone);
            remaining -= 1;
            if remaining == 0 {
                break;
            }
        }
        Ok(remaining)
    }

    /// All entries of one index block; a hole pointer yields all holes.
    fn index_entries(&self, block: ZoneNumber) -> Result<Vec<ZoneNumber>> {
        if block.is_hole() {
            return Ok(vec![ZoneNumber(0); self.block_size().zone_entries_per_block()]);
        }
        let data = self.medium.read_block(block.to_block())?;
        decode_index_block(data, self.order, block)
    }

    fn entry(&self, block: ZoneNumber, index: u64) -> Result<ZoneNumber> {
        if block.is_hole() {
            return Ok(ZoneNumber(0));
        }
        let data = self.medium.read_block(block.to_block())?;
        let offset = to_usize(index)? * 2;
        self.order
            .read_u16(data, offset)
            .map(ZoneNumber)
            .map_err(|e| MfsError::Truncated(format!("zone index block {block}: {e}")))
    }
}

/// Decode the u16 entries of index block `block`. A trailing odd byte is
/// a truncated entry.
fn decode_index_block(data: &[u8], order: ByteOrder, block: ZoneNumber) -> Result<Vec<ZoneNumber>> {
    data.chunks(2)
        .map(|pair| {
            order
                .read_u16(pair, 0)
                .map(ZoneNumber)
                .map_err(|e| MfsError::Truncated(format!("zone index block {block}: {e}")))
        })
        .collect()
}

fn to_usize(value: u64) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| MfsError::Format(format!("zone index {value} exceeds usize")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mfs_error::ErrorKind;
    use mfs_types::S_IFREG;
    use proptest::prelude::*;

    const BS: usize = 1024;
    const PER: u64 = 512;

    /// Image with `blocks` blocks; each `(block, entries)` pair fills an
    /// index block with big-endian zone numbers.
    fn image(blocks: usize, index_blocks: &[(usize, Vec<u16>)]) -> BlockMedium {
        let mut data = vec![0_u8; blocks * BS];
        for (block, entries) in index_blocks {
            for (i, zone) in entries.iter().enumerate() {
                let off = block * BS + i * 2;
                data[off..off + 2].copy_from_slice(&zone.to_be_bytes());
            }
        }
        BlockMedium::from_bytes(data, BlockSize::MINIX)
    }

    fn inode(size: u32) -> MinixInode {
        MinixInode {
            mode: S_IFREG | 0o644,
            uid: 0,
            size,
            time: 0,
            gid: 0,
            nlinks: 1,
            zones: [10, 11, 12, 13, 14, 15, 16].map(ZoneNumber),
            indirect_zone: ZoneNumber(20),
            double_indirect_zone: ZoneNumber(21),
        }
    }

    /// Indirect block 20 holds 1000.., double-indirect block 21 points at
    /// 22, 23, 24 which hold 2000.., 3000.., 4000..
    fn full_fixture() -> BlockMedium {
        let seq = |base: u16| (0..512_u16).map(|i| base + i).collect::<Vec<_>>();
        image(
            30,
            &[
                (20, seq(1000)),
                (21, vec![22, 23, 24]),
                (22, seq(2000)),
                (23, seq(3000)),
                (24, seq(4000)),
            ],
        )
    }

    fn size_for_zones(n: u64) -> u32 {
        u32::try_from(n * BS as u64).unwrap()
    }

    #[test]
    fn empty_file_has_no_zones() {
        let dev = full_fixture();
        let zr = ZoneResolver::new(&dev, ByteOrder::Big);
        assert!(zr.resolve(&inode(0)).unwrap().is_empty());
        assert_eq!(zr.map_logical(&inode(0), 0).unwrap(), None);
    }

    #[test]
    fn small_files_use_only_direct_zones() {
        // No index blocks exist at all: any indirect read would fail.
        let dev = image(4, &[]);
        let zr = ZoneResolver::new(&dev, ByteOrder::Big);
        let zones = zr.resolve(&inode(3 * 1024 + 1)).unwrap();
        assert_eq!(zones, vec![ZoneNumber(10), ZoneNumber(11), ZoneNumber(12), ZoneNumber(13)]);
        let zones = zr.resolve(&inode(size_for_zones(7))).unwrap();
        assert_eq!(zones.len(), 7);
    }

    #[test]
    fn indirect_tier_follows_direct_slots() {
        let dev = full_fixture();
        let zr = ZoneResolver::new(&dev, ByteOrder::Big);
        let zones = zr.resolve(&inode(size_for_zones(9))).unwrap();
        assert_eq!(zones.len(), 9);
        assert_eq!(zones[6], ZoneNumber(16));
        assert_eq!(zones[7], ZoneNumber(1000));
        assert_eq!(zones[8], ZoneNumber(1001));

        let zones = zr.resolve(&inode(size_for_zones(7 + PER))).unwrap();
        assert_eq!(zones.len(), 519);
        assert_eq!(zones[518], ZoneNumber(1511));
    }

    #[test]
    fn double_indirect_tier_stops_at_target() {
        let dev = full_fixture();
        let zr = ZoneResolver::new(&dev, ByteOrder::Big);
        let n = 7 + PER + PER + 3;
        let zones = zr.resolve(&inode(size_for_zones(n) - 10)).unwrap();
        assert_eq!(zones.len() as u64, n);
        assert_eq!(zones[519], ZoneNumber(2000));
        assert_eq!(zones[1030], ZoneNumber(2511));
        assert_eq!(zones[1031], ZoneNumber(3000));
        assert_eq!(*zones.last().unwrap(), ZoneNumber(3002));
    }

    #[test]
    fn little_endian_index_blocks() {
        let mut data = vec![0_u8; 24 * BS];
        data[20 * BS..20 * BS + 2].copy_from_slice(&0x0102_u16.to_le_bytes());
        let dev = BlockMedium::from_bytes(data, BlockSize::MINIX);
        let zr = ZoneResolver::new(&dev, ByteOrder::Little);
        let zones = zr.resolve(&inode(size_for_zones(8))).unwrap();
        assert_eq!(zones[7], ZoneNumber(0x0102));
    }

    #[test]
    fn hole_pointers_are_not_read() {
        let dev = image(2, &[]);
        let zr = ZoneResolver::new(&dev, ByteOrder::Big);
        let mut ino = inode(size_for_zones(7 + PER + 5));
        ino.indirect_zone = ZoneNumber(0);
        ino.double_indirect_zone = ZoneNumber(0);
        let zones = zr.resolve(&ino).unwrap();
        assert_eq!(zones.len() as u64, 7 + PER + 5);
        assert!(zones[7..].iter().all(|z| z.is_hole()));
    }

    #[test]
    fn oversized_inode_is_a_format_error() {
        let dev = image(2, &[]);
        let zr = ZoneResolver::new(&dev, ByteOrder::Big);
        let mut ino = inode(size_for_zones(zr.capacity() + 1));
        ino.indirect_zone = ZoneNumber(0);
        ino.double_indirect_zone = ZoneNumber(0);
        let err = zr.resolve(&ino).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(zr.map_logical(&ino, zr.capacity()).is_err());
    }

    #[test]
    fn index_block_out_of_range() {
        let dev = image(8, &[]);
        let zr = ZoneResolver::new(&dev, ByteOrder::Big);
        let err = zr.resolve(&inode(size_for_zones(8))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Range);
    }

    #[test]
    fn odd_index_block_tail_is_truncation() {
        let err = decode_index_block(&[0, 9, 0, 4, 7], ByteOrder::Big, ZoneNumber(30)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Truncation);

        let zones = decode_index_block(&[0, 9, 4, 0], ByteOrder::Little, ZoneNumber(30)).unwrap();
        assert_eq!(zones, [ZoneNumber(0x0900), ZoneNumber(4)]);
    }

    #[test]
    fn capacity_for_1k_blocks() {
        let dev = image(1, &[]);
        assert_eq!(
            ZoneResolver::new(&dev, ByteOrder::Big).capacity(),
            7 + 512 + 512 * 512
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn zone_list_length_matches_size(size in 0_u32..=size_for_zones(7 + 512 + 3 * 512)) {
            let dev = full_fixture();
            let zr = ZoneResolver::new(&dev, ByteOrder::Big);
            let ino = inode(size);
            let zones = zr.resolve(&ino).unwrap();
            prop_assert_eq!(zones.len() as u64, u64::from(size).div_ceil(1024));
            for logical in [0_usize, zones.len() / 2, zones.len().saturating_sub(1)] {
                if logical < zones.len() {
                    prop_assert_eq!(zr.map_logical(&ino, logical as u64).unwrap(), Some(zones[logical]));
                }
            }
            prop_assert_eq!(zr.map_logical(&ino, zones.len() as u64).unwrap(), None);
        }
    }
}
