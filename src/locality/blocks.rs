// block arithmetic and the per-block host records built from gateway bitmaps
use std::collections::HashMap;

use crate::config::host_name;
use crate::locality::HostEntry;

/// Index of the block that `offset` falls in.
///
/// Computed as the block holding the byte just before `offset`, plus one
/// when `offset` is a nonzero exact multiple of `block_size` (that offset
/// opens the next block). Zero maps to block 0. The result is always
/// exactly `offset / block_size`: 4095 is in block 0, 4096 and 8191 in
/// block 1, 8192 in block 2 for 4 KiB blocks. Gateways lay out blocks the
/// same way, so keep the two in agreement.
pub fn block_id(offset: u64, block_size: u64) -> u64 {
    debug_assert!(block_size > 0, "block size must be positive");
    let block_size = block_size.max(1);
    if offset == 0 {
        return 0;
    }
    let id = (offset - 1) / block_size;
    if offset % block_size == 0 {
        id + 1
    } else {
        id
    }
}

/// Per-block cache presence reported by one gateway.
///
/// Byte `i` set to 1 means block `i` is in that gateway's local cache.
/// Blocks past the end of the bitmap are reported as not cached.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockBitmap(Vec<u8>);

impl BlockBitmap {
    pub fn new(bytes: Vec<u8>) -> Self {
        BlockBitmap(bytes)
    }

    pub fn is_cached(&self, block: u64) -> bool {
        usize::try_from(block)
            .ok()
            .and_then(|idx| self.0.get(idx))
            .map_or(false, |&flag| flag == 1)
    }

    /// Number of blocks the bitmap covers.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn cached_blocks(&self) -> impl Iterator<Item = u64> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, &flag)| flag == 1)
            .map(|(idx, _)| idx as u64)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Block placement hint handed to a scheduler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockLocation {
    pub offset: u64,
    pub length: u64,
    pub hosts: Vec<String>,
}

/// Which hosts hold each block, assembled from per-host bitmaps.
pub struct BlockRecords {
    block_mappings: HashMap<u64, Vec<String>>, // block id -> host names, in host-list order
}

impl BlockRecords {
    /// Records every block in `first..=last` cached by a host in `entries`.
    pub fn from_entries(entries: &[HostEntry<BlockBitmap>], first: u64, last: u64) -> Self {
        let mut block_mappings: HashMap<u64, Vec<String>> = HashMap::new();
        for entry in entries {
            let Some(bitmap) = &entry.value else {
                continue;
            };
            let name = host_name(&entry.host);
            for block in bitmap.cached_blocks() {
                if block < first || block > last {
                    continue;
                }
                let hosts = block_mappings.entry(block).or_default();
                if !hosts.iter().any(|h| h == name) {
                    hosts.push(name.to_string());
                }
            }
        }
        Self { block_mappings }
    }

    /// Hosts caching `block`, or `placeholder` alone when none do.
    pub fn get_block_hosts(&self, block: u64, placeholder: &str) -> Vec<String> {
        match self.block_mappings.get(&block) {
            Some(hosts) if !hosts.is_empty() => hosts.clone(),
            _ => vec![placeholder.to_string()],
        }
    }
}

/// Configured hosts (as given, port included) whose bitmap marks `block` cached.
pub fn hosts_caching_block(entries: &[HostEntry<BlockBitmap>], block: u64) -> Vec<&str> {
    entries
        .iter()
        .filter(|entry| {
            entry
                .value
                .as_ref()
                .map_or(false, |bitmap| bitmap.is_cached(block))
        })
        .map(|entry| entry.host.as_str())
        .collect()
}

/// Splits `[start, end)` into block-aligned locations, each block clipped to
/// `file_end` (`u64::MAX` when the file length is unknown), with hosts drawn
/// from `records`.
pub fn block_locations(
    records: &BlockRecords,
    start: u64,
    end: u64,
    file_end: u64,
    block_size: u64,
    placeholder: &str,
) -> Vec<BlockLocation> {
    if start >= end {
        return Vec::new();
    }
    let first = block_id(start, block_size);
    let last = block_id(end - 1, block_size);
    (first..=last)
        .map(|block| {
            let offset = block * block_size;
            let block_end = offset.saturating_add(block_size).min(file_end);
            BlockLocation {
                offset,
                length: block_end - offset,
                hosts: records.get_block_hosts(block, placeholder),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_id_boundaries() {
        assert_eq!(block_id(0, 4096), 0);
        assert_eq!(block_id(1, 4096), 0);
        assert_eq!(block_id(4095, 4096), 0);
        assert_eq!(block_id(4096, 4096), 1);
        assert_eq!(block_id(4097, 4096), 1);
        assert_eq!(block_id(8191, 4096), 1);
        assert_eq!(block_id(8192, 4096), 2);
        assert_eq!(block_id(12288, 4096), 3);
        assert_eq!(block_id(12289, 4096), 3);
    }

    #[test]
    fn test_block_id_small_blocks() {
        assert_eq!(block_id(0, 1), 0);
        assert_eq!(block_id(1, 1), 1);
        assert_eq!(block_id(7, 1), 7);
        assert_eq!(block_id(u64::MAX, 1 << 20), u64::MAX >> 20);
    }

    #[test]
    fn test_block_id_is_floor_division() {
        for block_size in [1, 3, 100, 4096] {
            for offset in 0..5 * block_size + 2 {
                assert_eq!(block_id(offset, block_size), offset / block_size);
            }
        }
    }

    #[test]
    fn test_bitmap_lookup() {
        let bitmap = BlockBitmap::new(vec![1, 0, 0, 1, 2]);
        assert!(bitmap.is_cached(0));
        assert!(!bitmap.is_cached(1));
        assert!(bitmap.is_cached(3));
        assert!(!bitmap.is_cached(4));
        assert!(!bitmap.is_cached(5));
        assert!(!bitmap.is_cached(u64::MAX));
        assert_eq!(bitmap.cached_blocks().collect::<Vec<_>>(), vec![0, 3]);
    }

    fn entry(host: &str, bitmap: Option<Vec<u8>>) -> HostEntry<BlockBitmap> {
        HostEntry {
            host: host.to_string(),
            value: bitmap.map(BlockBitmap::new),
        }
    }

    #[test]
    fn test_records_and_locations() {
        let entries = vec![
            entry("gw1:9090", Some(vec![1, 1, 0, 1])),
            entry("gw2:9090", Some(vec![0, 1])),
            entry("gw3:9090", None),
        ];
        assert_eq!(hosts_caching_block(&entries, 1), vec!["gw1:9090", "gw2:9090"]);

        let records = BlockRecords::from_entries(&entries, 0, 3);
        // 4 blocks of 100 bytes, file is 350 bytes long
        let locations = block_locations(&records, 0, 350, 350, 100, "localhost");
        assert_eq!(locations.len(), 4);
        assert_eq!(locations[0].hosts, vec!["gw1"]);
        assert_eq!(locations[1].hosts, vec!["gw1", "gw2"]);
        assert_eq!(locations[2].hosts, vec!["localhost"]);
        assert_eq!(locations[3].hosts, vec!["gw1"]);
        assert_eq!(locations[3].offset, 300);
        assert_eq!(locations[3].length, 50);
    }

    #[test]
    fn test_locations_for_partial_range() {
        let records = BlockRecords::from_entries(&[], 0, 0);
        let locations = block_locations(&records, 150, 250, 1000, 100, "here");
        assert_eq!(
            locations,
            vec![
                BlockLocation {
                    offset: 100,
                    length: 100,
                    hosts: vec!["here".to_string()],
                },
                BlockLocation {
                    offset: 200,
                    length: 100,
                    hosts: vec!["here".to_string()],
                },
            ]
        );
        assert!(block_locations(&records, 10, 10, 1000, 100, "here").is_empty());
    }
}
