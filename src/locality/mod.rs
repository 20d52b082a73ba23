pub mod blocks;
pub mod monitor;

pub use blocks::{block_id, hosts_caching_block, BlockBitmap, BlockLocation, BlockRecords};
pub use monitor::{CachedBlockInfo, HostEntry, LocalityMonitor};
