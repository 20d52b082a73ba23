pub mod client;
pub mod metadata;
pub mod registry;

pub use client::{FileHandle, GatewayClient, CACHED_BLOCKS_XATTR};
pub use metadata::MetadataCache;
pub use registry::InstanceRegistry;
