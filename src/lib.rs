//! Client side of the gateway file protocol.
//!
//! [`GatewayClient`] speaks the binary request/response protocol to one
//! gateway, [`InstanceRegistry`] shares clients between callers, and
//! [`LocalityMonitor`] asks every gateway which blocks of a file it has
//! cached so schedulers can place work near the data.

pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod locality;
pub mod protocol;

pub use cache::ExpiringCache;
pub use config::GatewayConfig;
pub use error::{GatewayError, ProtocolError, Result};
pub use gateway::{FileHandle, GatewayClient, InstanceRegistry, MetadataCache};
pub use locality::{BlockBitmap, BlockLocation, CachedBlockInfo, HostEntry, LocalityMonitor};
pub use protocol::{Opcode, Stat};
