use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::{GatewayError, Result};
use crate::gateway::{GatewayClient, InstanceRegistry, MetadataCache};
use crate::locality::blocks::{self, BlockBitmap, BlockLocation, BlockRecords};

/// Result of querying one host during a fan-out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostEntry<T> {
    /// Host as configured, port included if one was given
    pub host: String,
    /// `None` when the host failed or had nothing to report
    pub value: Option<T>,
}

impl<T> HostEntry<T> {
    pub fn hostname(&self) -> &str {
        crate::config::host_name(&self.host)
    }

    pub fn is_absent(&self) -> bool {
        self.value.is_none()
    }
}

pub type CachedBlockInfo = HostEntry<BlockBitmap>;

/// Asks every known gateway what it holds for a file and aggregates the answers.
///
/// Queries run concurrently, at most `fanout_workers` at a time. A host that
/// cannot be reached or fails contributes an absent entry; the query as a
/// whole never fails because of one host.
pub struct LocalityMonitor {
    registry: Arc<InstanceRegistry>,
    metadata: MetadataCache,
    hosts: Vec<String>,
}

impl LocalityMonitor {
    /// Monitors the hosts listed in the registry's configuration.
    pub fn new(registry: Arc<InstanceRegistry>) -> Result<Self> {
        let hosts = registry.config().hosts.clone();
        Self::with_hosts(registry, hosts)
    }

    pub fn with_hosts(registry: Arc<InstanceRegistry>, hosts: Vec<String>) -> Result<Self> {
        if hosts.is_empty() {
            return Err(GatewayError::NoHosts);
        }
        if registry.config().block_size == 0 {
            return Err(GatewayError::InvalidArgument(
                "block size must be positive".to_string(),
            ));
        }
        for host in &hosts {
            registry.config().resolve_addr(host)?;
        }
        let metadata = MetadataCache::new(registry.config());
        Ok(Self {
            registry,
            metadata,
            hosts,
        })
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn metadata(&self) -> &MetadataCache {
        &self.metadata
    }

    /// One entry per host, in host-list order, holding that host's cached-block bitmap.
    pub async fn get_local_cached_block_info(&self, path: &str) -> Vec<CachedBlockInfo> {
        let path = path.to_string();
        self.fan_out("cached block bitmap", move |client| {
            let path = path.clone();
            async move { client.get_cached_block_bitmap(&path).await }
        })
        .await
    }

    /// Extended attribute names for `path` as seen by each host.
    pub async fn list_extended_attrs(&self, path: &str) -> Vec<HostEntry<Vec<String>>> {
        let path = path.to_string();
        self.fan_out("extended attribute list", move |client| {
            let path = path.clone();
            async move { client.list_extended_attr(&path).await.map(Some) }
        })
        .await
    }

    /// Value of extended attribute `name` on each host; absent where missing.
    pub async fn get_extended_attrs(&self, path: &str, name: &str) -> Vec<HostEntry<Vec<u8>>> {
        let path = path.to_string();
        let name = name.to_string();
        self.fan_out("extended attribute", move |client| {
            let path = path.clone();
            let name = name.clone();
            async move { client.get_extended_attr(&path, &name).await }
        })
        .await
    }

    /// Block placement hints for `len` bytes of `path` starting at `start`.
    ///
    /// The range is clipped to the file length when some host can stat the
    /// file. Blocks no host has cached carry the configured local placeholder.
    pub async fn block_locations(&self, path: &str, start: u64, len: u64) -> Vec<BlockLocation> {
        let config = self.registry.config();
        let file_len = self.file_length(path).await;

        let mut end = start.saturating_add(len);
        if let Some(file_len) = file_len {
            end = end.min(file_len);
        }
        if start >= end {
            return Vec::new();
        }

        let first = blocks::block_id(start, config.block_size);
        let last = blocks::block_id(end - 1, config.block_size);
        let entries = self.get_local_cached_block_info(path).await;
        let records = BlockRecords::from_entries(&entries, first, last);

        blocks::block_locations(
            &records,
            start,
            end,
            file_len.unwrap_or(u64::MAX),
            config.block_size,
            &config.local_placeholder,
        )
    }

    /// Length of `path` from the first host that answers a stat.
    async fn file_length(&self, path: &str) -> Option<u64> {
        for host in &self.hosts {
            let client = match self.registry.get_instance(host).await {
                Ok(client) => client,
                Err(err) => {
                    debug!(host = %host, "skipping host for stat: {}", err);
                    continue;
                }
            };
            match self.metadata.stat(&client, path).await {
                Ok(stat) => return Some(stat.len()),
                Err(err) => {
                    if err.is_connection_fatal() {
                        self.registry.invalidate(host);
                    }
                    debug!(host = %host, path, "stat failed: {}", err);
                }
            }
        }
        None
    }

    async fn fan_out<T, F, Fut>(&self, what: &'static str, query: F) -> Vec<HostEntry<T>>
    where
        T: Send + 'static,
        F: Fn(Arc<GatewayClient>) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<Option<T>>> + Send + 'static,
    {
        let permits = Arc::new(Semaphore::new(self.registry.config().fanout_workers.max(1)));
        let mut tasks = JoinSet::new();

        for (idx, host) in self.hosts.iter().enumerate() {
            let registry = Arc::clone(&self.registry);
            let permits = Arc::clone(&permits);
            let query = query.clone();
            let host = host.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                let result = match registry.get_instance(&host).await {
                    Ok(client) => {
                        let result = query(client).await;
                        if let Err(err) = &result {
                            if err.is_connection_fatal() {
                                registry.invalidate(&host);
                            }
                        }
                        result
                    }
                    Err(err) => Err(err),
                };
                (idx, result)
            });
        }

        let mut values: Vec<Option<T>> = (0..self.hosts.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, Ok(value))) => values[idx] = value,
                Ok((idx, Err(err))) => {
                    warn!(host = %self.hosts[idx], "{} query failed: {}", what, err);
                }
                Err(err) => warn!("{} query task failed: {}", what, err),
            }
        }

        self.hosts
            .iter()
            .zip(values)
            .map(|(host, value)| HostEntry {
                host: host.clone(),
                value,
            })
            .collect()
    }
}
