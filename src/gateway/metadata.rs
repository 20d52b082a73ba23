use crate::cache::ExpiringCache;
use crate::config::GatewayConfig;
use crate::error::Result;
use crate::gateway::client::GatewayClient;
use crate::protocol::Stat;

/// Short-lived cache of `GET_STAT` results, keyed by path.
///
/// Mutations issued through it drop the affected paths so the next stat
/// goes back to a gateway.
pub struct MetadataCache {
    stats: ExpiringCache<String, Stat>,
}

impl MetadataCache {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            stats: ExpiringCache::new(config.metadata_cache_size, config.metadata_ttl),
        }
    }

    pub async fn stat(&self, client: &GatewayClient, path: &str) -> Result<Stat> {
        let key = path.to_string();
        if let Some(stat) = self.stats.get(&key) {
            return Ok(stat);
        }
        let stat = client.get_stat(path).await?;
        self.stats.insert(key, stat.clone());
        Ok(stat)
    }

    pub fn cached(&self, path: &str) -> Option<Stat> {
        self.stats.get(path)
    }

    pub fn invalidate(&self, path: &str) {
        self.stats.invalidate(path);
    }

    pub async fn delete(&self, client: &GatewayClient, path: &str) -> Result<()> {
        let result = client.delete(path).await;
        self.invalidate(path);
        result
    }

    pub async fn rename(&self, client: &GatewayClient, from: &str, to: &str) -> Result<()> {
        let result = client.rename(from, to).await;
        self.invalidate(from);
        self.invalidate(to);
        result
    }

    pub async fn truncate_file(&self, client: &GatewayClient, path: &str, length: u64) -> Result<()> {
        let result = client.truncate_file(path, length).await;
        self.invalidate(path);
        result
    }

    pub fn len(&self) -> usize {
        self.stats.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
