use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};

use crate::cache::ExpiringCache;
use crate::config::GatewayConfig;
use crate::error::Result;
use crate::gateway::client::GatewayClient;

/// Shared pool of gateway clients, one per host address.
///
/// Entries expire `instance_ttl` after they were created, and the pool
/// holds at most `instance_cache_size` clients; an evicted client is
/// closed once its last user drops it. The lock inside the cache is
/// never held across a connect; concurrent callers for one address wait
/// on a per-address gate instead, so only one of them connects.
pub struct InstanceRegistry {
    config: GatewayConfig,
    instances: ExpiringCache<String, Arc<GatewayClient>>,
    connecting: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl InstanceRegistry {
    pub fn new(config: GatewayConfig) -> Self {
        let instances = ExpiringCache::new(config.instance_cache_size, config.instance_ttl);
        Self {
            config,
            instances,
            connecting: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Returns the cached client for `host`, connecting a new one if there is
    /// none or the cached one has been closed.
    ///
    /// A failed connect leaves the registry untouched.
    pub async fn get_instance(&self, host: &str) -> Result<Arc<GatewayClient>> {
        let addr = self.config.resolve_addr(host)?;
        if let Some(client) = self.live_instance(&addr) {
            return Ok(client);
        }

        let gate = self.gate(&addr);
        let result = {
            let _connecting = gate.lock().await;
            match self.live_instance(&addr) {
                // another caller connected while this one waited
                Some(client) => Ok(client),
                None => self.connect(&addr).await,
            }
        };
        self.release_gate(&addr, gate);
        result
    }

    fn live_instance(&self, addr: &str) -> Option<Arc<GatewayClient>> {
        let client = self.instances.get(addr)?;
        if !client.is_closed() {
            return Some(client);
        }
        debug!(addr = %addr, "discarding closed gateway client");
        self.instances.invalidate(addr);
        None
    }

    async fn connect(&self, addr: &str) -> Result<Arc<GatewayClient>> {
        let client = Arc::new(GatewayClient::connect(addr, &self.config).await?);
        info!(addr = %addr, "registered gateway client");
        self.instances.insert(addr.to_string(), Arc::clone(&client));
        Ok(client)
    }

    fn gate(&self, addr: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self.connecting.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(gates.entry(addr.to_string()).or_default())
    }

    // Removes the gate once no other caller holds a clone of it. Clones are
    // only taken and dropped under the map lock, so the count is exact.
    fn release_gate(&self, addr: &str, gate: Arc<tokio::sync::Mutex<()>>) {
        let mut gates = self.connecting.lock().unwrap_or_else(PoisonError::into_inner);
        if Arc::strong_count(&gate) <= 2 {
            gates.remove(addr);
        }
        drop(gate);
    }

    /// Forgets the client for `host`, e.g. after the caller saw its connection fail.
    pub fn invalidate(&self, host: &str) {
        if let Ok(addr) = self.config.resolve_addr(host) {
            if self.instances.invalidate(&addr).is_some() {
                debug!(addr = %addr, "invalidated gateway client");
            }
        }
    }

    /// Number of live clients. Drops expired ones as a side effect.
    pub fn len(&self) -> usize {
        self.instances.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.instances.clear();
    }
}
