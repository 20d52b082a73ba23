use std::time::Duration;

use crate::error::{GatewayError, Result};

pub const DEFAULT_PORT: u16 = 9090;
pub const DEFAULT_BLOCK_SIZE: u64 = 4 * 1024 * 1024;
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Settings shared by every component that talks to gateways.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Known gateway hosts, `host` or `host:port`
    pub hosts: Vec<String>,

    /// Port used for hosts listed without one
    pub default_port: u16,

    pub instance_cache_size: usize,
    pub instance_ttl: Duration,

    pub metadata_cache_size: usize,
    pub metadata_ttl: Duration,

    /// Socket read buffer capacity
    pub input_buffer_size: usize,
    /// Socket write buffer capacity
    pub output_buffer_size: usize,

    /// Block size used when turning byte ranges into block ids
    pub block_size: u64,

    /// Upper bound on concurrent per-host queries during fan-out
    pub fanout_workers: usize,

    /// Host reported for blocks no gateway has cached
    pub local_placeholder: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            default_port: DEFAULT_PORT,
            instance_cache_size: 64,
            instance_ttl: Duration::from_secs(300),
            metadata_cache_size: 1024,
            metadata_ttl: Duration::from_secs(10),
            input_buffer_size: DEFAULT_BUFFER_SIZE,
            output_buffer_size: DEFAULT_BUFFER_SIZE,
            block_size: DEFAULT_BLOCK_SIZE,
            fanout_workers: 8,
            local_placeholder: "localhost".to_string(),
        }
    }
}

impl GatewayConfig {
    pub fn with_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    pub fn with_block_size(mut self, block_size: u64) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_instance_cache(mut self, size: usize, ttl: Duration) -> Self {
        self.instance_cache_size = size;
        self.instance_ttl = ttl;
        self
    }

    pub fn with_metadata_cache(mut self, size: usize, ttl: Duration) -> Self {
        self.metadata_cache_size = size;
        self.metadata_ttl = ttl;
        self
    }

    pub fn with_fanout_workers(mut self, workers: usize) -> Self {
        self.fanout_workers = workers;
        self
    }

    /// Returns `host:port`, filling in the default port when `host` has none.
    pub fn resolve_addr(&self, host: &str) -> Result<String> {
        let host = host.trim();
        if host.is_empty() {
            return Err(GatewayError::InvalidHost(host.to_string()));
        }
        match host.rsplit_once(':') {
            Some((name, port)) => {
                if name.is_empty() || port.parse::<u16>().is_err() {
                    return Err(GatewayError::InvalidHost(host.to_string()));
                }
                Ok(host.to_string())
            }
            None => Ok(format!("{}:{}", host, self.default_port)),
        }
    }
}

/// Splits a comma-separated host list, dropping blanks.
pub fn parse_host_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect()
}

/// Host part of `host:port`, used as the name in locality hints.
pub fn host_name(addr: &str) -> &str {
    match addr.rsplit_once(':') {
        Some((name, _)) => name,
        None => addr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_list() {
        let hosts = parse_host_list(" gw1, gw2:7000,,gw3 ,");
        assert_eq!(hosts, vec!["gw1", "gw2:7000", "gw3"]);
        assert!(parse_host_list("").is_empty());
    }

    #[test]
    fn test_resolve_addr() {
        let config = GatewayConfig::default().with_default_port(7777);
        assert_eq!(config.resolve_addr("gw1").unwrap(), "gw1:7777");
        assert_eq!(config.resolve_addr("gw2:1234").unwrap(), "gw2:1234");
        assert!(config.resolve_addr("gw3:notaport").is_err());
        assert!(config.resolve_addr("  ").is_err());
    }

    #[test]
    fn test_host_name() {
        assert_eq!(host_name("10.0.0.1:9090"), "10.0.0.1");
        assert_eq!(host_name("gw1"), "gw1");
    }
}
