use anyhow::{bail, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub web: WebConfig,
    pub upstream: UpstreamConfig,
    pub cache: CacheConfig,
    pub sessions: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Ordered portal chain; the order defines the default failover sequence.
    pub portals: Vec<String>,
    /// Per-portal MAC pools. Portals without an entry use `default_mac_pool`.
    pub mac_pools: HashMap<String, Vec<String>>,
    pub default_mac_pool: Vec<String>,
    /// Portals that require an `AuthToken` query parameter per MAC.
    pub token_hosts: BTreeSet<String>,
    /// MAC -> token. Tokens are opaque and appended verbatim.
    pub auth_tokens: BTreeMap<String, String>,
    pub playlist_ttl_secs: u64,
    pub segment_ttl_secs: u64,
    pub http_timeout_secs: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_keys: usize,
    pub max_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Successful segments required before an upstream rotation is considered.
    pub seg_ok_limit: u32,
    /// Minimum dwell between rotations.
    pub min_switch_secs: u64,
    /// Sessions untouched for this long are reaped.
    pub idle_secs: u64,
    pub reap_interval_secs: u64,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            portals: vec!["portal.example.com".to_string()],
            mac_pools: HashMap::new(),
            default_mac_pool: vec![
                "00:1A:79:00:0A:2C".to_string(),
                "00:1A:79:1A:04:B7".to_string(),
                "00:1A:79:C5:94:26".to_string(),
                "00:1A:79:02:13:52".to_string(),
                "00:1A:79:B9:81:75".to_string(),
            ],
            token_hosts: BTreeSet::new(),
            auth_tokens: BTreeMap::new(),
            playlist_ttl_secs: 10,
            segment_ttl_secs: 4,
            http_timeout_secs: 10,
            user_agent: "Mozilla/5.0 (Qt; STB/1.0)".to_string(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_keys: 10_000,
            max_bytes: 50 * 1024 * 1024,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            seg_ok_limit: 6,
            min_switch_secs: 4,
            idle_secs: 30,
            reap_interval_secs: 15,
        }
    }
}

impl UpstreamConfig {
    pub fn playlist_ttl(&self) -> Duration {
        Duration::from_secs(self.playlist_ttl_secs)
    }

    pub fn segment_ttl(&self) -> Duration {
        Duration::from_secs(self.segment_ttl_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl SessionConfig {
    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_file =
            std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());

        if std::path::Path::new(&config_file).exists() {
            let contents = std::fs::read_to_string(&config_file)?;
            Ok(toml::from_str(&contents)?)
        } else {
            let default_config = Self::default();
            let contents = toml::to_string_pretty(&default_config)?;
            std::fs::write(&config_file, contents)?;
            Ok(default_config)
        }
    }

    /// Sanity-check the portal and identity configuration before serving.
    pub fn validate(&self) -> Result<()> {
        if self.upstream.portals.is_empty() {
            bail!("no portals configured");
        }

        let mac_re = Regex::new(r"^([0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}$")?;
        let pools = self
            .upstream
            .mac_pools
            .values()
            .flatten()
            .chain(&self.upstream.default_mac_pool)
            .chain(self.upstream.auth_tokens.keys());
        for mac in pools {
            if !mac_re.is_match(mac) {
                bail!("malformed MAC address in configuration: {mac}");
            }
        }

        for host in &self.upstream.token_hosts {
            if !self.upstream.portals.contains(host) {
                bail!("token host {host} is not in the portal list");
            }
        }

        Ok(())
    }
}
