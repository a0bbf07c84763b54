//! Per-portal MAC identity rotation
//!
//! Each portal owns an independent round-robin cursor over its effective MAC
//! pool. The cursor is process-wide (not per session) so that sequential
//! requests spread across identities and stay under upstream rate limits.

use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

use crate::config::UpstreamConfig;
use crate::errors::IdentityError;

pub struct IdentityPool {
    pools: HashMap<String, Vec<String>>,
    cursors: Mutex<HashMap<String, usize>>,
}

impl IdentityPool {
    pub fn new(config: &UpstreamConfig) -> Self {
        let pools = config
            .portals
            .iter()
            .map(|portal| (portal.clone(), effective_pool(config, portal)))
            .collect();

        Self {
            pools,
            cursors: Mutex::new(HashMap::new()),
        }
    }

    /// Size of the portal's effective pool; zero for unknown portals and for
    /// credentialed portals without usable tokens.
    pub fn pool_size(&self, portal: &str) -> usize {
        self.pools.get(portal).map_or(0, Vec::len)
    }

    /// Advance the portal's cursor and return the next MAC. The sequence is
    /// the configured pool order, wrapping deterministically.
    pub fn next_mac(&self, portal: &str) -> Result<String, IdentityError> {
        let pool = self
            .pools
            .get(portal)
            .filter(|pool| !pool.is_empty())
            .ok_or_else(|| IdentityError::NoPoolConfigured {
                portal: portal.to_string(),
            })?;

        let mut cursors = self.cursors.lock().unwrap();
        let cursor = cursors.entry(portal.to_string()).or_insert(0);
        let mac = pool[*cursor % pool.len()].clone();
        *cursor = (*cursor + 1) % pool.len();

        debug!("portal {} -> mac {}", portal, mac);
        Ok(mac)
    }
}

/// A credentialed portal is restricted to MACs with a known token: the
/// configured pool intersected with the token set, or the token set itself
/// when no pool is configured. Everyone else gets their configured pool or
/// the shared default.
fn effective_pool(config: &UpstreamConfig, portal: &str) -> Vec<String> {
    let configured = config.mac_pools.get(portal).filter(|pool| !pool.is_empty());

    if config.token_hosts.contains(portal) {
        match configured {
            Some(pool) => pool
                .iter()
                .filter(|mac| config.auth_tokens.contains_key(*mac))
                .cloned()
                .collect(),
            None => config.auth_tokens.keys().cloned().collect(),
        }
    } else {
        configured
            .cloned()
            .unwrap_or_else(|| config.default_mac_pool.clone())
    }
}
