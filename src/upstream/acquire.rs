//! Playlist acquisition and portal/MAC failover
//!
//! Walks the rotated portal chain starting at the session's current index
//! and, within each portal, tries one full cycle of its identity pool until
//! some (portal, MAC) pair yields a usable playlist. Network errors, the
//! deterministic bad codes, and unexpected statuses all advance to the next
//! identity; only exhausting the whole chain is an error.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::ResponseCache;
use crate::config::UpstreamConfig;
use crate::errors::AcquireError;
use crate::identity::IdentityPool;
use crate::upstream::UpstreamClient;

/// Statuses that deterministically mark a MAC as blocked, unauthorized, or
/// rate-limited against a portal.
pub const BAD_CODES: [u16; 6] = [204, 405, 407, 451, 458, 512];

pub struct AcquiredPlaylist {
    /// Directory URL the playlist's relative segment URIs resolve against.
    pub base_url: Url,
    pub body: Bytes,
    /// Absolute index of the portal that answered, for the next failover.
    pub portal_idx: usize,
}

/// Seam between the session manager and the concrete acquirer.
#[async_trait]
pub trait Acquire: Send + Sync {
    async fn obtain_playlist(
        &self,
        stream_id: &str,
        start_idx: usize,
    ) -> Result<AcquiredPlaylist, AcquireError>;
}

pub struct PlaylistAcquirer {
    config: UpstreamConfig,
    upstream: Arc<UpstreamClient>,
    identities: Arc<IdentityPool>,
    cache: Arc<ResponseCache>,
}

impl PlaylistAcquirer {
    pub fn new(
        config: UpstreamConfig,
        upstream: Arc<UpstreamClient>,
        identities: Arc<IdentityPool>,
        cache: Arc<ResponseCache>,
    ) -> Self {
        Self {
            config,
            upstream,
            identities,
            cache,
        }
    }
}

/// `http://{portal}/play/live.php?mac={MAC}&stream={id}&extension=m3u8`,
/// plus `&AuthToken={token}` iff the portal is credentialed and the MAC has
/// a token. The token itself is opaque and appended verbatim.
fn request_url(config: &UpstreamConfig, portal: &str, mac: &str, stream_id: &str) -> String {
    let mut url = format!(
        "http://{}/play/live.php?mac={}&stream={}&extension=m3u8",
        portal,
        urlencoding::encode(mac),
        stream_id
    );
    if config.token_hosts.contains(portal) {
        if let Some(token) = config.auth_tokens.get(mac) {
            url.push_str("&AuthToken=");
            url.push_str(token);
        }
    }
    url
}

#[async_trait]
impl Acquire for PlaylistAcquirer {
    async fn obtain_playlist(
        &self,
        stream_id: &str,
        start_idx: usize,
    ) -> Result<AcquiredPlaylist, AcquireError> {
        let portal_count = self.config.portals.len();
        let mut attempts = 0usize;

        if portal_count == 0 {
            return Err(AcquireError::NoWorkingIdentity {
                stream_id: stream_id.to_string(),
                attempts,
            });
        }

        let start = start_idx % portal_count;
        for offset in 0..portal_count {
            let portal_idx = (start + offset) % portal_count;
            let portal = &self.config.portals[portal_idx];

            let pool_size = self.identities.pool_size(portal);
            if pool_size == 0 {
                debug!("portal {} has no usable identities, skipping", portal);
                continue;
            }

            for _ in 0..pool_size {
                let mac = match self.identities.next_mac(portal) {
                    Ok(mac) => mac,
                    Err(e) => {
                        warn!("portal {}: {}", portal, e);
                        break;
                    }
                };

                let url = request_url(&self.config, portal, &mac, stream_id);
                debug!("playlist <= {}", url);
                attempts += 1;

                let (final_url, body, status) = match self.upstream.get_following(&url).await {
                    Ok(answer) => answer,
                    Err(e) => {
                        warn!("portal {}: network error with mac {}: {}", portal, mac, e);
                        continue;
                    }
                };

                self.cache
                    .put(
                        final_url.as_str(),
                        body.clone(),
                        self.config.playlist_ttl(),
                        status,
                    )
                    .await;

                if (200..300).contains(&status) && !body.is_empty() {
                    let base_url = directory_of(&final_url);
                    info!(
                        "playlist acquired for stream {} from {} (portal {})",
                        stream_id, portal, portal_idx
                    );
                    return Ok(AcquiredPlaylist {
                        base_url,
                        body,
                        portal_idx,
                    });
                }

                if BAD_CODES.contains(&status) {
                    warn!("portal {}: mac {} rejected with HTTP {}", portal, mac, status);
                    continue;
                }

                warn!("portal {}: mac {} unexpected HTTP {}", portal, mac, status);
            }
        }

        Err(AcquireError::NoWorkingIdentity {
            stream_id: stream_id.to_string(),
            attempts,
        })
    }
}

/// Directory of the final response URL: query and fragment stripped, last
/// path segment dropped unless the path already names a directory.
pub fn directory_of(url: &Url) -> Url {
    let mut base = url.clone();
    base.set_query(None);
    base.set_fragment(None);
    if !base.path().ends_with('/') {
        if let Ok(mut segments) = base.path_segments_mut() {
            segments.pop().push("");
        }
    }
    base
}
