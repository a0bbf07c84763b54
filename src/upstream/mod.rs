//! Upstream HTTP access
//!
//! One shared `reqwest` client with a fixed STB-like User-Agent, a total
//! request timeout, and redirect following. Transport failures never
//! propagate; they are mapped to the synthetic status 599 with an empty
//! body, which is never cached.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use url::Url;

use crate::cache::ResponseCache;
use crate::config::UpstreamConfig;

pub mod acquire;

/// Synthetic status for connect errors, timeouts, and mid-body failures.
pub const NETWORK_ERROR_STATUS: u16 = 599;

pub struct UpstreamClient {
    http: reqwest::Client,
    cache: Arc<ResponseCache>,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig, cache: Arc<ResponseCache>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        Ok(Self { http, cache })
    }

    /// Cache-through GET: consult the cache under the request URL, fetch on
    /// miss, memoize the answer. Transport failures return `(empty, 599)`
    /// and are not cached.
    pub async fn fetch(&self, url: &str, ttl: Duration) -> (Bytes, u16) {
        if let Some(hit) = self.cache.get(url).await {
            return hit;
        }

        let response = match self.http.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("upstream fetch failed for {}: {}", url, e);
                return (Bytes::new(), NETWORK_ERROR_STATUS);
            }
        };

        let status = response.status().as_u16();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                warn!("upstream body read failed for {}: {}", url, e);
                return (Bytes::new(), NETWORK_ERROR_STATUS);
            }
        };

        self.cache.put(url, body.clone(), ttl, status).await;
        (body, status)
    }

    /// Raw GET that bypasses the cache read and exposes the final URL after
    /// redirects. The acquirer uses this to derive segment base URLs and to
    /// cache playlists under their redirected location.
    pub async fn get_following(&self, url: &str) -> Result<(Url, Bytes, u16), reqwest::Error> {
        let response = self.http.get(url).send().await?;
        let final_url = response.url().clone();
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        Ok((final_url, body, status))
    }
}
