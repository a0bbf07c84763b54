//! Per-stream session state and upstream rotation
//!
//! A session exists per stream id, created when a playlist is requested and
//! only looked up when segments arrive. Segment outcomes drive rotation: a
//! run of successes past the configured limit, combined with a minimum
//! dwell since the last switch, triggers a re-acquisition; a single failed
//! segment forces the counter to the limit so the next qualifying segment
//! rotates. The per-session lock makes the rotation single-flight.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::SessionConfig;
use crate::upstream::acquire::{Acquire, AcquiredPlaylist};

fn now_epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Heuristic stream-id hint from a segment path: last path component, first
/// piece before `_`. Upstreams with different naming simply produce hints
/// that match no session.
pub fn session_hint(path: &str) -> &str {
    let last = path.rsplit('/').next().unwrap_or(path);
    last.split('_').next().unwrap_or(last)
}

pub struct Session {
    portal_idx: AtomicUsize,
    seg_ok: AtomicU32,
    last_switch_ms: AtomicU64,
    last_use_ms: AtomicU64,
    base_url: std::sync::RwLock<Option<Url>>,
    switch_lock: Mutex<()>,
}

impl Session {
    fn new(portal_idx: usize, now_ms: u64) -> Self {
        Self {
            portal_idx: AtomicUsize::new(portal_idx),
            seg_ok: AtomicU32::new(0),
            last_switch_ms: AtomicU64::new(now_ms),
            last_use_ms: AtomicU64::new(now_ms),
            base_url: std::sync::RwLock::new(None),
            switch_lock: Mutex::new(()),
        }
    }

    pub fn portal_idx(&self) -> usize {
        self.portal_idx.load(Ordering::Relaxed)
    }

    pub fn seg_ok(&self) -> u32 {
        self.seg_ok.load(Ordering::Relaxed)
    }

    pub fn base_url(&self) -> Option<Url> {
        self.base_url.read().unwrap().clone()
    }

    /// Take over the acquirer's answer: portal index for the next failover
    /// and the base URL the playlist's segments resolve against.
    pub fn adopt(&self, acquired: &AcquiredPlaylist) {
        self.portal_idx.store(acquired.portal_idx, Ordering::Relaxed);
        *self.base_url.write().unwrap() = Some(acquired.base_url.clone());
    }
}

pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    acquirer: Arc<dyn Acquire>,
    config: SessionConfig,
    portal_count: usize,
}

impl SessionManager {
    pub fn new(acquirer: Arc<dyn Acquire>, config: SessionConfig, portal_count: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            acquirer,
            config,
            portal_count,
        }
    }

    /// Create (or reset) the session for a playlist request: the counter and
    /// both clocks restart, and the starting portal is pinned modulo the
    /// chain length.
    pub async fn begin(&self, stream_id: &str, portal_idx: usize) -> Arc<Session> {
        let now = now_epoch_millis();
        let idx = if self.portal_count == 0 {
            0
        } else {
            portal_idx % self.portal_count
        };

        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(stream_id.to_string())
            .or_insert_with(|| Arc::new(Session::new(idx, now)))
            .clone();

        session.portal_idx.store(idx, Ordering::Relaxed);
        session.seg_ok.store(0, Ordering::Relaxed);
        session.last_switch_ms.store(now, Ordering::Relaxed);
        session.last_use_ms.store(now, Ordering::Relaxed);
        session
    }

    /// Segments never create sessions.
    pub async fn lookup(&self, stream_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(stream_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Account a fetched segment against the hinted session and rotate the
    /// upstream when the counter and dwell both qualify. The rotation
    /// condition is checked once lock-free and once under the session lock;
    /// a failed re-acquisition is logged and the session continues as-is.
    pub async fn record_segment(&self, hint: &str, status: u16) {
        let Some(session) = self.lookup(hint).await else {
            debug!("segment hint {:?} matches no session", hint);
            return;
        };

        let now = now_epoch_millis();
        session.last_use_ms.store(now, Ordering::Relaxed);

        if (200..300).contains(&status) {
            session.seg_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            session
                .seg_ok
                .store(self.config.seg_ok_limit, Ordering::Relaxed);
        }

        if !self.rotation_due(&session, now) {
            return;
        }

        let _guard = session.switch_lock.lock().await;
        let now = now_epoch_millis();
        if !self.rotation_due(&session, now) {
            return;
        }

        info!(
            "rotating upstream for stream {} after {} segments",
            hint,
            session.seg_ok.load(Ordering::Relaxed)
        );
        session.seg_ok.store(0, Ordering::Relaxed);
        session.last_switch_ms.store(now, Ordering::Relaxed);

        match self
            .acquirer
            .obtain_playlist(hint, session.portal_idx())
            .await
        {
            Ok(acquired) => session.adopt(&acquired),
            Err(e) => warn!("re-acquisition for stream {} failed: {}", hint, e),
        }
    }

    fn rotation_due(&self, session: &Session, now_ms: u64) -> bool {
        session.seg_ok.load(Ordering::Relaxed) >= self.config.seg_ok_limit
            && now_ms.saturating_sub(session.last_switch_ms.load(Ordering::Relaxed))
                >= self.config.min_switch_secs * 1000
    }

    /// Drop every session whose last touch is older than the idle cutoff.
    pub async fn reap_idle(&self) {
        let now = now_epoch_millis();
        let idle_ms = self.config.idle_secs * 1000;

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| {
            now.saturating_sub(session.last_use_ms.load(Ordering::Relaxed)) < idle_ms
        });
        let reaped = before - sessions.len();
        if reaped > 0 {
            debug!("reaped {} idle stream sessions", reaped);
        }
    }

    /// Background reaper; in-flight requests keep their `Arc<Session>`, so
    /// reaping never cancels active work.
    pub fn spawn_reaper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(manager.config.reap_interval());
            interval.tick().await;
            loop {
                interval.tick().await;
                manager.reap_idle().await;
            }
        })
    }
}
