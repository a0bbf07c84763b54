//! Web layer module
//!
//! HTTP facade for the proxy: the playlist entry redirects, the per-session
//! playlist route, the segment passthrough route, and health checks. The
//! facade holds no state of its own; caching, identity rotation, and
//! session accounting live in the collaborators carried by [`AppState`].

use anyhow::Result;
use axum::{
    extract::Query,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    cache::ResponseCache,
    config::Config,
    identity::IdentityPool,
    sessions::SessionManager,
    upstream::{
        acquire::{Acquire, PlaylistAcquirer},
        UpstreamClient,
    },
};

pub mod handlers;

use handlers::StreamQuery;

/// Web server configuration and setup
pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub async fn new(config: Config) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", config.web.host, config.web.port).parse()?;

        let cache = Arc::new(ResponseCache::new(
            config.cache.max_keys,
            config.cache.max_bytes,
        ));
        let identities = Arc::new(IdentityPool::new(&config.upstream));
        let upstream = Arc::new(UpstreamClient::new(&config.upstream, cache.clone())?);
        let acquirer: Arc<dyn Acquire> = Arc::new(PlaylistAcquirer::new(
            config.upstream.clone(),
            upstream.clone(),
            identities,
            cache.clone(),
        ));
        let sessions = Arc::new(SessionManager::new(
            acquirer.clone(),
            config.sessions.clone(),
            config.upstream.portals.len(),
        ));
        sessions.spawn_reaper();

        let app = Self::create_router(AppState {
            config: Arc::new(config),
            upstream,
            acquirer,
            sessions,
        });

        Ok(Self { app, addr })
    }

    /// Create the router with all routes and middleware
    fn create_router(state: AppState) -> Router {
        let mut router = Router::new()
            .route("/", get(handlers::health))
            .route("/health", get(handlers::detailed_health))
            .route("/playlist.m3u8", get(handlers::playlist_default))
            .route("/stream/:portal_idx/:sid/index.m3u8", get(handlers::stream_playlist))
            .route("/segment/:proto/*rest", get(handlers::segment));

        // one numbered entry point per configured portal
        for k in 1..=state.config.upstream.portals.len() {
            router = router.route(
                &format!("/playlist{k}.m3u8"),
                get(move |query: Query<StreamQuery>| async move {
                    handlers::portal_redirect(k - 1, query)
                }),
            );
        }

        router
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Start the web server
    pub async fn serve(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        axum::serve(listener, self.app).await?;
        Ok(())
    }

    /// The assembled router, for in-process testing.
    pub fn router(&self) -> Router {
        self.app.clone()
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub upstream: Arc<UpstreamClient>,
    pub acquirer: Arc<dyn Acquire>,
    pub sessions: Arc<SessionManager>,
}
