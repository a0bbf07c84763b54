use axum::{
    body::Body,
    extract::Path,
    http::{Request, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use bytes::Bytes;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use stalker_proxy::config::Config;
use stalker_proxy::web::WebServer;

/// Bind a throwaway upstream on a loopback port and serve `router` from it.
async fn spawn_upstream(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("127.0.0.1:{}", addr.port())
}

fn test_config(portals: Vec<String>) -> Config {
    let mut config = Config::default();
    config.upstream.portals = portals;
    config.upstream.default_mac_pool = vec![
        "00:1A:79:00:00:01".to_string(),
        "00:1A:79:00:00:02".to_string(),
        "00:1A:79:00:00:03".to_string(),
    ];
    config.upstream.http_timeout_secs = 5;
    config.upstream.segment_ttl_secs = 30;
    config.sessions.min_switch_secs = 0;
    config
}

async fn app(config: Config) -> Router {
    WebServer::new(config).await.unwrap().router()
}

async fn send(app: &Router, uri: &str) -> (StatusCode, axum::http::HeaderMap, Bytes) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, body)
}

fn counting_portal(playlist: &'static str) -> (Router, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let seen = hits.clone();
    let router = Router::new().route(
        "/play/live.php",
        get(move || {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                playlist
            }
        }),
    );
    (router, hits)
}

fn rejecting_portal(status: u16) -> (Router, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let seen = hits.clone();
    let router = Router::new().route(
        "/play/live.php",
        get(move || {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                StatusCode::from_u16(status).unwrap()
            }
        }),
    );
    (router, hits)
}

#[tokio::test]
async fn health_reports_portal_count() {
    let config = test_config(vec!["a.example.com".into(), "b.example.com".into()]);
    let app = app(config).await;

    let (status, _, body) = send(&app, "/").await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["portals"], 2);
}

#[tokio::test]
async fn default_entry_redirects_to_first_portal() {
    let config = test_config(vec!["a.example.com".into()]);
    let app = app(config).await;

    let (status, headers, _) = send(&app, "/playlist.m3u8?stream_id=42").await;
    assert_eq!(status, StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        headers.get("location").unwrap(),
        "/stream/0/42/index.m3u8"
    );
}

#[tokio::test]
async fn numbered_entry_redirects_to_matching_portal() {
    let config = test_config(vec![
        "a.example.com".into(),
        "b.example.com".into(),
        "c.example.com".into(),
    ]);
    let app = app(config).await;

    let (status, headers, _) = send(&app, "/playlist3.m3u8?stream_id=42").await;
    assert_eq!(status, StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        headers.get("location").unwrap(),
        "/stream/2/42/index.m3u8"
    );

    // no entry point beyond the configured portals
    let (status, _, _) = send(&app, "/playlist4.m3u8?stream_id=42").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn playlist_is_rewritten_to_local_segments() {
    let (portal, _) = counting_portal("#EXTM3U\n#EXT-X-TARGETDURATION:4\nseg_0001.ts\n");
    let portal_addr = spawn_upstream(portal).await;
    let app = app(test_config(vec![portal_addr.clone()])).await;

    let (status, headers, body) = send(&app, "/stream/0/42/index.m3u8").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers.get("content-type").unwrap(),
        "application/vnd.apple.mpegurl"
    );

    let text = String::from_utf8(body.to_vec()).unwrap();
    for line in text.lines() {
        if !line.starts_with('#') && !line.trim().is_empty() {
            assert!(
                line.starts_with("/segment/"),
                "unexpected playlist line: {line}"
            );
        }
    }
    assert!(text.contains(&format!("/segment/http/{portal_addr}/play/seg_0001.ts")));
}

#[tokio::test]
async fn acquisition_fails_over_after_exhausting_a_portal() {
    let (bad, bad_hits) = rejecting_portal(458);
    let (good, good_hits) = counting_portal("#EXTM3U\nok.ts\n");
    let bad_addr = spawn_upstream(bad).await;
    let good_addr = spawn_upstream(good).await;

    let app = app(test_config(vec![bad_addr, good_addr])).await;
    let (status, _, body) = send(&app, "/stream/0/42/index.m3u8").await;

    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(body.to_vec()).unwrap().contains("ok.ts"));
    // one full identity cycle against the rejecting portal, then one hit
    assert_eq!(bad_hits.load(Ordering::SeqCst), 3);
    assert_eq!(good_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn exhausted_chain_degrades_to_bad_gateway() {
    let (bad, _) = rejecting_portal(458);
    let bad_addr = spawn_upstream(bad).await;
    let app = app(test_config(vec![bad_addr])).await;

    let (status, _, body) = send(&app, "/stream/0/42/index.m3u8").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(String::from_utf8(body.to_vec())
        .unwrap()
        .starts_with("playlist error:"));
}

#[tokio::test]
async fn segments_pass_through_and_are_cached() {
    let hits = Arc::new(AtomicUsize::new(0));
    let seen = hits.clone();
    let cdn = Router::new().route(
        "/live/:name",
        get(move |Path(name): Path<String>| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                format!("TSDATA:{name}")
            }
        }),
    );
    let cdn_addr = spawn_upstream(cdn).await;
    let app = app(test_config(vec!["unused.example.com".into()])).await;

    let uri = format!("/segment/http/{cdn_addr}/live/a.ts");
    let (status, headers, body) = send(&app, &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("content-type").unwrap(), "video/MP2T");
    assert_eq!(&body[..], b"TSDATA:a.ts");

    // immediate re-request is served from the cache
    let (status, _, body) = send(&app, &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"TSDATA:a.ts");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn upstream_status_is_passed_through_verbatim() {
    let cdn = Router::new().route(
        "/live/:name",
        get(|| async { (StatusCode::NOT_FOUND, "gone").into_response() }),
    );
    let cdn_addr = spawn_upstream(cdn).await;
    let app = app(test_config(vec!["unused.example.com".into()])).await;

    let (status, _, body) = send(&app, &format!("/segment/http/{cdn_addr}/live/x.ts")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(&body[..], b"gone");
}

#[tokio::test]
async fn unreachable_segment_upstream_maps_to_599() {
    let app = app(test_config(vec!["unused.example.com".into()])).await;

    // nothing listens on port 1
    let (status, _, body) = send(&app, "/segment/http/127.0.0.1:1/live/a.ts").await;
    assert_eq!(status.as_u16(), 599);
    assert!(body.is_empty());
}

#[tokio::test]
async fn segment_successes_rotate_the_session_upstream() {
    let (portal, portal_hits) = counting_portal("#EXTM3U\nseg_0001.ts\n");
    let portal_addr = spawn_upstream(portal).await;

    let seg = Router::new().route(
        "/seg/:name",
        get(|Path(name): Path<String>| async move { format!("DATA:{name}") }),
    );
    let seg_addr = spawn_upstream(seg).await;

    let mut config = test_config(vec![portal_addr.clone()]);
    config.sessions.seg_ok_limit = 6;
    let app = app(config).await;

    let (status, _, _) = send(&app, "/stream/0/42/index.m3u8").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(portal_hits.load(Ordering::SeqCst), 1);

    // six successful segments trip the rotation; the seventh starts a new run
    for i in 0..7 {
        let uri = format!("/segment/http/{seg_addr}/seg/42_{i:04}.ts");
        let (status, _, _) = send(&app, &uri).await;
        assert_eq!(status, StatusCode::OK);
    }
    assert_eq!(portal_hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn idle_sessions_disappear_after_the_reaper_runs() {
    use async_trait::async_trait;
    use stalker_proxy::errors::AcquireError;
    use stalker_proxy::sessions::SessionManager;
    use stalker_proxy::upstream::acquire::{Acquire, AcquiredPlaylist};

    struct NeverAcquire;

    #[async_trait]
    impl Acquire for NeverAcquire {
        async fn obtain_playlist(
            &self,
            stream_id: &str,
            _start_idx: usize,
        ) -> Result<AcquiredPlaylist, AcquireError> {
            Err(AcquireError::NoWorkingIdentity {
                stream_id: stream_id.to_string(),
                attempts: 0,
            })
        }
    }

    let mut config = test_config(vec!["a.example.com".into()]);
    config.sessions.idle_secs = 1;
    config.sessions.reap_interval_secs = 1;

    let manager = Arc::new(SessionManager::new(
        Arc::new(NeverAcquire),
        config.sessions.clone(),
        1,
    ));
    manager.spawn_reaper();

    manager.begin("42", 0).await;
    assert_eq!(manager.len().await, 1);

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(manager.len().await, 0);
}
