//! Playlist rewriting
//!
//! HLS playlists are line-oriented: every non-empty line that does not start
//! with `#` names a media URI and is rewritten to a local `/segment/...`
//! path; comments and blank lines pass through byte-for-byte. Upstream
//! portals emit a zoo of malformed references (percent-encoded schemes,
//! scheme-less absolute URIs, schema-stripped host+path forms), so each URI
//! is normalized to a canonical absolute URL first.

use std::borrow::Cow;
use url::Url;

/// Normalize a raw segment reference. Idempotent.
pub fn normalize_uri(raw: &str) -> String {
    let decoded = urlencoding::decode(raw)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| raw.to_string());
    let trimmed = decoded.trim();

    if let Some(rest) = trimmed.strip_prefix("%3A//") {
        // double-encoded scheme marker
        format!("http://{rest}")
    } else if trimmed.starts_with("://") {
        format!("http{trimmed}")
    } else if trimmed.contains("//")
        && !trimmed.starts_with("http://")
        && !trimmed.starts_with("https://")
        && !trimmed.starts_with('/')
    {
        // schema-stripped "host//path": everything after the first "//" is
        // treated as host/path
        match trimmed.split_once("//") {
            Some((_, rest)) => format!("http://{rest}"),
            None => trimmed.to_string(),
        }
    } else {
        trimmed.to_string()
    }
}

/// Rewrite every media URI in `text` to a local proxy path, resolving
/// relative references against `base`. Non-URI lines (and URI lines that
/// defy parsing even after normalization) are preserved unchanged.
pub fn rewrite_playlist(text: &str, base: &Url) -> String {
    let mut lines = Vec::new();
    for line in text.split('\n') {
        let (content, carriage) = match line.strip_suffix('\r') {
            Some(content) => (content, "\r"),
            None => (line, ""),
        };

        if content.starts_with('#') || content.trim().is_empty() {
            lines.push(line.to_string());
        } else {
            match rewrite_uri(content, base) {
                Some(path) => lines.push(format!("{path}{carriage}")),
                None => lines.push(line.to_string()),
            }
        }
    }
    lines.join("\n")
}

fn rewrite_uri(raw: &str, base: &Url) -> Option<String> {
    let normalized = normalize_uri(raw);
    let absolute = if normalized.starts_with("http://") || normalized.starts_with("https://") {
        Url::parse(&normalized).ok()?
    } else {
        base.join(&normalized).ok()?
    };
    Some(local_segment_path(&absolute))
}

/// `/segment/{scheme}/{authority}{path}`; query and fragment are dropped.
fn local_segment_path(url: &Url) -> String {
    format!("/segment/{}/{}{}", url.scheme(), url.authority(), url.path())
}
