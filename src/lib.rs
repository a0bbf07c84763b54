//! Stalker HLS proxy
//!
//! Adapts a pool of Stalker-style IPTV portals into one stable HLS endpoint.
//! A player asks for a playlist by stream id; the proxy finds a (portal, MAC)
//! pair willing to serve it, rewrites every segment reference to point back
//! at itself, and streams the segments on demand through a bounded in-memory
//! cache. Per-stream sessions rotate to a fresh upstream after a run of
//! successful segments, and immediately after a failed one.

pub mod cache;
pub mod config;
pub mod errors;
pub mod identity;
pub mod playlist;
pub mod sessions;
pub mod upstream;
pub mod web;
