//! Error type definitions for the Stalker proxy
//!
//! Domain errors are small thiserror enums; the binary and server bootstrap
//! use `anyhow` and wrap these where context is useful.

use thiserror::Error;

/// Identity pool errors
#[derive(Error, Debug)]
pub enum IdentityError {
    /// The portal has no usable MAC identities. For credentialed portals this
    /// happens when none of the configured MACs carries a known token.
    #[error("no identity pool configured for portal {portal}")]
    NoPoolConfigured { portal: String },
}

/// Playlist acquisition errors
#[derive(Error, Debug)]
pub enum AcquireError {
    /// Every (portal, MAC) pair in the failover chain was tried without a
    /// usable response.
    #[error("no working identity for stream {stream_id} after {attempts} attempts")]
    NoWorkingIdentity { stream_id: String, attempts: usize },

    /// Identity pool failures that end the whole acquisition
    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),
}
