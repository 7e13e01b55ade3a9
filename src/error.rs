//! Crate-wide error type.
//!
//! Mirrors the hierarchical `AppError` pattern used throughout this codebase:
//! one top-level enum with `#[from]` conversions for the common underlying
//! failure types, and nested enums folded in as wrapping variants.

use thiserror::Error;

/// Convenience alias used by every public entry point in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The unified error type returned by the extraction engine, the plugin
/// loader/cache, and the manifest generator.
#[derive(Error, Debug)]
pub enum Error {
    /// No extractor advertised support for the requested URL.
    #[error("no plugin supports this URL")]
    NoPlugin,

    /// The URL failed to parse, or its scheme/host did not match the chosen
    /// extractor.
    #[error("bad URI: {0}")]
    BadUri(String),

    /// `create_request` returned `Ok` without attaching a request.
    #[error("plugin request message has not been created")]
    RequestCreateFailed,

    /// The body consumer could not extract the required fields.
    #[error("plugin failed to parse response: {0}")]
    ParseFailed(String),

    /// Catch-all for extractor-raised failures not covered by a more
    /// specific variant.
    #[error("plugin encountered an error: {0}")]
    OtherWebsiteError(String),

    /// Extraction reported success but produced no streams.
    #[error("plugin returned media info without any streams")]
    MissingInfo,

    /// The cancellation handle was triggered during a suspension point.
    #[error("operation was cancelled")]
    Cancelled,

    /// Underlying HTTP/IO failure.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A heartbeat's `ping` failed to produce a request.
    #[error("heartbeat ping message has not been created")]
    HeartbeatPingFailed,

    /// Heartbeat subsystem failure other than `HeartbeatPingFailed`.
    #[error("heartbeat encountered an error: {0}")]
    HeartbeatOther(String),

    /// The manifest generator produced no data.
    #[error("no data was generated")]
    ManifestNoData,

    /// Plugin cache file I/O failure. Always non-fatal to extraction; this
    /// variant exists for diagnostics and logging only and is never
    /// returned from [`crate::engine::Client::fetch`].
    #[error("plugin cache I/O error: {0}")]
    CacheIo(#[from] std::io::Error),

    /// Configuration file/env parse failure from the ambient settings
    /// loader. Never surfaced by the core engine.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// True for errors that a [`super::engine::Client::fetch`] caller should
    /// treat as a hard failure of the extraction (as opposed to heartbeat/
    /// cache errors, which are swallowed internally).
    pub fn is_extraction_error(&self) -> bool {
        !matches!(
            self,
            Error::HeartbeatPingFailed | Error::HeartbeatOther(_) | Error::CacheIo(_)
        )
    }
}
