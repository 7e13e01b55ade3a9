//! Media-info extraction engine with a pluggable site-extractor ABI,
//! DASH/HLS manifest generation, and a local range-forwarding proxy.
//!
//! The core flow: resolve a URL to a [`website::Website`] via [`loader::Loader`],
//! drive it to completion with [`engine::Client`], then optionally regenerate
//! a manifest with [`manifest::ManifestGenerator`] or rewrite stream URIs
//! through a local [`proxy::Proxy`].

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod heartbeat;
pub mod loader;
pub mod manifest;
pub mod model;
pub mod proxy;
pub mod threaded;
pub mod util;
pub mod website;

pub use config::GtuberSettings;
pub use engine::Client;
pub use error::{Error, Result};
pub use heartbeat::{Heartbeat, HeartbeatDelegate};
pub use loader::{Loader, Registration};
pub use manifest::{GeneratorTarget, ManifestGenerator};
pub use model::{AdaptiveStream, CaptionStream, MediaInfo, MimeType, Stream};
pub use proxy::{Proxy, ProxiedStream};
pub use website::{Flow, Request, ResponseMeta, Website, WebsiteContext};
