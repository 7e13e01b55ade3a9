//! The extractor contract. Every site-specific plugin implements [`Website`];
//! the engine in [`crate::engine`] drives it through the state machine
//! described there.

use std::collections::HashMap;

use url::Url;

use crate::error::Error;
use crate::model::{MediaInfo, HOP_BY_HOP_HEADERS};

/// Control-flow outcome of an extractor hook. No hidden state lives on the
/// engine: an extractor that needs to remember "which step am I on" holds
/// that counter itself.
#[derive(Debug)]
pub enum Flow<T = ()> {
    /// Proceed to the next engine stage, optionally carrying a value (the
    /// request built by `create_request`).
    Ok(T),
    /// Loop back to `create_request` with the same, possibly
    /// partially-populated, `MediaInfo`.
    Restart,
    /// Terminate the extraction; `MediaInfo` is discarded.
    Error(Error),
}

impl<T> Flow<T> {
    pub fn ok(value: T) -> Self {
        Flow::Ok(value)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Flow<U> {
        match self {
            Flow::Ok(v) => Flow::Ok(f(v)),
            Flow::Restart => Flow::Restart,
            Flow::Error(e) => Flow::Error(e),
        }
    }
}

/// An outgoing HTTP request, as built by [`Website::create_request`] or
/// [`crate::heartbeat::Heartbeat::ping`]. Deliberately a thin, inspectable
/// value rather than `reqwest::RequestBuilder` itself, so extractors never
/// need to depend on the HTTP client crate directly.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: http::Method,
    pub url: Url,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
}

impl Request {
    pub fn get(url: impl Into<Url>) -> Self {
        Self {
            method: http::Method::GET,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.keys().any(|k| k.eq_ignore_ascii_case(name))
    }
}

/// Response metadata available to `read_response`, before the body is
/// streamed.
#[derive(Debug, Clone)]
pub struct ResponseMeta {
    pub status: u16,
    pub url: Url,
    pub headers: HashMap<String, String>,
}

impl ResponseMeta {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Which body-consumer hook the engine should call for a given extractor.
/// An extractor implements exactly one of `parse_input_stream`/`parse_data`;
/// this flag tells the engine which.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyConsumer {
    /// Large/streaming bodies: HTML pages, manifests. Dispatches to
    /// `parse_input_stream`.
    InputStream,
    /// Small JSON bodies, buffered fully before parsing. Dispatches to
    /// `parse_data`.
    Data,
}

/// Base-class accessors every extractor inherits: the URL it was
/// instantiated with, the caller's scheme preference, and a lazily
/// materialized cookie jar.
pub struct WebsiteContext {
    uri: Url,
    cookie_jar: Option<crate::website::CookieJar>,
}

impl WebsiteContext {
    pub fn new(uri: Url) -> Self {
        Self {
            uri,
            cookie_jar: None,
        }
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn uri_string(&self) -> String {
        self.uri.to_string()
    }

    /// `true` if the user-provided URL indicates that plaintext HTTP should
    /// be used: either the scheme is explicitly `http`, or the port is
    /// explicitly `80`. Otherwise `https` is preferred by default.
    pub fn use_http(&self) -> bool {
        self.uri.port() == Some(80) || self.uri.scheme() == "http"
    }

    /// Lazily copy `$XDG_CONFIG_HOME/gtuber/cookies.sqlite` into a private
    /// temp directory and hand back a read-only handle. Returns `None` if no
    /// cookies file exists. Subsequent calls return the same jar.
    pub async fn cookie_jar(&mut self) -> Option<&crate::website::CookieJar> {
        if self.cookie_jar.is_none() {
            self.cookie_jar = crate::website::CookieJar::open_default().await;
        }
        self.cookie_jar.as_ref()
    }
}

/// An opaque, read-only cookie store backed by a private temp-directory copy
/// of the user's `cookies.sqlite`. Copying before opening avoids write
/// conflicts with whatever else might be using the original file, and the
/// temp directory is removed when the jar is dropped.
pub struct CookieJar {
    tmp_dir: tempfile::TempDir,
    db_path: std::path::PathBuf,
}

impl CookieJar {
    pub(crate) async fn open_default() -> Option<Self> {
        let src = crate::util::config_dir().join("cookies.sqlite");
        if !src.exists() {
            return None;
        }
        let tmp_dir = tempfile::Builder::new()
            .prefix("gtuber_")
            .tempdir()
            .ok()?;
        let dst = tmp_dir.path().join("cookies.sqlite");
        tokio::fs::copy(&src, &dst).await.ok()?;
        tracing::debug!(path = %dst.display(), "created cookies jar");
        Some(Self {
            tmp_dir,
            db_path: dst,
        })
    }

    /// Path to the private, read-only copy of the cookie database.
    pub fn db_path(&self) -> &std::path::Path {
        &self.db_path
    }
}

impl Drop for CookieJar {
    fn drop(&mut self) {
        tracing::debug!(path = %self.tmp_dir.path().display(), "removing cookies jar tmp dir");
    }
}

/// The fixed polymorphic capability set every site-specific extractor
/// implements. Default method bodies match the upstream base class: trivial
/// pass-through stubs that a real extractor is expected to override.
#[async_trait::async_trait]
pub trait Website: Send {
    /// Which body consumer the engine should dispatch to for this extractor.
    /// A `const` on a concrete type would be more idiomatic but trait
    /// objects can't carry associated consts in a dispatchable way here, so
    /// this is a method instead.
    fn body_consumer(&self) -> BodyConsumer {
        BodyConsumer::Data
    }

    /// Called once, before any I/O. Side effects only (read cookies, consult
    /// caches); must not block on network.
    async fn prepare(&mut self, _ctx: &mut WebsiteContext) {}

    /// Produce the next HTTP request.
    async fn create_request(
        &mut self,
        _ctx: &mut WebsiteContext,
        _info: &mut MediaInfo,
    ) -> Flow<Request> {
        Flow::Error(Error::RequestCreateFailed)
    }

    /// Inspect status and headers before the body is streamed. Default:
    /// succeed if 2xx.
    async fn read_response(&mut self, _ctx: &mut WebsiteContext, meta: &ResponseMeta) -> Flow {
        if meta.is_success() {
            Flow::Ok(())
        } else {
            Flow::Error(Error::OtherWebsiteError(format!(
                "unexpected status {}",
                meta.status
            )))
        }
    }

    /// Body consumer for [`BodyConsumer::InputStream`] extractors: large or
    /// streaming bodies (HTML, manifests).
    async fn parse_input_stream(
        &mut self,
        _ctx: &mut WebsiteContext,
        _stream: &mut (dyn tokio::io::AsyncRead + Send + Unpin),
        _info: &mut MediaInfo,
    ) -> Flow {
        Flow::Ok(())
    }

    /// Body consumer for [`BodyConsumer::Data`] extractors: small,
    /// fully-buffered bodies (JSON APIs).
    async fn parse_data(
        &mut self,
        _ctx: &mut WebsiteContext,
        _data: &[u8],
        _info: &mut MediaInfo,
    ) -> Flow {
        Flow::Ok(())
    }

    /// Called once after the final successful parse; copies selected
    /// headers from the request that just completed into
    /// `MediaInfo.request_headers`. Default: copy everything except the
    /// hop-by-hop blocklist.
    async fn set_user_request_headers(
        &mut self,
        _ctx: &mut WebsiteContext,
        sent_headers: &HashMap<String, String>,
        info: &mut MediaInfo,
    ) -> Flow {
        for (name, value) in sent_headers {
            if HOP_BY_HOP_HEADERS
                .iter()
                .any(|blocked| blocked.eq_ignore_ascii_case(name))
            {
                continue;
            }
            let replaced = info.request_headers.contains_key(name);
            info.request_headers.insert(name.clone(), value.clone());
            tracing::debug!(
                %name,
                %value,
                action = if replaced { "replaced" } else { "inserted" },
                "user request header"
            );
        }
        Flow::Ok(())
    }
}
