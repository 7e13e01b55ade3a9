//! The extraction engine: pumps one [`Website`] through the
//! prepare/create-request/read-response/parse state machine described in
//! the engine's own request/response loop.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Error, Result};
use crate::loader::Loader;
use crate::model::MediaInfo;
use crate::website::{BodyConsumer, Flow, ResponseMeta, Website, WebsiteContext};

/// Default per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(7);

/// Desktop Gecko-lookalike User-Agent injected only when the extractor did
/// not set one itself.
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; rv:78.0) Gecko/20100101 Firefox/78.0";

/// The public entry point: drives a single extraction from URL to
/// `MediaInfo`. Owns the [`Loader`] used to resolve a URL to an extractor.
pub struct Client {
    loader: Loader,
    timeout: Duration,
}

impl Client {
    pub fn new() -> Self {
        Self {
            loader: Loader::new(),
            timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn with_loader(loader: Loader) -> Self {
        Self {
            loader,
            timeout: REQUEST_TIMEOUT,
        }
    }

    /// Override the per-request timeout (default 7s, [`REQUEST_TIMEOUT`]).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build a client from [`crate::config::GtuberSettings`]: its
    /// `engine.timeout_secs` becomes the per-request timeout.
    pub fn from_settings(settings: &crate::config::GtuberSettings) -> Self {
        Self::new().with_timeout(Duration::from_secs(settings.engine.timeout_secs))
    }

    pub fn loader_mut(&mut self) -> &mut Loader {
        &mut self.loader
    }

    /// Synchronous entry point. Blocks the calling thread via a dedicated
    /// single-threaded Tokio runtime that runs the async body to completion
    /// on its own event loop.
    pub fn fetch(&self, url: &str, cancellation: CancellationToken) -> Result<MediaInfo> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to build single-threaded runtime for synchronous fetch");
        rt.block_on(self.fetch_async(url, cancellation))
    }

    /// Async entry point. Runs the full create_request/send/parse loop on
    /// the calling task.
    pub async fn fetch_async(&self, url: &str, cancellation: CancellationToken) -> Result<MediaInfo> {
        let span = tracing::info_span!("extraction", url);
        let _enter = span.enter();

        let parsed = Url::parse(url).map_err(|e| Error::BadUri(e.to_string()))?;

        let Some(mut website) = self.loader.get_website_for_uri_async(&parsed).await else {
            return Err(Error::NoPlugin);
        };

        let mut ctx = WebsiteContext::new(parsed);
        website.prepare(&mut ctx).await;

        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(Error::Network)?;

        let mut info = MediaInfo::new();
        let mut last_sent_headers = std::collections::HashMap::new();

        'outer: loop {
            if cancellation.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let request = match website.create_request(&mut ctx, &mut info).await {
                Flow::Ok(req) => req,
                Flow::Restart => {
                    tracing::debug!("create_request restarted");
                    continue 'outer;
                }
                Flow::Error(e) => return Err(e),
            };

            let mut headers = request.headers.clone();
            if !request.has_header("User-Agent") {
                headers.insert("User-Agent".to_string(), DEFAULT_USER_AGENT.to_string());
            }
            last_sent_headers = headers.clone();

            let mut builder = http.request(
                reqwest_method(&request.method),
                request.url.clone(),
            );
            for (name, value) in &headers {
                builder = builder.header(name, value);
            }
            if let Some(body) = request.body.clone() {
                builder = builder.body(body);
            }

            let send_fut = builder.send();
            let response = tokio::select! {
                _ = cancellation.cancelled() => return Err(Error::Cancelled),
                result = send_fut => result.map_err(Error::Network)?,
            };

            let meta = ResponseMeta {
                status: response.status().as_u16(),
                url: response.url().clone(),
                headers: response
                    .headers()
                    .iter()
                    .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
                    .collect(),
            };

            match website.read_response(&mut ctx, &meta).await {
                Flow::Ok(()) => {}
                Flow::Restart => {
                    tracing::debug!("read_response restarted; draining body");
                    let _ = response.bytes().await;
                    continue 'outer;
                }
                Flow::Error(e) => return Err(e),
            }

            let consumer_flow = match website.body_consumer() {
                BodyConsumer::Data => {
                    let body_fut = response.bytes();
                    let bytes = tokio::select! {
                        _ = cancellation.cancelled() => return Err(Error::Cancelled),
                        result = body_fut => result.map_err(Error::Network)?,
                    };
                    website.parse_data(&mut ctx, &bytes, &mut info).await
                }
                BodyConsumer::InputStream => {
                    let body_fut = response.bytes();
                    let bytes = tokio::select! {
                        _ = cancellation.cancelled() => return Err(Error::Cancelled),
                        result = body_fut => result.map_err(Error::Network)?,
                    };
                    let mut reader = std::io::Cursor::new(bytes.to_vec());
                    website
                        .parse_input_stream(&mut ctx, &mut reader, &mut info)
                        .await
                }
            };

            match consumer_flow {
                Flow::Ok(()) => {}
                Flow::Restart => {
                    tracing::debug!("body consumer restarted");
                    continue 'outer;
                }
                Flow::Error(e) => return Err(e),
            }

            match website
                .set_user_request_headers(&mut ctx, &last_sent_headers, &mut info)
                .await
            {
                Flow::Ok(()) => break,
                Flow::Restart => continue 'outer,
                Flow::Error(e) => return Err(e),
            }
        }

        if !info.has_streams() {
            return Err(Error::MissingInfo);
        }

        Ok(info)
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

fn reqwest_method(method: &http::Method) -> reqwest::Method {
    reqwest::Method::from_bytes(method.as_str().as_bytes()).unwrap_or(reqwest::Method::GET)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::Registration;
    use crate::model::Stream;
    use crate::website::Request;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Binds an ephemeral loopback listener and serves `app` on it for the
    /// lifetime of the test process. The extractors below target this real
    /// address rather than a bare registration scheme, since `Client`
    /// performs an actual `reqwest` send and reqwest refuses to dispatch
    /// non-http(s) schemes.
    async fn spawn_stub(app: axum::Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral stub listener");
        let addr = listener.local_addr().expect("stub listener has an addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        addr
    }

    struct SingleShotJson {
        url: Url,
    }

    #[async_trait::async_trait]
    impl Website for SingleShotJson {
        async fn create_request(
            &mut self,
            _ctx: &mut WebsiteContext,
            _info: &mut MediaInfo,
        ) -> Flow<Request> {
            Flow::Ok(Request::get(self.url.clone()))
        }

        async fn parse_data(
            &mut self,
            _ctx: &mut WebsiteContext,
            _data: &[u8],
            info: &mut MediaInfo,
        ) -> Flow {
            info.id = Some("abc".to_string());
            let mut s = Stream::new("https://cdn/1");
            s.itag = 18;
            s.height = 360;
            info.streams.push(s);
            Flow::Ok(())
        }
    }

    struct ThreeStageHandshake {
        url: Url,
        step: Arc<AtomicU32>,
    }

    #[async_trait::async_trait]
    impl Website for ThreeStageHandshake {
        async fn create_request(
            &mut self,
            _ctx: &mut WebsiteContext,
            _info: &mut MediaInfo,
        ) -> Flow<Request> {
            Flow::Ok(Request::get(self.url.clone()))
        }

        async fn parse_data(
            &mut self,
            _ctx: &mut WebsiteContext,
            _data: &[u8],
            info: &mut MediaInfo,
        ) -> Flow {
            let step = self.step.fetch_add(1, Ordering::SeqCst);
            if step < 2 {
                Flow::Restart
            } else {
                use crate::model::{AdaptiveStream, ManifestType};
                info.adaptive_streams
                    .push(AdaptiveStream::new("https://cdn/a", ManifestType::Dash));
                info.adaptive_streams
                    .push(AdaptiveStream::new("https://cdn/b", ManifestType::Dash));
                Flow::Ok(())
            }
        }
    }

    /// A `Loader` that dispatches any `ext://` URI to `factory`, regardless
    /// of the real upstream address the returned `Website` then targets.
    fn test_client_with(factory: impl Fn(&Url) -> Option<Box<dyn Website>> + Send + Sync + 'static) -> Client {
        let mut loader = Loader::new();
        loader.register(Registration {
            schemes: vec!["ext".to_string()],
            hosts: vec![],
            factory: Arc::new(factory),
        });
        Client::with_loader(loader)
    }

    #[tokio::test]
    async fn single_shot_json_scenario() {
        let app = axum::Router::new().route("/ok", axum::routing::get(|| async { "{}" }));
        let addr = spawn_stub(app).await;
        let url: Url = format!("http://{addr}/ok").parse().unwrap();

        let client = test_client_with(move |_| Some(Box::new(SingleShotJson { url: url.clone() })));
        let info = client
            .fetch_async("ext://ok", CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(info.streams.len(), 1);
        assert_eq!(info.streams[0].itag, 18);
        // The extractor set no `User-Agent`, so the engine injected
        // `DEFAULT_USER_AGENT` before sending, and the default
        // `set_user_request_headers` copied it through since it's not on
        // the hop-by-hop blocklist.
        assert_eq!(
            info.request_headers.get("User-Agent").map(String::as_str),
            Some(DEFAULT_USER_AGENT)
        );
        assert_eq!(info.request_headers.len(), 1);
    }

    #[tokio::test]
    async fn three_stage_handshake_scenario() {
        let app = axum::Router::new().route("/handshake", axum::routing::get(|| async { "{}" }));
        let addr = spawn_stub(app).await;
        let url: Url = format!("http://{addr}/handshake").parse().unwrap();

        let step = Arc::new(AtomicU32::new(0));
        let step_clone = step.clone();
        let client = test_client_with(move |_| {
            Some(Box::new(ThreeStageHandshake {
                url: url.clone(),
                step: step_clone.clone(),
            }) as Box<dyn Website>)
        });
        let info = client
            .fetch_async("ext://handshake", CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(step.load(Ordering::SeqCst), 3);
        assert_eq!(info.adaptive_streams.len(), 2);
    }

    #[test]
    fn from_settings_applies_timeout() {
        let mut settings = crate::config::GtuberSettings::default();
        settings.engine.timeout_secs = 42;
        let client = Client::from_settings(&settings);
        assert_eq!(client.timeout, Duration::from_secs(42));
    }

    #[tokio::test]
    async fn no_plugin_surfaces_error() {
        let client = Client::new();
        let err = client
            .fetch_async("ext://nobody-handles-this", CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoPlugin));
    }

    #[tokio::test]
    async fn missing_info_when_no_streams_added() {
        struct EmptyWebsite {
            url: Url,
        }
        #[async_trait::async_trait]
        impl Website for EmptyWebsite {
            async fn create_request(
                &mut self,
                _ctx: &mut WebsiteContext,
                _info: &mut MediaInfo,
            ) -> Flow<Request> {
                Flow::Ok(Request::get(self.url.clone()))
            }
        }

        let app = axum::Router::new().route("/empty", axum::routing::get(|| async { "{}" }));
        let addr = spawn_stub(app).await;
        let url: Url = format!("http://{addr}/empty").parse().unwrap();

        let client = test_client_with(move |_| Some(Box::new(EmptyWebsite { url: url.clone() })));
        let err = client
            .fetch_async("ext://empty", CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingInfo));
    }

    #[tokio::test]
    async fn bad_uri_surfaces_error() {
        let client = Client::new();
        let err = client
            .fetch_async("not a url", CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadUri(_)));
    }
}
