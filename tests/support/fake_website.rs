//! Test-only `Website` implementations used to drive the engine end to end
//! without a real site extractor. These exercise the Restart/Error algebra
//! and the HLS body-consumer path deterministically; they carry no
//! site-specific logic.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use gtuber::model::ManifestType;
use gtuber::{AdaptiveStream, BodyConsumer, Error, Flow, MediaInfo, Request, Stream, Website, WebsiteContext};
use url::Url;

/// Restarts from `create_request` exactly `budget` times before issuing a
/// real request, which then succeeds immediately. Used to exercise the
/// bounded-Restart-at-request-creation path: the engine never sends a
/// request while restarting here, so the number of actual HTTP round trips
/// is always exactly one, regardless of `budget`.
pub struct RestartingWebsite {
    url: Url,
    budget: Arc<AtomicU32>,
}

impl RestartingWebsite {
    pub fn new(url: Url, budget: u32) -> Self {
        Self {
            url,
            budget: Arc::new(AtomicU32::new(budget)),
        }
    }
}

#[async_trait::async_trait]
impl Website for RestartingWebsite {
    async fn create_request(&mut self, _ctx: &mut WebsiteContext, _info: &mut MediaInfo) -> Flow<Request> {
        if self.budget.load(Ordering::SeqCst) > 0 {
            self.budget.fetch_sub(1, Ordering::SeqCst);
            return Flow::Restart;
        }
        Flow::Ok(Request::get(self.url.clone()))
    }

    async fn parse_data(&mut self, _ctx: &mut WebsiteContext, _data: &[u8], info: &mut MediaInfo) -> Flow {
        let mut stream = Stream::new("https://cdn/final");
        stream.itag = 1;
        stream.height = 144;
        info.streams.push(stream);
        Flow::Ok(())
    }
}

/// A single request/response echo that never restarts and never adds a
/// stream; used to probe cancellation at the send/body-read suspension
/// points against a slow stub server.
pub struct SlowEchoWebsite {
    url: Url,
}

impl SlowEchoWebsite {
    pub fn new(url: Url) -> Self {
        Self { url }
    }
}

#[async_trait::async_trait]
impl Website for SlowEchoWebsite {
    async fn create_request(&mut self, _ctx: &mut WebsiteContext, _info: &mut MediaInfo) -> Flow<Request> {
        Flow::Ok(Request::get(self.url.clone()))
    }

    async fn parse_data(&mut self, _ctx: &mut WebsiteContext, _data: &[u8], info: &mut MediaInfo) -> Flow {
        let mut stream = Stream::new("https://cdn/slow");
        stream.itag = 2;
        info.streams.push(stream);
        Flow::Ok(())
    }
}

/// Body consumer is an HLS playlist: parses the fetched `.m3u8` with
/// `m3u8-rs` and emits one `AdaptiveStream` per variant, the way a real
/// site extractor would.
pub struct HlsFixtureWebsite {
    url: Url,
}

impl HlsFixtureWebsite {
    pub fn new(url: Url) -> Self {
        Self { url }
    }
}

#[async_trait::async_trait]
impl Website for HlsFixtureWebsite {
    fn body_consumer(&self) -> BodyConsumer {
        BodyConsumer::InputStream
    }

    async fn create_request(&mut self, _ctx: &mut WebsiteContext, _info: &mut MediaInfo) -> Flow<Request> {
        Flow::Ok(Request::get(self.url.clone()))
    }

    async fn parse_input_stream(
        &mut self,
        _ctx: &mut WebsiteContext,
        stream: &mut (dyn tokio::io::AsyncRead + Send + Unpin),
        info: &mut MediaInfo,
    ) -> Flow {
        use tokio::io::AsyncReadExt;

        let mut bytes = Vec::new();
        if let Err(e) = stream.read_to_end(&mut bytes).await {
            return Flow::Error(Error::ParseFailed(e.to_string()));
        }

        let playlist = match m3u8_rs::parse_master_playlist_res(&bytes) {
            Ok(master) => master,
            Err(e) => return Flow::Error(Error::ParseFailed(e.to_string())),
        };

        for variant in playlist.variants {
            let mut adaptive = AdaptiveStream::new(variant.uri.clone(), ManifestType::Hls);
            adaptive.bitrate = variant.bandwidth as u32;
            if let Some((w, h)) = variant.resolution.map(|r| (r.width as u32, r.height as u32)) {
                adaptive.width = w;
                adaptive.height = h;
            }
            if let Some(fps) = variant.frame_rate {
                adaptive.fps = fps.round() as u32;
            }
            if let Some(codecs) = variant.codecs {
                let mut parts = codecs.split(',');
                adaptive.video_codec = parts.next().map(|s| s.trim().to_string());
                adaptive.audio_codec = parts.next().map(|s| s.trim().to_string());
            }
            info.adaptive_streams.push(adaptive);
        }

        if info.adaptive_streams.is_empty() {
            Flow::Error(Error::MissingInfo)
        } else {
            Flow::Ok(())
        }
    }
}
