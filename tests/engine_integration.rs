//! End-to-end engine scenarios against real (stubbed) HTTP, using the
//! fake extractors under `support/`.

mod support;

use std::sync::Arc;
use std::time::Duration;

use gtuber::{Client, Loader, Registration};
use support::fake_website::{HlsFixtureWebsite, RestartingWebsite, SlowEchoWebsite};
use tokio_util::sync::CancellationToken;

const HLS_FIXTURE: &str = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=640000,RESOLUTION=640x360,FRAME-RATE=30,CODECS=\"avc1.4d401e,mp4a.40.2\"\nhttps://cdn/1.m3u8\n";

async fn spawn_stub(app: axum::Router) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

fn client_for(scheme: &str, factory: impl Fn(&url::Url) -> Option<Box<dyn gtuber::Website>> + Send + Sync + 'static) -> Client {
    let mut loader = Loader::new();
    loader.register(Registration {
        schemes: vec![scheme.to_string()],
        hosts: vec![],
        factory: Arc::new(factory),
    });
    Client::with_loader(loader)
}

#[tokio::test]
async fn hls_parsing_scenario() {
    let app = axum::Router::new().route(
        "/playlist.m3u8",
        axum::routing::get(|| async { HLS_FIXTURE }),
    );
    let addr = spawn_stub(app).await;
    let url: url::Url = format!("http://{addr}/playlist.m3u8").parse().unwrap();

    let client = client_for("hls-test", move |_| Some(Box::new(HlsFixtureWebsite::new(url.clone())) as Box<dyn gtuber::Website>));

    let info = client
        .fetch_async("hls-test://fixture", CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(info.adaptive_streams.len(), 1);
    let stream = &info.adaptive_streams[0];
    assert_eq!(stream.bitrate, 640000);
    assert_eq!(stream.width, 640);
    assert_eq!(stream.height, 360);
    assert_eq!(stream.fps, 30);
    assert_eq!(stream.video_codec.as_deref(), Some("avc1.4d401e"));
    assert_eq!(stream.audio_codec.as_deref(), Some("mp4a.40.2"));
}

#[tokio::test]
async fn restart_convergence_scenario() {
    // The extractor restarts at `create_request` five times before ever
    // issuing a request; the engine must still converge in exactly one
    // HTTP round trip, since no request is sent while restarting there.
    let app = axum::Router::new().route("/ok", axum::routing::get(|| async { "{}" }));
    let addr = spawn_stub(app).await;
    let url: url::Url = format!("http://{addr}/ok").parse().unwrap();

    let client = client_for("restart-test", move |_| {
        Some(Box::new(RestartingWebsite::new(url.clone(), 5)) as Box<dyn gtuber::Website>)
    });

    let info = client
        .fetch_async("restart-test://converge", CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(info.streams.len(), 1);
    assert_eq!(info.streams[0].height, 144);
}

#[tokio::test]
async fn cancellation_returns_in_bounded_time() {
    // A stub that sleeps far longer than the cancellation delay below; the
    // engine's `tokio::select!` around `send()` must win the race.
    let app = axum::Router::new().route(
        "/slow",
        axum::routing::get(|| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            "{}"
        }),
    );
    let addr = spawn_stub(app).await;
    let url: url::Url = format!("http://{addr}/slow").parse().unwrap();

    let client = client_for("slow-test", move |_| {
        Some(Box::new(SlowEchoWebsite::new(url.clone())) as Box<dyn gtuber::Website>)
    });

    let cancellation = CancellationToken::new();
    let cancel_handle = cancellation.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel_handle.cancel();
    });

    let started = std::time::Instant::now();
    let err = client
        .fetch_async("slow-test://hang", cancellation)
        .await
        .unwrap_err();

    assert!(matches!(err, gtuber::Error::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(5));
}
