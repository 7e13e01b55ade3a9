use std::collections::HashMap;

use anyhow::Result;
use clap::Parser;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gtuber::{Client, GeneratorTarget, ManifestGenerator, ProxiedStream, Proxy};

#[derive(Parser)]
#[command(name = "gtuber-probe")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Extract media info for a URL and print it as JSON, a manifest, or serve it through a local proxy")]
struct Cli {
    /// The URL to extract.
    url: String,

    /// Log level.
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    /// Write a DASH/HLS manifest to this path instead of printing JSON.
    #[arg(short = 'o', long, value_name = "PATH")]
    output: Option<String>,

    /// Restrict manifest generation to one family.
    #[arg(long, value_enum)]
    manifest: Option<ManifestArg>,

    /// Start the local range-forwarding proxy and rewrite stream URIs
    /// through it, then serve until interrupted.
    #[arg(long)]
    proxy: bool,
}

#[derive(Clone, clap::ValueEnum)]
enum ManifestArg {
    Dash,
    Hls,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("gtuber={}", cli.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("gtuber-probe v{}", env!("CARGO_PKG_VERSION"));

    let settings = gtuber::GtuberSettings::load().unwrap_or_default();
    info!(timeout_secs = settings.engine.timeout_secs, "settings loaded");

    let client = Client::from_settings(&settings);
    let mut info = client
        .fetch_async(&cli.url, CancellationToken::new())
        .await?;

    info!(
        streams = info.streams.len(),
        adaptive_streams = info.adaptive_streams.len(),
        "extraction complete"
    );

    let proxy = if cli.proxy && !info.adaptive_streams.is_empty() {
        let media_id = info.id.clone().unwrap_or_else(|| "gtuber-probe".to_string());
        let mut streams = HashMap::new();
        for stream in &info.adaptive_streams {
            streams.insert(
                stream.itag,
                ProxiedStream {
                    upstream_uri: stream.uri.clone(),
                    request_headers: info.request_headers.clone(),
                },
            );
        }
        let proxy = Proxy::new(media_id, streams);
        proxy.configure(&mut info);
        info!(port = proxy.port(), "proxy listening");
        Some(proxy)
    } else {
        None
    };

    if let Some(path) = cli.output {
        let mut generator = ManifestGenerator::new().pretty(true);
        if let Some(target) = cli.manifest {
            generator = generator.manifest_type(match target {
                ManifestArg::Dash => GeneratorTarget::Dash,
                ManifestArg::Hls => GeneratorTarget::Hls,
            });
        }
        generator.to_file(&info, std::path::Path::new(&path))?;
        info!(path, "manifest written");
    } else {
        println!("{}", summary_json(&info));
    }

    if let Some(proxy) = proxy {
        eprintln!("serving on 127.0.0.1:{}, press Ctrl+C to stop", proxy.port());
        let _ = tokio::signal::ctrl_c().await;
    }

    Ok(())
}

/// `MediaInfo` carries a `Heartbeat`/`Proxy` (owned worker threads), so it
/// does not derive `Serialize` itself; the probe prints a plain summary
/// instead of the full struct.
fn summary_json(info: &gtuber::MediaInfo) -> serde_json::Value {
    json!({
        "id": info.id,
        "title": info.title,
        "duration_seconds": info.duration_seconds,
        "streams": info.streams.iter().map(|s| json!({
            "uri": s.uri,
            "itag": s.itag,
            "width": s.width,
            "height": s.height,
        })).collect::<Vec<_>>(),
        "adaptive_streams": info.adaptive_streams.iter().map(|s| json!({
            "uri": s.uri,
            "itag": s.itag,
            "bitrate": s.bitrate,
        })).collect::<Vec<_>>(),
        "captions": info.captions.len(),
    })
}
