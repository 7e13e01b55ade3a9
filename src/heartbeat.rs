//! Periodic keep-alive pings some extractors need to hold a session or
//! signed-URL open for as long as the caller is still consuming the stream.
//! A [`Heartbeat`] is a [`ThreadedObject`] ticking its own
//! `ping`/`pong` pair on a private event loop; failures stop it silently
//! rather than propagating into the `MediaInfo` the caller already has.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::threaded::ThreadedObject;
use crate::website::{Flow, Request, ResponseMeta};

/// Minimum ping interval the upstream object enforces; anything smaller is
/// clamped up rather than rejected.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1000);

/// The extractor-supplied ping/pong pair. Default `ping` fails (mirroring the
/// base class' "must be overridden" stub); default `pong` succeeds.
#[async_trait::async_trait]
pub trait HeartbeatDelegate: Send {
    async fn ping(&mut self) -> Flow<Request> {
        Flow::Error(Error::HeartbeatPingFailed)
    }

    async fn pong(&mut self, _meta: &ResponseMeta, _body: &[u8]) -> Flow {
        Flow::Ok(())
    }
}

struct NeverPings;

#[async_trait::async_trait]
impl HeartbeatDelegate for NeverPings {}

/// Fields touched synchronously from either thread; guarded by
/// [`ThreadedObject`]'s own mutex.
struct Shared {
    interval: Duration,
    request_headers: HashMap<String, String>,
    cancellation: CancellationToken,
    running: bool,
}

/// A periodic ping/pong loop running on its own worker thread. Dropping it
/// cancels the in-flight request (if any) and stops the loop.
pub struct Heartbeat {
    threaded: ThreadedObject<Shared>,
    delegate: Arc<AsyncMutex<Box<dyn HeartbeatDelegate>>>,
}

impl Heartbeat {
    /// Construct and start a heartbeat with `interval` (clamped to
    /// [`MIN_INTERVAL`]) and the given delegate.
    pub fn new(interval: Duration, delegate: Box<dyn HeartbeatDelegate>) -> Self {
        let interval = interval.max(MIN_INTERVAL);
        let delegate = Arc::new(AsyncMutex::new(delegate));
        let loop_delegate = delegate.clone();

        let state = Shared {
            interval,
            request_headers: HashMap::new(),
            cancellation: CancellationToken::new(),
            running: true,
        };

        let threaded = ThreadedObject::spawn(
            state,
            move |handle, state| {
                handle.spawn(run_loop(state, loop_delegate));
            },
            |state| {
                state.lock().unwrap().running = false;
            },
        );

        Self { threaded, delegate }
    }

    pub fn with_default_delegate(interval: Duration) -> Self {
        Self::new(interval, Box::new(NeverPings))
    }

    /// Update the ping interval. Takes effect on the next tick; the current
    /// sleep is not interrupted.
    pub fn set_interval(&self, interval: Duration) {
        self.threaded.lock().interval = interval.max(MIN_INTERVAL);
    }

    pub fn set_request_header(&self, name: impl Into<String>, value: impl Into<String>) {
        self.threaded
            .lock()
            .request_headers
            .insert(name.into(), value.into());
    }

    pub fn is_running(&self) -> bool {
        self.threaded.lock().running
    }
}

impl std::fmt::Debug for Heartbeat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heartbeat")
            .field("running", &self.is_running())
            .finish()
    }
}

async fn run_loop(state: Arc<std::sync::Mutex<Shared>>, delegate: Arc<AsyncMutex<Box<dyn HeartbeatDelegate>>>) {
    let client = reqwest::Client::new();
    loop {
        let (interval, cancellation) = {
            let guard = state.lock().unwrap();
            if !guard.running {
                return;
            }
            (guard.interval, guard.cancellation.clone())
        };

        tokio::select! {
            _ = cancellation.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }

        // Fresh per-tick token so a stale cancellation from a previous
        // `Restart` chain never leaks into the next send.
        let tick_cancel = CancellationToken::new();
        {
            let mut guard = state.lock().unwrap();
            if !guard.running {
                return;
            }
            guard.cancellation = tick_cancel.clone();
        }

        if !tick(&client, &state, &delegate, &tick_cancel).await {
            state.lock().unwrap().running = false;
            return;
        }
    }
}

/// Run one ping/send/pong cycle, looping on [`Flow::Restart`]. Returns
/// `false` if the heartbeat should stop permanently.
async fn tick(
    client: &reqwest::Client,
    state: &Arc<std::sync::Mutex<Shared>>,
    delegate: &Arc<AsyncMutex<Box<dyn HeartbeatDelegate>>>,
    cancel: &CancellationToken,
) -> bool {
    let mut delegate = delegate.lock().await;

    loop {
        let mut request = match delegate.ping().await {
            Flow::Ok(request) => request,
            Flow::Restart => continue,
            Flow::Error(e) => {
                tracing::warn!(error = %e, "heartbeat ping failed, stopping");
                return false;
            }
        };

        let extra_headers = state.lock().unwrap().request_headers.clone();
        for (name, value) in extra_headers {
            request.headers.entry(name).or_insert(value);
        }

        let mut builder = client.request(
            reqwest::Method::from_bytes(request.method.as_str().as_bytes())
                .unwrap_or(reqwest::Method::GET),
            request.url.clone(),
        );
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body.take() {
            builder = builder.body(body);
        }

        let send_fut = builder.send();
        let response = tokio::select! {
            _ = cancel.cancelled() => return true,
            result = send_fut => result,
        };

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "heartbeat send failed, stopping");
                return false;
            }
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
        let body = response.bytes().await.unwrap_or_default();

        match delegate.pong(&meta, &body).await {
            Flow::Ok(()) => return true,
            Flow::Restart => continue,
            Flow::Error(e) => {
                tracing::warn!(error = %e, "heartbeat pong failed, stopping");
                return false;
            }
        }
    }
}
