//! Live chunk distribution server
//!
//! Serves `GET /live.mp3` as an unbounded chunked `audio/mpeg` response fed
//! from the session's [`ChunkChannel`](crate::audio::ChunkChannel).
//!
//! The channel has exactly one consumer, so the endpoint serves one client
//! at a time. A second request while the first is attached is answered with
//! `409 Conflict` instead of splitting the chunk sequence between readers.

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::audio::buffer::{RecvOutcome, SharedChunkChannel};
use crate::config::StreamConfig;
use crate::constants::LIVE_STREAM_PATH;
use crate::error::Result;
use crate::network::port::bind_tokio;

/// How long shutdown waits for the connected client to drain
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Shared state passed to the stream handler
#[derive(Clone)]
struct StreamState {
    channel: SharedChunkChannel,
    cancel: CancellationToken,
    read_timeout: Duration,
    client_attached: Arc<AtomicBool>,
    bytes_sent: Arc<AtomicU64>,
}

/// Releases the single-client slot when the response body is dropped
struct ClientSlot(Arc<AtomicBool>);

impl Drop for ClientSlot {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
        tracing::info!("Live stream client detached");
    }
}

/// HTTP server exposing the live MP3 stream
pub struct ChunkDistributionServer {
    local_addr: SocketAddr,
    url: String,
    cancel: CancellationToken,
    bytes_sent: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

impl ChunkDistributionServer {
    /// Bind the first free port from `config.base_port` and start serving.
    ///
    /// `advertise` is the address put into [`url`](Self::url).
    pub async fn start(
        config: &StreamConfig,
        channel: SharedChunkChannel,
        cancel: CancellationToken,
        advertise: IpAddr,
    ) -> Result<Self> {
        let listener = bind_tokio(config.bind_address, config.base_port, config.port_range)?;
        let local_addr = listener.local_addr()?;
        let url = format!(
            "http://{}{}",
            SocketAddr::new(advertise, local_addr.port()),
            LIVE_STREAM_PATH
        );

        let bytes_sent = Arc::new(AtomicU64::new(0));
        let state = StreamState {
            channel,
            cancel: cancel.clone(),
            read_timeout: config.read_timeout(),
            client_attached: Arc::new(AtomicBool::new(false)),
            bytes_sent: bytes_sent.clone(),
        };

        let app = Router::new()
            .route(LIVE_STREAM_PATH, get(handle_live_stream))
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        let shutdown = cancel.clone();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = result {
                tracing::error!("Distribution server terminated: {}", e);
            }
        });

        tracing::info!("Live stream available at {}", url);
        Ok(Self {
            local_addr,
            url,
            cancel,
            bytes_sent,
            task: Some(task),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Bytes written to clients so far
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Stop the stream loop, close the listener and join the server task
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            join_with_grace(task, "distribution").await;
        }
        tracing::info!("Distribution server on {} stopped", self.local_addr);
    }
}

impl Drop for ChunkDistributionServer {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Await a server task, aborting it if the grace period runs out
pub(crate) async fn join_with_grace(mut task: JoinHandle<()>, name: &str) {
    if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
        tracing::warn!("{} server did not stop within {:?}, aborting", name, SHUTDOWN_GRACE);
        task.abort();
        let _ = task.await;
    }
}

/// Handles requests to `/live.mp3`
async fn handle_live_stream(State(state): State<StreamState>) -> Response {
    if state.client_attached.swap(true, Ordering::SeqCst) {
        tracing::warn!("Rejected second live stream client");
        return (StatusCode::CONFLICT, "live stream already has a listener").into_response();
    }
    tracing::info!("Live stream client attached");
    let slot = ClientSlot(state.client_attached.clone());

    let stream = futures_util::stream::unfold((state, slot), |(state, slot)| async move {
        loop {
            if state.cancel.is_cancelled() {
                return None;
            }
            match state.channel.recv_timeout(state.read_timeout).await {
                RecvOutcome::Chunk(chunk) => {
                    state.bytes_sent.fetch_add(chunk.len() as u64, Ordering::Relaxed);
                    return Some((Ok::<Bytes, std::io::Error>(chunk), (state, slot)));
                }
                RecvOutcome::Timeout => {}
                RecvOutcome::Closed => return None,
            }
        }
    });

    (
        [
            (header::CONTENT_TYPE, "audio/mpeg"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
            (header::TRANSFER_ENCODING, "chunked"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::create_chunk_channel;
    use std::net::Ipv4Addr;

    fn loopback_config() -> StreamConfig {
        StreamConfig {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            base_port: 0,
            port_range: 1,
            read_timeout_ms: 50,
            ..StreamConfig::default()
        }
    }

    #[tokio::test]
    async fn test_url_points_at_live_endpoint() {
        let channel = create_chunk_channel(4);
        let server = ChunkDistributionServer::start(
            &loopback_config(),
            channel,
            CancellationToken::new(),
            IpAddr::V4(Ipv4Addr::LOCALHOST),
        )
        .await
        .unwrap();

        let port = server.local_addr().port();
        assert_eq!(server.url(), format!("http://127.0.0.1:{}/live.mp3", port));
        server.shutdown().await;
    }
}
