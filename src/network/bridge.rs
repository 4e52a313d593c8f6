//! Media bridge: a short-lived HTTP server for one local file
//!
//! Pull receivers can only fetch URLs, so playing a local file to them
//! needs the file exposed over HTTP. Each playback gets its own bridge,
//! which is shut down when that playback ends.

use axum::{
    body::Body,
    extract::{Path as UrlPath, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::config::BridgeConfig;
use crate::error::{NetworkError, Result};
use crate::media::content_type_for;
use crate::network::distribution::join_with_grace;
use crate::network::port::bind_tokio;

#[derive(Clone)]
struct BridgeState {
    file: Arc<PathBuf>,
    name: Arc<str>,
    content_type: &'static str,
}

/// Serves exactly one file under its own name
pub struct MediaBridgeServer {
    file: PathBuf,
    content_type: &'static str,
    local_addr: SocketAddr,
    url: String,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl MediaBridgeServer {
    /// Start serving `path` on the first free port from `config.base_port`
    pub async fn start(path: &Path, config: &BridgeConfig, advertise: IpAddr) -> Result<Self> {
        if !path.is_file() {
            return Err(NetworkError::SourceNotFound(path.display().to_string()).into());
        }
        let file = std::fs::canonicalize(path)?;
        let name: Arc<str> = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| NetworkError::SourceNotFound(path.display().to_string()))?
            .into();
        let content_type = content_type_for(&file);

        let listener = bind_tokio(config.bind_address, config.base_port, config.port_range)?;
        let local_addr = listener.local_addr()?;
        let url = format!(
            "http://{}/{}",
            SocketAddr::new(advertise, local_addr.port()),
            urlencoding::encode(&name)
        );

        let state = BridgeState {
            file: Arc::new(file.clone()),
            name,
            content_type,
        };
        let app = Router::new()
            .route("/:name", get(handle_file))
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = result {
                tracing::error!("Media bridge terminated: {}", e);
            }
        });

        tracing::info!("Serving {} at {}", file.display(), url);
        Ok(Self {
            file,
            content_type,
            local_addr,
            url,
            cancel,
            task: Some(task),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn content_type(&self) -> &'static str {
        self.content_type
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Close the listener and join the server task
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            join_with_grace(task, "media bridge").await;
        }
        tracing::info!("Media bridge on {} stopped", self.local_addr);
    }
}

impl Drop for MediaBridgeServer {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn handle_file(State(state): State<BridgeState>, UrlPath(name): UrlPath<String>) -> Response {
    if name != *state.name {
        return StatusCode::NOT_FOUND.into_response();
    }

    let file = match tokio::fs::File::open(&*state.file).await {
        Ok(file) => file,
        Err(e) => {
            tracing::warn!("Cannot open {}: {}", state.file.display(), e);
            return StatusCode::NOT_FOUND.into_response();
        }
    };
    let length = match file.metadata().await {
        Ok(meta) => meta.len(),
        Err(e) => {
            tracing::warn!("Cannot stat {}: {}", state.file.display(), e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    (
        [
            (header::CONTENT_TYPE, state.content_type.to_string()),
            (header::CONTENT_LENGTH, length.to_string()),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response()
}
