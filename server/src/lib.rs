use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::DefaultBodyLimit, routing::get, routing::post, Router};
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    classify::ServerErrorsFailureClass, limit::RequestBodyLimitLayer, trace::TraceLayer,
};
use tracing::Span;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod config;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod file_reply;
pub mod formats;
mod handlers;
pub mod intake;
pub mod job;
mod pages;
pub mod process;
pub mod publish;
pub mod sniff;
pub mod storage;

#[cfg(test)] // <-- not needed in integration tests
extern crate rstest;

use crate::config::{Config, ConfigError};
use crate::dispatch::Dispatcher;
use crate::storage::StorageLayout;

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("storage: {0}")]
    Storage(#[from] io::Error),
    #[error("capabilities: {0}")]
    Capabilities(String),
    #[error("cannot listen: {0}")]
    Listen(io::Error),
}

/// Shared state of a running gateway.
pub struct Gateway {
    pub config: Config,
    pub layout: StorageLayout,
    pub dispatcher: Dispatcher,
}

impl Gateway {
    /// Prepares storage and validates the capability table.
    pub async fn start(config: Config) -> Result<Self, StartError> {
        let layout = StorageLayout::bootstrap(&config.data_dir).await?;
        let dispatcher = Dispatcher::new(&config).map_err(StartError::Capabilities)?;
        for capability in dispatcher.capabilities() {
            tracing::debug!(
                "{}: {}",
                capability.category,
                capability.targets.join(", ")
            );
        }
        Ok(Self {
            config,
            layout,
            dispatcher,
        })
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(handlers::convert, handlers::download, handlers::capabilities),
    components(
        schemas(
            kernel::ConvertReply,
            kernel::ErrorReply,
            kernel::ErrorKind,
            kernel::Category,
            kernel::Capability,
            handlers::ConvertForm
        ),
        responses(file_reply::ArtifactReply)
    ),
    tags(
        (name = "convert", description = "Upload, conversion and single-use download")
    )
)]
struct ApiDoc;

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "convgate=debug,server=debug,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

pub async fn run(config: Config) -> Result<(), StartError> {
    let gateway = Arc::new(Gateway::start(config).await?);

    let sweeper = publish::start_sweeper(
        gateway.layout.clone(),
        gateway.config.sweep_interval,
        gateway.config.retention,
    );

    let socket = SocketAddr::from(([0, 0, 0, 0], gateway.config.port));
    let listener = tokio::net::TcpListener::bind(socket)
        .await
        .map_err(StartError::Listen)?;
    tracing::debug!("listening on {socket}");

    let app = create_routes(gateway);
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    sweeper.abort();
    served.map_err(StartError::Listen)
}

pub fn create_routes(gateway: Arc<Gateway>) -> Router {
    let limit = gateway.config.max_upload_bytes + handlers::MULTIPART_OVERHEAD;
    let limit = usize::try_from(limit).unwrap_or(usize::MAX);
    Router::new()
        .route("/", get(handlers::index))
        .route("/:slug", get(handlers::page))
        .route("/convert", post(handlers::convert))
        .route("/download", get(handlers::download))
        .route("/capabilities", get(handlers::capabilities))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http().on_failure(
                    |error: ServerErrorsFailureClass, _latency: Duration, _span: &Span| {
                        tracing::error!("Server error: {error}");
                    },
                ))
                .layer(DefaultBodyLimit::max(limit))
                .layer(RequestBodyLimitLayer::new(limit.saturating_mul(2)))
                .into_inner(),
        )
        .with_state(gateway)
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_doc_lists_endpoints() {
        // Act
        let doc = ApiDoc::openapi();

        // Assert
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        assert!(paths.iter().any(|p| *p == "/convert"));
        assert!(paths.iter().any(|p| *p == "/download"));
        assert!(paths.iter().any(|p| *p == "/capabilities"));
    }

    #[tokio::test]
    async fn start_rejects_unwritable_root() {
        // Arrange
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("occupied");
        std::fs::write(&file, b"").unwrap();
        let config = Config {
            data_dir: file,
            ..Config::default()
        };

        // Act
        let result = Gateway::start(config).await;

        // Assert
        assert!(matches!(result, Err(StartError::Storage(_))));
    }
}
