//! HTTP Server configuration and startup.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use chrono::Duration;
use tower_http::trace::TraceLayer;

use mpesa_types::OperationRepository;

use super::handlers::{self, AppState};
use super::paths;
use crate::MpesaService;
use crate::sweeper::DEFAULT_STALE_AFTER;

/// HTTP Server for the gateway callbacks and operator API.
pub struct HttpServer<R: OperationRepository> {
    state: Arc<AppState<R>>,
}

impl<R: OperationRepository> HttpServer<R> {
    /// Creates a new HTTP server with the given service.
    pub fn new(service: Arc<MpesaService<R>>) -> Self {
        let stale_after = Duration::from_std(DEFAULT_STALE_AFTER).unwrap_or(Duration::minutes(30));
        Self::with_stale_after(service, stale_after)
    }

    /// Creates a server whose manual sweep defaults to `stale_after`.
    pub fn with_stale_after(service: Arc<MpesaService<R>>, stale_after: Duration) -> Self {
        Self {
            state: Arc::new(AppState {
                service,
                stale_after,
            }),
        }
    }

    /// Builds the Axum router with all routes.
    pub fn router(&self) -> Router {
        // Build HTTP metrics layer (uses globally set MeterProvider)
        let metrics = axum_otel_metrics::HttpMetricsLayerBuilder::new().build();

        Router::new()
            .route(paths::HEALTH, get(handlers::health))
            .route(paths::BALANCE_QUERY, post(handlers::query_balance::<R>))
            .route(paths::BALANCE_RESULT, post(handlers::balance_result::<R>))
            .route(paths::BALANCE_TIMEOUT, post(handlers::queue_timeout::<R>))
            .route(paths::B2C_PAYMENT, post(handlers::b2c_payment::<R>))
            .route(paths::B2C_CALLBACK, post(handlers::b2c_callback::<R>))
            .route(paths::B2C_TIMEOUT, post(handlers::queue_timeout::<R>))
            .route(
                paths::C2B_REGISTER_URLS,
                post(handlers::c2b_register_urls::<R>),
            )
            .route(paths::C2B_VALIDATION, post(handlers::c2b_validation::<R>))
            .route(
                paths::C2B_CONFIRMATION,
                post(handlers::c2b_confirmation::<R>),
            )
            .route(paths::OPERATIONS, get(handlers::list_operations::<R>))
            .route(
                paths::OPERATIONS_SWEEP,
                post(handlers::sweep_operations::<R>),
            )
            .route(paths::OPERATION, get(handlers::get_operation::<R>))
            .layer(metrics)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Runs the server on the given address with graceful shutdown.
    pub async fn run(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Server listening on {}", listener.local_addr()?);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown...");
}
