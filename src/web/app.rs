use std::net::SocketAddr;

use axum::routing::{delete, get, post};
use axum::Router;
use tokio::signal;
use tower_http::trace::TraceLayer;

use super::handlers::{bot_ws, create_bot, delete_bot, get_bot, health};
use super::state::AppState;
use crate::service::ServiceState;

pub struct App {
    state: AppState,
}

impl App {
    pub fn new(service: ServiceState) -> Self {
        App { state: AppState { service } }
    }

    pub async fn serve(self) -> anyhow::Result<()> {
        let addr: SocketAddr = self.state.service.config.http_addr.parse()?;

        let app = Router::new()
            .route("/health", get(health))
            .route("/bot", get(get_bot))
            .route("/bot", post(create_bot))
            .route("/bot", delete(delete_bot))
            .route("/bot/ws", get(bot_ws))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(%addr, "service listening");

        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
