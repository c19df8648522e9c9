use log::{error, info, warn};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::Notify;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::protocol::build_router;
use crate::server::AppState;

pub struct Server {
    listener: TcpListener,
    state: Arc<AppState>,
}

impl Server {
    /// Prepare the sources and bind the listener
    pub async fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let addr = config.socket_addr()?;
        let state = Arc::new(AppState::from_config(config)?);

        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => {
                info!("Server bound to {}", addr);
                listener
            }
            Err(e) => {
                error!("Failed to bind to {}: {}", addr, e);
                return Err(e.into());
            }
        };

        Ok(Self { listener, state })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Serve until Ctrl+C or SIGTERM, then give in-flight requests the
    /// configured grace period
    pub async fn start(self) -> Result<(), ServerError> {
        let sources = self.state.storage.registry().enabled().count();
        info!(
            "Starting file manager server on {} ({} enabled sources)",
            self.local_addr()?,
            sources
        );

        let grace = self.state.config.shutdown_timeout();
        let router = build_router(Arc::clone(&self.state));

        let stopping = Arc::new(Notify::new());
        let signal = {
            let stopping = Arc::clone(&stopping);
            async move {
                shutdown_signal().await;
                stopping.notify_one();
            }
        };

        let serve = axum::serve(self.listener, router)
            .with_graceful_shutdown(signal)
            .into_future();
        tokio::pin!(serve);

        tokio::select! {
            result = &mut serve => result?,
            _ = stopping.notified() => {
                match tokio::time::timeout(grace, &mut serve).await {
                    Ok(result) => result?,
                    Err(_) => warn!(
                        "Requests still running after {:?}, shutting down anyway",
                        grace
                    ),
                }
            }
        }

        info!("Server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to listen for SIGTERM: {}", e);
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

    info!("Received termination signal, shutting down");
}
