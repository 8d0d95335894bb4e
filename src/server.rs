//! Listener setup and graceful shutdown
//!
//! Shutdown runs in three phases: the signal stops the accept loop and asks
//! open connections to finish, in-flight requests get the configured grace
//! period, then the shutdown token is cancelled so open downloads end and
//! release their file handles.

use axum::Router;
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::error::{AppError, AppResult};

/// How long connections get to close after streams are cancelled
const FORCE_CLOSE_WAIT: Duration = Duration::from_secs(1);

/// A bound listener waiting to serve a router
pub struct Server {
    listener: TcpListener,
    grace: Duration,
}

impl Server {
    /// Bind the configured address
    ///
    /// Host names are resolved here; the first address that binds wins.
    pub async fn bind(config: &ServerConfig) -> AppResult<Self> {
        let listener = TcpListener::bind(config.addr.as_str())
            .await
            .map_err(|source| AppError::Bind {
                addr: config.addr.clone(),
                source,
            })?;

        Ok(Self {
            listener,
            grace: config.shutdown_grace(),
        })
    }

    pub fn local_addr(&self) -> AppResult<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| AppError::io("reading listener address", e))
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Serve `router` until `signal` resolves and the drain completes
    ///
    /// `shutdown` is cancelled once the grace period ends (or earlier, if
    /// every connection closed in time).
    pub async fn run<F>(self, router: Router, signal: F, shutdown: CancellationToken) -> AppResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let draining = CancellationToken::new();
        let trigger = draining.clone();

        let app = router.into_make_service_with_connect_info::<SocketAddr>();
        let serve = axum::serve(self.listener, app)
            .with_graceful_shutdown(async move {
                signal.await;
                trigger.cancel();
            })
            .into_future();
        tokio::pin!(serve);

        tokio::select! {
            result = &mut serve => {
                shutdown.cancel();
                result.map_err(|e| AppError::io("serving connections", e))?;
                tracing::info!("HTTP server stopped");
                return Ok(());
            }
            _ = draining.cancelled() => {}
        }

        tracing::info!(
            grace_secs = self.grace.as_secs_f64(),
            "Shutdown signal received, draining in-flight requests"
        );

        let drained = tokio::time::timeout(self.grace, &mut serve).await;
        shutdown.cancel();

        match drained {
            Ok(result) => {
                result.map_err(|e| AppError::io("serving connections", e))?;
                tracing::info!("HTTP server stopped");
            }
            Err(_) => {
                tracing::warn!(
                    grace_secs = self.grace.as_secs_f64(),
                    "Grace period expired, closing remaining connections"
                );
                match tokio::time::timeout(FORCE_CLOSE_WAIT, &mut serve).await {
                    Ok(result) => {
                        result.map_err(|e| AppError::io("serving connections", e))?;
                        tracing::info!("HTTP server stopped");
                    }
                    Err(_) => {
                        tracing::warn!("Connections still open after cancellation, abandoning them");
                    }
                }
            }
        }

        Ok(())
    }
}

/// Resolve on Ctrl-C, or on SIGTERM, SIGHUP or SIGQUIT on unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::SignalKind;
        tokio::select! {
            () = unix_signal(SignalKind::terminate()) => {},
            () = unix_signal(SignalKind::hangup()) => {},
            () = unix_signal(SignalKind::quit()) => {},
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

#[cfg(unix)]
async fn unix_signal(kind: tokio::signal::unix::SignalKind) {
    match tokio::signal::unix::signal(kind) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install signal handler");
            std::future::pending::<()>().await;
        }
    }
}
