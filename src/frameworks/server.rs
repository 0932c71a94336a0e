// Framework bootstrap for the signaling server runtime.

use std::future::IntoFuture;
use std::io::Result;
use std::sync::Arc;
use tokio::sync::watch;

use crate::frameworks::{config, stores};
use crate::interface_adapters::clients::metrics::MetricsClient;
use crate::interface_adapters::clients::turn::CredentialsClient;
use crate::interface_adapters::routes;
use crate::interface_adapters::state::AppState;
use crate::use_cases::timeout::{run_lobby_cleaner, TimeoutManager};

fn init_runtime() {
    let _ = dotenvy::dotenv();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = matches!(std::env::var("LOG_FORMAT").as_deref(), Ok("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::capture();
        tracing::error!(%info, ?backtrace, "panic");
    }));
}

/// Serves the signaling API on an already bound listener; used directly
/// by the integration tests.
pub async fn run(listener: tokio::net::TcpListener) -> Result<()> {
    let address = listener.local_addr()?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let state = build_state(shutdown_rx.clone()).await?;

    // Credential refresher, reaper and lobby cleaner all stop when the
    // shutdown flag flips.
    let credentials = Arc::clone(&state.credentials);
    let credentials_shutdown = shutdown_rx.clone();
    tokio::spawn(async move { credentials.run(credentials_shutdown).await });

    let reaper = TimeoutManager::new(Arc::clone(&state.store));
    let reaper_shutdown = shutdown_rx.clone();
    tokio::spawn(async move { reaper.run(reaper_shutdown).await });

    tokio::spawn(run_lobby_cleaner(
        Arc::clone(&state.store),
        shutdown_rx.clone(),
    ));

    let app = routes::app(state);
    tracing::info!(%address, "listening");

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .into_future();

    let mut drain_rx = shutdown_rx;
    tokio::select! {
        result = server => {
            result.inspect_err(|e| {
                tracing::error!(error = %e, "server error");
            })?;
        }
        // Long-lived sockets would otherwise stall the drain forever.
        _ = async {
            while !*drain_rx.borrow() {
                if drain_rx.changed().await.is_err() {
                    return std::future::pending::<()>().await;
                }
            }
            tokio::time::sleep(config::SHUTDOWN_DRAIN).await;
        } => {
            tracing::info!("drain window elapsed");
        }
    }

    tracing::info!("shutdown complete");
    Ok(())
}

/// Full production entrypoint: loads the environment, initializes
/// tracing and binds the configured address.
pub async fn run_with_config() -> Result<()> {
    init_runtime();

    let address = config::addr();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .inspect_err(|e| {
            tracing::error!(%address, error = %e, "failed to bind");
        })?;

    run(listener).await
}

async fn build_state(shutdown: watch::Receiver<bool>) -> Result<Arc<AppState>> {
    let store = stores::from_env(shutdown)
        .await
        .map_err(|err| std::io::Error::other(format!("failed to set up store: {err}")))?;

    let credentials = Arc::new(CredentialsClient::from_env());
    let metrics = MetricsClient::from_env();

    Ok(Arc::new(AppState {
        store,
        credentials,
        metrics,
    }))
}

async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
}
