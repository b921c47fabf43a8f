//! Beta-testing feedback portal back end.
//!
//! Submissions flow through a fixed pipeline:
//!
//! ```text
//! POST /feedback -> validate -> append to store -> 201
//!                                      |
//!                                      +-> mirror to Google Sheets (spawned)
//!                                             |
//!                                             +-> set sheets_synced on success
//! ```

pub mod commands;
pub mod error;
pub mod models;
pub mod routes;
pub mod state;
pub mod sync;

use commands::settings::PortalSettings;
use state::PortalState;
use tokio::net::TcpListener;
use tokio::signal;

pub async fn start_server(settings: PortalSettings) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    log::info!("Initializing state...");
    let state = PortalState::from_settings(&settings)?;

    let address = settings.listen_address();
    log::info!("Binding to {address}");
    let listener = TcpListener::bind(&address).await?;
    log::info!("Feedback portal listening on {address}");

    axum::serve(listener, routes::router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Token exchange and append are each bounded by the mirror timeout.
    state.drain_mirrors(settings.mirror_timeout * 2).await;

    log::info!("Feedback portal shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
        log::info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                log::info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                log::error!("Failed to install terminate handler: {e}");
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
}
