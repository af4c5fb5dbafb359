use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use sportsline_server::auth::AuthGate;
use sportsline_server::config::{generate_config_template, Config};
use sportsline_server::routes;
use sportsline_server::state::AppState;
use sportsline_server::ws::Hub;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    init_tracing(config.json_logs);

    tracing::info!(
        environment = %config.environment,
        "Sportsline hub v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    // Fail fast: production without a signing secret never binds a port
    let gate = AuthGate::from_config(&config)?;

    let hub = Hub::new(config.hub());
    hub.start()?;

    let app = routes::build_router(AppState {
        gate,
        hub: hub.clone(),
    });

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(hub.clone()))
    .await?;

    Ok(())
}

fn init_tracing(json_logs: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sportsline_server=info"));

    if json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }
}

/// Resolve on Ctrl-C or SIGTERM, closing every WebSocket first.
async fn shutdown_signal(hub: Arc<Hub>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
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

    tracing::info!("Shutdown signal received");
    hub.stop();
}
