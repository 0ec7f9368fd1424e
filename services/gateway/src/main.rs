// gateway: terminates client WebSockets and bridges them to an HTTP backend
// as websocket-events batches.

use clap::Parser;
use gateway::{app_router, publish, Config, Gateway, HttpTransport, Signer};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber for structured logging to stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = %config.backend,
        "gateway starting"
    );

    let signer = match (&config.sig_iss, &config.sig_key) {
        (Some(issuer), Some(secret)) => Some(Signer::new(issuer.clone(), secret.as_bytes())),
        _ => None,
    };

    let transport = Arc::new(HttpTransport::new(config.backend.clone(), signer));
    let gateway = Gateway::new(transport);

    if let Some(addr) = &config.publish_listen {
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                eprintln!("FATAL: failed to bind publish listener on {addr}: {e}");
                std::process::exit(1);
            }
        };
        info!(addr = %addr, "publish listener bound");
        let router = publish::router(Arc::clone(&gateway));
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!(error = %e, "publish listener failed");
            }
        });
    }

    let listener = match tokio::net::TcpListener::bind(&config.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("FATAL: failed to bind {}: {e}", config.listen);
            std::process::exit(1);
        }
    };
    info!(addr = %config.listen, "gateway listening");

    if let Err(e) = axum::serve(listener, app_router(gateway)).await {
        eprintln!("FATAL: server error: {e}");
        std::process::exit(1);
    }
}
