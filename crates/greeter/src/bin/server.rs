//! Greeter server binary
//!
//! Serves `helloworld.Greeter` to clients presenting a certificate issued by the configured CA.

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use greeter::{config::GreeterConfig, serve, GreeterGrpcService, GREETER_VERSION};
use greeter_common::security::MtlsAcceptor;
use greeter_common::{load_identity, load_trust_root};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting Greeter server v{}", GREETER_VERSION);

    // Load configuration
    let config = GreeterConfig::load()?;
    info!("Loaded configuration: {:?}", config.server);

    // Load credentials
    let identity = load_identity(&config.server.cert, &config.server.key)
        .context("loading server identity")?;
    let trust_root = load_trust_root(&config.ca_cert).context("loading CA bundle")?;

    let listener = MtlsAcceptor::new(&identity, &trust_root)?
        .with_handshake_timeout(config.handshake_timeout())
        .listen(&config.server.bind_address)
        .await?;
    info!("server listening at {}", listener.local_addr());

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install CTRL+C handler; serving until killed");
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal");
    };

    serve(GreeterGrpcService::new(), listener, shutdown)
        .await
        .context("serving greeter")?;

    info!("Shutting down Greeter server");
    Ok(())
}
