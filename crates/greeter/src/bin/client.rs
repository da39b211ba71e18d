//! Greeter client binary
//!
//! Usage: `greeter-client [NAME]`

use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use greeter::{config::GreeterConfig, GreetingClient, DEFAULT_NAME};
use greeter_common::security::MtlsConnector;
use greeter_common::{extract, load_identity, load_trust_root};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let name = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_NAME.to_string());

    // Load configuration
    let config = GreeterConfig::load()?;

    // Load credentials
    let identity = load_identity(&config.client.cert, &config.client.key)
        .context("loading client identity")?;
    let trust_root = load_trust_root(&config.ca_cert).context("loading CA bundle")?;

    let channel = MtlsConnector::new(&identity, &trust_root, &config.client.server_name)?
        .with_handshake_timeout(config.handshake_timeout())
        .connect(&config.client.address)
        .await
        .with_context(|| format!("connecting to {}", config.client.address))?;

    if let Ok(server) = extract(channel.session()) {
        info!(subject = %server.leaf_subject, issuer = %server.issuer_subject, "Server Cert");
    }

    let mut client = GreetingClient::new(&channel);
    let outcome = client.say_hello(&name, config.client.call_timeout()).await;
    channel.close();

    match outcome {
        Ok(message) => {
            info!("Greeting: {}", message);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!(error = %e, state = %client.state(), "could not greet");
            Ok(ExitCode::FAILURE)
        }
    }
}
