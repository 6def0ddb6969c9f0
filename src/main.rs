//! gcsfuse-sidecar-injector - admission webhook entry point

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gcsfuse_sidecar_injector::config::SidecarArgs;
use gcsfuse_sidecar_injector::injector::SidecarInjector;
use gcsfuse_sidecar_injector::webhook::{start_server, ServerConfig, WebhookState};
use gcsfuse_sidecar_injector::{DEFAULT_HEALTH_PORT, DEFAULT_WEBHOOK_PORT};

/// Mutating admission webhook injecting the Cloud Storage FUSE sidecar
#[derive(Parser, Debug)]
#[command(name = "gcsfuse-sidecar-injector", version, about, long_about = None)]
struct Cli {
    /// Port for the TLS webhook endpoint
    #[arg(long, env = "WEBHOOK_PORT", default_value_t = DEFAULT_WEBHOOK_PORT)]
    port: u16,

    /// Port for the plain HTTP health endpoint
    #[arg(long, env = "HEALTH_PORT", default_value_t = DEFAULT_HEALTH_PORT)]
    health_port: u16,

    /// Directory holding the serving certificate and key
    #[arg(long, env = "CERT_DIR", default_value = "/etc/tls-certs")]
    cert_dir: PathBuf,

    /// Certificate file name inside the cert directory
    #[arg(long, env = "CERT_NAME", default_value = "cert.pem")]
    cert_name: String,

    /// Private key file name inside the cert directory
    #[arg(long, env = "KEY_NAME", default_value = "key.pem")]
    key_name: String,

    #[command(flatten)]
    sidecar: SidecarArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let defaults = cli
        .sidecar
        .into_config()
        .map_err(|e| anyhow::anyhow!("Invalid sidecar defaults: {}", e))?;

    tracing::info!(
        image = %defaults.container_image,
        pull_policy = %defaults.image_pull_policy,
        cpu_request = %defaults.cpu.request,
        cpu_limit = %defaults.cpu.limit,
        memory_request = %defaults.memory.request,
        memory_limit = %defaults.memory.limit,
        ephemeral_storage_request = %defaults.ephemeral_storage.request,
        ephemeral_storage_limit = %defaults.ephemeral_storage.limit,
        "Loaded sidecar defaults"
    );

    let config = ServerConfig {
        addr: SocketAddr::from(([0, 0, 0, 0], cli.port)),
        health_addr: SocketAddr::from(([0, 0, 0, 0], cli.health_port)),
        cert_path: cli.cert_dir.join(&cli.cert_name),
        key_path: cli.cert_dir.join(&cli.key_name),
    };

    let state = Arc::new(WebhookState::new(SidecarInjector::new(Arc::new(defaults))));

    start_server(config, state)
        .await
        .map_err(|e| anyhow::anyhow!("Webhook server failed: {}", e))
}
