//! Priority admission webhook

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use kube::Client;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use priority_admission::admission::{PriorityAdmission, PLUGIN_NAME};
use priority_admission::features::FeatureGates;
use priority_admission::priority::ReflectorIndex;
use priority_admission::webhook::{serve, ServerConfig, WebhookState};
use priority_admission::DEFAULT_LISTEN_ADDR;

/// Priority admission - resolves pod priority and guards the default PriorityClass
#[derive(Parser, Debug)]
#[command(name = "priority-admission", version, about, long_about = None)]
struct Cli {
    /// Address to serve the webhook on
    #[arg(long, env = "PRIORITY_ADMISSION_ADDR", default_value = DEFAULT_LISTEN_ADDR)]
    listen_addr: SocketAddr,

    /// Path to the TLS certificate PEM presented to the API server
    #[arg(long, env = "PRIORITY_ADMISSION_TLS_CERT")]
    tls_cert_file: PathBuf,

    /// Path to the TLS private key PEM
    #[arg(long, env = "PRIORITY_ADMISSION_TLS_KEY")]
    tls_key_file: PathBuf,

    /// Feature gates in `Name=bool,...` form
    ///
    /// Known gates: PodPriority (default true), ExperimentalCriticalPodAnnotation
    /// (default false).
    #[arg(long, env = "PRIORITY_ADMISSION_FEATURE_GATES")]
    feature_gates: Option<FeatureGates>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install crypto provider before any TLS config is built
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,priority_admission=debug,kube=info,tower=warn,hyper=warn")
        }))
        .init();

    let cli = Cli::parse();
    let features = cli.feature_gates.unwrap_or_default();
    tracing::info!(
        plugin = PLUGIN_NAME,
        features = ?features,
        "Starting priority admission"
    );

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let index = Arc::new(ReflectorIndex::watch(client));
    let admission = PriorityAdmission::new(index.clone(), features);
    let state = Arc::new(WebhookState::new(admission, index));

    let config = ServerConfig {
        addr: cli.listen_addr,
        cert_path: cli.tls_cert_file,
        key_path: cli.tls_key_file,
    };

    serve(config, state).await?;
    Ok(())
}
