//! eksops server binary

use std::sync::Arc;

use clap::Parser;
use tracing::{debug, info, warn};

use eksops::api::{self, AppState};
use eksops::config::load_env_file;
use eksops::telemetry::init_telemetry;
use eksops::{LazyClient, Operations, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Both kube's and the AWS SDK's TLS stacks need a process-level provider
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls aws-lc-rs crypto provider"))?;

    let env_file = load_env_file();
    let settings = Settings::parse();
    init_telemetry(&settings.telemetry())?;

    match env_file {
        Ok(Some(path)) => info!(path = %path.display(), "loaded environment file"),
        Ok(None) => debug!("no .env file found, using process environment"),
        Err(e) => warn!(error = %e, "failed to load .env file"),
    }

    info!(
        cluster = ?settings.cluster.cluster_name,
        region = ?settings.cluster.region,
        auto_create_namespace = settings.auto_create_namespace,
        "eksops starting"
    );

    let client = Arc::new(LazyClient::production(settings.cluster.clone()));
    let ops = Operations::new(client, settings.namespace_policy());

    api::serve(
        settings.bind_addr,
        AppState {
            ops: Arc::new(ops),
        },
    )
    .await?;

    Ok(())
}
