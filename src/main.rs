use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use matrix_tools::config::{Command, JobConfig};
use matrix_tools::markers::MarkerGuard;
use matrix_tools::secrets::SecretProvisioner;
use matrix_tools::store::{KubeStore, ResourceStore};
use matrix_tools::ProvisionError;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let command = std::env::args().nth(1).unwrap_or_default();
    match run(&command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let code = error
                .downcast_ref::<ProvisionError>()
                .map(ProvisionError::exit_code)
                .unwrap_or(1);
            tracing::error!(%command, error = format!("{error:#}"), code, "job failed");
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

async fn run(command: &str) -> anyhow::Result<()> {
    let config = JobConfig::from_env(command)?;
    let store: Arc<dyn ResourceStore> = Arc::new(
        KubeStore::try_default()
            .await
            .context("failed to build kubernetes client")?,
    );

    match config.command {
        Command::GenerateSecrets(batch) => {
            let provisioner =
                SecretProvisioner::new(store, &config.namespace, &config.identity, config.labels);
            let report = provisioner.provision_batch(&batch).await?;
            tracing::info!(
                namespace = %config.namespace,
                generated = report.generated.len(),
                rotated = report.rotated.len(),
                unchanged = report.unchanged.len(),
                "secrets provisioned"
            );
        }
        Command::DeploymentMarkers(markers) => {
            let guard = MarkerGuard::new(store, &config.namespace, &config.identity, config.labels);
            guard.apply_all(&markers).await?;
            tracing::info!(
                namespace = %config.namespace,
                markers = markers.len(),
                "deployment markers applied"
            );
        }
    }
    Ok(())
}
