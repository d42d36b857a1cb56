//! Binary entrypoint for the OIT field agent.
use anyhow::Context;
use oit_api::{run, AgentConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // OIT_CONFIG aponta o YAML; OIT_ADDR e afins sobrepõem
    let config = AgentConfig::load().context("loading agent configuration")?;
    run(config).await.context("agent stopped")?;
    Ok(())
}
