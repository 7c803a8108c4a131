use anyhow::{Context, Result};
use scheduler_agent::config::SchedulerConfig;
use scheduler_agent::server::serve;
use scheduler_agent::service::ChatService;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,scheduler_agent=debug")),
        )
        .init();

    let config = SchedulerConfig::load();
    tracing::info!(
        "Starting scheduler assistant ({} / {}, up to {} round(s) per turn)",
        config.model.provider,
        config.model.model,
        config.max_action_rounds
    );

    let runtime = tokio::runtime::Runtime::new().context("failed to start server runtime")?;
    runtime.block_on(async {
        let service = ChatService::bootstrap(&config)
            .await
            .context("failed to bootstrap chat service")?;
        serve(&config.bind_addr, Arc::new(service)).await
    })
}
