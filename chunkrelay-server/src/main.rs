use anyhow::Result;
use chunkrelay_server::{settings, spawn_sweeper, Settings};

#[tokio::main]
async fn main() -> Result<()> {
    let config = settings::load();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::from_config(&config.snapshot())?;
    let app = chunkrelay_server::build(&settings).await?;

    let _sweeper = spawn_sweeper(app.state.gate.clone(), settings.sweep_interval);

    app.listen(settings.addr()).await
}
