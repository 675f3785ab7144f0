use anyhow::Result;
use clap::Parser;
use room_chat::{api, config};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = config::Cli::parse();
    let cfg = config::Config::load(&cli)?;
    let level = if cfg.logging_enabled {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt().with_max_level(level).init();
    tracing::info!(data_dir = %cfg.data_dir.display(), "starting room_chat");
    api::run_http_server(cfg).await
}
