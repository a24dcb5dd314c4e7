use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use luaterm::cli::{self, Cli};
use luaterm::core::assets::HttpAssetSource;
use luaterm::Engine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let source = HttpAssetSource::new(&cli.server);
    let ws_url = cli::websocket_url(&cli.server)?;
    let engine = Engine::new(source, ws_url, cli.fps, cli.strict);

    let mut terminal = ratatui::init();
    let result = engine.run(&mut terminal).await;
    ratatui::restore();
    result
}
