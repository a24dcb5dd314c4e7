use anyhow::{bail, Result};
use clap::Parser;

/// Terminal loader for server-hosted Lua canvas games.
#[derive(Debug, Parser)]
#[command(name = "luaterm")]
#[command(about = "Fetch a game server's Lua scripts and assets and run them in the terminal")]
#[command(version)]
pub struct Cli {
    /// Base URL of the game server (serves assets/ and /websocket)
    #[arg(default_value = "http://127.0.0.1:4000")]
    pub server: String,

    /// Frame rate of the game loop
    #[arg(long, default_value_t = 60)]
    pub fps: u32,

    /// Turn silently-ignored script mistakes (drawing an unfetched image,
    /// sending on a closed socket) into Lua errors
    #[arg(long)]
    pub strict: bool,
}

/// The websocket endpoint lives at a fixed path on the same server the
/// assets come from.
pub fn websocket_url(server: &str) -> Result<String> {
    let base = server.trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("http://") {
        Ok(format!("ws://{rest}/websocket"))
    } else if let Some(rest) = base.strip_prefix("https://") {
        Ok(format!("wss://{rest}/websocket"))
    } else {
        bail!("server URL must start with http:// or https://, got '{server}'");
    }
}
