use anyhow::{ensure, Result};
use serde::Deserialize;

use crate::core::surface::Colour;

/// Startup parameters the init script leaves behind in its `config` global.
/// Read once during startup, immutable afterwards. Field names mirror what
/// the scripts write (`displayWidth`, `blankColour`, ...).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameConfig {
    pub display_width: u32,
    pub display_height: u32,
    #[serde(default = "default_blank_colour")]
    pub blank_colour: Colour,
    #[serde(default = "default_page_background")]
    pub page_background_colour: Colour,
    pub entry_point: String,
    #[serde(default)]
    pub image_filenames: Vec<String>,
    #[serde(default)]
    pub lua_filenames: Vec<String>,
}

fn default_blank_colour() -> Colour {
    Colour::WHITE
}

fn default_page_background() -> Colour {
    Colour::BLACK
}

impl GameConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.display_width > 0 && self.display_height > 0,
            "display dimensions must be non-zero, got {}x{}",
            self.display_width,
            self.display_height
        );
        ensure!(!self.entry_point.is_empty(), "entryPoint must name a script");
        Ok(())
    }
}
