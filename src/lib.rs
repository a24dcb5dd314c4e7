pub mod cli;

pub mod core {
    pub mod assets;
    pub mod canvas;
    pub mod config;
    pub mod engine;
    pub mod handle;
    pub mod renderer;
    pub mod script;
    pub mod session;
    pub mod socket;
    pub mod surface;
    pub mod viewport;
}

// Re-export for convenience
pub use crate::core::config::GameConfig;
pub use crate::core::engine::Engine;
pub use crate::core::session::{LoopState, Session};
