use crossterm::event::KeyCode;
use mlua::{Function, Table};

/// The optional callbacks a game exposes on its `Game` global, looked up once
/// after the entry script runs. A missing name means the matching event is
/// never wired at all, not merely ignored.
#[derive(Default, Debug)]
pub struct GameCallbacks {
    pub init: Option<Function>,
    pub step: Option<Function>,
    pub draw: Option<Function>,
    pub key_up: Option<Function>,
    pub key_down: Option<Function>,
    pub key_press: Option<Function>,
    pub on_click: Option<Function>,
    pub websocket_message: Option<Function>,
    pub websocket_opened: Option<Function>,
    pub websocket_closed: Option<Function>,
    pub websocket_error: Option<Function>,
}

impl GameCallbacks {
    pub fn from_table(game: &Table) -> mlua::Result<Self> {
        Ok(Self {
            init: game.get("init")?,
            step: game.get("step")?,
            draw: game.get("draw")?,
            key_up: game.get("keyUp")?,
            key_down: game.get("keyDown")?,
            key_press: game.get("keyPress")?,
            on_click: game.get("onClick")?,
            websocket_message: game.get("websocketMessage")?,
            websocket_opened: game.get("websocketOpened")?,
            websocket_closed: game.get("websocketClosed")?,
            websocket_error: game.get("websocketError")?,
        })
    }
}

/// Browser-style name for a key, or None for keys games never see.
pub fn key_name(code: KeyCode) -> Option<String> {
    let name = match code {
        KeyCode::Char(c) => return Some(c.to_string()),
        KeyCode::F(n) => return Some(format!("F{n}")),
        KeyCode::Enter => "Enter",
        KeyCode::Esc => "Escape",
        KeyCode::Backspace => "Backspace",
        KeyCode::Tab => "Tab",
        KeyCode::Left => "ArrowLeft",
        KeyCode::Right => "ArrowRight",
        KeyCode::Up => "ArrowUp",
        KeyCode::Down => "ArrowDown",
        KeyCode::Home => "Home",
        KeyCode::End => "End",
        KeyCode::PageUp => "PageUp",
        KeyCode::PageDown => "PageDown",
        KeyCode::Insert => "Insert",
        KeyCode::Delete => "Delete",
        _ => return None,
    };
    Some(name.to_string())
}
