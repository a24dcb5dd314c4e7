use std::cell::{Ref, RefCell};
use std::rc::Rc;
use std::time::Instant;

use anyhow::{bail, Result};
use mlua::{Function, IntoLuaMulti};

use crate::core::assets::AssetCache;
use crate::core::config::GameConfig;
use crate::core::handle::GameCallbacks;
use crate::core::script::ScriptHost;
use crate::core::socket::{ReadyState, SocketBridge, SocketEvent, SocketNotice};
use crate::core::surface::Surface;

/// Loop lifecycle. Running becomes Terminated on the first script error and
/// never comes back; there is no pause state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Terminated,
}

/// One run's worth of state: the Lua host, the immutable config, the main
/// surface, the asset cache, the socket bridge and the game's callback set.
/// Created by the orchestrator, dropped as a unit to tear everything down.
#[derive(Debug)]
pub struct Session {
    host: ScriptHost,
    config: GameConfig,
    main: Rc<RefCell<Surface>>,
    images: Rc<AssetCache>,
    socket: Rc<SocketBridge>,
    callbacks: GameCallbacks,
    state: LoopState,
    previous: Option<Instant>,
    opened_delivered: Option<u64>,
}

impl Session {
    pub(crate) fn new(
        host: ScriptHost,
        config: GameConfig,
        main: Rc<RefCell<Surface>>,
        images: Rc<AssetCache>,
        socket: Rc<SocketBridge>,
        callbacks: GameCallbacks,
    ) -> Self {
        Self {
            host,
            config,
            main,
            images,
            socket,
            callbacks,
            state: LoopState::Idle,
            previous: None,
            opened_delivered: None,
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn callbacks(&self) -> &GameCallbacks {
        &self.callbacks
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn host(&self) -> &ScriptHost {
        &self.host
    }

    pub fn socket(&self) -> &SocketBridge {
        &self.socket
    }

    pub fn images(&self) -> &AssetCache {
        &self.images
    }

    /// The composited main canvas, for presentation.
    pub fn surface(&self) -> Ref<'_, Surface> {
        self.main.borrow()
    }

    /// Call a script callback; any error it raises ends the session.
    fn call<A: IntoLuaMulti>(&mut self, callback: &Function, args: A) -> Result<()> {
        if let Err(err) = callback.call::<()>(args) {
            self.state = LoopState::Terminated;
            return Err(err.into());
        }
        Ok(())
    }

    /// Enter the loop: run `init` once and start the frame clock.
    pub fn begin(&mut self) -> Result<()> {
        if self.state != LoopState::Idle {
            bail!("session already started");
        }
        if let Some(init) = self.callbacks.init.clone() {
            self.call(&init, ())?;
        }
        self.state = LoopState::Running;
        self.previous = Some(Instant::now());
        Ok(())
    }

    /// One frame: elapsed milliseconds, step, draw, advance the clock.
    pub fn tick(&mut self) -> Result<()> {
        if self.state != LoopState::Running {
            bail!("session is not running");
        }
        let now = Instant::now();
        let delta_ms = self
            .previous
            .map(|previous| now.duration_since(previous).as_secs_f64() * 1000.0)
            .unwrap_or(0.0);
        if let Some(step) = self.callbacks.step.clone() {
            self.call(&step, delta_ms)?;
        }
        if let Some(draw) = self.callbacks.draw.clone() {
            self.call(&draw, ())?;
        }
        self.previous = Some(now);
        Ok(())
    }

    pub fn key_down(&mut self, key: &str) -> Result<()> {
        self.dispatch_key(self.callbacks.key_down.clone(), key)
    }

    pub fn key_up(&mut self, key: &str) -> Result<()> {
        self.dispatch_key(self.callbacks.key_up.clone(), key)
    }

    pub fn key_press(&mut self, key: &str) -> Result<()> {
        self.dispatch_key(self.callbacks.key_press.clone(), key)
    }

    fn dispatch_key(&mut self, callback: Option<Function>, key: &str) -> Result<()> {
        if self.state != LoopState::Running {
            return Ok(());
        }
        match callback {
            Some(callback) => self.call(&callback, key.to_string()),
            None => Ok(()),
        }
    }

    /// Dispatch a click already mapped to logical coordinates. Clicks outside
    /// the canvas are dropped here, edges inclusive.
    pub fn click(&mut self, x: f64, y: f64) -> Result<()> {
        if self.state != LoopState::Running {
            return Ok(());
        }
        let Some(on_click) = self.callbacks.on_click.clone() else {
            return Ok(());
        };
        let width = self.config.display_width as f64;
        let height = self.config.display_height as f64;
        if x < 0.0 || x > width || y < 0.0 || y > height {
            return Ok(());
        }
        self.call(&on_click, (x, y))
    }

    /// Route a socket event to the matching callback, if the game declared
    /// one. Stale generations fall on the floor.
    pub fn socket_notice(&mut self, notice: SocketNotice) -> Result<()> {
        if self.state == LoopState::Terminated {
            return Ok(());
        }
        if notice.generation != self.socket.current_generation() {
            return Ok(());
        }
        match notice.event {
            SocketEvent::Opened => self.deliver_opened(notice.generation),
            SocketEvent::Message(payload) => {
                let Some(callback) = self.callbacks.websocket_message.clone() else {
                    return Ok(());
                };
                let payload = self.host.lua().create_string(&payload)?;
                self.call(&callback, payload)
            }
            SocketEvent::Closed { code, reason } => {
                let Some(callback) = self.callbacks.websocket_closed.clone() else {
                    return Ok(());
                };
                self.call(&callback, (code, reason))
            }
            SocketEvent::Error => {
                let Some(callback) = self.callbacks.websocket_error.clone() else {
                    return Ok(());
                };
                self.call(&callback, ())
            }
        }
    }

    /// Registration-time "trigger open if already open": the entry script may
    /// have connected before the game handle existed, in which case the open
    /// notification either was discarded or is still in flight. Fires at most
    /// once per connection either way.
    pub fn trigger_open_if_open(&mut self) -> Result<()> {
        if self.socket.ready_state() == ReadyState::Open {
            self.deliver_opened(self.socket.current_generation())
        } else {
            Ok(())
        }
    }

    fn deliver_opened(&mut self, generation: u64) -> Result<()> {
        if self.opened_delivered == Some(generation) {
            return Ok(());
        }
        self.opened_delivered = Some(generation);
        match self.callbacks.websocket_opened.clone() {
            Some(callback) => self.call(&callback, ()),
            None => Ok(()),
        }
    }
}
