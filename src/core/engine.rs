use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, KeyModifiers,
    MouseButton, MouseEventKind,
};
use crossterm::execute;
use ratatui::DefaultTerminal;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info};

use crate::core::assets::{self, AssetSource};
use crate::core::canvas::{self, CanvasContext};
use crate::core::handle::{key_name, GameCallbacks};
use crate::core::renderer::SurfaceWidget;
use crate::core::script::{ScriptHost, INIT_FILENAME};
use crate::core::session::{LoopState, Session};
use crate::core::socket::{self, SocketBridge, SocketNotice};
use crate::core::surface::Surface;
use crate::core::viewport::{self, RenderedBox};

/// Sequences startup and then drives the frame loop. Construction is cheap;
/// everything happens in `run`.
pub struct Engine<S: AssetSource> {
    source: S,
    ws_url: String,
    fps: u32,
    strict: bool,
}

impl<S: AssetSource> Engine<S> {
    pub fn new(source: S, ws_url: String, fps: u32, strict: bool) -> Self {
        Self {
            source,
            ws_url,
            fps: fps.max(1),
            strict,
        }
    }

    /// Run the whole lifecycle. Failures anywhere are logged and end the
    /// session; nothing is surfaced beyond the log.
    pub async fn run(self, terminal: &mut DefaultTerminal) -> Result<()> {
        let (mut session, socket_rx) = match self.start().await {
            Ok(parts) => parts,
            Err(err) => {
                error!("startup failed: {err:#}");
                return Ok(());
            }
        };

        if let Err(err) = session.begin() {
            error!("init failed: {err:#}");
            return Ok(());
        }

        // the click listener only exists when the game asked for clicks
        let wants_mouse = session.callbacks().on_click.is_some();
        if wants_mouse {
            execute!(std::io::stdout(), EnableMouseCapture)?;
        }
        let outcome = self.run_loop(&mut session, socket_rx, terminal).await;
        if wants_mouse {
            let _ = execute!(std::io::stdout(), DisableMouseCapture);
        }
        // dropping the session tears the script engine down
        drop(session);
        outcome
    }

    /// The gated startup sequence. Each step runs only once the previous one
    /// finished; the first error aborts everything.
    pub async fn start(&self) -> Result<(Session, UnboundedReceiver<SocketNotice>)> {
        let host = ScriptHost::new()?;

        // the socket capability is in scope before any script runs
        let (bridge, mut socket_rx) = SocketBridge::new(self.ws_url.clone(), self.strict);
        socket::register(host.lua(), Rc::clone(&bridge))?;

        let init_source = self
            .source
            .fetch(INIT_FILENAME)
            .await
            .with_context(|| format!("fetching init script '{INIT_FILENAME}'"))?;
        host.mount(
            INIT_FILENAME,
            String::from_utf8(init_source).context("init script is not valid UTF-8")?,
        );
        host.exec_file(INIT_FILENAME)?;

        let config = host.config()?;
        info!(
            width = config.display_width,
            height = config.display_height,
            entry = %config.entry_point,
            "configured"
        );

        // prefetch everything the config declares, then size the display
        let (cache, scripts) = assets::prefetch_all(&self.source, &config).await?;
        for (path, source) in scripts {
            host.mount(path, source);
        }
        let images = Rc::new(cache);
        let main = Rc::new(RefCell::new(Surface::new(
            config.display_width,
            config.display_height,
        )));

        canvas::register(
            host.lua(),
            CanvasContext {
                main: Rc::clone(&main),
                images: Rc::clone(&images),
                blank_colour: config.blank_colour,
                strict: self.strict,
            },
        )?;

        host.exec_file(&config.entry_point)?;
        let callbacks = GameCallbacks::from_table(&host.game_table()?)?;

        let mut session = Session::new(host, config, main, images, bridge, callbacks);

        // late socket registration: anything that fired while no handler
        // existed is discarded, then an already-open connection gets its
        // open notification
        while socket_rx.try_recv().is_ok() {}
        session.trigger_open_if_open()?;

        Ok((session, socket_rx))
    }

    async fn run_loop(
        &self,
        session: &mut Session,
        mut socket_rx: UnboundedReceiver<SocketNotice>,
        terminal: &mut DefaultTerminal,
    ) -> Result<()> {
        let mut frames = tokio::time::interval(Duration::from_secs_f64(1.0 / self.fps as f64));
        frames.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = frames.tick() => {
                    match self.pump_input(session, terminal) {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(err) => {
                            error!("input callback failed: {err:#}");
                            break;
                        }
                    }
                    if session.state() != LoopState::Running {
                        break;
                    }
                    if let Err(err) = session.tick() {
                        error!("game loop stopped: {err:#}");
                        break;
                    }
                    self.present(session, terminal)?;
                }
                Some(notice) = socket_rx.recv() => {
                    if let Err(err) = session.socket_notice(notice) {
                        error!("websocket callback failed: {err:#}");
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Drain whatever input queued up since the last frame. Returns false on
    /// the quit chord; script errors bubble out.
    fn pump_input(&self, session: &mut Session, terminal: &DefaultTerminal) -> Result<bool> {
        while event::poll(Duration::ZERO)? {
            match event::read()? {
                Event::Key(key) => {
                    if key.code == KeyCode::Char('c')
                        && key.modifiers.contains(KeyModifiers::CONTROL)
                    {
                        return Ok(false);
                    }
                    let Some(name) = key_name(key.code) else {
                        continue;
                    };
                    match key.kind {
                        KeyEventKind::Press | KeyEventKind::Repeat => {
                            session.key_down(&name)?;
                            if matches!(key.code, KeyCode::Char(_)) {
                                session.key_press(&name)?;
                            }
                        }
                        KeyEventKind::Release => session.key_up(&name)?,
                    }
                }
                Event::Mouse(mouse) => {
                    if let MouseEventKind::Down(MouseButton::Left) = mouse.kind {
                        let size = terminal.size()?;
                        // two pixels per cell vertically, matching the renderer
                        let rendered = RenderedBox::content(
                            0.0,
                            0.0,
                            size.width as f64,
                            size.height as f64 * 2.0,
                        );
                        let config = session.config();
                        let (x, y) = viewport::map_point(
                            &rendered,
                            config.display_width,
                            config.display_height,
                            mouse.column as f64 + 0.5,
                            mouse.row as f64 * 2.0 + 1.0,
                        );
                        session.click(x, y)?;
                    }
                }
                _ => {}
            }
        }
        Ok(true)
    }

    fn present(&self, session: &Session, terminal: &mut DefaultTerminal) -> Result<()> {
        let background = session.config().page_background_colour;
        let surface = session.surface();
        terminal.draw(|frame| {
            frame.render_widget(SurfaceWidget::new(&surface, background), frame.area());
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::assets::testing::{png_bytes, MemoryAssetSource};
    use crate::core::socket::testing::spawn_server;
    use crate::core::socket::{ReadyState, SocketEvent};
    use crate::core::surface::Colour;

    const INIT: &str = r##"
        config = {
            displayWidth = 4,
            displayHeight = 4,
            blankColour = "#102030",
            pageBackgroundColour = "black",
            entryPoint = "game/main.lua",
            imageFilenames = { "sprite.png" },
            luaFilenames = { "game/util.lua" },
        }
    "##;

    const UTIL: &str = "return { speed = 3 }";

    fn source_with_entry(entry: &str) -> MemoryAssetSource {
        let mut source = MemoryAssetSource::default();
        source
            .put("shared/init.lua", INIT.as_bytes().to_vec())
            .put("game/main.lua", entry.as_bytes().to_vec())
            .put("game/util.lua", UTIL.as_bytes().to_vec())
            .put("sprite.png", png_bytes(2, 2, Colour::rgb(255, 0, 0)));
        source
    }

    fn engine(source: MemoryAssetSource) -> Engine<MemoryAssetSource> {
        Engine::new(source, "ws://127.0.0.1:1/websocket".to_string(), 60, false)
    }

    fn lua_counter(session: &Session, name: &str) -> i64 {
        session.host().lua().globals().get(name).unwrap_or(0)
    }

    #[tokio::test]
    async fn startup_runs_the_whole_sequence() {
        let entry = r#"
            local util = require("game.util")
            steps = 0
            draws = 0
            inits = 0
            Game = {}
            function Game.init() inits = inits + 1 end
            function Game.step(dt) steps = steps + 1 lastDt = dt end
            function Game.draw()
                draws = draws + 1
                local c = Canvas.newCanvas(false)
                c.draw(0, 0)
            end
            speed = util.speed
        "#;
        let engine = engine(source_with_entry(entry));
        let (mut session, _rx) = engine.start().await.unwrap();

        assert_eq!(session.state(), LoopState::Idle);
        assert_eq!(session.images().len(), 1);
        assert!(session.images().contains("sprite.png"));
        assert!(session.host().is_mounted("shared/init.lua"));
        assert!(session.host().is_mounted("game/main.lua"));
        assert!(session.host().is_mounted("game/util.lua"));
        assert_eq!(lua_counter(&session, "speed"), 3);

        session.begin().unwrap();
        assert_eq!(session.state(), LoopState::Running);
        assert_eq!(lua_counter(&session, "inits"), 1);

        session.tick().unwrap();
        session.tick().unwrap();
        assert_eq!(lua_counter(&session, "steps"), 2);
        assert_eq!(lua_counter(&session, "draws"), 2);

        // the opaque sub-canvas composited the blank colour over the canvas
        let surface = session.surface();
        for y in 0..4 {
            for x in 0..4 {
                assert_eq!(surface.pixel(x, y), Some([16, 32, 48, 255]));
            }
        }
    }

    #[tokio::test]
    async fn a_throwing_step_terminates_the_loop() {
        let entry = r#"
            steps = 0
            draws = 0
            Game = {}
            function Game.step(dt)
                steps = steps + 1
                if steps == 2 then error("boom") end
            end
            function Game.draw() draws = draws + 1 end
        "#;
        let engine = engine(source_with_entry(entry));
        let (mut session, _rx) = engine.start().await.unwrap();
        session.begin().unwrap();

        session.tick().unwrap();
        assert!(session.tick().is_err());
        assert_eq!(session.state(), LoopState::Terminated);

        // no further frames run anything
        assert!(session.tick().is_err());
        assert_eq!(lua_counter(&session, "steps"), 2);
        assert_eq!(lua_counter(&session, "draws"), 1);
    }

    #[tokio::test]
    async fn a_throwing_init_terminates_before_the_first_frame() {
        let entry = r#"
            Game = {}
            function Game.init() error("no") end
            function Game.step(dt) end
        "#;
        let engine = engine(source_with_entry(entry));
        let (mut session, _rx) = engine.start().await.unwrap();
        assert!(session.begin().is_err());
        assert_eq!(session.state(), LoopState::Terminated);
    }

    #[tokio::test]
    async fn absent_callbacks_mean_no_listener_at_all() {
        let entry = r#"
            seen = 0
            Game = {}
            function Game.step(dt) end
            function Game.keyDown(key) seen = seen + 1 lastKey = key end
        "#;
        let engine = engine(source_with_entry(entry));
        let (mut session, _rx) = engine.start().await.unwrap();
        session.begin().unwrap();

        // keyUp was never declared: dispatching is a no-op, not an error
        session.key_up("a").unwrap();
        assert_eq!(lua_counter(&session, "seen"), 0);

        session.key_down("ArrowLeft").unwrap();
        assert_eq!(lua_counter(&session, "seen"), 1);
        let last: String = session.host().lua().globals().get("lastKey").unwrap();
        assert_eq!(last, "ArrowLeft");
    }

    #[tokio::test]
    async fn clicks_outside_the_canvas_are_dropped_by_the_dispatcher() {
        let entry = r#"
            clicks = 0
            Game = {}
            function Game.step(dt) end
            function Game.onClick(x, y) clicks = clicks + 1 cx = x cy = y end
        "#;
        let engine = engine(source_with_entry(entry));
        let (mut session, _rx) = engine.start().await.unwrap();
        session.begin().unwrap();

        session.click(-1.0, 2.0).unwrap();
        session.click(2.0, 5.0).unwrap();
        assert_eq!(lua_counter(&session, "clicks"), 0);

        // edges are inclusive
        session.click(4.0, 4.0).unwrap();
        session.click(1.5, 2.5).unwrap();
        assert_eq!(lua_counter(&session, "clicks"), 2);
        let cx: f64 = session.host().lua().globals().get("cx").unwrap();
        assert_eq!(cx, 1.5);
    }

    #[tokio::test]
    async fn missing_config_global_aborts_startup() {
        let mut source = MemoryAssetSource::default();
        source.put("shared/init.lua", b"-- nothing here".to_vec());
        let err = engine(source).start().await.unwrap_err();
        assert!(err.to_string().contains("config"), "got: {err:#}");
    }

    #[tokio::test]
    async fn missing_game_global_aborts_startup() {
        let entry = "-- forgot to define Game";
        let engine = engine(source_with_entry(entry));
        let err = engine.start().await.unwrap_err();
        assert!(err.to_string().contains("Game"), "got: {err:#}");
    }

    #[tokio::test]
    async fn a_failed_fetch_aborts_startup_before_the_entry_script() {
        let mut source = source_with_entry("entryRan = true Game = {}");
        source.put(
            "shared/init.lua",
            INIT.replace("\"sprite.png\"", "\"sprite.png\", \"gone.png\"")
                .into_bytes(),
        );
        let err = engine(source).start().await.unwrap_err();
        assert!(err.to_string().contains("gone.png"), "got: {err:#}");
    }

    #[tokio::test]
    async fn entry_script_errors_abort_startup() {
        let engine = engine(source_with_entry("error('broken entry')"));
        let err = engine.start().await.unwrap_err();
        assert!(format!("{err:#}").contains("broken entry"), "got: {err:#}");
    }

    #[tokio::test]
    async fn an_open_socket_triggers_opened_exactly_once_at_registration() {
        let (url, _server) = spawn_server().await;
        let entry = r#"
            opened = 0
            Game = {}
            function Game.step(dt) end
            function Game.websocketOpened() opened = opened + 1 end
        "#;
        let source = source_with_entry(entry);
        let engine = Engine::new(source, url, 60, false);
        let (mut session, mut rx) = engine.start().await.unwrap();
        session.begin().unwrap();

        // the game opens the connection itself, mid-session
        session.socket().open(None);
        let generation = session.socket().current_generation();

        // wait for the connection task to reach the open state
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while session.socket().ready_state() != ReadyState::Open {
            assert!(tokio::time::Instant::now() < deadline, "never connected");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // late registration fires the callback immediately...
        session.trigger_open_if_open().unwrap();
        assert_eq!(lua_counter(&session, "opened"), 1);

        // ...and the queued open notice does not double it
        let notice = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(notice.generation, generation);
        session.socket_notice(notice).unwrap();
        assert_eq!(lua_counter(&session, "opened"), 1);
    }

    #[tokio::test]
    async fn stale_generation_notices_are_ignored() {
        let (url, _server) = spawn_server().await;
        let entry = r#"
            messages = 0
            Game = {}
            function Game.step(dt) end
            function Game.websocketMessage(data) messages = messages + 1 end
        "#;
        let source = source_with_entry(entry);
        let engine = Engine::new(source, url, 60, false);
        let (mut session, _rx) = engine.start().await.unwrap();
        session.begin().unwrap();

        session.socket().open(None);
        session.socket().open(None);
        assert_eq!(session.socket().current_generation(), 2);

        // an event from the replaced connection never reaches the script
        session
            .socket_notice(SocketNotice {
                generation: 1,
                event: SocketEvent::Message(b"old".to_vec()),
            })
            .unwrap();
        assert_eq!(lua_counter(&session, "messages"), 0);

        session
            .socket_notice(SocketNotice {
                generation: 2,
                event: SocketEvent::Message(b"new".to_vec()),
            })
            .unwrap();
        assert_eq!(lua_counter(&session, "messages"), 1);
    }

    #[tokio::test]
    async fn websocket_callbacks_deliver_payload_code_and_reason() {
        let entry = r#"
            Game = {}
            function Game.step(dt) end
            function Game.websocketMessage(data) lastMessage = data end
            function Game.websocketClosed(code, reason) lastCode = code lastReason = reason end
            function Game.websocketError() sawError = true end
        "#;
        let engine = engine(source_with_entry(entry));
        let (mut session, _rx) = engine.start().await.unwrap();
        session.begin().unwrap();

        // generation 0 is "no connection yet"; notices for it still route
        session
            .socket_notice(SocketNotice {
                generation: 0,
                event: SocketEvent::Message(b"payload".to_vec()),
            })
            .unwrap();
        session
            .socket_notice(SocketNotice {
                generation: 0,
                event: SocketEvent::Closed {
                    code: 1001,
                    reason: "going away".to_string(),
                },
            })
            .unwrap();
        session
            .socket_notice(SocketNotice {
                generation: 0,
                event: SocketEvent::Error,
            })
            .unwrap();

        let globals = session.host().lua().globals();
        let message: String = globals.get("lastMessage").unwrap();
        assert_eq!(message, "payload");
        let code: u16 = globals.get("lastCode").unwrap();
        assert_eq!(code, 1001);
        let reason: String = globals.get("lastReason").unwrap();
        assert_eq!(reason, "going away");
        let saw_error: bool = globals.get("sawError").unwrap();
        assert!(saw_error);
    }

    #[tokio::test]
    async fn strict_mode_turns_silent_noops_into_fatal_errors() {
        let entry = r#"
            Game = {}
            function Game.step(dt)
                local c = Canvas.newCanvas(true)
                c.drawImage("never-fetched.png", 0, 0, 1, 1, 0, 0, 1, 1)
            end
        "#;
        let source = source_with_entry(entry);
        let engine = Engine::new(source, "ws://127.0.0.1:1/websocket".to_string(), 60, true);
        let (mut session, _rx) = engine.start().await.unwrap();
        session.begin().unwrap();
        assert!(session.tick().is_err());
        assert_eq!(session.state(), LoopState::Terminated);
    }
}
