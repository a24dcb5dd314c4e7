use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use mlua::Lua;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

const STATE_CONNECTING: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_CLOSING: u8 = 2;
const STATE_CLOSED: u8 = 3;

/// Mirrors the WebSocket readyState values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ReadyState {
    fn from_u8(value: u8) -> ReadyState {
        match value {
            STATE_CONNECTING => ReadyState::Connecting,
            STATE_OPEN => ReadyState::Open,
            STATE_CLOSING => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

#[derive(Debug)]
pub enum SocketEvent {
    Opened,
    Message(Vec<u8>),
    Closed { code: u16, reason: String },
    Error,
}

/// One event from one connection. The router drops notices whose generation
/// is not the current one, which is how a replaced connection's callbacks
/// silently stop firing.
#[derive(Debug)]
pub struct SocketNotice {
    pub generation: u64,
    pub event: SocketEvent,
}

enum SocketCommand {
    Send(Vec<u8>),
    Close,
}

#[derive(Debug)]
struct Connection {
    commands: UnboundedSender<SocketCommand>,
    ready: Arc<AtomicU8>,
}

/// Script-facing WebSocket capability: at most one connection to the
/// server's fixed `/websocket` endpoint. `open` replaces the current
/// connection without closing the old one; the replaced connection keeps
/// running but its events stop routing and no close frame is ever sent to it.
#[derive(Debug)]
pub struct SocketBridge {
    url: String,
    strict: bool,
    events: UnboundedSender<SocketNotice>,
    current: RefCell<Option<Connection>>,
    generation: Cell<u64>,
}

impl SocketBridge {
    pub fn new(url: String, strict: bool) -> (Rc<Self>, UnboundedReceiver<SocketNotice>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let bridge = Rc::new(Self {
            url,
            strict,
            events,
            current: RefCell::new(None),
            generation: Cell::new(0),
        });
        (bridge, receiver)
    }

    pub fn strict(&self) -> bool {
        self.strict
    }

    /// Generation of the connection events should route for; 0 before the
    /// first open.
    pub fn current_generation(&self) -> u64 {
        self.generation.get()
    }

    pub fn ready_state(&self) -> ReadyState {
        match &*self.current.borrow() {
            Some(connection) => ReadyState::from_u8(connection.ready.load(Ordering::Acquire)),
            None => ReadyState::Closed,
        }
    }

    /// Open a new connection, replacing whatever was there.
    pub fn open(&self, subprotocol: Option<String>) {
        let generation = self.generation.get() + 1;
        self.generation.set(generation);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let ready = Arc::new(AtomicU8::new(STATE_CONNECTING));
        tokio::spawn(run_connection(
            self.url.clone(),
            subprotocol,
            generation,
            Arc::clone(&ready),
            command_rx,
            self.events.clone(),
        ));
        *self.current.borrow_mut() = Some(Connection { commands, ready });
    }

    /// Forward a payload. Returns false when there is nothing open to carry
    /// it; the caller decides whether that is an error.
    pub fn send(&self, payload: Vec<u8>) -> bool {
        match &*self.current.borrow() {
            Some(connection) => connection
                .commands
                .send(SocketCommand::Send(payload))
                .is_ok(),
            None => false,
        }
    }

    /// Close the current connection if there is one.
    pub fn close(&self) {
        if let Some(connection) = &*self.current.borrow() {
            let _ = connection.commands.send(SocketCommand::Close);
        }
    }
}

/// Expose the `Socket` global to the scripts.
pub fn register(lua: &Lua, bridge: Rc<SocketBridge>) -> mlua::Result<()> {
    let socket = lua.create_table()?;

    let b = Rc::clone(&bridge);
    socket.set(
        "open",
        lua.create_function(move |_, subprotocol: Option<String>| {
            b.open(subprotocol);
            Ok(())
        })?,
    )?;

    let b = Rc::clone(&bridge);
    socket.set(
        "send",
        lua.create_function(move |_, data: mlua::String| {
            let delivered = b.send(data.as_bytes().to_vec());
            if !delivered && b.strict() {
                return Err(mlua::Error::RuntimeError(
                    "send on a socket that is not open".to_string(),
                ));
            }
            Ok(())
        })?,
    )?;

    let b = bridge;
    socket.set(
        "close",
        lua.create_function(move |_, ()| {
            b.close();
            Ok(())
        })?,
    )?;

    lua.globals().set("Socket", socket)?;
    Ok(())
}

fn build_request(url: &str, subprotocol: Option<&str>) -> Result<Request> {
    let mut request = url.into_client_request()?;
    if let Some(protocol) = subprotocol {
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_str(protocol)?);
    }
    Ok(request)
}

/// Owns one WebSocket for its whole life: connect, pump frames and commands,
/// report everything through generation-tagged notices.
async fn run_connection(
    url: String,
    subprotocol: Option<String>,
    generation: u64,
    ready: Arc<AtomicU8>,
    mut commands: UnboundedReceiver<SocketCommand>,
    events: UnboundedSender<SocketNotice>,
) {
    let notify = |event: SocketEvent| {
        let _ = events.send(SocketNotice { generation, event });
    };

    let request = match build_request(&url, subprotocol.as_deref()) {
        Ok(request) => request,
        Err(err) => {
            warn!("websocket request for {url} is invalid: {err:#}");
            ready.store(STATE_CLOSED, Ordering::Release);
            notify(SocketEvent::Error);
            notify(SocketEvent::Closed {
                code: 1006,
                reason: String::new(),
            });
            return;
        }
    };

    let stream = match connect_async(request).await {
        Ok((stream, _response)) => stream,
        Err(err) => {
            warn!("websocket connect to {url} failed: {err}");
            ready.store(STATE_CLOSED, Ordering::Release);
            notify(SocketEvent::Error);
            notify(SocketEvent::Closed {
                code: 1006,
                reason: String::new(),
            });
            return;
        }
    };

    ready.store(STATE_OPEN, Ordering::Release);
    notify(SocketEvent::Opened);

    let (mut sink, mut frames) = stream.split();
    let (code, reason) = loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(SocketCommand::Send(payload)) => {
                    // text when it can be, binary otherwise
                    let message = match String::from_utf8(payload) {
                        Ok(text) => WsMessage::Text(text),
                        Err(raw) => WsMessage::Binary(raw.into_bytes()),
                    };
                    if sink.send(message).await.is_err() {
                        notify(SocketEvent::Error);
                        break (1006, String::new());
                    }
                }
                Some(SocketCommand::Close) => {
                    ready.store(STATE_CLOSING, Ordering::Release);
                    let _ = sink.send(WsMessage::Close(None)).await;
                }
                // the bridge is gone; no one is listening any more
                None => {
                    ready.store(STATE_CLOSED, Ordering::Release);
                    return;
                }
            },
            frame = frames.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => notify(SocketEvent::Message(text.into_bytes())),
                Some(Ok(WsMessage::Binary(payload))) => notify(SocketEvent::Message(payload)),
                Some(Ok(WsMessage::Close(close))) => {
                    break match close {
                        Some(frame) => (u16::from(frame.code), frame.reason.into_owned()),
                        None => (1005, String::new()),
                    };
                }
                Some(Ok(_)) => {} // ping/pong are handled underneath
                Some(Err(err)) => {
                    debug!("websocket stream error: {err}");
                    notify(SocketEvent::Error);
                    break (1006, String::new());
                }
                None => break (1006, String::new()),
            },
        }
    };

    ready.store(STATE_CLOSED, Ordering::Release);
    notify(SocketEvent::Closed { code, reason });
}

#[cfg(test)]
pub(crate) mod testing {
    use futures_util::StreamExt;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc::{self, UnboundedReceiver};
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    #[derive(Debug, PartialEq)]
    pub enum ServerFrame {
        Connected,
        Text(String),
        Close,
    }

    /// Accepts any number of connections and reports what each one sees,
    /// tagged with the order it arrived in.
    pub async fn spawn_server() -> (String, UnboundedReceiver<(usize, ServerFrame)>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut index = 0usize;
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                let connection = index;
                index += 1;
                tokio::spawn(async move {
                    let Ok(mut ws) = accept_async(stream).await else {
                        return;
                    };
                    let _ = tx.send((connection, ServerFrame::Connected));
                    while let Some(frame) = ws.next().await {
                        match frame {
                            Ok(WsMessage::Text(text)) => {
                                let _ = tx.send((connection, ServerFrame::Text(text)));
                            }
                            Ok(WsMessage::Close(_)) => {
                                let _ = ws.close(None).await;
                                let _ = tx.send((connection, ServerFrame::Close));
                                break;
                            }
                            Ok(_) => {}
                            Err(_) => break,
                        }
                    }
                });
            }
        });
        (format!("ws://{addr}/websocket"), rx)
    }
}
