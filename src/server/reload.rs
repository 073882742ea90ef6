//! Live-reload channel: a websocket listener on its own thread plus a
//! broadcast thread pushing `reload` to every connected browser.

use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::{Sender, channel};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use tungstenite::WebSocket;

use crate::error::ServerError;

/// Well-known live-reload port.
const PORT: u16 = 35729;

/// Connections beyond this are closed, oldest first.
const MAX_CLIENTS: usize = 10;

type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

fn lock(clients: &Clients) -> MutexGuard<'_, Vec<WebSocket<TcpStream>>> {
    clients.lock().unwrap_or_else(|e| e.into_inner())
}

fn reserve_port() -> std::io::Result<(TcpListener, u16)> {
    let listener = match TcpListener::bind(("127.0.0.1", PORT)) {
        Ok(sock) => sock,
        Err(_) => TcpListener::bind(("127.0.0.1", 0))?,
    };

    let port = listener.local_addr()?.port();
    Ok((listener, port))
}

pub(super) struct ReloadHub {
    port: u16,
    tx: Sender<()>,
    clients: Clients,
}

impl std::fmt::Debug for ReloadHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadHub")
            .field("port", &self.port)
            .field("clients", &self.clients())
            .finish()
    }
}

impl ReloadHub {
    pub(super) fn start() -> Result<Self, ServerError> {
        let (listener, port) = reserve_port().map_err(ServerError::BindReload)?;
        let clients: Clients = Arc::default();

        {
            let clients = clients.clone();
            thread::Builder::new()
                .name("kiln-ws-accept".into())
                .spawn(move || accept_loop(listener, clients))
                .map_err(ServerError::Runtime)?;
        }

        let (tx, rx) = channel::<()>();
        {
            let clients = clients.clone();
            thread::Builder::new()
                .name("kiln-ws-reload".into())
                .spawn(move || {
                    while rx.recv().is_ok() {
                        broadcast(&clients);
                    }
                })
                .map_err(ServerError::Runtime)?;
        }

        Ok(Self { port, tx, clients })
    }

    pub(super) fn port(&self) -> u16 {
        self.port
    }

    pub(super) fn clients(&self) -> usize {
        lock(&self.clients).len()
    }

    pub(super) fn notify(&self) {
        // The broadcast thread only exits once every sender is gone.
        let _ = self.tx.send(());
    }
}

fn accept_loop(listener: TcpListener, clients: Clients) {
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("live-reload connection failed: {e}");
                continue;
            }
        };

        match tungstenite::accept(stream) {
            Ok(socket) => {
                tracing::debug!("live-reload client connected");
                lock(&clients).push(socket);
            }
            Err(e) => tracing::warn!("live-reload handshake failed: {e}"),
        }
    }
}

fn broadcast(clients: &Clients) {
    let mut clients = lock(clients);
    let before = clients.len();

    clients.retain_mut(|socket| match socket.send("reload".into()) {
        Ok(()) => true,
        Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => false,
        Err(tungstenite::Error::Io(_)) => false,
        Err(e) => {
            tracing::error!("live-reload send failed: {e}");
            false
        }
    });

    let len = clients.len();
    if len > MAX_CLIENTS {
        for mut socket in clients.drain(0..len - MAX_CLIENTS) {
            socket.close(None).ok();
        }
    }

    tracing::debug!(
        sent = clients.len(),
        dropped = before - clients.len(),
        "reload broadcast"
    );
}
