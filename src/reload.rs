//! Browser notification after a successful watch rebuild.
//!
//! The watch coordinator only talks to a [`ReloadSink`]. With the `live`
//! feature, [`LiveReload`] keeps a websocket open to every page served in
//! watch mode and pushes the message of the requested [`ReloadScope`]. The
//! client side of the protocol is the snippet returned by
//! [`Environment::get_refresh_script`](crate::Environment::get_refresh_script).

use crate::core::ReloadScope;

/// Receives reload requests from the watch coordinator.
pub trait ReloadSink: Send + Sync {
    fn notify(&self, scope: ReloadScope);
}

/// Drops every request. Used when nothing is listening.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoReload;

impl ReloadSink for NoReload {
    fn notify(&self, scope: ReloadScope) {
        tracing::trace!(message = scope.message(), "reload skipped");
    }
}

#[cfg(feature = "live")]
pub use live::LiveReload;

#[cfg(feature = "live")]
mod live {
    use std::net::{TcpListener, TcpStream};
    use std::sync::mpsc::{self, Sender};
    use std::sync::{Arc, Mutex};
    use std::thread;

    use tungstenite::WebSocket;

    use super::ReloadSink;
    use crate::core::ReloadScope;
    use crate::error::WatchError;

    type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

    /// Open connections kept after each broadcast.
    const MAX_CLIENTS: usize = 10;

    /// Websocket endpoint pushing reload messages to connected browsers.
    pub struct LiveReload {
        port: u16,
        tx: Sender<ReloadScope>,
    }

    impl LiveReload {
        /// Binds the socket on `preferred` or, if that is taken, on any free
        /// port, and starts the accept and broadcast threads.
        pub fn bind(preferred: u16) -> Result<Self, WatchError> {
            let (listener, port) = reserve_port(preferred)?;
            let clients = Clients::default();

            thread::Builder::new()
                .name("reload-accept".into())
                .spawn({
                    let clients = clients.clone();
                    move || accept(listener, clients)
                })
                .map_err(WatchError::Bind)?;

            let (tx, rx) = mpsc::channel::<ReloadScope>();

            thread::Builder::new()
                .name("reload-send".into())
                .spawn(move || {
                    while let Ok(scope) = rx.recv() {
                        broadcast(&clients, scope);
                    }
                })
                .map_err(WatchError::Bind)?;

            tracing::debug!(port, "live reload socket open");
            Ok(Self { port, tx })
        }

        pub fn port(&self) -> u16 {
            self.port
        }
    }

    impl ReloadSink for LiveReload {
        fn notify(&self, scope: ReloadScope) {
            if self.tx.send(scope).is_err() {
                tracing::warn!("live reload thread is gone");
            }
        }
    }

    fn reserve_port(preferred: u16) -> Result<(TcpListener, u16), WatchError> {
        let listener = match TcpListener::bind(("127.0.0.1", preferred)) {
            Ok(sock) => sock,
            Err(_) => TcpListener::bind("127.0.0.1:0").map_err(WatchError::Bind)?,
        };

        let port = listener.local_addr().map_err(WatchError::Bind)?.port();
        Ok((listener, port))
    }

    fn accept(listener: TcpListener, clients: Clients) {
        for stream in listener.incoming() {
            let socket = match stream {
                Ok(stream) => tungstenite::accept(stream),
                Err(e) => {
                    tracing::warn!("live reload connection failed: {e}");
                    continue;
                }
            };

            match socket {
                Ok(socket) => match clients.lock() {
                    Ok(mut clients) => clients.push(socket),
                    Err(_) => return,
                },
                Err(e) => tracing::warn!("websocket handshake failed: {e}"),
            }
        }
    }

    fn broadcast(clients: &Clients, scope: ReloadScope) {
        let Ok(mut clients) = clients.lock() else {
            return;
        };

        let mut broken = vec![];

        for (i, socket) in clients.iter_mut().enumerate() {
            match socket.send(scope.message().into()) {
                Ok(_) => {}
                Err(tungstenite::error::Error::Io(e)) => {
                    if e.kind() == std::io::ErrorKind::BrokenPipe {
                        broken.push(i);
                    }
                }
                Err(tungstenite::error::Error::ConnectionClosed)
                | Err(tungstenite::error::Error::AlreadyClosed) => broken.push(i),
                Err(e) => {
                    tracing::error!("Error: {e:?}");
                }
            }
        }

        for i in broken.into_iter().rev() {
            clients.remove(i);
        }

        let len = clients.len();
        if len > MAX_CLIENTS {
            for mut socket in clients.drain(0..len - MAX_CLIENTS) {
                socket.close(None).ok();
            }
        }

        tracing::debug!(message = scope.message(), clients = clients.len(), "reload sent");
    }

}
