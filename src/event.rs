//! Lifecycle events delivered to the operator console
//!
//! The server never blocks on its console: every noteworthy moment is sent
//! on an unbounded channel the console drains at its own pace, and a console
//! that has gone away simply stops receiving.

use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Listener bound and accepting connections.
    Started { addr: SocketAddr },
    /// Accept loop exited and every connection was closed.
    Stopped,
    ClientConnected { id: u64, peer: SocketAddr },
    ClientDisconnected { id: u64, peer: SocketAddr },
    /// A data source could not be read. Non-fatal: the server keeps running
    /// and serves whatever it has.
    DataError { path: PathBuf, detail: String },
}

pub type EventReceiver = mpsc::UnboundedReceiver<ServerEvent>;

/// Cloneable sending half handed to every component that reports events.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl EventSender {
    pub fn channel() -> (EventSender, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSender { tx }, rx)
    }

    /// Fire and forget. A dropped receiver must never take the server down.
    pub fn emit(&self, event: ServerEvent) {
        let _ = self.tx.send(event);
    }
}
