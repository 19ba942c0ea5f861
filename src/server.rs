//! Server lifecycle and the socket reactor
//!
//! One dedicated thread runs a current-thread tokio runtime that owns every
//! socket: the accept loop and all per-connection read loops live there as
//! tasks. The operator thread only flips the shutdown signal and reads the
//! registry, so no connection state crosses threads unguarded.

use crate::catalog::FileCatalog;
use crate::codec::FramedReader;
use crate::config::ServerConfig;
use crate::event::{EventReceiver, EventSender, ServerEvent};
use crate::handler::{ServerIdentity, SyncProtocolHandler};
use crate::notice::NoticeStore;
use crate::protocol::ProtocolVersion;
use crate::registry::ConnectionRegistry;
use crate::synclog::SyncLog;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, warn};

#[derive(Debug, Error)]
pub enum StartError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to start reactor: {0}")]
    Runtime(#[source] std::io::Error),
}

/// A running sync server.
///
/// Startup is all-or-nothing for the transport: a bind or runtime failure
/// comes back as [`StartError`] and nothing is left running. Data problems
/// are softer, reported as [`ServerEvent::DataError`] while the server
/// serves what it could load.
pub struct Server {
    running: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    reactor: Option<std::thread::JoinHandle<()>>,
    registry: Arc<ConnectionRegistry>,
    notice: Arc<NoticeStore>,
    local_addr: SocketAddr,
}

impl Server {
    /// Load the data sources, bind the listener and spawn the reactor
    /// thread. Returns the running server and the event stream; events
    /// emitted during startup are buffered in the channel.
    pub fn start(config: ServerConfig) -> Result<(Server, EventReceiver), StartError> {
        let (events, event_rx) = EventSender::channel();

        let catalog = Arc::new(FileCatalog::build(
            &config.data_dir,
            &config.data_extension,
            config.fingerprint,
            &events,
        ));
        let notice = Arc::new(NoticeStore::load(&config.notice_path, &events));

        // Bind synchronously so the caller sees bind failures directly
        let addr = config.bind_addr();
        let listener =
            std::net::TcpListener::bind(addr).map_err(|source| StartError::Bind { addr, source })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| StartError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| StartError::Bind { addr, source })?;

        let identity = ServerIdentity {
            address: config.bind_address.to_string(),
            port: local_addr.port(),
            name: config.server_name.clone(),
        };
        let mut handler = SyncProtocolHandler::new(
            catalog,
            notice.clone(),
            identity,
            config.protocol,
            config.bom,
        );
        if let Some(path) = &config.sync_log {
            handler = handler.with_sync_log(SyncLog::new(path));
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(StartError::Runtime)?;

        let registry = Arc::new(ConnectionRegistry::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let running = Arc::new(AtomicBool::new(true));

        let reactor = Reactor {
            listener,
            local_addr,
            handler: Arc::new(handler),
            registry: registry.clone(),
            events,
            shutdown: shutdown_rx,
            version: config.protocol,
            idle_timeout: config.idle_timeout,
        };
        let running_in_reactor = running.clone();
        let thread = std::thread::Builder::new()
            .name("mpqsync-reactor".to_string())
            .spawn(move || {
                runtime.block_on(reactor.run());
                running_in_reactor.store(false, Ordering::SeqCst);
            })
            .map_err(StartError::Runtime)?;

        Ok((
            Server {
                running,
                shutdown: shutdown_tx,
                reactor: Some(thread),
                registry,
                notice,
                local_addr,
            },
            event_rx,
        ))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Address the listener is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    pub fn notice_text(&self) -> &str {
        self.notice.text()
    }

    /// Stop accepting, force-close every live connection and join the
    /// reactor thread. All sockets are closed when this returns.
    /// Idempotent: later calls return immediately.
    pub fn stop(&mut self) {
        let thread = match self.reactor.take() {
            Some(thread) => thread,
            None => return,
        };
        let _ = self.shutdown.send(true);
        if thread.join().is_err() {
            error!("reactor thread panicked during shutdown");
        }
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Reactor {
    listener: std::net::TcpListener,
    local_addr: SocketAddr,
    handler: Arc<SyncProtocolHandler>,
    registry: Arc<ConnectionRegistry>,
    events: EventSender,
    shutdown: watch::Receiver<bool>,
    version: ProtocolVersion,
    idle_timeout: Option<Duration>,
}

impl Reactor {
    async fn run(self) {
        let Reactor {
            listener: std_listener,
            local_addr,
            handler,
            registry,
            events,
            mut shutdown,
            version,
            idle_timeout,
        } = self;

        let listener = match TcpListener::from_std(std_listener) {
            Ok(listener) => listener,
            Err(e) => {
                error!(error = %e, "failed to register listener with the reactor");
                events.emit(ServerEvent::Stopped);
                return;
            }
        };

        events.emit(ServerEvent::Started { addr: local_addr });
        debug!(addr = %local_addr, "accepting connections");

        loop {
            // Catches a stop signalled before this loop first polled
            if *shutdown.borrow_and_update() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown too
                    if changed.is_err() {
                        break;
                    }
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        spawn_connection(stream, peer, &handler, &registry, &events, version, idle_timeout);
                    }
                    Err(e) => {
                        // Transient accept errors must not kill the server
                        warn!(error = %e, "accept failed");
                    }
                }
            }
        }

        // Close the listener before sweeping connections so nothing new
        // slips in mid-shutdown
        drop(listener);
        let closed = registry.close_all().await;
        for conn in closed {
            debug!(id = conn.id, peer = %conn.peer, "connection force-closed");
            events.emit(ServerEvent::ClientDisconnected {
                id: conn.id,
                peer: conn.peer,
            });
        }
        events.emit(ServerEvent::Stopped);
        debug!("reactor stopped");
    }
}

fn spawn_connection(
    stream: TcpStream,
    peer: SocketAddr,
    handler: &Arc<SyncProtocolHandler>,
    registry: &Arc<ConnectionRegistry>,
    events: &EventSender,
    version: ProtocolVersion,
    idle_timeout: Option<Duration>,
) {
    let _ = stream.set_nodelay(true);

    // Register before spawning so the connection is never live but
    // untracked
    let id = registry.add(peer);
    events.emit(ServerEvent::ClientConnected { id, peer });
    debug!(id, %peer, "client connected");

    let handler = handler.clone();
    let task_registry = registry.clone();
    let task_events = events.clone();

    let task = tokio::spawn(async move {
        if let Err(e) = serve_connection(stream, peer, &handler, version, idle_timeout).await {
            debug!(id, %peer, error = %e, "connection error");
        }
        // First remover wins; the stop path may have beaten us here
        if task_registry.remove(id).is_some() {
            task_events.emit(ServerEvent::ClientDisconnected { id, peer });
            debug!(id, %peer, "client disconnected");
        }
    });
    registry.attach_task(id, task);
}

/// Per-connection loop: read, frame, dispatch, write replies in order.
/// Any I/O error (or the idle timeout) ends the connection.
async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    handler: &SyncProtocolHandler,
    version: ProtocolVersion,
    idle_timeout: Option<Duration>,
) -> anyhow::Result<()> {
    let mut framed = FramedReader::new(version);
    let mut buf = vec![0u8; 4096];
    loop {
        let n = match idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, stream.read(&mut buf)).await {
                Ok(read) => read?,
                Err(_) => anyhow::bail!("idle for more than {limit:?}"),
            },
            None => stream.read(&mut buf).await?,
        };
        if n == 0 {
            // Client closed cleanly
            return Ok(());
        }
        framed.extend(&buf[..n]);
        while let Some(body) = framed.next_message()? {
            for reply in handler.handle(peer, &body) {
                stream.write_all(&reply).await?;
            }
        }
    }
}
