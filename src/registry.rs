//! Live-connection registry
//!
//! Connections register here with a monotone id before their task is
//! spawned and remove themselves when the task finishes, so the registry
//! tracks exactly the sockets currently open. The stop path drains it and
//! force-closes everything that remains.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnInfo {
    pub id: u64,
    pub peer: SocketAddr,
}

struct Registered {
    peer: SocketAddr,
    task: Option<JoinHandle<()>>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<u64, Registered>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a connection and return its id. Called before the task is
    /// spawned so no live socket is ever untracked.
    pub fn add(&self, peer: SocketAddr) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections
            .lock()
            .insert(id, Registered { peer, task: None });
        id
    }

    /// Attach the task handle once the task exists. No-op when the entry is
    /// already gone (the task won the race and finished first).
    pub fn attach_task(&self, id: u64, task: JoinHandle<()>) {
        if let Some(entry) = self.connections.lock().get_mut(&id) {
            entry.task = Some(task);
        }
    }

    /// Remove a connection. Idempotent: only the first caller gets the
    /// info back, so disconnect events fire exactly once per connection.
    pub fn remove(&self, id: u64) -> Option<ConnInfo> {
        self.connections
            .lock()
            .remove(&id)
            .map(|entry| ConnInfo { id, peer: entry.peer })
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    pub fn for_each(&self, mut f: impl FnMut(ConnInfo)) {
        for (id, entry) in self.connections.lock().iter() {
            f(ConnInfo {
                id: *id,
                peer: entry.peer,
            });
        }
    }

    /// Abort every registered task and wait for each to finish, so all
    /// sockets are provably closed when this returns. Returns the
    /// connections that were force-closed.
    pub async fn close_all(&self) -> Vec<ConnInfo> {
        // Drain under the lock, await outside it
        let drained: Vec<(u64, Registered)> = {
            let mut connections = self.connections.lock();
            connections.drain().collect()
        };

        let mut closed = Vec::with_capacity(drained.len());
        for (id, entry) in drained {
            if let Some(task) = entry.task {
                task.abort();
                let _ = task.await;
            }
            closed.push(ConnInfo {
                id,
                peer: entry.peer,
            });
        }
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn peer(n: u16) -> SocketAddr {
        format!("127.0.0.1:{n}").parse().unwrap()
    }

    #[test]
    fn test_add_remove_round_trip() {
        let registry = ConnectionRegistry::new();
        let id = registry.add(peer(4000));
        assert_eq!(registry.len(), 1);

        let info = registry.remove(id).unwrap();
        assert_eq!(info.id, id);
        assert_eq!(info.peer, peer(4000));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let id = registry.add(peer(4001));
        assert!(registry.remove(id).is_some());
        assert!(registry.remove(id).is_none());
        assert!(registry.remove(9999).is_none());
    }

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let registry = ConnectionRegistry::new();
        let a = registry.add(peer(4002));
        let b = registry.add(peer(4003));
        let c = registry.add(peer(4004));
        assert!(a < b && b < c);
    }

    #[test]
    fn test_for_each_sees_all_live_connections() {
        let registry = ConnectionRegistry::new();
        let a = registry.add(peer(5000));
        let _b = registry.add(peer(5001));
        registry.remove(a);

        let mut seen = Vec::new();
        registry.for_each(|info| seen.push(info.peer));
        assert_eq!(seen, vec![peer(5001)]);
    }

    #[test]
    fn test_concurrent_add_remove_interleavings() {
        let registry = Arc::new(ConnectionRegistry::new());
        let leftover = Arc::new(AtomicUsize::new(0));
        let threads: u16 = 8;
        let iterations = 200;

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let registry = registry.clone();
                let leftover = leftover.clone();
                std::thread::spawn(move || {
                    let mut rng = rand::thread_rng();
                    for i in 0..iterations {
                        let id = registry.add(peer(6000 + t));
                        if rng.gen_bool(0.9) {
                            assert!(registry.remove(id).is_some());
                            // Second removal must never double-report
                            assert!(registry.remove(id).is_none());
                        } else {
                            leftover.fetch_add(1, Ordering::SeqCst);
                        }
                        if i % 50 == 0 {
                            std::thread::yield_now();
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        // Quiescent: registry holds exactly the connections never removed
        assert_eq!(registry.len(), leftover.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_close_all_aborts_attached_tasks() {
        let registry = Arc::new(ConnectionRegistry::new());

        for n in 0..3u16 {
            let id = registry.add(peer(7000 + n));
            let task = tokio::spawn(async {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            });
            registry.attach_task(id, task);
        }
        assert_eq!(registry.len(), 3);

        let closed = registry.close_all().await;
        assert_eq!(closed.len(), 3);
        assert!(registry.is_empty());

        // A second sweep finds nothing
        assert!(registry.close_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_attach_task_after_remove_is_noop() {
        let registry = ConnectionRegistry::new();
        let id = registry.add(peer(7100));
        registry.remove(id);

        let task = tokio::spawn(async {});
        registry.attach_task(id, task);
        assert!(registry.is_empty());
    }
}
