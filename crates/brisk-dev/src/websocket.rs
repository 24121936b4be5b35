use crate::hmr::UpdateRecord;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

const CLIENT_BUFFER: usize = 64;

/// Connected HMR clients, keyed by id
#[derive(Default)]
pub struct ClientRegistry {
    next_id: AtomicUsize,
    clients: RwLock<HashMap<usize, mpsc::Sender<String>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self) -> (usize, mpsc::Receiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(CLIENT_BUFFER);
        self.clients.write().insert(id, tx);
        (id, rx)
    }

    pub fn unregister(&self, id: usize) {
        self.clients.write().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Push `record` to every client; returns how many received it.
    ///
    /// Never waits on a client. One whose buffer is full or closed is
    /// dropped, which closes its socket so the page reconnects.
    pub fn broadcast(&self, record: &UpdateRecord) -> usize {
        let json = record.to_json();
        let mut delivered = 0;
        self.clients.write().retain(|id, tx| match tx.try_send(json.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!("HMR client {} is not keeping up, disconnecting it", id);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        });
        delivered
    }
}

/// Send `greetings`, then pump records from `rx` into `socket` until either
/// side goes away
pub async fn handle_client(
    socket: WebSocket,
    id: usize,
    greetings: Vec<UpdateRecord>,
    mut rx: mpsc::Receiver<String>,
) {
    let (mut write, mut read) = socket.split();

    for record in greetings {
        if write.send(Message::Text(record.to_json().into())).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            outgoing = rx.recv() => {
                let Some(json) = outgoing else { break };
                if let Err(e) = write.send(Message::Text(json.into())).await {
                    debug!("HMR client {} send failed: {}", id, e);
                    break;
                }
            }
            incoming = read.next() => {
                match incoming {
                    None | Some(Ok(Message::Close(_))) => break,
                    Some(Err(e)) => {
                        debug!("HMR client {} error: {}", id, e);
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    debug!("HMR client {} disconnected", id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hmr::HmrManager;

    #[tokio::test]
    async fn test_broadcast_reaches_clients_and_drops_closed_ones() {
        let registry = ClientRegistry::new();
        let (a, mut rx_a) = registry.register();
        let (b, rx_b) = registry.register();
        assert_ne!(a, b);
        drop(rx_b);

        let record = HmrManager::new(&[]).error("boom");
        assert_eq!(registry.broadcast(&record), 1);
        assert_eq!(registry.len(), 1);

        let json = rx_a.recv().await.unwrap();
        assert!(json.contains("\"type\":\"error\""));
    }

    #[tokio::test]
    async fn test_stalled_client_is_dropped_without_blocking() {
        let registry = ClientRegistry::new();
        let (_, _stalled) = registry.register();
        let (_, mut live) = registry.register();

        let record = HmrManager::new(&[]).error("boom");
        for _ in 0..CLIENT_BUFFER {
            assert_eq!(registry.broadcast(&record), 2);
            live.recv().await.unwrap();
        }
        // the stalled buffer is full now
        assert_eq!(registry.broadcast(&record), 1);
        assert_eq!(registry.len(), 1);
        assert!(live.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_unregister() {
        let registry = ClientRegistry::new();
        let (id, _rx) = registry.register();
        registry.unregister(id);
        assert!(registry.is_empty());
    }
}
