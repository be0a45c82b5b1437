use crate::features::realtime::models::{Event, PresenceUser};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Outbound frames buffered per client before backpressure kicks in.
pub const CLIENT_QUEUE_CAPACITY: usize = 256;

type ResourceKey = (String, String);

struct ClientHandle {
    user_id: i64,
    username: String,
    tx: mpsc::Sender<String>,
    /// Resources this connection has announced presence on.
    presence: HashSet<ResourceKey>,
}

#[derive(Clone)]
struct PresenceRecord {
    connection_id: Uuid,
    user: PresenceUser,
}

#[derive(Default)]
struct HubInner {
    clients: HashMap<Uuid, ClientHandle>,
    presence: HashMap<ResourceKey, Vec<PresenceRecord>>,
}

/// The per-process fan-out registry. All state mutations funnel through
/// one RwLock, which is never held across socket I/O: sends are
/// `try_send` onto each client's bounded queue, and a full queue drops
/// that client rather than blocking the caller.
pub struct Hub {
    inner: RwLock<HubInner>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HubInner::default()),
        }
    }

    /// Add a connection; the returned receiver feeds the writer task.
    pub async fn register(
        &self,
        user_id: i64,
        username: String,
    ) -> (Uuid, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        let connection_id = Uuid::new_v4();
        let mut inner = self.inner.write().await;
        inner.clients.insert(
            connection_id,
            ClientHandle {
                user_id,
                username,
                tx,
                presence: HashSet::new(),
            },
        );
        tracing::debug!(%connection_id, user_id, "websocket client registered");
        (connection_id, rx)
    }

    /// Remove a connection and every presence record it owned, notifying
    /// the remaining clients per affected resource.
    pub async fn unregister(&self, connection_id: Uuid) {
        let mut dropped = self.remove_client(connection_id).await;
        while let Some(next) = dropped.pop() {
            dropped.extend(self.remove_client(next).await);
        }
    }

    /// Broadcast an event to every client in registration-independent,
    /// call order. Clients whose queues are full are unregistered.
    pub async fn broadcast(&self, event: Event) {
        let frame = match serde_json::to_string(&event) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialise broadcast event");
                return;
            }
        };
        let mut dropped = self.send_to_all(&frame).await;
        while let Some(next) = dropped.pop() {
            dropped.extend(self.remove_client(next).await);
        }
    }

    /// Enqueue a frame for one connection (pong replies).
    pub async fn send_to(&self, connection_id: Uuid, frame: String) {
        let full = {
            let inner = self.inner.read().await;
            match inner.clients.get(&connection_id) {
                Some(client) => client.tx.try_send(frame).is_err(),
                None => false,
            }
        };
        if full {
            self.unregister(connection_id).await;
        }
    }

    /// Idempotently add a presence record and notify everyone watching.
    pub async fn announce_presence(
        &self,
        connection_id: Uuid,
        resource_type: &str,
        resource_id: &str,
        mode: &str,
    ) {
        let key: ResourceKey = (resource_type.to_string(), resource_id.to_string());
        {
            let mut inner = self.inner.write().await;
            let Some(client) = inner.clients.get_mut(&connection_id) else {
                return;
            };
            let user = PresenceUser {
                user_id: client.user_id,
                username: client.username.clone(),
                mode: mode.to_string(),
                since: Utc::now(),
            };
            client.presence.insert(key.clone());

            let records = inner.presence.entry(key.clone()).or_default();
            match records.iter_mut().find(|r| r.connection_id == connection_id) {
                Some(existing) => {
                    // Re-announcing only changes the mode; keep the
                    // original `since`.
                    if existing.user.mode != user.mode {
                        existing.user.mode = user.mode;
                    }
                }
                None => records.push(PresenceRecord {
                    connection_id,
                    user,
                }),
            }
        }
        self.broadcast_presence(&key).await;
    }

    pub async fn retract_presence(
        &self,
        connection_id: Uuid,
        resource_type: &str,
        resource_id: &str,
    ) {
        let key: ResourceKey = (resource_type.to_string(), resource_id.to_string());
        let changed = {
            let mut inner = self.inner.write().await;
            if let Some(client) = inner.clients.get_mut(&connection_id) {
                client.presence.remove(&key);
            }
            remove_presence_record(&mut inner, &key, connection_id)
        };
        if changed {
            self.broadcast_presence(&key).await;
        }
    }

    /// Current presence for one resource, for hydration before the socket
    /// is up.
    pub async fn presence_for(&self, resource_type: &str, resource_id: &str) -> Vec<PresenceUser> {
        let key: ResourceKey = (resource_type.to_string(), resource_id.to_string());
        let inner = self.inner.read().await;
        inner
            .presence
            .get(&key)
            .map(|records| records.iter().map(|r| r.user.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn client_count(&self) -> usize {
        self.inner.read().await.clients.len()
    }

    async fn send_to_all(&self, frame: &str) -> Vec<Uuid> {
        let inner = self.inner.read().await;
        let mut dropped = Vec::new();
        for (id, client) in &inner.clients {
            if client.tx.try_send(frame.to_string()).is_err() {
                tracing::warn!(connection_id = %id, "client queue full, dropping connection");
                dropped.push(*id);
            }
        }
        dropped
    }

    /// Remove one client. Returns any further clients dropped while
    /// fanning out the resulting presence updates.
    async fn remove_client(&self, connection_id: Uuid) -> Vec<Uuid> {
        let affected: Vec<ResourceKey> = {
            let mut inner = self.inner.write().await;
            let Some(client) = inner.clients.remove(&connection_id) else {
                return Vec::new();
            };
            let keys: Vec<ResourceKey> = client.presence.into_iter().collect();
            for key in &keys {
                remove_presence_record(&mut inner, key, connection_id);
            }
            keys
        };

        let mut dropped = Vec::new();
        for key in affected {
            let users = self.presence_for(&key.0, &key.1).await;
            let frame = match serde_json::to_string(&Event::presence_update(&key.0, &key.1, users))
            {
                Ok(frame) => frame,
                Err(_) => continue,
            };
            dropped.extend(self.send_to_all(&frame).await);
        }
        tracing::debug!(%connection_id, "websocket client unregistered");
        dropped
    }

    async fn broadcast_presence(&self, key: &ResourceKey) {
        let users = self.presence_for(&key.0, &key.1).await;
        self.broadcast(Event::presence_update(&key.0, &key.1, users))
            .await;
    }
}

fn remove_presence_record(inner: &mut HubInner, key: &ResourceKey, connection_id: Uuid) -> bool {
    let Some(records) = inner.presence.get_mut(key) else {
        return false;
    };
    let before = records.len();
    records.retain(|r| r.connection_id != connection_id);
    let changed = records.len() != before;
    if records.is_empty() {
        inner.presence.remove(key);
    }
    changed
}
