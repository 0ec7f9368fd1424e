//! Process-wide connection registry and channel fan-out.
//!
//! One `Gateway` owns every live connection and the channel→subscribers
//! index, both under a single lock. Connections hold a `Weak` handle back;
//! the registry holds the strong references, so teardown drops the last one.

use axum::extract::ws::WebSocket;
use grip_protocol::Event;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use crate::connection::{self, Connection};
use crate::transport::HttpTransport;

/// Frame opcode for published content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishMode {
    Text,
    Binary,
}

#[derive(Default)]
struct Registry {
    connections: HashMap<Uuid, Arc<Connection>>,
    channels: HashMap<String, HashSet<Uuid>>,
}

pub struct Gateway {
    transport: Arc<HttpTransport>,
    registry: Mutex<Registry>,
}

impl Gateway {
    pub fn new(transport: Arc<HttpTransport>) -> Arc<Self> {
        Arc::new(Gateway {
            transport,
            registry: Mutex::new(Registry::default()),
        })
    }

    pub fn transport(&self) -> &Arc<HttpTransport> {
        &self.transport
    }

    /// Accept an upgraded socket: register a connection and drive it until
    /// teardown.
    pub async fn accept(self: &Arc<Self>, path: String, socket: WebSocket) {
        let conn = self.register(path);
        connection::run(conn, socket).await;
    }

    /// Create and register a connection for a client that upgraded on
    /// `path`, seeding the OPEN event for the backend.
    pub(crate) fn register(self: &Arc<Self>, path: String) -> Arc<Connection> {
        let id = Uuid::new_v4();
        let backend = self.transport.channel(path, id.to_string());
        let conn = Arc::new(Connection::new(id, Arc::downgrade(self), backend));

        self.registry
            .lock()
            .unwrap()
            .connections
            .insert(conn.id(), Arc::clone(&conn));

        info!(connection_id = %conn.id(), "connection registered");
        conn.enqueue_outgoing_events(vec![Event::Open]);
        conn
    }

    /// Fan `content` out to every subscriber of `channel`. Unknown channels
    /// are no-ops; delivery is enqueue-only and never waits on a socket.
    pub fn publish(&self, channel: &str, mode: PublishMode, content: &[u8]) {
        let targets: Vec<Arc<Connection>> = {
            let registry = self.registry.lock().unwrap();
            let Some(subscribers) = registry.channels.get(channel) else {
                return;
            };
            subscribers
                .iter()
                .filter_map(|id| registry.connections.get(id).cloned())
                .collect()
        };

        debug!(channel, subscribers = targets.len(), "publishing");
        for conn in targets {
            conn.deliver(mode, content.to_vec());
        }
    }

    pub(crate) fn subscribe(&self, conn: &Connection, channel: &str) {
        let mut registry = self.registry.lock().unwrap();
        registry
            .channels
            .entry(channel.to_string())
            .or_default()
            .insert(conn.id());
        conn.subscriptions()
            .lock()
            .unwrap()
            .insert(channel.to_string());
        debug!(connection_id = %conn.id(), channel, "subscribed");
    }

    pub(crate) fn unsubscribe(&self, conn: &Connection, channel: &str) {
        let mut registry = self.registry.lock().unwrap();
        remove_subscriber(&mut registry, channel, conn.id());
        conn.subscriptions().lock().unwrap().remove(channel);
        debug!(connection_id = %conn.id(), channel, "unsubscribed");
    }

    /// Drop a connection from the registry along with all its
    /// subscriptions.
    pub(crate) fn unregister(&self, conn: &Connection) {
        let mut registry = self.registry.lock().unwrap();
        registry.connections.remove(&conn.id());
        for channel in conn.subscriptions().lock().unwrap().drain() {
            remove_subscriber(&mut registry, &channel, conn.id());
        }
    }

    pub fn connection_count(&self) -> usize {
        self.registry.lock().unwrap().connections.len()
    }

    pub fn channel_count(&self) -> usize {
        self.registry.lock().unwrap().channels.len()
    }
}

fn remove_subscriber(registry: &mut Registry, channel: &str, id: Uuid) {
    if let Some(subscribers) = registry.channels.get_mut(channel) {
        subscribers.remove(&id);
        if subscribers.is_empty() {
            registry.channels.remove(channel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::Message;

    fn test_gateway() -> Arc<Gateway> {
        Gateway::new(Arc::new(HttpTransport::new("http://127.0.0.1:1", None)))
    }

    #[test]
    fn publish_reaches_only_subscribers() {
        let gateway = test_gateway();
        let reader = gateway.register("/ws".to_string());
        let bystander = gateway.register("/ws".to_string());

        gateway.subscribe(&reader, "news");
        gateway.publish("news", PublishMode::Text, b"bulletin");

        assert_eq!(
            reader.next_outgoing_message(),
            Some(Message::Text("bulletin".into()))
        );
        assert_eq!(bystander.next_outgoing_message(), None);
    }

    #[test]
    fn publish_to_unknown_channel_is_a_no_op() {
        let gateway = test_gateway();
        gateway.publish("nobody-home", PublishMode::Text, b"x");
        assert_eq!(gateway.connection_count(), 0);
    }

    #[test]
    fn publish_binary_uses_binary_frames() {
        let gateway = test_gateway();
        let conn = gateway.register("/ws".to_string());
        gateway.subscribe(&conn, "bin");

        gateway.publish("bin", PublishMode::Binary, &[1, 2, 3]);
        assert_eq!(
            conn.next_outgoing_message(),
            Some(Message::Binary(axum::body::Bytes::from_static(&[1, 2, 3])))
        );
    }

    #[test]
    fn emptied_channels_are_removed() {
        let gateway = test_gateway();
        let conn = gateway.register("/ws".to_string());

        gateway.subscribe(&conn, "news");
        assert_eq!(gateway.channel_count(), 1);

        gateway.unsubscribe(&conn, "news");
        assert_eq!(gateway.channel_count(), 0);
    }

    #[test]
    fn unregister_clears_registry_and_subscriptions() {
        let gateway = test_gateway();
        let conn = gateway.register("/ws".to_string());
        gateway.subscribe(&conn, "a");
        gateway.subscribe(&conn, "b");

        conn.disconnect();

        assert_eq!(gateway.connection_count(), 0);
        assert_eq!(gateway.channel_count(), 0);

        // Publishing to the dead connection's channels delivers nowhere.
        gateway.publish("a", PublishMode::Text, b"x");
    }
}
