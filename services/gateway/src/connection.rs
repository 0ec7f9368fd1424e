//! Per-client connection core.
//!
//! One `Connection` bridges a single client WebSocket to the backend event
//! protocol. Two independent FIFO queues carry traffic outward:
//!
//! - `messages`: frames to the client, drained by one writer task.
//! - `events`: events to the backend, drained by one batch task that POSTs
//!   the whole queue per round trip and feeds the reply back through
//!   [`Connection::handle_incoming_events`].
//!
//! Exactly one task consumes each queue, so both sides observe strict
//! enqueue order. Producers only push and signal; they never touch the
//! socket or the transport.
//!
//! Shutdown is a watch flag: the reader, writer, batch and keep-alive tasks
//! all park on it, and the writer owns closing the socket on its way out.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use grip_protocol::Event;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::controller::{Controller, Interpretation};
use crate::gateway::{Gateway, PublishMode};
use crate::keepalive::{self, KeepAlive};
use crate::transport::BackendChannel;

pub struct Connection {
    id: Uuid,
    gateway: Weak<Gateway>,
    backend: BackendChannel,
    controller: Controller,

    messages: Mutex<VecDeque<Message>>,
    message_wakeup: Notify,

    events: Mutex<Vec<Event>>,
    event_wakeup: Notify,

    opened: AtomicBool,
    closed: AtomicBool,
    detached: AtomicBool,
    client_closed: AtomicBool,
    backend_closed: AtomicBool,

    keep_alive: Mutex<Option<KeepAlive>>,
    keep_alive_notify: Notify,

    metadata: Mutex<HashMap<String, String>>,
    subscriptions: Mutex<HashSet<String>>,

    shutdown: watch::Sender<bool>,
}

impl Connection {
    pub(crate) fn new(id: Uuid, gateway: Weak<Gateway>, backend: BackendChannel) -> Self {
        let (shutdown, _) = watch::channel(false);
        Connection {
            id,
            gateway,
            backend,
            controller: Controller::default(),
            messages: Mutex::new(VecDeque::new()),
            message_wakeup: Notify::new(),
            events: Mutex::new(Vec::new()),
            event_wakeup: Notify::new(),
            opened: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            detached: AtomicBool::new(false),
            client_closed: AtomicBool::new(false),
            backend_closed: AtomicBool::new(false),
            keep_alive: Mutex::new(None),
            keep_alive_notify: Notify::new(),
            metadata: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashSet::new()),
            shutdown,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    pub(crate) fn is_client_closed(&self) -> bool {
        self.client_closed.load(Ordering::SeqCst)
    }

    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub(crate) async fn keep_alive_reset(&self) {
        self.keep_alive_notify.notified().await;
    }

    pub(crate) fn keep_alive_config(&self) -> Option<KeepAlive> {
        self.keep_alive.lock().unwrap().clone()
    }

    pub(crate) fn outgoing_messages_empty(&self) -> bool {
        self.messages.lock().unwrap().is_empty()
    }

    /// Snapshot of backend-assigned metadata.
    pub fn metadata(&self) -> HashMap<String, String> {
        self.metadata.lock().unwrap().clone()
    }

    pub(crate) fn subscriptions(&self) -> &Mutex<HashSet<String>> {
        &self.subscriptions
    }

    // -----------------------------------------------------------------------
    // Outbound to client
    // -----------------------------------------------------------------------

    /// Queue one frame for the client. No-op once closed.
    pub(crate) fn enqueue_outgoing_message(&self, message: Message) {
        if self.is_closed() {
            return;
        }
        self.messages.lock().unwrap().push_back(message);
        self.message_wakeup.notify_one();
    }

    /// Deliver published content, mapping the publish mode to a frame
    /// opcode.
    pub(crate) fn deliver(&self, mode: PublishMode, payload: Vec<u8>) {
        let message = match mode {
            PublishMode::Text => {
                Message::Text(String::from_utf8_lossy(&payload).into_owned().into())
            }
            PublishMode::Binary => Message::Binary(payload.into()),
        };
        self.enqueue_outgoing_message(message);
    }

    pub(crate) fn next_outgoing_message(&self) -> Option<Message> {
        self.messages.lock().unwrap().pop_front()
    }

    // -----------------------------------------------------------------------
    // Outbound to backend
    // -----------------------------------------------------------------------

    /// Queue events for the next backend batch. No-op once closed or
    /// detached.
    pub(crate) fn enqueue_outgoing_events(&self, events: Vec<Event>) {
        if self.is_closed() {
            return;
        }
        self.push_events(events);
    }

    /// Queue events irrespective of `closed`; used inside the closing
    /// transition itself (the DISCONNECT notice). Detach still wins.
    fn push_events(&self, events: Vec<Event>) {
        if self.detached.load(Ordering::SeqCst) {
            return;
        }
        for event in &events {
            debug!(connection_id = %self.id, event = %event, "event to backend");
        }
        self.events.lock().unwrap().extend(events);
        self.event_wakeup.notify_one();
    }

    fn take_event_batch(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    // -----------------------------------------------------------------------
    // Inbound from client
    // -----------------------------------------------------------------------

    /// Translate one client frame into its backend event.
    pub(crate) fn handle_frame(&self, message: Message) {
        match message {
            Message::Text(text) => {
                self.enqueue_outgoing_events(vec![Event::Text(text.as_str().as_bytes().to_vec())]);
            }
            Message::Binary(payload) => {
                self.enqueue_outgoing_events(vec![Event::Binary(payload.to_vec())]);
            }
            Message::Ping(_) => self.enqueue_outgoing_events(vec![Event::Ping]),
            Message::Pong(_) => self.enqueue_outgoing_events(vec![Event::Pong]),
            Message::Close(frame) => {
                let (code, reason) = match frame {
                    Some(frame) => (frame.code, frame.reason.as_str().as_bytes().to_vec()),
                    None => (0, Vec::new()),
                };
                self.enqueue_outgoing_events(vec![Event::Close { code, reason }]);

                self.client_closed.store(true, Ordering::SeqCst);
                if self.backend_closed.load(Ordering::SeqCst) {
                    self.closed.store(true, Ordering::SeqCst);
                    self.disconnect();
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Inbound from backend
    // -----------------------------------------------------------------------

    /// Apply one reply batch in arrival order. Only the batch task calls
    /// this, so processing is serialized per connection.
    pub(crate) fn handle_incoming_events(&self, events: Vec<Event>) {
        for event in events {
            self.handle_incoming_event(event);
        }
    }

    fn handle_incoming_event(&self, event: Event) {
        if self.is_closed() {
            return;
        }

        debug!(connection_id = %self.id, event = %event, "event from backend");

        if !self.opened.load(Ordering::SeqCst) {
            // The first reply event acknowledges the connection; anything
            // other than OPEN is suspicious but consumed all the same.
            if event != Event::Open {
                warn!(connection_id = %self.id, event = %event, "first backend event was not OPEN");
            }
            self.opened.store(true, Ordering::SeqCst);
            return;
        }

        match event {
            Event::Open => {}
            Event::Ping => self.enqueue_outgoing_message(Message::Ping(axum::body::Bytes::new())),
            Event::Pong => self.enqueue_outgoing_message(Message::Pong(axum::body::Bytes::new())),
            Event::Disconnect => {
                // Mark closed first so the teardown does not echo a
                // DISCONNECT back at the backend.
                self.closed.store(true, Ordering::SeqCst);
                self.disconnect();
            }
            Event::Close { code, reason } => {
                self.enqueue_outgoing_message(Message::Close(Some(CloseFrame {
                    code,
                    reason: String::from_utf8_lossy(&reason).into_owned().into(),
                })));

                self.backend_closed.store(true, Ordering::SeqCst);
                if self.client_closed.load(Ordering::SeqCst) {
                    self.closed.store(true, Ordering::SeqCst);
                    self.disconnect();
                }
            }
            Event::Text(payload) => self.handle_data_event(PublishMode::Text, payload),
            Event::Binary(payload) => self.handle_data_event(PublishMode::Binary, payload),
        }
    }

    fn handle_data_event(&self, mode: PublishMode, payload: Vec<u8>) {
        match self.controller.interpret(&payload) {
            Interpretation::Control(record) => self.apply_control(&record),
            Interpretation::Message(body) => self.deliver(mode, body),
            Interpretation::Ignore => {}
        }
    }

    fn apply_control(&self, record: &grip_protocol::ControlRecord) {
        match record.kind.as_str() {
            "subscribe" => {
                if let Some(channel) = record.channel.as_deref().filter(|c| !c.is_empty()) {
                    if let Some(gateway) = self.gateway.upgrade() {
                        gateway.subscribe(self, channel);
                    }
                }
            }
            "unsubscribe" => {
                if let Some(channel) = record.channel.as_deref().filter(|c| !c.is_empty()) {
                    if let Some(gateway) = self.gateway.upgrade() {
                        gateway.unsubscribe(self, channel);
                    }
                }
            }
            "detach" => {
                info!(connection_id = %self.id, "backend detached connection");
                self.detached.store(true, Ordering::SeqCst);
                // Whatever was queued will never be sent.
                self.events.lock().unwrap().clear();
            }
            "keep-alive" => {
                if let Some(config) = keepalive::parse_config(record) {
                    *self.keep_alive.lock().unwrap() = Some(config);
                    self.keep_alive_notify.notify_one();
                }
            }
            other => {
                debug!(connection_id = %self.id, kind = other, "ignoring unknown control type");
            }
        }
    }

    pub(crate) fn merge_metadata(&self, delta: Vec<(String, String)>) {
        if delta.is_empty() {
            return;
        }
        let mut metadata = self.metadata.lock().unwrap();
        for (key, value) in delta {
            metadata.insert(key, value);
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Tear the connection down. Idempotent; the first call queues a
    /// best-effort DISCONNECT notice for the backend.
    pub(crate) fn disconnect(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.push_events(vec![Event::Disconnect]);
        }

        if let Some(gateway) = self.gateway.upgrade() {
            gateway.unregister(self);
        }

        self.shutdown.send_replace(true);
    }
}

// ---------------------------------------------------------------------------
// Connection tasks
// ---------------------------------------------------------------------------

/// Drive one accepted WebSocket until it closes. Runs the frame reader
/// inline; the writer, backend batch loop and keep-alive timer run as
/// sibling tasks parked on the connection's shutdown signal.
pub(crate) async fn run(conn: Arc<Connection>, socket: WebSocket) {
    let (sink, stream) = socket.split();

    let writer = tokio::spawn(write_loop(Arc::clone(&conn), sink));
    tokio::spawn(event_loop(Arc::clone(&conn)));
    tokio::spawn(keepalive::run(Arc::clone(&conn)));

    read_loop(&conn, stream).await;

    // The writer flushes queued frames (a backend CLOSE, usually) and shuts
    // the socket before exiting.
    let _ = writer.await;
    info!(connection_id = %conn.id(), "connection closed");
}

async fn read_loop(conn: &Arc<Connection>, mut stream: SplitStream<WebSocket>) {
    let mut shutdown = conn.shutdown_signal();
    loop {
        tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(message)) => conn.handle_frame(message),
                    Some(Err(error)) => {
                        warn!(connection_id = %conn.id(), %error, "frame read failed");
                        conn.disconnect();
                        break;
                    }
                    None => {
                        // A half-closed client is still owed the backend's
                        // CLOSE; teardown then comes from the close pair (or
                        // from a failing write). Anything else is an abrupt
                        // hangup.
                        if !conn.is_client_closed() {
                            conn.disconnect();
                        }
                        break;
                    }
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

async fn write_loop(conn: Arc<Connection>, mut sink: SplitSink<WebSocket, Message>) {
    let mut shutdown = conn.shutdown_signal();
    loop {
        match conn.next_outgoing_message() {
            Some(message) => {
                if let Err(error) = sink.send(message).await {
                    warn!(connection_id = %conn.id(), %error, "frame write failed");
                    conn.disconnect();
                    break;
                }
                // A completed transmit starts a fresh keep-alive window.
                conn.keep_alive_notify.notify_one();
            }
            None => {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    () = conn.message_wakeup.notified() => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }
    let _ = sink.close().await;
}

/// Drain the event queue to the backend, one POST per accumulated batch,
/// and feed every reply through the inbound state machine.
async fn event_loop(conn: Arc<Connection>) {
    let mut shutdown = conn.shutdown_signal();
    loop {
        let batch = conn.take_event_batch();
        if batch.is_empty() {
            if conn.is_closed() {
                break;
            }
            tokio::select! {
                () = conn.event_wakeup.notified() => {}
                _ = shutdown.changed() => {}
            }
            continue;
        }

        match conn.backend.send_events(&batch).await {
            Ok((metadata, reply)) => {
                conn.merge_metadata(metadata);
                conn.handle_incoming_events(reply);
            }
            Err(error) => {
                warn!(connection_id = %conn.id(), %error, "failed to send events to backend");
                if conn.is_closed() {
                    break;
                }
                // The batch is abandoned; wait for a fresh enqueue before
                // POSTing again.
                tokio::select! {
                    () = conn.event_wakeup.notified() => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }
}
