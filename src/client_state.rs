/// file: src/client_state.rs
/// description: connection state machine value, observers and counters
use crate::error::RealtimeError;
use serde::Serialize;
use std::fmt;
use std::sync::{
    Arc, PoisonError,
    atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
};
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Error => "error",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct ClientState {
    state_tx: watch::Sender<ConnectionState>,
    torn_down: AtomicBool,
    connection_id: std::sync::Mutex<Option<String>>,
    last_error: std::sync::Mutex<Option<Arc<RealtimeError>>>,
    reconnect_attempts: AtomicU32,
    pub total_reconnects: AtomicU64,
    pub frames_received: AtomicU64,
    pub decode_errors: AtomicU64,
    pub events_dispatched: AtomicU64,
}

impl Default for ClientState {
    fn default() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            state_tx,
            torn_down: AtomicBool::new(false),
            connection_id: std::sync::Mutex::new(None),
            last_error: std::sync::Mutex::new(None),
            reconnect_attempts: AtomicU32::new(0),
            total_reconnects: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            events_dispatched: AtomicU64::new(0),
        }
    }
}

impl ClientState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Move to `next` unless the client has been torn down.
    ///
    /// Returns whether observers were notified.
    pub fn transition(&self, next: ConnectionState) -> bool {
        self.state_tx.send_if_modified(|state| {
            // Checked under the watch lock so teardown always wins.
            if self.torn_down.load(Ordering::Acquire) || *state == next {
                return false;
            }
            debug!(from = %state, to = %next, "Connection state transition");
            *state = next;
            true
        })
    }

    /// Freeze the state at `Disconnected`; later transitions are ignored.
    pub fn tear_down(&self) {
        self.torn_down.store(true, Ordering::Release);
        self.state_tx.send_if_modified(|state| {
            let changed = *state != ConnectionState::Disconnected;
            *state = ConnectionState::Disconnected;
            changed
        });
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    pub fn connection_id(&self) -> Option<String> {
        self.connection_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Why the last attempt or session failed; cleared by a successful handshake.
    pub fn last_error(&self) -> Option<Arc<RealtimeError>> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn record_error(&self, error: RealtimeError) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(error));
    }

    /// A handshake succeeded: fresh connection id, retry budget restored.
    pub fn reset_connection(&self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        *self
            .connection_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(id.clone());
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.reconnect_attempts.store(0, Ordering::Release);
        id
    }

    /// Consume one retry; returns the attempt number just taken.
    pub fn increment_reconnect(&self) -> u32 {
        self.total_reconnects.fetch_add(1, Ordering::Relaxed);
        self.reconnect_attempts.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Retries consumed since the last successful handshake.
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Acquire)
    }

    pub fn reset_attempts(&self) {
        self.reconnect_attempts.store(0, Ordering::Release);
    }

    pub fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self) {
        self.events_dispatched.fetch_add(1, Ordering::Relaxed);
    }
}

pub type SharedClientState = Arc<ClientState>;
