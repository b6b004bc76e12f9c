//! Realtime inbox client.
//!
//! A [`RealtimeClient`] keeps one authenticated WebSocket session to the inbox
//! endpoint alive, decodes each text frame into a typed [`Event`] and fans it
//! out through an [`EventDispatcher`]. A [`NotificationAggregator`] listens for
//! `new_message` events and maintains the unread count, persisting read-state
//! changes through a [`store::NotificationStore`].
//!
//! ```no_run
//! use inbox_realtime::{EventDispatcher, RealtimeClient, config::RealtimeConfig};
//!
//! # async fn run() -> Result<(), inbox_realtime::RealtimeError> {
//! let dispatcher = EventDispatcher::new();
//! let _typing = dispatcher.add_event_listener("typing", |event| {
//!     println!("{} is typing", event.user_id);
//!     Ok(())
//! });
//!
//! let client = RealtimeClient::with_websocket(RealtimeConfig::default(), dispatcher);
//! client.connect("wss://example.com/api/v1/inbox/ws", Some("token"))?;
//! # Ok(())
//! # }
//! ```

/// Command-line argument definitions.
pub mod cli;
/// Reconnecting connection manager.
pub mod client;
/// Connection state and session counters.
pub mod client_state;
/// Runtime configuration model.
pub mod config;
/// Listener registry and event fan-out.
pub mod dispatcher;
/// Error types used across the crate.
pub mod error;
/// Typed inbox events and frame decoding.
pub mod events;
/// Terminal output formatters.
pub mod formatter;
/// Prometheus metrics.
pub mod monitoring;
/// Unread notification aggregation.
pub mod notifications;
/// Notifications REST service.
pub mod store;
/// Tracing/logging initialization.
pub mod tracing_setup;
/// Socket seam and the WebSocket implementation.
pub mod transport;
/// Wire frame definitions.
pub mod types;
/// UI controller and presentation loop.
pub mod ui;

pub use client::RealtimeClient;
pub use client_state::ConnectionState;
pub use dispatcher::{EventDispatcher, ListenerHandle};
/// Primary crate error type.
pub use error::RealtimeError;
pub use events::{Event, EventPayload};
pub use notifications::NotificationAggregator;
