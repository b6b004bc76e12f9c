// file: src/transport.rs
// description: socket seam between the connection manager and the wire
// reference: https://docs.rs/tokio-tungstenite/latest/tokio_tungstenite/

use crate::error::RealtimeError;
use async_trait::async_trait;
use futures_util::{Sink, SinkExt, StreamExt, future, stream::BoxStream};
use std::pin::Pin;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, trace, warn};
use url::Url;

/// Outbound half of an open connection: serialized text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = RealtimeError> + Send>>;

/// Inbound half of an open connection: text payloads in transport order.
///
/// The stream ends (or yields `ConnectionClosed`) when the peer goes away.
pub type FrameStream = BoxStream<'static, Result<String, RealtimeError>>;

pub struct Connection {
    pub outbound: FrameSink,
    pub inbound: FrameStream,
}

/// Opens connections; the only place that touches a real socket.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &Url) -> Result<Connection, RealtimeError>;
}

/// Production connector over `tokio-tungstenite` (rustls for `wss`).
#[derive(Debug, Default, Clone)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> Result<Connection, RealtimeError> {
        let (ws_stream, response) = connect_async(url.as_str()).await?;
        debug!(status = %response.status(), "WebSocket handshake completed");

        let (write, read) = ws_stream.split();

        let outbound = write.with(|text: String| {
            future::ready(Ok::<_, RealtimeError>(Message::Text(text.into())))
        });

        let inbound = read.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(data)) => {
                    warn!("Binary frame of {} bytes ignored", data.len());
                    None
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {
                    trace!("Control frame received");
                    None
                }
                Ok(Message::Close(frame)) => {
                    let reason = frame
                        .map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str()))
                        .unwrap_or_else(|| "no close frame".to_string());
                    Some(Err(RealtimeError::ConnectionClosed { reason }))
                }
                Err(e) => Some(Err(RealtimeError::WebSocketError(e))),
            })
        });

        Ok(Connection {
            outbound: Box::pin(outbound),
            inbound: inbound.boxed(),
        })
    }
}

/// Connector backed by in-process channels, used to drive the connection
/// manager without a server.
#[cfg(test)]
pub(crate) mod memory {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    pub enum Script {
        /// Handshake fails with this reason.
        Refuse(String),
        /// Handshake never completes.
        Hang,
        /// Handshake succeeds; the peer end is handed to the test.
        Accept,
    }

    /// Test-side end of an accepted connection.
    pub struct Peer {
        pub to_client: mpsc::UnboundedSender<Result<String, RealtimeError>>,
        pub from_client: mpsc::UnboundedReceiver<String>,
    }

    #[derive(Default)]
    pub struct MemoryConnector {
        script: Mutex<VecDeque<Script>>,
        peers: Mutex<Option<mpsc::UnboundedSender<Peer>>>,
        pub attempts: std::sync::atomic::AtomicU32,
        pub urls: Mutex<Vec<Url>>,
    }

    impl MemoryConnector {
        pub fn new(script: impl IntoIterator<Item = Script>) -> Self {
            Self {
                script: Mutex::new(script.into_iter().collect()),
                ..Self::default()
            }
        }

        pub fn peers(&self) -> mpsc::UnboundedReceiver<Peer> {
            let (tx, rx) = mpsc::unbounded_channel();
            *self.peers.lock().unwrap() = Some(tx);
            rx
        }

        pub fn attempts(&self) -> u32 {
            self.attempts.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for MemoryConnector {
        async fn connect(&self, url: &Url) -> Result<Connection, RealtimeError> {
            self.attempts
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.urls.lock().unwrap().push(url.clone());

            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Script::Refuse("script exhausted".into()));

            match next {
                Script::Refuse(reason) => Err(RealtimeError::ConnectionClosed { reason }),
                Script::Hang => future::pending().await,
                Script::Accept => {
                    let (to_client, inbound_rx) = mpsc::unbounded_channel();
                    let (outbound_tx, from_client) = mpsc::unbounded_channel::<String>();

                    if let Some(peers) = self.peers.lock().unwrap().as_ref() {
                        let _ = peers.send(Peer {
                            to_client,
                            from_client,
                        });
                    }

                    let inbound = futures_util::stream::unfold(inbound_rx, |mut rx| async move {
                        rx.recv().await.map(|item| (item, rx))
                    });
                    let outbound = futures_util::sink::unfold(
                        outbound_tx,
                        |tx, text: String| async move {
                            tx.send(text).map_err(|_| RealtimeError::ConnectionClosed {
                                reason: "peer dropped".into(),
                            })?;
                            Ok::<_, RealtimeError>(tx)
                        },
                    );

                    Ok(Connection {
                        outbound: Box::pin(outbound),
                        inbound: inbound.boxed(),
                    })
                }
            }
        }
    }
}
