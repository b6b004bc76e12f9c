// file: src/client.rs
// description: reconnecting connection manager for the inbox WebSocket
// reference: https://docs.rs/tokio/latest/tokio/sync/watch/index.html

use crate::{
    client_state::{ClientState, ConnectionState, SharedClientState},
    config::{RealtimeConfig, normalize_endpoint},
    dispatcher::EventDispatcher,
    error::RealtimeError,
    events::decode_frame,
    monitoring,
    transport::{Connection, Connector, WebSocketConnector},
    types::OutboundFrame,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at, sleep, timeout},
};
use tracing::{debug, error, info, trace, warn};
use url::Url;

/// Frames queued by `send` while the socket writer catches up.
const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

struct Session {
    task: JoinHandle<()>,
    outbound_tx: mpsc::Sender<String>,
}

/// Owns one logical connection to the inbox endpoint.
///
/// Create one per user session and call [`disconnect`](Self::disconnect)
/// when the session ends. Events are delivered through the injected
/// [`EventDispatcher`]; consumers never see the socket.
pub struct RealtimeClient {
    config: Arc<RealtimeConfig>,
    connector: Arc<dyn Connector>,
    dispatcher: EventDispatcher,
    state: SharedClientState,
    session: Mutex<Option<Session>>,
}

impl RealtimeClient {
    pub fn new(
        config: RealtimeConfig,
        connector: Arc<dyn Connector>,
        dispatcher: EventDispatcher,
    ) -> Self {
        Self {
            config: Arc::new(config),
            connector,
            dispatcher,
            state: Arc::new(ClientState::new()),
            session: Mutex::new(None),
        }
    }

    /// Client over a real WebSocket.
    pub fn with_websocket(config: RealtimeConfig, dispatcher: EventDispatcher) -> Self {
        Self::new(config, Arc::new(WebSocketConnector), dispatcher)
    }

    /// Start connecting to `endpoint` in the background.
    ///
    /// A no-op while already connecting or connected. After retries are
    /// exhausted this starts a fresh attempt budget. Must be called from
    /// within a tokio runtime.
    pub fn connect(&self, endpoint: &str, auth_token: Option<&str>) -> Result<(), RealtimeError> {
        if self.state.is_torn_down() {
            return Err(RealtimeError::TornDown);
        }

        let mut session = self.lock_session();
        let running = session.as_ref().is_some_and(|s| !s.task.is_finished());
        if running && self.state.current().is_active() {
            debug!("Already connected or connecting");
            return Ok(());
        }

        let url = authenticated_url(endpoint, auth_token)?;
        if auth_token.is_none() {
            warn!("No auth token available, connecting unauthenticated");
        }

        if let Some(previous) = session.take() {
            previous.task.abort();
        }

        self.state.reset_attempts();
        self.state.transition(ConnectionState::Connecting);
        info!("Connecting to {}", redact(&url));

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let driver = ConnectionDriver {
            url,
            config: Arc::clone(&self.config),
            connector: Arc::clone(&self.connector),
            dispatcher: self.dispatcher.clone(),
            state: Arc::clone(&self.state),
        };
        let task = tokio::spawn(driver.run(outbound_rx));

        *session = Some(Session { task, outbound_tx });
        Ok(())
    }

    /// Tear the connection down for good.
    ///
    /// Cancels any pending reconnect timer, releases the socket and closes
    /// the dispatcher. No state transition or event delivery happens after
    /// this returns.
    pub fn disconnect(&self) {
        self.state.tear_down();
        if let Some(session) = self.lock_session().take() {
            session.task.abort();
        }
        self.dispatcher.close();
        monitoring::CONNECTED_GAUGE.set(0.0);
        info!("Realtime client disconnected");
    }

    /// Queue a JSON frame for the server.
    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) -> Result<(), RealtimeError> {
        if self.state.current() != ConnectionState::Connected {
            warn!("Cannot send message, not connected");
            return Err(RealtimeError::NotConnected);
        }

        let text = serde_json::to_string(payload)?;
        let session = self.lock_session();
        let session = session.as_ref().ok_or(RealtimeError::NotConnected)?;
        session.outbound_tx.try_send(text).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => RealtimeError::SendQueueFull,
            mpsc::error::TrySendError::Closed(_) => RealtimeError::NotConnected,
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.state.current()
    }

    /// Receiver notified on every connection state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.state.reconnect_attempts()
    }

    /// Error behind the most recent failed attempt or lost session.
    ///
    /// Holds [`RealtimeError::MaxReconnectsExceeded`] once the retry budget
    /// is spent.
    pub fn last_error(&self) -> Option<Arc<RealtimeError>> {
        self.state.last_error()
    }

    pub fn stats(&self) -> &ClientState {
        &self.state
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        if let Some(session) = self.lock_session().take() {
            session.task.abort();
        }
    }
}

/// Endpoint with the session token attached as the `token` query parameter.
fn authenticated_url(endpoint: &str, auth_token: Option<&str>) -> Result<Url, RealtimeError> {
    let mut url = normalize_endpoint(endpoint)?;
    if let Some(token) = auth_token {
        url.query_pairs_mut().append_pair("token", token);
    }
    Ok(url)
}

/// URL without its query string, safe to log.
fn redact(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}

/// Keepalive period spread by ±10% so clients do not ping in lockstep.
fn jittered(period: Duration) -> Duration {
    period.mul_f64(0.9 + fastrand::f64() * 0.2)
}

/// How an established session ended.
struct SessionEnd {
    uptime: Duration,
    error: Option<RealtimeError>,
}

/// Background task owning the socket for one `connect()` call.
struct ConnectionDriver {
    url: Url,
    config: Arc<RealtimeConfig>,
    connector: Arc<dyn Connector>,
    dispatcher: EventDispatcher,
    state: SharedClientState,
}

impl ConnectionDriver {
    async fn run(self, mut outbound_rx: mpsc::Receiver<String>) {
        loop {
            self.state.transition(ConnectionState::Connecting);

            let uptime = match self.connect_and_run(&mut outbound_rx).await {
                Ok(end) => {
                    match end.error {
                        Some(e) => {
                            warn!("Connection lost: {}", e);
                            self.state.record_error(e);
                        }
                        None => info!("WebSocket stream ended"),
                    }
                    monitoring::CONNECTED_GAUGE.set(0.0);
                    self.state.transition(ConnectionState::Disconnected);
                    Some(end.uptime)
                }
                Err(e) => {
                    error!("Connection error: {}", e);
                    self.state.record_error(e);
                    self.state.transition(ConnectionState::Error);
                    None
                }
            };

            if !self.schedule_reconnect(uptime).await {
                break;
            }
        }
    }

    /// Wait out the backoff for the next attempt, or give up.
    ///
    /// `session_uptime` is set when an established session was lost; the
    /// first retry after a session that outlived the base delay is immediate.
    async fn schedule_reconnect(&self, session_uptime: Option<Duration>) -> bool {
        let policy = &self.config.reconnect;
        if self.state.reconnect_attempts() >= policy.max_attempts {
            let exhausted = RealtimeError::MaxReconnectsExceeded;
            error!(max_attempts = policy.max_attempts, "{}", exhausted);
            self.state.record_error(exhausted);
            self.state.transition(ConnectionState::Error);
            return false;
        }

        let attempt = self.state.increment_reconnect();
        monitoring::RECONNECT_COUNTER.increment(1);

        let delay = match session_uptime {
            Some(uptime) if uptime >= policy.base_delay => Duration::ZERO,
            _ => policy.delay_for(attempt),
        };
        warn!(
            "Reconnecting in {}ms (attempt {}/{})",
            delay.as_millis(),
            attempt,
            policy.max_attempts
        );

        if !delay.is_zero() {
            sleep(delay).await;
        }
        true
    }

    async fn connect_and_run(
        &self,
        outbound_rx: &mut mpsc::Receiver<String>,
    ) -> Result<SessionEnd, RealtimeError> {
        let connection = timeout(
            self.config.handshake_timeout,
            self.connector.connect(&self.url),
        )
        .await
        .map_err(|_| RealtimeError::Timeout)??;

        let connection_id = self.state.reset_connection();
        self.state.transition(ConnectionState::Connected);
        monitoring::CONNECTED_GAUGE.set(1.0);
        info!(%connection_id, "WebSocket connection established to {}", redact(&self.url));

        // Anything queued against the previous socket is stale.
        while outbound_rx.try_recv().is_ok() {}

        let connected_at = Instant::now();
        let error = self.handle_message_stream(connection, outbound_rx).await;

        Ok(SessionEnd {
            uptime: connected_at.elapsed(),
            error,
        })
    }

    async fn handle_message_stream(
        &self,
        connection: Connection,
        outbound_rx: &mut mpsc::Receiver<String>,
    ) -> Option<RealtimeError> {
        let Connection {
            mut outbound,
            mut inbound,
        } = connection;

        let ping_frame = match serde_json::to_string(&OutboundFrame::ping()) {
            Ok(frame) => frame,
            Err(e) => return Some(e.into()),
        };
        let period = jittered(self.config.ping_interval);
        let mut ping = interval_at(Instant::now() + period, period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                frame = inbound.next() => match frame {
                    Some(Ok(text)) => self.handle_text(&text),
                    Some(Err(e)) => return Some(e),
                    None => return None,
                },
                Some(text) = outbound_rx.recv() => {
                    trace!("Sending frame: {}", text);
                    if let Err(e) = outbound.send(text).await {
                        return Some(e);
                    }
                }
                _ = ping.tick() => {
                    trace!("Sending keepalive ping");
                    if let Err(e) = outbound.send(ping_frame.clone()).await {
                        return Some(e);
                    }
                }
            }
        }
    }

    fn handle_text(&self, text: &str) {
        self.state.record_frame();
        monitoring::FRAMES_RECEIVED_COUNTER.increment(1);
        trace!("Received text frame: {}", text);

        match decode_frame(text) {
            Ok(Some(event)) => {
                if self.state.is_torn_down() {
                    debug!("Discarding frame received after teardown");
                    return;
                }
                debug!(
                    event_type = event.event_type(),
                    conversation_id = %event.conversation_id,
                    "Dispatching event"
                );
                self.dispatcher.dispatch(&event);
                self.state.record_dispatch();
            }
            Ok(None) => trace!("Frame carried no event"),
            Err(e) => {
                self.state.record_decode_error();
                monitoring::DECODE_ERROR_COUNTER.increment(1);
                warn!(
                    "Dropping malformed frame: {}. Frame: {}",
                    e,
                    text.chars().take(100).collect::<String>()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{Backoff, ReconnectPolicy},
        events::Event,
        transport::memory::{MemoryConnector, Peer, Script},
    };
    use serde_json::json;
    use std::sync::atomic::Ordering;

    const ENDPOINT: &str = "ws://inbox.test/api/v1/inbox/ws";

    fn config(max_attempts: u32) -> RealtimeConfig {
        RealtimeConfig {
            handshake_timeout: Duration::from_secs(1),
            ping_interval: Duration::from_secs(30),
            reconnect: ReconnectPolicy {
                base_delay: Duration::from_secs(3),
                max_delay: Duration::from_secs(30),
                max_attempts,
                backoff: Backoff::Exponential,
            },
        }
    }

    fn new_message_frame(user_id: &str) -> String {
        json!({
            "type": "new_message",
            "data": {
                "conversation_id": "c1",
                "user_id": user_id,
                "timestamp": "2025-03-01T10:00:00Z",
                "message": {"id": "m1", "content": "hi"}
            }
        })
        .to_string()
    }

    fn collect_events(dispatcher: &EventDispatcher) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        dispatcher.add_wildcard_listener(move |event| {
            tx.send(event.clone())?;
            Ok(())
        });
        rx
    }

    async fn wait_for_state(client: &RealtimeClient, target: ConnectionState) {
        let mut rx = client.subscribe_state();
        timeout(Duration::from_secs(120), rx.wait_for(|s| *s == target))
            .await
            .expect("state not reached")
            .expect("state channel closed");
    }

    async fn next_peer(peers: &mut mpsc::UnboundedReceiver<Peer>) -> Peer {
        timeout(Duration::from_secs(120), peers.recv())
            .await
            .expect("no connection accepted")
            .expect("connector dropped")
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_decoded_events_in_order() {
        let connector = Arc::new(MemoryConnector::new([Script::Accept]));
        let mut peers = connector.peers();
        let dispatcher = EventDispatcher::new();
        let mut events = collect_events(&dispatcher);
        let client = RealtimeClient::new(config(3), connector.clone(), dispatcher);

        client.connect(ENDPOINT, Some("tok en")).unwrap();
        let peer = next_peer(&mut peers).await;
        wait_for_state(&client, ConnectionState::Connected).await;

        peer.to_client.send(Ok(new_message_frame("u2"))).unwrap();
        peer.to_client.send(Ok("{not json".to_string())).unwrap();
        peer.to_client.send(Ok(r#"{"type":"pong"}"#.to_string())).unwrap();
        peer.to_client.send(Ok(new_message_frame("u3"))).unwrap();

        assert_eq!(events.recv().await.unwrap().user_id, "u2");
        assert_eq!(events.recv().await.unwrap().user_id, "u3");
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(client.stats().decode_errors.load(Ordering::Relaxed), 1);

        let url = connector.urls.lock().unwrap()[0].clone();
        assert_eq!(url.query(), Some("token=tok+en"));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_is_idempotent_while_active() {
        let connector = Arc::new(MemoryConnector::new([Script::Accept]));
        let mut peers = connector.peers();
        let client = RealtimeClient::new(config(3), connector.clone(), EventDispatcher::new());

        client.connect(ENDPOINT, None).unwrap();
        client.connect(ENDPOINT, None).unwrap();
        let _peer = next_peer(&mut peers).await;
        wait_for_state(&client, ConnectionState::Connected).await;
        client.connect(ENDPOINT, None).unwrap();

        sleep(Duration::from_secs(5)).await;
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_endpoint_is_rejected() {
        let client = RealtimeClient::new(
            config(3),
            Arc::new(MemoryConnector::default()),
            EventDispatcher::new(),
        );
        assert!(matches!(
            client.connect("", None),
            Err(RealtimeError::InvalidEndpoint(_))
        ));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let connector = Arc::new(MemoryConnector::new(
            (0..10).map(|n| Script::Refuse(format!("refused {n}"))),
        ));
        let client = RealtimeClient::new(config(3), connector.clone(), EventDispatcher::new());

        client.connect(ENDPOINT, None).unwrap();
        sleep(Duration::from_secs(600)).await;

        assert_eq!(connector.attempts(), 4);
        assert_eq!(client.state(), ConnectionState::Error);
        assert!(matches!(
            client.last_error().as_deref(),
            Some(RealtimeError::MaxReconnectsExceeded)
        ));

        sleep(Duration::from_secs(600)).await;
        assert_eq!(connector.attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_connect_after_exhaustion_starts_over() {
        let connector = Arc::new(MemoryConnector::new([
            Script::Refuse("down".into()),
            Script::Accept,
        ]));
        let mut peers = connector.peers();
        let client = RealtimeClient::new(config(0), connector.clone(), EventDispatcher::new());

        client.connect(ENDPOINT, None).unwrap();
        sleep(Duration::from_secs(10)).await;
        assert_eq!(client.state(), ConnectionState::Error);
        assert_eq!(connector.attempts(), 1);

        client.connect(ENDPOINT, None).unwrap();
        let _peer = next_peer(&mut peers).await;
        wait_for_state(&client, ConnectionState::Connected).await;
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_timeout_counts_as_attempt() {
        let connector = Arc::new(MemoryConnector::new([Script::Hang, Script::Accept]));
        let mut peers = connector.peers();
        let client = RealtimeClient::new(config(3), connector.clone(), EventDispatcher::new());

        client.connect(ENDPOINT, None).unwrap();
        let _peer = next_peer(&mut peers).await;
        wait_for_state(&client, ConnectionState::Connected).await;

        assert_eq!(connector.attempts(), 2);
        assert_eq!(client.reconnect_attempts(), 0);
        assert_eq!(client.stats().total_reconnects.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_session_loss() {
        let connector = Arc::new(MemoryConnector::new([Script::Accept, Script::Accept]));
        let mut peers = connector.peers();
        let client = RealtimeClient::new(config(3), connector.clone(), EventDispatcher::new());
        let mut states = client.subscribe_state();

        client.connect(ENDPOINT, None).unwrap();
        let first = next_peer(&mut peers).await;
        wait_for_state(&client, ConnectionState::Connected).await;

        first
            .to_client
            .send(Err(RealtimeError::ConnectionClosed {
                reason: "1006".into(),
            }))
            .unwrap();
        states
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await
            .unwrap();

        let _second = next_peer(&mut peers).await;
        wait_for_state(&client, ConnectionState::Connected).await;
        assert_eq!(connector.attempts(), 2);
        assert_eq!(client.reconnect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sends_frames_and_keepalive_pings() {
        let connector = Arc::new(MemoryConnector::new([Script::Accept]));
        let mut peers = connector.peers();
        let client = RealtimeClient::new(config(3), connector.clone(), EventDispatcher::new());

        assert!(matches!(
            client.send(&json!({"type": "typing"})),
            Err(RealtimeError::NotConnected)
        ));

        client.connect(ENDPOINT, None).unwrap();
        let mut peer = next_peer(&mut peers).await;
        wait_for_state(&client, ConnectionState::Connected).await;

        client.send(&json!({"type": "typing"})).unwrap();
        assert_eq!(peer.from_client.recv().await.unwrap(), r#"{"type":"typing"}"#);

        sleep(Duration::from_secs(40)).await;
        assert_eq!(peer.from_client.recv().await.unwrap(), r#"{"type":"ping"}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_reconnect() {
        let connector = Arc::new(MemoryConnector::new([
            Script::Refuse("down".into()),
            Script::Accept,
        ]));
        let client = RealtimeClient::new(config(5), connector.clone(), EventDispatcher::new());
        let mut states = client.subscribe_state();

        client.connect(ENDPOINT, None).unwrap();
        states
            .wait_for(|s| *s == ConnectionState::Error)
            .await
            .unwrap();

        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        states.borrow_and_update();

        sleep(Duration::from_secs(3600)).await;
        assert_eq!(connector.attempts(), 1);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!states.has_changed().unwrap());
        assert!(matches!(
            client.connect(ENDPOINT, None),
            Err(RealtimeError::TornDown)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn no_delivery_after_teardown() {
        let connector = Arc::new(MemoryConnector::new([Script::Accept]));
        let mut peers = connector.peers();
        let dispatcher = EventDispatcher::new();
        let mut events = collect_events(&dispatcher);
        let client = RealtimeClient::new(config(3), connector.clone(), dispatcher.clone());

        client.connect(ENDPOINT, None).unwrap();
        let peer = next_peer(&mut peers).await;
        wait_for_state(&client, ConnectionState::Connected).await;

        client.disconnect();
        let _ = peer.to_client.send(Ok(new_message_frame("u2")));
        sleep(Duration::from_secs(1)).await;

        assert!(events.try_recv().is_err());
        assert!(dispatcher.is_closed());
    }
}
