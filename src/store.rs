// file: src/store.rs
// description: persistence seam for notification read state
// reference: https://docs.rs/reqwest/latest/reqwest/

use crate::{error::StoreError, notifications::NotificationItem};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt, stream::BoxStream};
use reqwest::{Client, RequestBuilder, Response, header::ACCEPT};
use serde::Deserialize;
use std::{collections::VecDeque, time::Duration};
use tracing::{debug, instrument, trace};
use url::Url;

/// SSE event name carrying a notification list.
pub const NOTIFICATIONS_EVENT: &str = "notifications";

/// A page of notifications as reported by the server.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationPage {
    pub items: Vec<NotificationItem>,
    /// Server-side unread total, when the server reports one.
    pub unread_count: Option<u64>,
}

/// Pages pushed by the server, in arrival order.
///
/// `StoreError::Decode` items are recoverable; any other error ends the stream.
pub type PageStream = BoxStream<'static, Result<NotificationPage, StoreError>>;

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn fetch_latest(&self, limit: usize) -> Result<NotificationPage, StoreError>;
    async fn mark_all_clicked(&self) -> Result<(), StoreError>;
    async fn mark_clicked(&self, id: &str) -> Result<(), StoreError>;
    /// Open the server push channel.
    async fn subscribe(&self) -> Result<PageStream, StoreError>;
}

/// The notifications REST service, authenticated with a bearer token.
#[derive(Debug, Clone)]
pub struct HttpNotificationStore {
    client: Client,
    // No overall timeout: the push stream stays open indefinitely.
    stream_client: Client,
    base: Url,
    token: String,
}

#[derive(Debug, Deserialize)]
struct ListBody {
    #[serde(default)]
    notifications: Option<Vec<NotificationItem>>,
    #[serde(default)]
    data: Option<ListData>,
    #[serde(default)]
    unread_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ListData {
    #[serde(default)]
    notifications: Vec<NotificationItem>,
}

impl From<ListBody> for NotificationPage {
    fn from(body: ListBody) -> Self {
        let items = body
            .notifications
            .or_else(|| body.data.map(|d| d.notifications))
            .unwrap_or_default();
        NotificationPage {
            items,
            unread_count: body.unread_count,
        }
    }
}

fn parse_page(data: &str) -> Result<NotificationPage, StoreError> {
    let body: ListBody = serde_json::from_str(data)?;
    Ok(body.into())
}

impl HttpNotificationStore {
    pub fn new(base: Url, token: impl Into<String>) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        let stream_client = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            stream_client,
            base,
            token: token.into(),
        })
    }

    pub fn with_client(client: Client, base: Url, token: impl Into<String>) -> Self {
        Self {
            stream_client: client.clone(),
            client,
            base,
            token: token.into(),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, StoreError> {
        let base = self.base.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/api/v1/notifications{path}"))?)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.token)
    }

    async fn check(response: Response) -> Result<Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Status {
            status: status.as_u16(),
            body: body.chars().take(200).collect(),
        })
    }
}

#[async_trait]
impl NotificationStore for HttpNotificationStore {
    #[instrument(skip(self))]
    async fn fetch_latest(&self, limit: usize) -> Result<NotificationPage, StoreError> {
        let mut url = self.endpoint("")?;
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string())
            .append_pair("offset", "0");

        let response = self.authorized(self.client.get(url)).send().await?;
        let body: ListBody = Self::check(response).await?.json().await?;

        let page = NotificationPage::from(body);
        debug!(count = page.items.len(), "Fetched notifications");
        Ok(page)
    }

    #[instrument(skip(self))]
    async fn mark_all_clicked(&self) -> Result<(), StoreError> {
        let url = self.endpoint("/mark-all-clicked")?;
        let response = self.authorized(self.client.put(url)).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn mark_clicked(&self, id: &str) -> Result<(), StoreError> {
        let mut url = self.endpoint("")?;
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .push(id)
            .push("clicked");
        let response = self.authorized(self.client.put(url)).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    /// `GET {base}/api/v1/notifications/stream?token=…` as Server-Sent Events.
    #[instrument(skip(self))]
    async fn subscribe(&self) -> Result<PageStream, StoreError> {
        let mut url = self.endpoint("/stream")?;
        url.query_pairs_mut().append_pair("token", &self.token);

        let response = self
            .stream_client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        let response = Self::check(response).await?;
        debug!("Notification stream opened");

        Ok(notification_pages(response.bytes_stream()))
    }
}

/// Turn a raw SSE byte stream into the pages carried by `notifications` events.
pub fn notification_pages<S, B, E>(chunks: S) -> PageStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Send + 'static,
    StoreError: From<E>,
{
    let state = (Box::pin(chunks), SseDecoder::default(), VecDeque::new());
    futures_util::stream::unfold(state, |(mut chunks, mut decoder, mut ready)| async move {
        loop {
            if let Some(page) = ready.pop_front() {
                return Some((page, (chunks, decoder, ready)));
            }
            match chunks.next().await {
                Some(Ok(chunk)) => {
                    for event in decoder.push(chunk.as_ref()) {
                        if event.event == NOTIFICATIONS_EVENT {
                            ready.push_back(parse_page(&event.data));
                        } else {
                            trace!(event = %event.event, "Ignoring stream event");
                        }
                    }
                }
                Some(Err(e)) => return Some((Err(e.into()), (chunks, decoder, ready))),
                None => return None,
            }
        }
    })
    .boxed()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` decoder.
///
/// Bytes are buffered until a full line arrives, so chunk boundaries may fall
/// anywhere, including inside a multi-byte character.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&raw);
            if let Some(event) = self.line(line.trim_end_matches(['\n', '\r'])) {
                events.push(event);
            }
        }
        events
    }

    fn line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            let event = self.event.take().unwrap_or_else(|| "message".to_string());
            if self.data.is_empty() {
                return None;
            }
            let data = std::mem::take(&mut self.data).join("\n");
            return Some(SseEvent { event, data });
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::{GET, PUT};
    use httpmock::MockServer;
    use serde_json::json;

    fn store(server: &MockServer) -> HttpNotificationStore {
        let base = Url::parse(&format!("{}/notifications", server.base_url())).unwrap();
        HttpNotificationStore::new(base, "test-token").unwrap()
    }

    #[tokio::test]
    async fn fetch_latest_reads_top_level_list() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/notifications/api/v1/notifications")
                .query_param("limit", "20")
                .query_param("offset", "0")
                .header("authorization", "Bearer test-token");
            then.status(200).json_body(json!({
                "notifications": [
                    {"id": "n1", "title": "Interest", "message": "A household is interested", "clicked": false},
                    {"id": "n2", "body": "Welcome", "createdAt": "2025-03-01T10:00:00Z", "clicked": true}
                ],
                "unread_count": 4
            }));
        });

        let page = store(&server).fetch_latest(20).await.unwrap();

        mock.assert();
        assert_eq!(page.unread_count, Some(4));
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[1].message.as_deref(), Some("Welcome"));
        assert!(page.items[1].created_at.is_some());
    }

    #[tokio::test]
    async fn fetch_latest_reads_nested_list() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/notifications/api/v1/notifications");
            then.status(200).json_body(json!({
                "data": {"notifications": [{"id": "n1"}]}
            }));
        });

        let page = store(&server).fetch_latest(5).await.unwrap();
        assert_eq!(page.unread_count, None);
        assert_eq!(page.items[0].id, "n1");
        assert!(!page.items[0].clicked);
    }

    #[tokio::test]
    async fn mark_endpoints_use_put() {
        let server = MockServer::start();
        let all = server.mock(|when, then| {
            when.method(PUT)
                .path("/notifications/api/v1/notifications/mark-all-clicked")
                .header("authorization", "Bearer test-token");
            then.status(204);
        });
        let one = server.mock(|when, then| {
            when.method(PUT)
                .path("/notifications/api/v1/notifications/n-42/clicked");
            then.status(200);
        });

        let store = store(&server);
        store.mark_all_clicked().await.unwrap();
        store.mark_clicked("n-42").await.unwrap();

        all.assert();
        one.assert();
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(PUT);
            then.status(503).body("maintenance");
        });

        let err = store(&server).mark_all_clicked().await.unwrap_err();
        assert!(matches!(err, StoreError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn subscribe_yields_pushed_pages() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/notifications/api/v1/notifications/stream")
                .query_param("token", "test-token");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(concat!(
                    ": keepalive\n\n",
                    "event: notifications\n",
                    "data: {\"notifications\":[{\"id\":\"n1\"},{\"id\":\"n2\",\"clicked\":true}],\"unread_count\":1}\n\n",
                    "event: heartbeat\n",
                    "data: {}\n\n",
                ));
        });

        let pages: Vec<_> = store(&server).subscribe().await.unwrap().collect().await;

        mock.assert();
        assert_eq!(pages.len(), 1);
        let page = pages[0].as_ref().unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.unread_count, Some(1));
    }

    #[tokio::test]
    async fn subscribe_rejects_non_success_status() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/notifications/api/v1/notifications/stream");
            then.status(401);
        });

        assert!(matches!(
            store(&server).subscribe().await,
            Err(StoreError::Status { status: 401, .. })
        ));
    }

    #[test]
    fn decoder_handles_split_chunks() {
        let mut decoder = SseDecoder::default();
        let payload = "event: notifications\r\ndata: {\"title\":\"Jambo 👋\"}\r\n\r\n".as_bytes();
        // Split inside the multi-byte emoji.
        let split = payload.len() - 8;

        assert!(decoder.push(&payload[..split]).is_empty());
        let events = decoder.push(&payload[split..]);

        assert_eq!(
            events,
            vec![SseEvent {
                event: "notifications".into(),
                data: "{\"title\":\"Jambo 👋\"}".into(),
            }]
        );
    }

    #[test]
    fn decoder_joins_data_lines_and_defaults_event_name() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(b"data: first\ndata:second\n\n: comment\n\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: "message".into(),
                data: "first\nsecond".into(),
            }]
        );
    }

    #[tokio::test]
    async fn malformed_push_is_reported_and_stream_continues() {
        let chunks = futures_util::stream::iter(vec![
            Ok::<_, StoreError>(b"event: notifications\ndata: not json\n\n".to_vec()),
            Ok(b"event: notifications\ndata: {\"data\":{\"notifications\":[{\"id\":\"n9\"}]}}\n\n".to_vec()),
        ]);

        let pages: Vec<_> = notification_pages(chunks).collect().await;

        assert_eq!(pages.len(), 2);
        assert!(matches!(pages[0], Err(StoreError::Decode(_))));
        assert_eq!(pages[1].as_ref().unwrap().items[0].id, "n9");
    }
}
