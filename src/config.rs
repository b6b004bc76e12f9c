/// file: src/config.rs
/// description: typed runtime configuration built from CLI arguments
use crate::{cli::Args, error::RealtimeError};
use anyhow::Result;
use std::time::Duration;
use url::Url;

/// Path of the inbox socket relative to the notifications service base.
pub const INBOX_WS_PATH: &str = "/api/v1/inbox/ws";

#[derive(Debug, Clone)]
pub struct Config {
    pub endpoint: Url,
    pub realtime: RealtimeConfig,
    pub session: SessionConfig,
    pub notifications: NotificationsConfig,
    pub metrics: MetricsConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub handshake_timeout: Duration,
    pub ping_interval: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Consecutive retries allowed before settling in `Error`; 0 disables retries.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(3000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: 10,
            backoff: Backoff::Exponential,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Exponential => {
                let exponent = attempt.saturating_sub(1).min(31);
                self.base_delay
                    .saturating_mul(1u32 << exponent)
                    .min(self.max_delay)
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub token: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NotificationsConfig {
    pub api_base: Url,
    pub recent_limit: usize,
    pub refresh_interval: Option<Duration>,
    pub persist_attempts: u32,
    pub persist_retry_delay: Duration,
    /// Follow the server's SSE push channel alongside periodic refreshes.
    pub stream: bool,
    pub stream_retry_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub format: String,
    pub colored: bool,
    pub quiet: bool,
}

impl Config {
    pub fn from_args(args: &Args) -> Result<Self> {
        let api_base = Url::parse(&args.base_url)?;
        let endpoint = match &args.ws_url {
            Some(ws_url) => normalize_endpoint(ws_url)?,
            None => derive_ws_url(&api_base)?,
        };

        Ok(Config {
            endpoint,
            realtime: RealtimeConfig {
                handshake_timeout: Duration::from_secs(args.timeout),
                ping_interval: Duration::from_secs(args.ping_interval.max(1)),
                reconnect: ReconnectPolicy {
                    base_delay: Duration::from_millis(args.reconnect_delay_ms),
                    max_delay: Duration::from_millis(
                        args.max_reconnect_delay_ms.max(args.reconnect_delay_ms),
                    ),
                    max_attempts: args.max_reconnects,
                    backoff: if args.fixed_backoff {
                        Backoff::Fixed
                    } else {
                        Backoff::Exponential
                    },
                },
            },
            session: SessionConfig {
                token: args.token.clone().filter(|t| !t.is_empty()),
                user_id: args.user_id.clone().filter(|u| !u.is_empty()),
            },
            notifications: NotificationsConfig {
                api_base,
                recent_limit: args.recent_limit.max(1),
                refresh_interval: (args.refresh_interval > 0)
                    .then(|| Duration::from_secs(args.refresh_interval)),
                persist_attempts: args.persist_attempts.max(1),
                persist_retry_delay: Duration::from_millis(500),
                stream: !args.no_stream,
                stream_retry_delay: Duration::from_secs(3),
            },
            metrics: MetricsConfig {
                enabled: args.metrics,
                port: args.metrics_port,
            },
            output: OutputConfig {
                format: args.format.clone(),
                colored: !args.no_color,
                quiet: args.quiet,
            },
        })
    }
}

/// Turn the notifications base URL into the inbox socket URL.
pub fn derive_ws_url(api_base: &Url) -> Result<Url, RealtimeError> {
    let base = api_base.as_str().trim_end_matches('/');
    normalize_endpoint(&format!("{base}{INBOX_WS_PATH}"))
}

/// Parse an endpoint, rewriting `http(s)` to `ws(s)`.
pub fn normalize_endpoint(endpoint: &str) -> Result<Url, RealtimeError> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Err(RealtimeError::InvalidEndpoint("endpoint is empty".into()));
    }

    let mut url = Url::parse(endpoint)?;
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(RealtimeError::InvalidEndpoint(format!(
                "unsupported scheme '{other}'"
            )));
        }
    };
    if url.scheme() != scheme {
        url.set_scheme(scheme).map_err(|_| {
            RealtimeError::InvalidEndpoint(format!("cannot use scheme '{scheme}'"))
        })?;
    }
    Ok(url)
}
