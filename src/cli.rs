use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "inbox-realtime",
    about = "realtime inbox watcher: reconnecting websocket, typed events and unread notifications",
    version
)]
pub struct Args {
    /// Notifications service base URL; the WebSocket endpoint is derived from it
    #[arg(
        short,
        long,
        env = "NOTIFICATIONS_API_BASE_URL",
        default_value = "https://homebit.co.ke/notifications"
    )]
    pub base_url: String,

    /// Explicit WebSocket endpoint (overrides the one derived from --base-url)
    #[arg(long)]
    pub ws_url: Option<String>,

    /// Bearer token of the current session
    #[arg(long, env = "INBOX_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Id of the current session user (their own messages never count as unread)
    #[arg(long, env = "INBOX_USER_ID")]
    pub user_id: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Output logs in JSON format
    #[arg(long)]
    pub json_logs: bool,

    /// Enable metrics server
    #[arg(long)]
    pub metrics: bool,

    /// Metrics server port
    #[arg(long, default_value = "9090")]
    pub metrics_port: u16,

    /// Handshake timeout in seconds
    #[arg(long, default_value = "10")]
    pub timeout: u64,

    /// Base reconnection delay in milliseconds
    #[arg(long, default_value = "3000")]
    pub reconnect_delay_ms: u64,

    /// Upper bound for the exponential reconnection delay in milliseconds
    #[arg(long, default_value = "30000")]
    pub max_reconnect_delay_ms: u64,

    /// Use a fixed reconnection delay instead of exponential backoff
    #[arg(long)]
    pub fixed_backoff: bool,

    /// Maximum number of consecutive reconnection attempts (0 disables reconnecting)
    #[arg(long, default_value = "10")]
    pub max_reconnects: u32,

    /// Keepalive ping interval in seconds
    #[arg(long, default_value = "30")]
    pub ping_interval: u64,

    /// Number of recent notifications kept in memory
    #[arg(long, default_value = "20")]
    pub recent_limit: usize,

    /// Reconcile notifications with the server every N seconds (0 disables)
    #[arg(long, default_value = "15")]
    pub refresh_interval: u64,

    /// Attempts made to persist a read-state change before reverting it
    #[arg(long, default_value = "3")]
    pub persist_attempts: u32,

    /// Disable the notifications push stream
    #[arg(long)]
    pub no_stream: bool,

    /// Output format: table, json, minimal
    #[arg(long, default_value = "table")]
    pub format: String,

    /// Disable colored output (useful for piping to files)
    #[arg(long)]
    pub no_color: bool,

    /// Quiet mode - only errors and unread count changes
    #[arg(long)]
    pub quiet: bool,
}
