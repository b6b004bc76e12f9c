use crate::{
    client_state::ConnectionState,
    events::{Event, EventPayload},
};
use chrono::Local;

// ANSI color codes
pub struct Colors;

impl Colors {
    pub const RESET: &'static str = "\x1b[0m";
    pub const BOLD: &'static str = "\x1b[1m";
    pub const DIM: &'static str = "\x1b[2m";

    pub const RED: &'static str = "\x1b[31m";
    pub const WHITE: &'static str = "\x1b[37m";
    pub const GRAY: &'static str = "\x1b[90m";

    // Bright colors
    pub const BRIGHT_RED: &'static str = "\x1b[91m";
    pub const BRIGHT_GREEN: &'static str = "\x1b[92m";
    pub const BRIGHT_YELLOW: &'static str = "\x1b[93m";
    pub const BRIGHT_BLUE: &'static str = "\x1b[94m";
    pub const BRIGHT_MAGENTA: &'static str = "\x1b[95m";
    pub const BRIGHT_CYAN: &'static str = "\x1b[96m";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    Minimal,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "minimal" => OutputFormat::Minimal,
            _ => OutputFormat::Table,
        }
    }
}

const DETAIL_WIDTH: usize = 36;

/// Short human-readable description of what an event carries.
pub fn describe(event: &Event) -> String {
    match &event.payload {
        EventPayload::NewMessage { .. } | EventPayload::MessageEdited { .. } => {
            event.message_text().unwrap_or("(no text)").to_string()
        }
        EventPayload::MessageRead { reader_id } => match reader_id {
            Some(reader) => format!("read by {reader}"),
            None => "read".to_string(),
        },
        EventPayload::MessageDeleted { .. } => "message deleted".to_string(),
        EventPayload::ReactionAdded { emoji, .. } => {
            format!("+{}", emoji.as_deref().unwrap_or("?"))
        }
        EventPayload::ReactionRemoved { emoji, .. } => {
            format!("-{}", emoji.as_deref().unwrap_or("?"))
        }
        EventPayload::Typing => "typing...".to_string(),
        EventPayload::Unknown { .. } => String::new(),
    }
}

fn truncate(text: &str, width: usize) -> String {
    let single_line = text.replace(['\n', '\r'], " ");
    if single_line.chars().count() <= width {
        return single_line;
    }
    let mut cut: String = single_line.chars().take(width.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}

pub struct EventFormatter {
    format: OutputFormat,
    colored: bool,
    quiet: bool,
    event_count: u64,
}

impl EventFormatter {
    pub fn new(format: OutputFormat, colored: bool, quiet: bool) -> Self {
        Self {
            format,
            colored,
            quiet,
            event_count: 0,
        }
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    fn paint(&self, color: &'static str) -> &'static str {
        if self.colored { color } else { "" }
    }

    pub fn print_header(&self) {
        if self.quiet || self.format != OutputFormat::Table {
            return;
        }
        let gray = self.paint(Colors::GRAY);
        let reset = self.paint(Colors::RESET);
        println!(
            "{gray}┌───────┬──────────┬──────────────────┬──────────────┬──────────────┬──────────────────────────────────────┐{reset}"
        );
        println!(
            "{gray}│{reset} {:<5} {gray}│{reset} {:<8} {gray}│{reset} {:<16} {gray}│{reset} {:<12} {gray}│{reset} {:<12} {gray}│{reset} {:<DETAIL_WIDTH$} {gray}│{reset}",
            "COUNT", "TIME", "TYPE", "CONVERSATION", "FROM", "DETAIL"
        );
        println!(
            "{gray}├───────┼──────────┼──────────────────┼──────────────┼──────────────┼──────────────────────────────────────┤{reset}"
        );
    }

    pub fn print_event(&mut self, event: &Event) {
        self.event_count += 1;
        if self.quiet {
            return;
        }
        println!("{}", self.format_event(event));
    }

    /// Render one event; the row number is the next value of the counter.
    pub fn format_event(&self, event: &Event) -> String {
        let count = self.event_count.max(1);
        let local_time = event.timestamp.with_timezone(&Local);
        let detail = describe(event);

        match self.format {
            OutputFormat::Table => {
                let gray = self.paint(Colors::GRAY);
                let reset = self.paint(Colors::RESET);
                let color = self.paint(event_color(event));
                format!(
                    "{gray}│{reset} {:<5} {gray}│{reset} {} {gray}│{reset} {color}{:<16}{reset} {gray}│{reset} {:<12} {gray}│{reset} {:<12} {gray}│{reset} {:<DETAIL_WIDTH$} {gray}│{reset}",
                    count,
                    local_time.format("%H:%M:%S"),
                    truncate(event.event_type(), 16),
                    truncate(&event.conversation_id, 12),
                    truncate(&event.user_id, 12),
                    truncate(&detail, DETAIL_WIDTH),
                )
            }
            OutputFormat::Json => {
                let json_obj = serde_json::json!({
                    "count": count,
                    "type": event.event_type(),
                    "conversation_id": event.conversation_id,
                    "user_id": event.user_id,
                    "timestamp": event.timestamp.to_rfc3339(),
                    "message_id": event.message_id(),
                    "detail": detail,
                });
                serde_json::to_string(&json_obj).unwrap_or_default()
            }
            OutputFormat::Minimal => {
                let color = self.paint(event_color(event));
                let reset = self.paint(Colors::RESET);
                format!(
                    "{} {color}{}{reset} {}@{} {}",
                    local_time.format("%H:%M:%S"),
                    event.event_type(),
                    event.user_id,
                    event.conversation_id,
                    truncate(&detail, DETAIL_WIDTH),
                )
            }
        }
    }

    pub fn format_state(&self, state: ConnectionState, detail: &str) -> String {
        if self.format == OutputFormat::Json {
            let json_obj = serde_json::json!({ "state": state, "detail": detail });
            return serde_json::to_string(&json_obj).unwrap_or_default();
        }

        let (color, symbol) = match state {
            ConnectionState::Connecting => (Colors::BRIGHT_YELLOW, "*"),
            ConnectionState::Connected => (Colors::BRIGHT_GREEN, "+"),
            ConnectionState::Disconnected => (Colors::BRIGHT_MAGENTA, "~"),
            ConnectionState::Error => (Colors::BRIGHT_RED, "X"),
        };
        format!(
            "{}{}[{}]{} {} {}",
            self.paint(Colors::BOLD),
            self.paint(color),
            state.as_str().to_uppercase(),
            self.paint(Colors::RESET),
            symbol,
            detail
        )
    }

    pub fn format_unread(&self, unread: u64) -> String {
        match self.format {
            OutputFormat::Json => serde_json::json!({ "unread": unread }).to_string(),
            _ => format!(
                "{}{}[UNREAD]{} {}",
                self.paint(Colors::BOLD),
                self.paint(Colors::BRIGHT_CYAN),
                self.paint(Colors::RESET),
                unread
            ),
        }
    }
}

fn event_color(event: &Event) -> &'static str {
    match &event.payload {
        EventPayload::NewMessage { .. } => Colors::BRIGHT_GREEN,
        EventPayload::MessageRead { .. } => Colors::BRIGHT_BLUE,
        EventPayload::MessageEdited { .. } => Colors::BRIGHT_YELLOW,
        EventPayload::MessageDeleted { .. } => Colors::RED,
        EventPayload::ReactionAdded { .. } | EventPayload::ReactionRemoved { .. } => {
            Colors::BRIGHT_MAGENTA
        }
        EventPayload::Typing => Colors::DIM,
        EventPayload::Unknown { .. } => Colors::WHITE,
    }
}
