/// file: src/ui.rs
/// description: terminal presentation of connection state, inbox events and unread count
use crate::{
    client_state::ConnectionState,
    events::Event,
    formatter::{Colors, EventFormatter, OutputFormat},
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone)]
pub enum UiEvent {
    State(ConnectionState),
    Inbox(Arc<Event>),
    Unread(u64),
    Warning(String),
    Stopping,
}

// Bounded so a stalled terminal cannot grow memory without limit.
const UI_CHANNEL_CAPACITY: usize = 1_024;

pub type UiSender = mpsc::Sender<UiEvent>;
pub type UiReceiver = mpsc::Receiver<UiEvent>;

pub fn create_ui_channel() -> (UiSender, UiReceiver) {
    mpsc::channel(UI_CHANNEL_CAPACITY)
}

pub struct UIOptions {
    pub colored: bool,
    pub quiet: bool,
    pub endpoint: String,
}

pub struct UIController {
    receiver: UiReceiver,
    formatter: EventFormatter,
    options: UIOptions,
    header_printed: bool,
    last_unread: Option<u64>,
}

impl UIController {
    pub fn new(receiver: UiReceiver, format: OutputFormat, options: UIOptions) -> Self {
        Self {
            receiver,
            formatter: EventFormatter::new(format, options.colored, options.quiet),
            options,
            header_printed: false,
            last_unread: None,
        }
    }

    /// Render until `Stopping` arrives or every sender is gone.
    pub async fn run(&mut self) {
        self.print_startup_banner();
        while let Some(event) = self.receiver.recv().await {
            if !self.handle_event(event) {
                break;
            }
        }
        debug!(events = self.formatter.event_count(), "UI loop finished");
    }

    fn handle_event(&mut self, event: UiEvent) -> bool {
        match event {
            UiEvent::State(state) => {
                if self.options.quiet && state != ConnectionState::Error {
                    return true;
                }
                let detail = match state {
                    ConnectionState::Connecting => self.options.endpoint.clone(),
                    ConnectionState::Connected => "listening for inbox events".to_string(),
                    ConnectionState::Disconnected => "connection lost".to_string(),
                    ConnectionState::Error => "not connected".to_string(),
                };
                println!("{}", self.formatter.format_state(state, &detail));
            }
            UiEvent::Inbox(event) => {
                if !self.header_printed {
                    self.formatter.print_header();
                    self.header_printed = true;
                }
                self.formatter.print_event(&event);
            }
            UiEvent::Unread(unread) => {
                if self.last_unread != Some(unread) {
                    self.last_unread = Some(unread);
                    println!("{}", self.formatter.format_unread(unread));
                }
            }
            UiEvent::Warning(message) => self.print_warning(&message),
            UiEvent::Stopping => {
                if !self.options.quiet {
                    println!(
                        "{}",
                        self.formatter
                            .format_state(ConnectionState::Disconnected, "shutting down")
                    );
                }
                return false;
            }
        }
        true
    }

    fn print_startup_banner(&self) {
        if self.options.quiet {
            return;
        }
        let (bold, cyan, reset) = if self.options.colored {
            (Colors::BOLD, Colors::BRIGHT_CYAN, Colors::RESET)
        } else {
            ("", "", "")
        };
        println!();
        println!("{bold}{cyan}INBOX REALTIME v{}{reset}", env!("CARGO_PKG_VERSION"));
        println!("{bold}{cyan}{}{reset}", "=".repeat(40));
        println!();
    }

    fn print_warning(&self, message: &str) {
        let (bold, red, reset) = if self.options.colored {
            (Colors::BOLD, Colors::BRIGHT_RED, Colors::RESET)
        } else {
            ("", "", "")
        };
        eprintln!("{bold}{red}[WARN]{reset} ! {message}");
    }
}
