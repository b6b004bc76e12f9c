use anyhow::Result;
use clap::Parser;
use inbox_realtime::{
    ConnectionState, EventDispatcher, NotificationAggregator, RealtimeClient,
    cli::Args,
    config::Config,
    error::AggregatorError,
    formatter::OutputFormat,
    monitoring::setup_metrics,
    notifications::AggregatorConfig,
    store::HttpNotificationStore,
    tracing_setup::setup_tracing,
    ui::{UIController, UIOptions, UiEvent, UiSender, create_ui_channel},
};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    time::{Instant, Interval, MissedTickBehavior, interval_at},
};
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_tracing(&args.log_level, args.json_logs)?;

    info!("Starting inbox realtime client v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_args(&args)?;

    if config.metrics.enabled {
        setup_metrics(config.metrics.port).await?;
    }

    let dispatcher = EventDispatcher::new();
    let (ui_tx, ui_rx) = create_ui_channel();

    let mut aggregator = NotificationAggregator::new(
        AggregatorConfig::from(&config.notifications),
        config.session.user_id.clone(),
    );
    if let Some(token) = &config.session.token {
        let store = HttpNotificationStore::new(config.notifications.api_base.clone(), token)?;
        aggregator = aggregator.with_store(Arc::new(store));
    } else {
        warn!("No session token; unread counts will not be reconciled with the server");
    }
    let aggregator = Arc::new(aggregator);
    let _unread_listener = aggregator.attach(&dispatcher);

    let forward_tx = ui_tx.clone();
    let _ui_listener = dispatcher.add_wildcard_listener(move |event| {
        if forward_tx
            .try_send(UiEvent::Inbox(Arc::new(event.clone())))
            .is_err()
        {
            debug!("UI channel full, dropping rendered event");
        }
        Ok(())
    });

    let client = RealtimeClient::with_websocket(config.realtime.clone(), dispatcher);

    let mut ui = UIController::new(
        ui_rx,
        OutputFormat::from(config.output.format.as_str()),
        UIOptions {
            colored: config.output.colored,
            quiet: config.output.quiet,
            endpoint: config.endpoint.to_string(),
        },
    );
    let ui_task = tokio::spawn(async move { ui.run().await });

    let mut watchers = vec![
        tokio::spawn(forward_unread(aggregator.subscribe_unread(), ui_tx.clone())),
        tokio::spawn(reconcile(
            Arc::clone(&aggregator),
            client.subscribe_state(),
            config.notifications.refresh_interval,
            ui_tx.clone(),
        )),
    ];
    if config.notifications.stream {
        watchers.push(tokio::spawn(follow_notification_stream(
            Arc::clone(&aggregator),
            config.notifications.stream_retry_delay,
        )));
    }

    client.connect(config.endpoint.as_str(), config.session.token.as_deref())?;

    info!("Client started. Press Ctrl+C to shutdown...");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    client.disconnect();
    for watcher in watchers {
        watcher.abort();
    }
    let _ = ui_tx.send(UiEvent::Stopping).await;
    drop(ui_tx);
    let _ = ui_task.await;

    info!(
        unread = aggregator.unread_count(),
        frames = client
            .stats()
            .frames_received
            .load(std::sync::atomic::Ordering::Relaxed),
        "Client stopped"
    );
    Ok(())
}

async fn forward_unread(mut unread: watch::Receiver<u64>, ui_tx: UiSender) {
    loop {
        let count = *unread.borrow_and_update();
        if ui_tx.send(UiEvent::Unread(count)).await.is_err() || unread.changed().await.is_err() {
            return;
        }
    }
}

/// Mirror connection state to the UI and refresh unread state from the
/// server on every new session and on a fixed cadence.
async fn reconcile(
    aggregator: Arc<NotificationAggregator>,
    mut state: watch::Receiver<ConnectionState>,
    refresh_interval: Option<Duration>,
    ui_tx: UiSender,
) {
    let mut ticker = refresh_interval.map(|period| {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    return;
                }
                let current = *state.borrow_and_update();
                if ui_tx.send(UiEvent::State(current)).await.is_err() {
                    return;
                }
                if current == ConnectionState::Connected {
                    refresh(&aggregator, &ui_tx).await;
                }
            }
            _ = next_tick(&mut ticker) => {
                refresh(&aggregator, &ui_tx).await;
            }
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Keep the server push channel open, reopening it after `retry`.
async fn follow_notification_stream(aggregator: Arc<NotificationAggregator>, retry: Duration) {
    loop {
        match aggregator.follow_stream().await {
            Ok(()) => debug!("Notification stream closed by server"),
            Err(AggregatorError::NoStore) => return,
            Err(e) => debug!("Notification stream failed: {}", e),
        }
        tokio::time::sleep(retry).await;
    }
}

async fn refresh(aggregator: &NotificationAggregator, ui_tx: &UiSender) {
    match aggregator.refresh().await {
        Ok(()) | Err(AggregatorError::NoStore) => {}
        Err(e) => {
            debug!("Notification refresh failed: {}", e);
            let _ = ui_tx
                .send(UiEvent::Warning(format!("refresh failed: {e}")))
                .await;
        }
    }
}
