use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use notify_hub::calendar::{
    CalendarAuth, CalendarCreator, DryRunCalendar, GoogleCalendarConfig, GoogleCalendarCreator,
};
use notify_hub::channels::{Source, TelegramConfig, TelegramSource};
use notify_hub::classifier::{LlmConfig, create_classifier};
use notify_hub::config::{Cli, PipelineConfig};
use notify_hub::dashboard;
use notify_hub::notifier::{DryRunNotifier, Notifier, PushoverConfig, PushoverNotifier};
use notify_hub::pipeline::{self, processor::Processor};
use notify_hub::store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    let config = PipelineConfig::from_cli(&cli)?;

    eprintln!("🔔 Notify Hub v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Dashboard: http://0.0.0.0:{}/", config.dashboard_port);
    eprintln!("   Live updates: http://0.0.0.0:{}/events", config.dashboard_port);
    if config.dry_run {
        eprintln!("   Mode: dry run (nothing is sent)");
    }

    // ── Collaborators ───────────────────────────────────────────────────
    let classifier = create_classifier(LlmConfig::from_env());

    let notifier: Arc<dyn Notifier> = match PushoverConfig::from_env()? {
        Some(pushover) if !config.dry_run => Arc::new(PushoverNotifier::new(pushover)),
        Some(_) => Arc::new(DryRunNotifier::new()),
        None => {
            if !config.dry_run {
                tracing::warn!("PUSHOVER_APP_TOKEN not set, notifications will only be logged");
            }
            Arc::new(DryRunNotifier::new())
        }
    };

    let calendar: Option<Arc<dyn CalendarCreator>> =
        GoogleCalendarConfig::from_env(config.dry_run)?.map(|google| {
            if config.dry_run {
                Arc::new(DryRunCalendar::new()) as Arc<dyn CalendarCreator>
            } else {
                let auth = match google.auth {
                    CalendarAuth::Refresh(_) => "refresh token",
                    CalendarAuth::AccessToken(_) => "access token",
                };
                eprintln!("   Calendar: {} ({auth})", google.calendar_id);
                Arc::new(GoogleCalendarCreator::new(google)) as Arc<dyn CalendarCreator>
            }
        });

    let store = Store::new(config.history_capacity);

    let mut processor = Processor::new(classifier, notifier, store.clone());
    if let Some(calendar) = calendar {
        processor = processor.with_calendar(calendar);
    }

    // ── Sources ─────────────────────────────────────────────────────────
    let mut sources: Vec<Arc<dyn Source>> = Vec::new();
    if let Some(telegram) = TelegramConfig::from_env() {
        eprintln!("   Telegram: enabled ({} allowed users)", telegram.allowed_users.len());
        sources.push(Arc::new(TelegramSource::new(telegram)));
    }
    if sources.is_empty() {
        tracing::warn!("No sources configured; set TELEGRAM_BOT_TOKEN to receive events");
    }

    // ── Shutdown ────────────────────────────────────────────────────────
    let cancel = CancellationToken::new();
    tokio::spawn(wait_for_shutdown(cancel.clone()));

    let dashboard_handle = tokio::spawn(dashboard::serve(
        store.clone(),
        config.dashboard_port,
        cancel.clone(),
    ));

    let summary = pipeline::run(
        sources,
        processor,
        store.clone(),
        config.queue_capacity,
        cancel.clone(),
    )
    .await
    .context("pipeline failed")?;

    // Stop the dashboard once the pipeline has drained
    cancel.cancel();
    dashboard_handle
        .await
        .context("dashboard task panicked")?
        .context("dashboard failed")?;

    let stats = store.stats().await;
    tracing::info!(
        processed = summary.processed,
        failed_sources = summary.failed_sources,
        urgent = stats.urgent_events,
        action_items = stats.total_action_items,
        "Shutdown complete"
    );
    Ok(())
}

/// Cancel on Ctrl-C or SIGTERM.
async fn wait_for_shutdown(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable, using Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("Shutdown requested, draining pipeline");
    cancel.cancel();
}
