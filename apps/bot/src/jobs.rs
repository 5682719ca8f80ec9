//! Background jobs: the alert polling loop, the daily close refresh and the
//! startup catch-up.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use chrono_tz::America::New_York;
use stock::period::is_weekend;
use stock::tracking::RefreshReport;
use stock::{AlertChecker, Tracker};
use tokio::time::MissedTickBehavior;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, instrument};
use tracing_futures::Instrument;

/// US markets are closed when it is Saturday or Sunday in New York.
pub fn is_market_weekend(now: DateTime<Utc>) -> bool {
    is_weekend(now.with_timezone(&New_York).date_naive())
}

/// Evaluates pending alerts every `every` until the process exits. Ticks
/// that land on a weekend are skipped without touching the provider.
pub async fn run_alert_loop(checker: Arc<AlertChecker>, every: Duration) {
    let mut tick = tokio::time::interval(every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(interval_secs = every.as_secs(), "alert loop started");

    loop {
        tick.tick().await;

        if is_market_weekend(Utc::now()) {
            continue;
        }

        match checker.evaluate().await {
            Ok(report) if report.triggered > 0 || report.mark_failures > 0 => info!(
                symbols = report.symbols,
                triggered = report.triggered,
                delivery_failures = report.delivery_failures,
                mark_failures = report.mark_failures,
                "alerts fired"
            ),
            Ok(report) => debug!(
                symbols = report.symbols,
                entries = report.entries,
                quote_failures = report.quote_failures,
                "alert tick"
            ),
            Err(e) => error!(error = ?e, "alert evaluation failed"),
        }
    }
}

#[instrument(name = "run_daily_refresh", skip(tracker))]
pub async fn run_daily_refresh(tracker: Arc<Tracker>) -> Result<RefreshReport> {
    let today = Utc::now().date_naive();
    Ok(tracker.refresh_tracked(today).await?)
}

/// Registers the daily refresh on `sched` with a UTC cron expression.
pub async fn schedule_daily_refresh(
    sched: &JobScheduler,
    cron: &str,
    tracker: Arc<Tracker>,
) -> Result<()> {
    sched
        .add(Job::new_async_tz(cron, chrono_tz::UTC, move |_uuid, _l| {
            let tracker = Arc::clone(&tracker);

            Box::pin(async move {
                if let Err(e) = run_daily_refresh(tracker).await {
                    error!(error = ?e, "daily refresh failed");
                }
            })
        })?)
        .await?;

    info!(cron, "daily refresh scheduled");
    Ok(())
}

/// Backfills days missed while the bot was offline, in the background.
pub fn spawn_catch_up(tracker: Arc<Tracker>) {
    let span = tracing::info_span!("startup_catch_up");

    tokio::spawn(
        async move {
            let today = Utc::now().date_naive();
            if let Err(e) = tracker.catch_up(today).await {
                error!(error = ?e, "catch-up failed");
            }
        }
        .instrument(span),
    );
}
