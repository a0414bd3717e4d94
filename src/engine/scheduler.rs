use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use uuid::Uuid;

use crate::idempotency;
use crate::models::request::RequestKind;
use crate::models::timeout::{TimeoutKind, TimeoutRecord};
use crate::service::DispatchService;
use crate::state::AppState;

/// Upper bound on how many due records one sweep handles.
const SWEEP_BATCH: usize = 100;

/// Arms (or re-arms) a timeout. The record is keyed by (request, kind);
/// scheduling again overwrites `fire_at` and clears `processed`, so the
/// freshest deadline wins.
pub fn schedule_timeout(
    state: &AppState,
    request_id: Uuid,
    kind: TimeoutKind,
    delay: chrono::Duration,
    request_kind: RequestKind,
) {
    let now = Utc::now();
    state.timeouts.insert(
        (request_id, kind),
        TimeoutRecord {
            request_id,
            kind,
            request_kind,
            fire_at: now + delay,
            processed: false,
            created_at: now,
        },
    );
    debug!(request_id = %request_id, kind = kind.label(), delay_secs = delay.num_seconds(), "timeout armed");
}

/// Marks a pending timeout processed without acting, for transitions that
/// supersede it (start supersedes the no-show deadline).
pub fn cancel_timeout(state: &AppState, request_id: Uuid, kind: TimeoutKind) {
    if let Some(mut record) = state.timeouts.get_mut(&(request_id, kind)) {
        record.processed = true;
    }
}

/// One sweep: selects unprocessed records with `fire_at` in the past,
/// oldest first, and applies each kind's guarded effect. Records are marked
/// processed regardless of outcome; the handlers tolerate requests that
/// already transitioned, so firing is at-most-once by intent and harmless
/// on races.
///
/// Because records live in the store rather than in timers, a process that
/// crashes after arming loses nothing: the next sweep picks up anything now
/// in the past.
pub async fn process_expired(service: &DispatchService) -> usize {
    let now = Utc::now();
    let mut due: Vec<TimeoutRecord> = service
        .state
        .timeouts
        .iter()
        .filter(|entry| !entry.processed && entry.fire_at <= now)
        .map(|entry| entry.value().clone())
        .collect();
    due.sort_by_key(|record| record.fire_at);
    due.truncate(SWEEP_BATCH);

    let mut handled = 0;
    for record in due {
        // claim the record before acting; a concurrent cancel_timeout or
        // competing sweep loses here
        match service
            .state
            .timeouts
            .get_mut(&(record.request_id, record.kind))
        {
            Some(mut entry) if !entry.processed => entry.processed = true,
            _ => continue,
        }

        service
            .state
            .metrics
            .timeouts_processed_total
            .with_label_values(&[record.kind.label()])
            .inc();

        match record.kind {
            TimeoutKind::NoWorker => service.handle_no_worker_timeout(record.request_id).await,
            TimeoutKind::RequesterNoShow => {
                service
                    .handle_no_show_timeout(record.request_id, record.request_kind)
                    .await
            }
            TimeoutKind::PaymentTimeout => {
                service.handle_payment_timeout(record.request_id).await
            }
        }
        handled += 1;
    }

    handled
}

/// Drops processed records so the timeouts map does not grow without bound.
pub fn prune_processed(state: &AppState) -> usize {
    let before = state.timeouts.len();
    state.timeouts.retain(|_, record| !record.processed);
    before - state.timeouts.len()
}

/// The periodic sweep loop. Also purges expired idempotency records, which
/// share the sweep cadence.
pub async fn run_sweeper(service: Arc<DispatchService>, interval: Duration) {
    info!(interval_secs = interval.as_secs(), "timeout sweeper started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let timer = service.state.metrics.sweep_duration_seconds.start_timer();
        let handled = process_expired(&service).await;
        let pruned = prune_processed(&service.state);
        let purged = idempotency::purge_expired(&service.state);
        timer.observe_duration();

        if handled > 0 || pruned > 0 || purged > 0 {
            debug!(handled, pruned, purged, "sweep finished");
        }
    }
}
