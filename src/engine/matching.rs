use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::events::DispatchEvent;
use crate::geo::haversine_km;
use crate::models::request::{ParcelDetails, PackageType, RequestKind, RequestStatus};
use crate::models::worker::{DeliveryCapabilities, GeoPoint, WorkerProfile};
use crate::notify::Notifier;
use crate::state::AppState;

/// One scheduled batch of candidate notifications. `max_candidates` bounds
/// the cumulative candidate list, not the per-wave increment.
pub struct WaveSpec {
    pub offset: Duration,
    pub radius_km: f64,
    pub max_candidates: usize,
}

pub const WAVES: [WaveSpec; 4] = [
    WaveSpec {
        offset: Duration::from_secs(0),
        radius_km: 5.0,
        max_candidates: 1,
    },
    WaveSpec {
        offset: Duration::from_secs(10),
        radius_km: 5.0,
        max_candidates: 3,
    },
    WaveSpec {
        offset: Duration::from_secs(20),
        radius_km: 5.0,
        max_candidates: 8,
    },
    WaveSpec {
        offset: Duration::from_secs(30),
        radius_km: 10.0,
        max_candidates: 20,
    },
];

/// Positions older than this are stale and excluded from candidate search.
const LOCATION_FRESHNESS_SECS: i64 = 300;

pub fn can_carry(caps: &DeliveryCapabilities, parcel: &ParcelDetails) -> bool {
    if caps.max_weight_kg < parcel.weight_kg {
        return false;
    }
    if parcel.insurance_required && !caps.insurance_coverage {
        return false;
    }
    match parcel.package_type {
        PackageType::Fragile => caps.fragile,
        PackageType::Food => caps.food && caps.thermal_bag,
        PackageType::Electronics => caps.electronics,
        PackageType::Document => caps.documents,
        PackageType::Standard => true,
    }
}

/// Online, available workers with a fresh position inside the radius,
/// capability-filtered for parcels, nearest first, at most `limit`.
pub fn find_nearby_workers(
    state: &AppState,
    pickup: &GeoPoint,
    radius_km: f64,
    limit: usize,
    parcel: Option<&ParcelDetails>,
) -> Vec<(WorkerProfile, f64)> {
    let now = Utc::now();

    let mut candidates: Vec<(WorkerProfile, f64)> = state
        .workers
        .iter()
        .filter_map(|entry| {
            let worker = entry.value();
            if !worker.online || !worker.available {
                return None;
            }
            if (now - worker.located_at).num_seconds() > LOCATION_FRESHNESS_SECS {
                return None;
            }
            if let Some(parcel) = parcel {
                if !can_carry(&worker.capabilities, parcel) {
                    return None;
                }
            }
            let distance_km = haversine_km(&worker.location, pickup);
            (distance_km <= radius_km).then(|| (worker.clone(), distance_km))
        })
        .collect();

    candidates.sort_by(|a, b| a.1.total_cmp(&b.1));
    candidates.truncate(limit);
    candidates
}

/// Launches the progressive wave dispatch for a freshly created request.
/// The task only notifies; cancellation of an unmatched request belongs to
/// the durable scheduler.
pub fn spawn_progressive_matching(
    state: Arc<AppState>,
    notifier: Arc<dyn Notifier>,
    request_id: Uuid,
) -> JoinHandle<()> {
    tokio::spawn(run_waves(state, notifier, request_id))
}

async fn run_waves(state: Arc<AppState>, notifier: Arc<dyn Notifier>, request_id: Uuid) {
    let started = tokio::time::Instant::now();
    let mut notified: HashSet<Uuid> = HashSet::new();

    for (index, wave) in WAVES.iter().enumerate() {
        tokio::time::sleep_until(started + wave.offset).await;

        // re-read before firing; the wave is skipped once the request left
        // REQUESTED (matched or cancelled in the meantime)
        let Some((kind, pickup, parcel)) = state.requests.get(&request_id).and_then(|entry| {
            (entry.status == RequestStatus::Requested)
                .then(|| (entry.kind, entry.pickup, entry.parcel.clone()))
        }) else {
            debug!(request_id = %request_id, wave = index + 1, "request no longer matchable, stopping waves");
            return;
        };

        let candidates = find_nearby_workers(
            &state,
            &pickup,
            wave.radius_km,
            wave.max_candidates,
            parcel.as_ref(),
        );

        let mut fresh = 0usize;
        for (worker, distance_km) in candidates {
            if !notified.insert(worker.id) {
                continue;
            }
            fresh += 1;

            let (noun, id_key) = match kind {
                RequestKind::Trip => ("trip", "trip_id"),
                RequestKind::Parcel => ("delivery", "delivery_id"),
            };
            let result = notifier.notify(
                worker.id,
                &format!("New {noun} request"),
                &format!(
                    "A {noun} is available {} m from you",
                    (distance_km * 1000.0).round() as i64
                ),
                json!({
                    "type": format!("new_{noun}_request"),
                    id_key: request_id,
                    "pickup_lat": pickup.lat,
                    "pickup_lng": pickup.lng,
                    "distance_km": distance_km,
                }),
            );
            if let Err(err) = result {
                // one undeliverable worker must not sink the wave
                warn!(request_id = %request_id, worker_id = %worker.id, error = %err, "worker notification failed");
                continue;
            }

            state
                .metrics
                .wave_notifications_total
                .with_label_values(&[&(index + 1).to_string()])
                .inc();
            state.emit(DispatchEvent::WorkerNotified {
                request_id,
                worker_id: worker.id,
                wave: index + 1,
                distance_km,
            });
        }

        info!(
            request_id = %request_id,
            wave = index + 1,
            fresh,
            total_notified = notified.len(),
            "matching wave dispatched"
        );
    }
}
