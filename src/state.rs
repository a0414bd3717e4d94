use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::engine::lifecycle::{self, Operation};
use crate::events::DispatchEvent;
use crate::idempotency::IdempotencyRecord;
use crate::models::pricing::PricingConfig;
use crate::models::request::{Request, RequestKind, RequestStatus};
use crate::models::timeout::{TimeoutKind, TimeoutRecord};
use crate::models::worker::WorkerProfile;
use crate::observability::metrics::Metrics;

/// Shared store. Maps stand in for the relational tables; a `DashMap` entry
/// guard is the exclusive row lock, and every transition re-checks the
/// expected prior status inside the guard as a conditional-update backstop.
///
/// Request and worker entry guards are never held at the same time; an
/// accept reserves the worker first and rolls that back if the request
/// claim loses.
pub struct AppState {
    pub requests: DashMap<Uuid, Request>,
    pub workers: DashMap<Uuid, WorkerProfile>,
    pub timeouts: DashMap<(Uuid, TimeoutKind), TimeoutRecord>,
    pub idempotency: DashMap<String, IdempotencyRecord>,
    pub pricing: DashMap<Uuid, PricingConfig>,
    pub events_tx: broadcast::Sender<DispatchEvent>,
    pub metrics: Metrics,
}

#[derive(Debug)]
pub enum ClaimError {
    NotFound,
    StatusMismatch { actual: RequestStatus },
}

impl AppState {
    pub fn new(event_buffer_size: usize) -> Self {
        let (events_tx, _unused_rx) = broadcast::channel(event_buffer_size);

        Self {
            requests: DashMap::new(),
            workers: DashMap::new(),
            timeouts: DashMap::new(),
            idempotency: DashMap::new(),
            pricing: DashMap::new(),
            events_tx,
            metrics: Metrics::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.events_tx.subscribe()
    }

    pub fn emit(&self, event: DispatchEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Installs the default pricing configuration for any kind that has no
    /// active one yet, so frozen fares always reference a stored config.
    pub fn seed_default_pricing(&self) {
        for kind in [RequestKind::Trip, RequestKind::Parcel] {
            let has_active = self
                .pricing
                .iter()
                .any(|entry| entry.kind == kind && entry.active);
            if !has_active {
                let config = PricingConfig::default_for(kind);
                self.pricing.insert(config.id, config);
            }
        }
    }

    /// Most recently created active configuration for the kind; inactive
    /// configurations are retained for settlement of already-frozen fares.
    pub fn active_pricing(&self, kind: RequestKind) -> PricingConfig {
        self.pricing
            .iter()
            .filter(|entry| entry.kind == kind && entry.active)
            .max_by_key(|entry| entry.created_at)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| PricingConfig::default_for(kind))
    }

    pub fn pricing_by_id(&self, id: Uuid) -> Option<PricingConfig> {
        self.pricing.get(&id).map(|entry| entry.value().clone())
    }

    /// The claim primitive: takes the exclusive entry guard, verifies the
    /// status still equals `expected`, then applies the mutation. Exactly
    /// one of N concurrent claimants with the same `expected` succeeds.
    pub fn update_request_if<F>(
        &self,
        id: Uuid,
        expected: RequestStatus,
        mutate: F,
    ) -> Result<Request, ClaimError>
    where
        F: FnOnce(&mut Request),
    {
        let mut entry = self.requests.get_mut(&id).ok_or(ClaimError::NotFound)?;
        if entry.status != expected {
            return Err(ClaimError::StatusMismatch {
                actual: entry.status,
            });
        }
        mutate(&mut entry);
        Ok(entry.clone())
    }

    /// Same claim discipline, but the expected-state set comes from the
    /// transition table: `op` is applied only if it is legal from the
    /// current status. The mutation receives the resulting status.
    pub fn apply_transition<F>(
        &self,
        id: Uuid,
        op: Operation,
        mutate: F,
    ) -> Result<Request, ClaimError>
    where
        F: FnOnce(&mut Request, RequestStatus),
    {
        let mut entry = self.requests.get_mut(&id).ok_or(ClaimError::NotFound)?;
        match lifecycle::next_status(entry.kind, entry.status, op) {
            Some(next) => {
                mutate(&mut entry, next);
                Ok(entry.clone())
            }
            None => Err(ClaimError::StatusMismatch {
                actual: entry.status,
            }),
        }
    }

    pub fn request(&self, id: Uuid) -> Option<Request> {
        self.requests.get(&id).map(|entry| entry.value().clone())
    }

    pub fn worker(&self, id: Uuid) -> Option<WorkerProfile> {
        self.workers.get(&id).map(|entry| entry.value().clone())
    }

    /// Claims a worker for an assignment. Returns false when the worker is
    /// missing, offline, or already reserved by another request; exactly
    /// one of N concurrent claimants flips the flag.
    pub fn reserve_worker(&self, worker_id: Uuid) -> bool {
        let reserved = match self.workers.get_mut(&worker_id) {
            Some(mut worker) if worker.online && worker.available => {
                worker.available = false;
                worker.updated_at = Utc::now();
                true
            }
            _ => false,
        };
        if reserved {
            self.refresh_worker_gauge();
        }
        reserved
    }

    /// Marks a worker available again after their request reached a
    /// terminal-for-the-worker status. No-op for workers who went offline.
    pub fn release_worker(&self, worker_id: Uuid) {
        if let Some(mut worker) = self.workers.get_mut(&worker_id) {
            if worker.online {
                worker.available = true;
            }
            worker.updated_at = Utc::now();
        }
        self.refresh_worker_gauge();
    }

    pub fn refresh_worker_gauge(&self) {
        let available = self
            .workers
            .iter()
            .filter(|entry| entry.online && entry.available)
            .count();
        self.metrics.workers_available.set(available as i64);
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::{AppState, ClaimError};
    use crate::engine::lifecycle::Operation;
    use crate::models::request::{
        PaymentMethod, PaymentStatus, Request, RequestKind, RequestStatus,
    };
    use crate::models::worker::GeoPoint;

    fn request(status: RequestStatus) -> Request {
        Request {
            id: Uuid::new_v4(),
            code: "TR-TEST".to_string(),
            kind: RequestKind::Trip,
            requester_id: Uuid::new_v4(),
            worker_id: None,
            pickup: GeoPoint { lat: 0.0, lng: 0.0 },
            dropoff: GeoPoint { lat: 0.1, lng: 0.1 },
            pickup_address: "a".to_string(),
            dropoff_address: "b".to_string(),
            estimated_distance_km: 5.0,
            estimated_duration_min: 10,
            estimated_fare: 2500,
            frozen_fare: None,
            actual_distance_km: None,
            actual_duration_min: None,
            final_fare: None,
            payment_method: PaymentMethod::Wallet,
            payment_status: PaymentStatus::Unpaid,
            status,
            cancellation_reason: None,
            cancellation_fee: None,
            parcel: None,
            rating_from_requester: None,
            rating_from_worker: None,
            created_at: Utc::now(),
            assigned_at: None,
            arrived_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            paid_at: None,
        }
    }

    #[test]
    fn claim_succeeds_when_status_matches() {
        let state = AppState::new(16);
        let r = request(RequestStatus::Requested);
        let id = r.id;
        state.requests.insert(id, r);

        let updated = state
            .update_request_if(id, RequestStatus::Requested, |r| {
                r.status = RequestStatus::Assigned;
            })
            .unwrap();

        assert_eq!(updated.status, RequestStatus::Assigned);
        assert_eq!(state.request(id).unwrap().status, RequestStatus::Assigned);
    }

    #[test]
    fn claim_fails_and_leaves_state_untouched_on_mismatch() {
        let state = AppState::new(16);
        let r = request(RequestStatus::Assigned);
        let id = r.id;
        state.requests.insert(id, r);

        let err = state
            .update_request_if(id, RequestStatus::Requested, |r| {
                r.status = RequestStatus::Arrived;
            })
            .unwrap_err();

        match err {
            ClaimError::StatusMismatch { actual } => assert_eq!(actual, RequestStatus::Assigned),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(state.request(id).unwrap().status, RequestStatus::Assigned);
    }

    #[test]
    fn claim_reports_missing_request() {
        let state = AppState::new(16);
        let err = state
            .update_request_if(Uuid::new_v4(), RequestStatus::Requested, |_| {})
            .unwrap_err();
        assert!(matches!(err, ClaimError::NotFound));
    }

    #[test]
    fn apply_transition_follows_the_table() {
        let state = AppState::new(16);
        let r = request(RequestStatus::Requested);
        let id = r.id;
        state.requests.insert(id, r);

        let updated = state
            .apply_transition(id, Operation::Accept, |r, next| {
                r.status = next;
            })
            .unwrap();
        assert_eq!(updated.status, RequestStatus::Assigned);

        let err = state
            .apply_transition(id, Operation::Complete, |r, next| {
                r.status = next;
            })
            .unwrap_err();
        match err {
            ClaimError::StatusMismatch { actual } => assert_eq!(actual, RequestStatus::Assigned),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(state.request(id).unwrap().status, RequestStatus::Assigned);
    }

    #[test]
    fn worker_reservation_has_a_single_winner() {
        let state = AppState::new(16);
        let worker_id = Uuid::new_v4();
        state.workers.insert(
            worker_id,
            crate::models::worker::WorkerProfile {
                id: worker_id,
                name: "w".to_string(),
                online: true,
                available: true,
                location: GeoPoint { lat: 0.0, lng: 0.0 },
                located_at: Utc::now(),
                capabilities: Default::default(),
                rating: 0.0,
                total_ratings: 0,
                updated_at: Utc::now(),
            },
        );

        assert!(state.reserve_worker(worker_id));
        assert!(!state.reserve_worker(worker_id));
        assert!(!state.reserve_worker(Uuid::new_v4()));

        state.release_worker(worker_id);
        assert!(state.worker(worker_id).unwrap().available);
    }
}
