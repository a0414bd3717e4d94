use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::fare::{self, FareEstimate};
use crate::engine::lifecycle::{self, Operation};
use crate::engine::{matching, scheduler};
use crate::error::DispatchError;
use crate::events::DispatchEvent;
use crate::idempotency;
use crate::models::request::{
    CancelActor, FrozenFare, ParcelDetails, PaymentMethod, PaymentStatus, Rating, Request,
    RequestKind, RequestStatus,
};
use crate::models::timeout::TimeoutKind;
use crate::models::worker::GeoPoint;
use crate::state::ClaimError;

use super::{request_code, DispatchService};

/// Share of the quoted fare charged when a requester cancels a parcel
/// already in transit.
const LATE_PARCEL_CANCEL_FEE: f64 = 0.30;

#[derive(Debug, Clone)]
pub struct EstimateParams {
    pub kind: RequestKind,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub parcel: Option<ParcelDetails>,
}

#[derive(Debug, Clone)]
pub struct CreateRequestParams {
    pub kind: RequestKind,
    pub requester_id: Uuid,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub pickup_address: String,
    pub dropoff_address: String,
    pub payment_method: PaymentMethod,
    pub parcel: Option<ParcelDetails>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartyRole {
    Requester,
    Worker,
}

fn request_not_found(id: Uuid) -> DispatchError {
    DispatchError::NotFound(format!("request {id} not found"))
}

fn validate_kind_payload(
    kind: RequestKind,
    parcel: Option<&ParcelDetails>,
) -> Result<(), DispatchError> {
    match (kind, parcel) {
        (RequestKind::Parcel, None) => Err(DispatchError::InvalidRequest(
            "parcel details are required for a parcel request".to_string(),
        )),
        (RequestKind::Parcel, Some(details)) if details.weight_kg <= 0.0 => Err(
            DispatchError::InvalidRequest("parcel weight must be positive".to_string()),
        ),
        (RequestKind::Trip, Some(_)) => Err(DispatchError::InvalidRequest(
            "parcel details are not valid for a trip".to_string(),
        )),
        _ => Ok(()),
    }
}

/// Shared body of every cancellation path. The worker id is retained only
/// when the requester cancelled; everyone else nulls it for the invariant
/// that only active and requester-cancelled requests reference a worker.
fn apply_cancellation(
    r: &mut Request,
    next: RequestStatus,
    actor: CancelActor,
    reason: &str,
    now: DateTime<Utc>,
    released: &mut Option<Uuid>,
) {
    *released = r.worker_id;
    if actor == CancelActor::Requester
        && r.kind == RequestKind::Parcel
        && r.status == RequestStatus::InProgress
    {
        let quoted = r.frozen_fare.as_ref().map(|f| f.amount).unwrap_or(r.estimated_fare);
        r.cancellation_fee = Some((quoted as f64 * LATE_PARCEL_CANCEL_FEE).round() as i64);
    }
    if actor != CancelActor::Requester {
        r.worker_id = None;
    }
    r.status = next;
    r.cancelled_at = Some(now);
    r.cancellation_reason = Some(reason.to_string());
}

impl DispatchService {
    pub fn estimate(&self, params: &EstimateParams) -> Result<FareEstimate, DispatchError> {
        validate_kind_payload(params.kind, params.parcel.as_ref())?;
        let config = self.state.active_pricing(params.kind);
        fare::estimate(
            self.planner.as_ref(),
            &config,
            &params.pickup,
            &params.dropoff,
            params.parcel.as_ref(),
            Utc::now().time(),
        )
    }

    /// Inserts the request in `Requested`, arms the no-worker deadline in
    /// the timeout store and kicks off progressive matching.
    pub fn create_request(&self, params: CreateRequestParams) -> Result<Request, DispatchError> {
        validate_kind_payload(params.kind, params.parcel.as_ref())?;

        let quote = self.estimate(&EstimateParams {
            kind: params.kind,
            pickup: params.pickup,
            dropoff: params.dropoff,
            parcel: params.parcel.clone(),
        })?;

        if params.payment_method == PaymentMethod::Wallet {
            match self
                .ledger
                .has_sufficient_balance(params.requester_id, quote.fare)
            {
                Ok(true) => {}
                Ok(false) => return Err(DispatchError::InsufficientBalance),
                Err(err) => {
                    warn!(error = %err, "balance check unavailable, accepting request anyway");
                }
            }
        }

        let now = Utc::now();
        let request = Request {
            id: Uuid::new_v4(),
            code: request_code(params.kind),
            kind: params.kind,
            requester_id: params.requester_id,
            worker_id: None,
            pickup: params.pickup,
            dropoff: params.dropoff,
            pickup_address: params.pickup_address,
            dropoff_address: params.dropoff_address,
            estimated_distance_km: quote.distance_km,
            estimated_duration_min: quote.duration_min,
            estimated_fare: quote.fare,
            frozen_fare: None,
            actual_distance_km: None,
            actual_duration_min: None,
            final_fare: None,
            payment_method: params.payment_method,
            payment_status: PaymentStatus::Unpaid,
            status: RequestStatus::Requested,
            cancellation_reason: None,
            cancellation_fee: None,
            parcel: params.parcel,
            rating_from_requester: None,
            rating_from_worker: None,
            created_at: now,
            assigned_at: None,
            arrived_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            paid_at: None,
        };
        self.state.requests.insert(request.id, request.clone());

        scheduler::schedule_timeout(
            &self.state,
            request.id,
            TimeoutKind::NoWorker,
            self.timeouts.no_worker,
            request.kind,
        );
        matching::spawn_progressive_matching(
            self.state.clone(),
            self.notifier.clone(),
            request.id,
        );

        self.state.emit(DispatchEvent::RequestCreated {
            request_id: request.id,
            kind: request.kind,
        });
        self.audit.record(
            Some(params.requester_id),
            "request_created",
            "request",
            request.id,
            json!({ "code": request.code, "kind": request.kind, "estimated_fare": quote.fare }),
        );
        info!(request_id = %request.id, code = %request.code, estimated_fare = quote.fare, "request created");

        Ok(request)
    }

    /// The contested transition: N concurrent accepts produce exactly one
    /// winner. The worker reservation is taken first and handed back if the
    /// request claim loses.
    pub async fn accept(
        &self,
        request_id: Uuid,
        worker_id: Uuid,
        token: Option<&str>,
    ) -> Result<Request, DispatchError> {
        idempotency::guarded(&self.state, token, worker_id, "accept", || {
            self.accept_inner(request_id, worker_id)
        })
        .await
    }

    async fn accept_inner(
        &self,
        request_id: Uuid,
        worker_id: Uuid,
    ) -> Result<Request, DispatchError> {
        let request = self
            .state
            .request(request_id)
            .ok_or_else(|| request_not_found(request_id))?;
        self.state
            .worker(worker_id)
            .ok_or_else(|| DispatchError::NotFound(format!("worker {worker_id} not found")))?;
        let config = self.state.active_pricing(request.kind);

        if !self.state.reserve_worker(worker_id) {
            self.record_outcome("accept", "worker_unavailable");
            return Err(DispatchError::WorkerUnavailable);
        }

        let now = Utc::now();
        let claimed = self
            .state
            .apply_transition(request_id, Operation::Accept, |r, next| {
                r.status = next;
                r.worker_id = Some(worker_id);
                r.assigned_at = Some(now);
                r.frozen_fare = Some(FrozenFare {
                    amount: r.estimated_fare,
                    pricing_config_id: config.id,
                    frozen_at: now,
                });
            });

        let accepted = match claimed {
            Ok(request) => request,
            Err(err) => {
                // the reservation belongs to the winner; give it back
                self.state.release_worker(worker_id);
                self.record_outcome("accept", "rejected");
                return Err(match err {
                    ClaimError::NotFound => request_not_found(request_id),
                    ClaimError::StatusMismatch { actual } => match actual {
                        RequestStatus::Assigned
                        | RequestStatus::Arrived
                        | RequestStatus::InProgress
                        | RequestStatus::Completed
                        | RequestStatus::Paid => DispatchError::AlreadyAccepted,
                        _ => DispatchError::InvalidTransition {
                            operation: "accept",
                            current: actual,
                        },
                    },
                });
            }
        };

        self.record_outcome("accept", "ok");
        self.state.emit(DispatchEvent::RequestAssigned {
            request_id,
            worker_id,
        });
        self.audit.record(
            Some(worker_id),
            "request_accepted",
            "request",
            request_id,
            json!({ "frozen_fare": accepted.frozen_fare.as_ref().map(|f| f.amount) }),
        );
        self.notify_quietly(
            accepted.requester_id,
            "Driver assigned",
            "A driver accepted your request and is on the way",
            json!({ "type": "request_accepted", "request_id": request_id, "worker_id": worker_id }),
        );
        info!(request_id = %request_id, worker_id = %worker_id, "request accepted");

        Ok(accepted)
    }

    pub fn mark_arrived(
        &self,
        request_id: Uuid,
        worker_id: Uuid,
    ) -> Result<Request, DispatchError> {
        self.require_assigned_worker(request_id, worker_id)?;

        let now = Utc::now();
        let arrived = self
            .state
            .apply_transition(request_id, Operation::MarkArrived, |r, next| {
                r.status = next;
                r.arrived_at = Some(now);
            })
            .map_err(|err| {
                self.record_outcome("mark_arrived", "rejected");
                map_claim_err("mark_arrived", RequestStatus::Arrived, request_id, err)
            })?;

        let delay = match arrived.kind {
            RequestKind::Trip => self.timeouts.trip_no_show,
            RequestKind::Parcel => self.timeouts.parcel_no_show,
        };
        scheduler::schedule_timeout(
            &self.state,
            request_id,
            TimeoutKind::RequesterNoShow,
            delay,
            arrived.kind,
        );

        self.record_outcome("mark_arrived", "ok");
        self.state
            .emit(DispatchEvent::WorkerArrived { request_id });
        self.audit.record(
            Some(worker_id),
            "worker_arrived",
            "request",
            request_id,
            json!({}),
        );
        self.notify_quietly(
            arrived.requester_id,
            "Driver arrived",
            "Your driver is waiting at the pickup point",
            json!({ "type": "worker_arrived", "request_id": request_id }),
        );

        Ok(arrived)
    }

    pub fn start(&self, request_id: Uuid, worker_id: Uuid) -> Result<Request, DispatchError> {
        self.require_assigned_worker(request_id, worker_id)?;

        let now = Utc::now();
        let started = self
            .state
            .apply_transition(request_id, Operation::Start, |r, next| {
                r.status = next;
                r.started_at = Some(now);
            })
            .map_err(|err| {
                self.record_outcome("start", "rejected");
                map_claim_err("start", RequestStatus::InProgress, request_id, err)
            })?;

        // the no-show deadline is superseded once the work begins
        scheduler::cancel_timeout(&self.state, request_id, TimeoutKind::RequesterNoShow);

        self.record_outcome("start", "ok");
        self.state.emit(DispatchEvent::RequestStarted { request_id });
        self.audit.record(
            Some(worker_id),
            "request_started",
            "request",
            request_id,
            json!({}),
        );

        Ok(started)
    }

    pub async fn complete(
        &self,
        request_id: Uuid,
        worker_id: Uuid,
        actual_distance_km: f64,
        actual_duration_min: u32,
        token: Option<&str>,
    ) -> Result<Request, DispatchError> {
        idempotency::guarded(&self.state, token, worker_id, "complete", || {
            self.complete_inner(request_id, worker_id, actual_distance_km, actual_duration_min)
        })
        .await
    }

    async fn complete_inner(
        &self,
        request_id: Uuid,
        worker_id: Uuid,
        actual_distance_km: f64,
        actual_duration_min: u32,
    ) -> Result<Request, DispatchError> {
        if actual_distance_km < 0.0 {
            return Err(DispatchError::InvalidRequest(
                "actual distance cannot be negative".to_string(),
            ));
        }
        let request = self.require_assigned_worker(request_id, worker_id)?;

        // settle against the configuration frozen at accept, so later
        // pricing changes cannot move an already-quoted price
        let config = request
            .frozen_fare
            .as_ref()
            .and_then(|f| self.state.pricing_by_id(f.pricing_config_id))
            .unwrap_or_else(|| self.state.active_pricing(request.kind));
        let actual_fare = fare::compute_fare(
            actual_distance_km,
            actual_duration_min,
            &config,
            request.parcel.as_ref(),
            Utc::now().time(),
        );
        let quoted = request
            .frozen_fare
            .as_ref()
            .map(|f| f.amount)
            .unwrap_or(request.estimated_fare);
        let final_fare = fare::settle_final(quoted, actual_fare);

        let now = Utc::now();
        let completed = self
            .state
            .apply_transition(request_id, Operation::Complete, |r, next| {
                r.status = next;
                r.completed_at = Some(now);
                r.actual_distance_km = Some(actual_distance_km);
                r.actual_duration_min = Some(actual_duration_min);
                r.final_fare = Some(final_fare);
                r.payment_status = PaymentStatus::Pending;
            })
            .map_err(|err| {
                self.record_outcome("complete", "rejected");
                map_claim_err("complete", RequestStatus::Completed, request_id, err)
            })?;

        self.state.release_worker(worker_id);

        self.record_outcome("complete", "ok");
        self.state.emit(DispatchEvent::RequestCompleted {
            request_id,
            final_fare,
        });
        self.audit.record(
            Some(worker_id),
            "request_completed",
            "request",
            request_id,
            json!({
                "final_fare": final_fare,
                "actual_distance_km": actual_distance_km,
                "actual_duration_min": actual_duration_min,
            }),
        );
        info!(request_id = %request_id, final_fare, "request completed");

        // money moves after the transition committed and never reverses it
        Ok(self.run_payment_flow(&completed))
    }

    fn run_payment_flow(&self, request: &Request) -> Request {
        match request.payment_method {
            PaymentMethod::Wallet => match self.confirm_payment(request.id) {
                Ok(paid) => paid,
                Err(err) => {
                    warn!(request_id = %request.id, error = %err, "wallet settlement deferred");
                    scheduler::schedule_timeout(
                        &self.state,
                        request.id,
                        TimeoutKind::PaymentTimeout,
                        self.timeouts.payment,
                        request.kind,
                    );
                    self.notify_quietly(
                        request.requester_id,
                        "Payment pending",
                        "We could not charge your wallet; please top up to finish",
                        json!({ "type": "payment_pending", "request_id": request.id }),
                    );
                    self.state
                        .request(request.id)
                        .unwrap_or_else(|| request.clone())
                }
            },
            PaymentMethod::MobileMoney => {
                // the gateway webhook calls confirm_payment when the charge
                // clears; until then the deadline watches the pending state
                scheduler::schedule_timeout(
                    &self.state,
                    request.id,
                    TimeoutKind::PaymentTimeout,
                    self.timeouts.payment,
                    request.kind,
                );
                self.notify_quietly(
                    request.requester_id,
                    "Payment required",
                    "Confirm the mobile money charge to finish your request",
                    json!({ "type": "payment_required", "request_id": request.id }),
                );
                request.clone()
            }
            PaymentMethod::CashOnDelivery => {
                // the worker collected cash in person; nothing moves through
                // the ledger
                self.state
                    .update_request_if(request.id, RequestStatus::Completed, |r| {
                        r.payment_status = PaymentStatus::Paid;
                        r.paid_at = Some(Utc::now());
                    })
                    .unwrap_or_else(|_| request.clone())
            }
        }
    }

    /// Settlement primitive shared by the wallet path and the external
    /// mobile-money webhook. The ledger call happens inside the request
    /// entry guard: the debit and the `Completed -> Paid` flip commit or
    /// fail together, and concurrent confirmations serialize here.
    pub fn confirm_payment(&self, request_id: Uuid) -> Result<Request, DispatchError> {
        let config_of = |kind: RequestKind, frozen: Option<&FrozenFare>| {
            frozen
                .and_then(|f| self.state.pricing_by_id(f.pricing_config_id))
                .unwrap_or_else(|| self.state.active_pricing(kind))
        };

        let mut entry = self
            .state
            .requests
            .get_mut(&request_id)
            .ok_or_else(|| request_not_found(request_id))?;
        if entry.payment_status == PaymentStatus::Paid {
            return Err(DispatchError::AlreadyTransitioned);
        }
        let next = lifecycle::next_status(entry.kind, entry.status, Operation::ConfirmPayment)
            .ok_or(DispatchError::InvalidTransition {
                operation: "confirm_payment",
                current: entry.status,
            })?;
        let amount = entry
            .final_fare
            .ok_or_else(|| DispatchError::Internal("no final fare to settle".to_string()))?;
        let payee = entry
            .worker_id
            .ok_or_else(|| DispatchError::Internal("no worker to pay".to_string()))?;
        let commission_rate = config_of(entry.kind, entry.frozen_fare.as_ref()).commission_rate;

        self.ledger
            .settle(request_id, entry.requester_id, amount, payee, commission_rate)?;

        entry.status = next;
        entry.payment_status = PaymentStatus::Paid;
        entry.paid_at = Some(Utc::now());
        let paid = entry.clone();
        drop(entry);

        scheduler::cancel_timeout(&self.state, request_id, TimeoutKind::PaymentTimeout);
        self.record_outcome("confirm_payment", "ok");
        self.state.emit(DispatchEvent::PaymentSettled {
            request_id,
            amount,
        });
        self.audit.record(
            None,
            "payment_settled",
            "request",
            request_id,
            json!({ "amount": amount }),
        );

        Ok(paid)
    }

    pub async fn cancel(
        &self,
        request_id: Uuid,
        caller: Option<Uuid>,
        actor: CancelActor,
        reason: String,
        token: Option<&str>,
    ) -> Result<Request, DispatchError> {
        let guard_user = caller.unwrap_or(Uuid::nil());
        idempotency::guarded(&self.state, token, guard_user, "cancel", || {
            self.cancel_inner(request_id, caller, actor, reason)
        })
        .await
    }

    async fn cancel_inner(
        &self,
        request_id: Uuid,
        caller: Option<Uuid>,
        actor: CancelActor,
        reason: String,
    ) -> Result<Request, DispatchError> {
        let request = self
            .state
            .request(request_id)
            .ok_or_else(|| request_not_found(request_id))?;
        match actor {
            CancelActor::Requester if caller != Some(request.requester_id) => {
                return Err(DispatchError::Unauthorized);
            }
            CancelActor::Worker if caller.is_none() || caller != request.worker_id => {
                return Err(DispatchError::Unauthorized);
            }
            _ => {}
        }

        let now = Utc::now();
        let mut released = None;
        let cancelled = self
            .state
            .apply_transition(request_id, Operation::Cancel(actor), |r, next| {
                apply_cancellation(r, next, actor, &reason, now, &mut released);
            })
            .map_err(|err| {
                self.record_outcome("cancel", "rejected");
                match err {
                    ClaimError::NotFound => request_not_found(request_id),
                    ClaimError::StatusMismatch { actual } if actual == actor.cancelled_status() => {
                        DispatchError::AlreadyTransitioned
                    }
                    ClaimError::StatusMismatch { actual } => DispatchError::InvalidTransition {
                        operation: "cancel",
                        current: actual,
                    },
                }
            })?;

        self.finish_cancellation(&cancelled, released, actor, &reason);
        Ok(cancelled)
    }

    fn finish_cancellation(
        &self,
        cancelled: &Request,
        released: Option<Uuid>,
        actor: CancelActor,
        reason: &str,
    ) {
        if let Some(worker_id) = released {
            self.state.release_worker(worker_id);
        }

        self.record_outcome("cancel", "ok");
        self.state.emit(DispatchEvent::RequestCancelled {
            request_id: cancelled.id,
            status: cancelled.status,
            reason: reason.to_string(),
        });
        self.audit.record(
            None,
            "request_cancelled",
            "request",
            cancelled.id,
            json!({ "actor": actor, "reason": reason, "fee": cancelled.cancellation_fee }),
        );

        match actor {
            CancelActor::Requester => {
                if let Some(worker_id) = released {
                    self.notify_quietly(
                        worker_id,
                        "Request cancelled",
                        "The requester cancelled this request",
                        json!({ "type": "request_cancelled", "request_id": cancelled.id }),
                    );
                }
            }
            CancelActor::Worker | CancelActor::System => {
                self.notify_quietly(
                    cancelled.requester_id,
                    "Request cancelled",
                    reason,
                    json!({ "type": "request_cancelled", "request_id": cancelled.id }),
                );
            }
        }
        info!(request_id = %cancelled.id, status = ?cancelled.status, reason, "request cancelled");
    }

    pub async fn rate(
        &self,
        request_id: Uuid,
        rater_id: Uuid,
        score: u8,
        comment: Option<String>,
        token: Option<&str>,
    ) -> Result<Request, DispatchError> {
        idempotency::guarded(&self.state, token, rater_id, "rate", || {
            self.rate_inner(request_id, rater_id, score, comment)
        })
        .await
    }

    async fn rate_inner(
        &self,
        request_id: Uuid,
        rater_id: Uuid,
        score: u8,
        comment: Option<String>,
    ) -> Result<Request, DispatchError> {
        if !(1..=5).contains(&score) {
            return Err(DispatchError::InvalidRequest(
                "rating score must be between 1 and 5".to_string(),
            ));
        }
        let request = self
            .state
            .request(request_id)
            .ok_or_else(|| request_not_found(request_id))?;
        let from_requester = if rater_id == request.requester_id {
            true
        } else if Some(rater_id) == request.worker_id {
            false
        } else {
            return Err(DispatchError::Unauthorized);
        };
        let already_rated = if from_requester {
            request.rating_from_requester.is_some()
        } else {
            request.rating_from_worker.is_some()
        };
        if already_rated {
            return Err(DispatchError::AlreadyTransitioned);
        }

        let now = Utc::now();
        let rated = self
            .state
            .apply_transition(request_id, Operation::Rate, |r, _next| {
                let rating = Rating {
                    score,
                    comment: comment.clone(),
                    rated_at: now,
                };
                if from_requester {
                    r.rating_from_requester = Some(rating);
                } else {
                    r.rating_from_worker = Some(rating);
                }
            })
            .map_err(|err| match err {
                ClaimError::NotFound => request_not_found(request_id),
                ClaimError::StatusMismatch { actual } => DispatchError::InvalidTransition {
                    operation: "rate",
                    current: actual,
                },
            })?;

        if from_requester {
            if let Some(worker_id) = rated.worker_id {
                if let Some(mut worker) = self.state.workers.get_mut(&worker_id) {
                    let total = worker.total_ratings as f64;
                    worker.rating = (worker.rating * total + score as f64) / (total + 1.0);
                    worker.total_ratings += 1;
                }
            }
        }

        self.audit.record(
            Some(rater_id),
            "request_rated",
            "request",
            request_id,
            json!({ "score": score, "from_requester": from_requester }),
        );

        Ok(rated)
    }

    pub async fn mark_requester_no_show(
        &self,
        request_id: Uuid,
        worker_id: Uuid,
        token: Option<&str>,
    ) -> Result<Request, DispatchError> {
        idempotency::guarded(&self.state, token, worker_id, "mark_requester_no_show", || async {
            self.require_assigned_worker(request_id, worker_id)?;
            self.parcel_terminal(
                request_id,
                Operation::MarkRequesterNoShow,
                "requester did not show up",
            )
        })
        .await
    }

    pub async fn mark_package_refused(
        &self,
        request_id: Uuid,
        worker_id: Uuid,
        token: Option<&str>,
    ) -> Result<Request, DispatchError> {
        idempotency::guarded(&self.state, token, worker_id, "mark_package_refused", || async {
            self.require_assigned_worker(request_id, worker_id)?;
            self.parcel_terminal(
                request_id,
                Operation::MarkPackageRefused,
                "package refused by recipient",
            )
        })
        .await
    }

    pub async fn mark_delivery_failed(
        &self,
        request_id: Uuid,
        worker_id: Uuid,
        reason: String,
        token: Option<&str>,
    ) -> Result<Request, DispatchError> {
        idempotency::guarded(&self.state, token, worker_id, "mark_delivery_failed", || async {
            self.require_assigned_worker(request_id, worker_id)?;
            self.parcel_terminal(request_id, Operation::MarkDeliveryFailed, &reason)
        })
        .await
    }

    fn parcel_terminal(
        &self,
        request_id: Uuid,
        op: Operation,
        reason: &str,
    ) -> Result<Request, DispatchError> {
        let now = Utc::now();
        let mut released = None;
        let updated = self
            .state
            .apply_transition(request_id, op, |r, next| {
                released = r.worker_id;
                r.worker_id = None;
                r.status = next;
                r.cancelled_at = Some(now);
                r.cancellation_reason = Some(reason.to_string());
            })
            .map_err(|err| {
                self.record_outcome(op.name(), "rejected");
                match err {
                    ClaimError::NotFound => request_not_found(request_id),
                    ClaimError::StatusMismatch { actual } => DispatchError::InvalidTransition {
                        operation: op.name(),
                        current: actual,
                    },
                }
            })?;

        if let Some(worker_id) = released {
            self.state.release_worker(worker_id);
        }

        self.record_outcome(op.name(), "ok");
        self.state.emit(DispatchEvent::RequestCancelled {
            request_id,
            status: updated.status,
            reason: reason.to_string(),
        });
        self.audit.record(
            released,
            op.name(),
            "request",
            request_id,
            json!({ "reason": reason }),
        );
        self.notify_quietly(
            updated.requester_id,
            "Delivery not completed",
            reason,
            json!({ "type": "delivery_terminal", "request_id": request_id, "status": updated.status }),
        );

        Ok(updated)
    }

    pub fn get_by_id(&self, request_id: Uuid, caller: Uuid) -> Result<Request, DispatchError> {
        let request = self
            .state
            .request(request_id)
            .ok_or_else(|| request_not_found(request_id))?;
        if !request.is_party(caller) {
            return Err(DispatchError::Unauthorized);
        }
        Ok(request)
    }

    pub fn list_for_user(
        &self,
        user_id: Uuid,
        role: PartyRole,
        limit: usize,
        offset: usize,
    ) -> Vec<Request> {
        let mut items: Vec<Request> = self
            .state
            .requests
            .iter()
            .filter(|entry| match role {
                PartyRole::Requester => entry.requester_id == user_id,
                PartyRole::Worker => entry.worker_id == Some(user_id),
            })
            .map(|entry| entry.value().clone())
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items.into_iter().skip(offset).take(limit).collect()
    }

    fn require_assigned_worker(
        &self,
        request_id: Uuid,
        worker_id: Uuid,
    ) -> Result<Request, DispatchError> {
        let request = self
            .state
            .request(request_id)
            .ok_or_else(|| request_not_found(request_id))?;
        if request.worker_id != Some(worker_id) {
            return Err(DispatchError::Unauthorized);
        }
        Ok(request)
    }

    /// Fired by the sweeper when a request found no worker in time. Only
    /// acts while the request is still `Requested`; the conditional update
    /// closes the race against a concurrent accept.
    pub(crate) async fn handle_no_worker_timeout(&self, request_id: Uuid) {
        let reason = "no worker available in time";
        let now = Utc::now();
        let mut released = None;
        match self
            .state
            .update_request_if(request_id, RequestStatus::Requested, |r| {
                apply_cancellation(
                    r,
                    CancelActor::System.cancelled_status(),
                    CancelActor::System,
                    reason,
                    now,
                    &mut released,
                );
            }) {
            Ok(cancelled) => {
                self.finish_cancellation(&cancelled, released, CancelActor::System, reason);
            }
            Err(_) => {
                debug!(request_id = %request_id, "no-worker timeout superseded");
            }
        }
    }

    /// Fired by the sweeper when the requester never showed up after the
    /// worker arrived. Trips cancel on the worker's behalf; parcels take
    /// the dedicated no-show terminal.
    pub(crate) async fn handle_no_show_timeout(&self, request_id: Uuid, kind: RequestKind) {
        match kind {
            RequestKind::Trip => {
                let reason = "requester did not show up";
                let now = Utc::now();
                let mut released = None;
                match self
                    .state
                    .update_request_if(request_id, RequestStatus::Arrived, |r| {
                        apply_cancellation(
                            r,
                            CancelActor::Worker.cancelled_status(),
                            CancelActor::Worker,
                            reason,
                            now,
                            &mut released,
                        );
                    }) {
                    Ok(cancelled) => {
                        self.finish_cancellation(&cancelled, released, CancelActor::Worker, reason);
                    }
                    Err(_) => {
                        debug!(request_id = %request_id, "no-show timeout superseded");
                    }
                }
            }
            RequestKind::Parcel => {
                if let Err(err) = self.parcel_terminal(
                    request_id,
                    Operation::MarkRequesterNoShow,
                    "requester did not show up",
                ) {
                    debug!(request_id = %request_id, error = %err, "no-show timeout superseded");
                }
            }
        }
    }

    /// Fired by the sweeper when a completed request's payment never
    /// cleared. Marks payment failed; the request stays `Completed` for a
    /// human or a retried payment flow to resolve.
    pub(crate) async fn handle_payment_timeout(&self, request_id: Uuid) {
        let Some(request) = self.state.request(request_id) else {
            return;
        };
        if request.status != RequestStatus::Completed
            || request.payment_status != PaymentStatus::Pending
        {
            debug!(request_id = %request_id, "payment timeout superseded");
            return;
        }

        let updated = self
            .state
            .update_request_if(request_id, RequestStatus::Completed, |r| {
                if r.payment_status == PaymentStatus::Pending {
                    r.payment_status = PaymentStatus::Failed;
                }
            });
        if let Ok(request) = updated {
            if request.payment_status == PaymentStatus::Failed {
                warn!(request_id = %request_id, "payment timed out, marked failed");
                self.notify_quietly(
                    request.requester_id,
                    "Payment failed",
                    "Your payment did not go through; please settle from your trips page",
                    json!({ "type": "payment_failed", "request_id": request_id }),
                );
            }
        }
    }
}

fn map_claim_err(
    operation: &'static str,
    duplicate_result: RequestStatus,
    request_id: Uuid,
    err: ClaimError,
) -> DispatchError {
    match err {
        ClaimError::NotFound => request_not_found(request_id),
        // the concurrent duplicate already landed the same edge
        ClaimError::StatusMismatch { actual } if actual == duplicate_result => {
            DispatchError::AlreadyTransitioned
        }
        ClaimError::StatusMismatch { actual } => DispatchError::InvalidTransition {
            operation,
            current: actual,
        },
    }
}
