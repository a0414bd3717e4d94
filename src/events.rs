use serde::Serialize;
use uuid::Uuid;

use crate::models::request::{RequestKind, RequestStatus};

/// Lifecycle events broadcast for the realtime/ops layer wrapping the core.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchEvent {
    RequestCreated {
        request_id: Uuid,
        kind: RequestKind,
    },
    WorkerNotified {
        request_id: Uuid,
        worker_id: Uuid,
        wave: usize,
        distance_km: f64,
    },
    RequestAssigned {
        request_id: Uuid,
        worker_id: Uuid,
    },
    WorkerArrived {
        request_id: Uuid,
    },
    RequestStarted {
        request_id: Uuid,
    },
    RequestCompleted {
        request_id: Uuid,
        final_fare: i64,
    },
    RequestCancelled {
        request_id: Uuid,
        status: RequestStatus,
        reason: String,
    },
    PaymentSettled {
        request_id: Uuid,
        amount: i64,
    },
}
