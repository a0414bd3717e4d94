use thiserror::Error;

use crate::models::request::RequestStatus;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{operation} not allowed in status {current:?}")]
    InvalidTransition {
        operation: &'static str,
        current: RequestStatus,
    },

    #[error("request was already accepted by another worker")]
    AlreadyAccepted,

    #[error("request was already transitioned by a concurrent caller")]
    AlreadyTransitioned,

    #[error("worker is not online or not available")]
    WorkerUnavailable,

    #[error("unauthorized")]
    Unauthorized,

    #[error("distance {distance_km:.2} km exceeds the allowed maximum of {max_km} km")]
    DistanceExceeded { distance_km: f64, max_km: f64 },

    #[error("insufficient balance")]
    InsufficientBalance,

    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}
