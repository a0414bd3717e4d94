use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::request::RequestKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeoutKind {
    NoWorker,
    RequesterNoShow,
    PaymentTimeout,
}

impl TimeoutKind {
    pub fn label(&self) -> &'static str {
        match self {
            TimeoutKind::NoWorker => "no_worker",
            TimeoutKind::RequesterNoShow => "requester_no_show",
            TimeoutKind::PaymentTimeout => "payment_timeout",
        }
    }
}

/// One armed timeout. Unique per (request, kind): re-arming overwrites
/// `fire_at` and clears `processed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutRecord {
    pub request_id: Uuid,
    pub kind: TimeoutKind,
    pub request_kind: RequestKind,
    pub fire_at: DateTime<Utc>,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}
