use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::worker::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    Trip,
    Parcel,
}

impl RequestKind {
    pub fn code_prefix(&self) -> &'static str {
        match self {
            RequestKind::Trip => "TR",
            RequestKind::Parcel => "PK",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    Requested,
    Assigned,
    Arrived,
    InProgress,
    Completed,
    Paid,
    CancelledByRequester,
    CancelledByWorker,
    CancelledBySystem,
    RequesterNoShow,
    PackageRefused,
    DeliveryFailed,
}

impl RequestStatus {
    /// A worker is still engaged while the request sits in one of these.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RequestStatus::Requested
                | RequestStatus::Assigned
                | RequestStatus::Arrived
                | RequestStatus::InProgress
        )
    }

    /// Terminal statuses admit no further lifecycle transition. `Completed`
    /// is excluded: it still promotes to `Paid` once settlement lands.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Paid
                | RequestStatus::CancelledByRequester
                | RequestStatus::CancelledByWorker
                | RequestStatus::CancelledBySystem
                | RequestStatus::RequesterNoShow
                | RequestStatus::PackageRefused
                | RequestStatus::DeliveryFailed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelActor {
    Requester,
    Worker,
    System,
}

impl CancelActor {
    pub fn cancelled_status(&self) -> RequestStatus {
        match self {
            CancelActor::Requester => RequestStatus::CancelledByRequester,
            CancelActor::Worker => RequestStatus::CancelledByWorker,
            CancelActor::System => RequestStatus::CancelledBySystem,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    Wallet,
    MobileMoney,
    CashOnDelivery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Unpaid,
    Pending,
    Paid,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackageType {
    Standard,
    Fragile,
    Food,
    Electronics,
    Document,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParcelDetails {
    pub weight_kg: f64,
    pub package_type: PackageType,
    pub insurance_required: bool,
    pub requires_signature: bool,
    pub recipient_name: Option<String>,
    pub recipient_phone: Option<String>,
    pub description: Option<String>,
}

/// Price locked in when a worker accepts, so later settlement stays
/// deterministic even if the pricing configuration changes afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrozenFare {
    pub amount: i64,
    pub pricing_config_id: Uuid,
    pub frozen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rating {
    pub score: u8,
    pub comment: Option<String>,
    pub rated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: Uuid,
    pub code: String,
    pub kind: RequestKind,
    pub requester_id: Uuid,
    pub worker_id: Option<Uuid>,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub pickup_address: String,
    pub dropoff_address: String,
    pub estimated_distance_km: f64,
    pub estimated_duration_min: u32,
    pub estimated_fare: i64,
    pub frozen_fare: Option<FrozenFare>,
    pub actual_distance_km: Option<f64>,
    pub actual_duration_min: Option<u32>,
    pub final_fare: Option<i64>,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub status: RequestStatus,
    pub cancellation_reason: Option<String>,
    pub cancellation_fee: Option<i64>,
    pub parcel: Option<ParcelDetails>,
    pub rating_from_requester: Option<Rating>,
    pub rating_from_worker: Option<Rating>,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub arrived_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl Request {
    pub fn is_party(&self, user_id: Uuid) -> bool {
        self.requester_id == user_id || self.worker_id == Some(user_id)
    }
}
