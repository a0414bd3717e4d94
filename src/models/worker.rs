use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// Parcel-handling capabilities a worker declares when registering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryCapabilities {
    pub max_weight_kg: f64,
    pub fragile: bool,
    pub food: bool,
    pub thermal_bag: bool,
    pub electronics: bool,
    pub documents: bool,
    pub insurance_coverage: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerProfile {
    pub id: Uuid,
    pub name: String,
    pub online: bool,
    // invariant: available implies online
    pub available: bool,
    pub location: GeoPoint,
    pub located_at: DateTime<Utc>,
    pub capabilities: DeliveryCapabilities,
    pub rating: f64,
    pub total_ratings: u32,
    pub updated_at: DateTime<Utc>,
}
