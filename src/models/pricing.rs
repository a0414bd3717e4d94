use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::request::RequestKind;

/// A time-of-day multiplier slot. `start > end` means the slot wraps past
/// midnight (e.g. 22:00-06:00).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    pub id: Uuid,
    pub kind: RequestKind,
    pub base_fare: f64,
    pub cost_per_km: f64,
    pub cost_per_minute: f64,
    pub commission_rate: f64,
    pub max_distance_km: f64,
    pub active: bool,
    pub time_slots: Vec<TimeSlot>,
    pub created_at: DateTime<Utc>,
}

impl PricingConfig {
    pub fn default_for(kind: RequestKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            base_fare: 500.0,
            cost_per_km: 300.0,
            cost_per_minute: 50.0,
            commission_rate: 20.0,
            max_distance_km: 50.0,
            active: true,
            time_slots: Vec::new(),
            created_at: Utc::now(),
        }
    }
}
