use chrono::NaiveTime;
use serde::Serialize;
use tracing::warn;

use crate::error::DispatchError;
use crate::geo::{self, RoutePlanner};
use crate::models::pricing::{PricingConfig, TimeSlot};
use crate::models::request::{PackageType, ParcelDetails};
use crate::models::worker::GeoPoint;

/// Final-settlement tolerance: the requester never pays more than the
/// estimate plus ten percent.
const TOLERANCE: f64 = 0.10;

const HEAVY_PARCEL_KG: f64 = 5.0;
const VERY_HEAVY_PARCEL_KG: f64 = 10.0;

#[derive(Debug, Clone, Serialize)]
pub struct FareBreakdown {
    pub base_fare: f64,
    pub distance_cost: f64,
    pub time_cost: f64,
    pub time_multiplier: f64,
    pub weight_multiplier: f64,
    pub type_multiplier: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FareEstimate {
    pub distance_km: f64,
    pub duration_min: u32,
    pub fare: i64,
    pub currency: &'static str,
    pub breakdown: FareBreakdown,
}

/// First matching slot wins; a slot whose start is after its end wraps past
/// midnight. No match means no surcharge.
pub fn time_multiplier(slots: &[TimeSlot], now: NaiveTime) -> f64 {
    for slot in slots {
        let matches = if slot.start > slot.end {
            now >= slot.start || now < slot.end
        } else {
            now >= slot.start && now < slot.end
        };
        if matches {
            return slot.multiplier;
        }
    }
    1.0
}

pub fn weight_multiplier(weight_kg: f64) -> f64 {
    if weight_kg > VERY_HEAVY_PARCEL_KG {
        1.5
    } else if weight_kg > HEAVY_PARCEL_KG {
        1.2
    } else {
        1.0
    }
}

pub fn type_multiplier(package_type: PackageType) -> f64 {
    match package_type {
        PackageType::Fragile => 1.3,
        PackageType::Food => 1.1,
        PackageType::Electronics => 1.2,
        PackageType::Standard | PackageType::Document => 1.0,
    }
}

pub fn breakdown(
    distance_km: f64,
    duration_min: u32,
    config: &PricingConfig,
    parcel: Option<&ParcelDetails>,
    now: NaiveTime,
) -> FareBreakdown {
    FareBreakdown {
        base_fare: config.base_fare,
        distance_cost: distance_km * config.cost_per_km,
        time_cost: duration_min as f64 * config.cost_per_minute,
        time_multiplier: time_multiplier(&config.time_slots, now),
        weight_multiplier: parcel.map_or(1.0, |p| weight_multiplier(p.weight_kg)),
        type_multiplier: parcel.map_or(1.0, |p| type_multiplier(p.package_type)),
    }
}

pub fn fare_from_breakdown(b: &FareBreakdown) -> i64 {
    let subtotal = b.base_fare + b.distance_cost + b.time_cost;
    (subtotal * b.time_multiplier * b.weight_multiplier * b.type_multiplier).round() as i64
}

pub fn compute_fare(
    distance_km: f64,
    duration_min: u32,
    config: &PricingConfig,
    parcel: Option<&ParcelDetails>,
    now: NaiveTime,
) -> i64 {
    fare_from_breakdown(&breakdown(distance_km, duration_min, config, parcel, now))
}

/// Price quote for a prospective request. Routing errors degrade to the
/// great-circle fallback; a distance past the configured maximum is
/// rejected before any request exists.
pub fn estimate(
    planner: &dyn RoutePlanner,
    config: &PricingConfig,
    pickup: &GeoPoint,
    dropoff: &GeoPoint,
    parcel: Option<&ParcelDetails>,
    now: NaiveTime,
) -> Result<FareEstimate, DispatchError> {
    let route = match planner.route(pickup, dropoff) {
        Ok(route) => route,
        Err(err) => {
            warn!(error = %err, "route planner unavailable, using great-circle fallback");
            geo::fallback_route(pickup, dropoff)
        }
    };

    if route.distance_km > config.max_distance_km {
        return Err(DispatchError::DistanceExceeded {
            distance_km: route.distance_km,
            max_km: config.max_distance_km,
        });
    }

    let breakdown = breakdown(route.distance_km, route.duration_min, config, parcel, now);
    Ok(FareEstimate {
        distance_km: (route.distance_km * 100.0).round() / 100.0,
        duration_min: route.duration_min,
        fare: fare_from_breakdown(&breakdown),
        currency: "XOF",
        breakdown,
    })
}

/// The tolerance rule: `final = min(round(estimate * 1.10), actual)`.
pub fn settle_final(estimate: i64, actual: i64) -> i64 {
    let cap = (estimate as f64 * (1.0 + TOLERANCE)).round() as i64;
    cap.min(actual)
}

/// Splits a fare into (platform commission, worker share).
pub fn commission_split(fare: i64, commission_rate: f64) -> (i64, i64) {
    let commission = (fare as f64 * commission_rate / 100.0).round() as i64;
    (commission, fare - commission)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveTime;

    use super::{
        commission_split, compute_fare, estimate, settle_final, time_multiplier, type_multiplier,
        weight_multiplier,
    };
    use crate::error::DispatchError;
    use crate::geo::{HaversineRouter, RouteEstimate, RoutePlanner};
    use crate::models::pricing::{PricingConfig, TimeSlot};
    use crate::models::request::{PackageType, ParcelDetails, RequestKind};
    use crate::models::worker::GeoPoint;

    fn config() -> PricingConfig {
        PricingConfig::default_for(RequestKind::Trip)
    }

    fn at(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
    }

    fn parcel(weight_kg: f64, package_type: PackageType) -> ParcelDetails {
        ParcelDetails {
            weight_kg,
            package_type,
            insurance_required: false,
            requires_signature: false,
            recipient_name: None,
            recipient_phone: None,
            description: None,
        }
    }

    #[test]
    fn five_km_ten_min_trip_costs_2500_without_multipliers() {
        let fare = compute_fare(5.0, 10, &config(), None, at(14, 0));
        assert_eq!(fare, 500 + 1500 + 500);
    }

    #[test]
    fn settlement_caps_at_ten_percent_over_estimate() {
        assert_eq!(settle_final(2500, 3000), 2750);
    }

    #[test]
    fn settlement_charges_actual_within_tolerance() {
        assert_eq!(settle_final(2500, 2600), 2600);
        assert_eq!(settle_final(2500, 2000), 2000);
    }

    #[test]
    fn settlement_never_exceeds_the_cap() {
        for (est, actual) in [(0, 100), (1000, 1100), (1000, 1101), (333, 10_000)] {
            let settled = settle_final(est, actual);
            assert!(settled <= (est as f64 * 1.10).round() as i64);
            assert!(settled >= 0);
        }
    }

    #[test]
    fn time_slot_matching_is_first_wins_and_wraps_midnight() {
        let slots = vec![
            TimeSlot {
                start: at(7, 0),
                end: at(9, 0),
                multiplier: 1.5,
            },
            TimeSlot {
                start: at(22, 0),
                end: at(6, 0),
                multiplier: 1.3,
            },
        ];

        assert_eq!(time_multiplier(&slots, at(8, 0)), 1.5);
        assert_eq!(time_multiplier(&slots, at(23, 30)), 1.3);
        assert_eq!(time_multiplier(&slots, at(2, 0)), 1.3);
        assert_eq!(time_multiplier(&slots, at(6, 0)), 1.0);
        assert_eq!(time_multiplier(&slots, at(14, 0)), 1.0);
        assert_eq!(time_multiplier(&[], at(14, 0)), 1.0);
    }

    #[test]
    fn weight_thresholds() {
        assert_eq!(weight_multiplier(1.0), 1.0);
        assert_eq!(weight_multiplier(5.0), 1.0);
        assert_eq!(weight_multiplier(7.5), 1.2);
        assert_eq!(weight_multiplier(10.0), 1.2);
        assert_eq!(weight_multiplier(12.0), 1.5);
    }

    #[test]
    fn package_type_surcharges() {
        assert_eq!(type_multiplier(PackageType::Fragile), 1.3);
        assert_eq!(type_multiplier(PackageType::Food), 1.1);
        assert_eq!(type_multiplier(PackageType::Electronics), 1.2);
        assert_eq!(type_multiplier(PackageType::Document), 1.0);
        assert_eq!(type_multiplier(PackageType::Standard), 1.0);
    }

    #[test]
    fn parcel_multipliers_compound_on_the_subtotal() {
        let fare = compute_fare(
            5.0,
            10,
            &config(),
            Some(&parcel(7.0, PackageType::Fragile)),
            at(14, 0),
        );
        // 2500 * 1.2 * 1.3
        assert_eq!(fare, 3900);
    }

    struct FailingPlanner;

    impl RoutePlanner for FailingPlanner {
        fn route(
            &self,
            _origin: &GeoPoint,
            _destination: &GeoPoint,
        ) -> Result<RouteEstimate, DispatchError> {
            Err(DispatchError::DependencyUnavailable("maps down".to_string()))
        }
    }

    #[test]
    fn estimate_falls_back_to_great_circle_when_planner_fails() {
        let pickup = GeoPoint { lat: 0.0, lng: 0.0 };
        let dropoff = GeoPoint {
            lat: 0.0,
            lng: 0.045,
        };

        let quote = estimate(
            &FailingPlanner,
            &config(),
            &pickup,
            &dropoff,
            None,
            at(14, 0),
        )
        .unwrap();

        let reference = estimate(
            &HaversineRouter,
            &config(),
            &pickup,
            &dropoff,
            None,
            at(14, 0),
        )
        .unwrap();

        assert_eq!(quote.fare, reference.fare);
        assert_eq!(quote.distance_km, reference.distance_km);
    }

    #[test]
    fn estimate_rejects_distances_past_the_configured_maximum() {
        let pickup = GeoPoint { lat: 0.0, lng: 0.0 };
        let dropoff = GeoPoint { lat: 0.0, lng: 1.0 };

        let err = estimate(
            &HaversineRouter,
            &config(),
            &pickup,
            &dropoff,
            None,
            at(14, 0),
        )
        .unwrap_err();

        assert!(matches!(err, DispatchError::DistanceExceeded { .. }));
    }

    #[test]
    fn commission_split_is_exact() {
        assert_eq!(commission_split(2500, 20.0), (500, 2000));
        assert_eq!(commission_split(2750, 20.0), (550, 2200));
    }
}
