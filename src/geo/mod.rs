use crate::error::DispatchError;
use crate::models::worker::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6_371.0;

/// Assumed average speed for the great-circle fallback estimate.
const FALLBACK_SPEED_KMH: f64 = 30.0;

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

#[derive(Debug, Clone)]
pub struct RouteEstimate {
    pub distance_km: f64,
    pub duration_min: u32,
}

/// Routing collaborator. Real providers live outside the core; when they
/// are unreachable the caller degrades to [`fallback_route`].
pub trait RoutePlanner: Send + Sync {
    fn route(&self, origin: &GeoPoint, destination: &GeoPoint) -> Result<RouteEstimate, DispatchError>;
}

pub fn fallback_route(origin: &GeoPoint, destination: &GeoPoint) -> RouteEstimate {
    let distance_km = haversine_km(origin, destination);
    let duration_min = ((distance_km / FALLBACK_SPEED_KMH) * 60.0).round() as u32;
    RouteEstimate {
        distance_km,
        duration_min,
    }
}

/// The deterministic great-circle planner, also used as the fallback when a
/// configured provider errors.
pub struct HaversineRouter;

impl RoutePlanner for HaversineRouter {
    fn route(&self, origin: &GeoPoint, destination: &GeoPoint) -> Result<RouteEstimate, DispatchError> {
        Ok(fallback_route(origin, destination))
    }
}

#[cfg(test)]
mod tests {
    use super::{fallback_route, haversine_km};
    use crate::models::worker::GeoPoint;

    #[test]
    fn zero_distance_for_same_point() {
        let p = GeoPoint {
            lat: 53.5511,
            lng: 9.9937,
        };
        let distance = haversine_km(&p, &p);
        assert!(distance < 1e-9);
    }

    #[test]
    fn london_to_paris_is_around_343_km() {
        let london = GeoPoint {
            lat: 51.5074,
            lng: -0.1278,
        };
        let paris = GeoPoint {
            lat: 48.8566,
            lng: 2.3522,
        };
        let distance = haversine_km(&london, &paris);
        assert!((distance - 343.0).abs() < 5.0);
    }

    #[test]
    fn fallback_duration_assumes_thirty_kmh() {
        let origin = GeoPoint { lat: 0.0, lng: 0.0 };
        let destination = GeoPoint {
            lat: 0.0,
            lng: 0.13489,
        };
        let route = fallback_route(&origin, &destination);
        assert!((route.distance_km - 15.0).abs() < 0.1);
        assert_eq!(route.duration_min, 30);
    }
}
