use serde::{Deserialize, Serialize};

/// Mean earth radius used by the spherical approximation.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    /// Builds a coordinate pair, returning `None` when either component is
    /// outside its valid range (or not a finite number).
    pub fn new(lat: f64, lng: f64) -> Option<Self> {
        if !lat.is_finite() || !lng.is_finite() {
            return None;
        }
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return None;
        }
        Some(Self { lat, lng })
    }

    /// Builds coordinates from two nullable database columns.
    pub fn from_parts(lat: Option<f64>, lng: Option<f64>) -> Option<Self> {
        match (lat, lng) {
            (Some(lat), Some(lng)) => Self::new(lat, lng),
            _ => None,
        }
    }
}

/// Great-circle distance in kilometers between two points (haversine).
pub fn haversine_km(a: Coordinates, b: Coordinates) -> f64 {
    debug_assert!(Coordinates::new(a.lat, a.lng).is_some());
    debug_assert!(Coordinates::new(b.lat, b.lng).is_some());

    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    // clamp guards against h drifting just above 1.0 for antipodal points
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zwolle() -> Coordinates {
        Coordinates::new(52.5125, 6.0944).unwrap()
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        assert_eq!(haversine_km(zwolle(), zwolle()), 0.0);
    }

    #[test]
    fn test_known_distance_zwolle_amsterdam() {
        let amsterdam = Coordinates::new(52.3676, 4.9041).unwrap();
        let d = haversine_km(zwolle(), amsterdam);
        // ~82 km as the crow flies
        assert!((d - 82.0).abs() < 3.0, "got {}", d);
    }

    #[test]
    fn test_rejects_out_of_range_coordinates() {
        assert!(Coordinates::new(91.0, 0.0).is_none());
        assert!(Coordinates::new(0.0, -181.0).is_none());
        assert!(Coordinates::new(f64::NAN, 0.0).is_none());
        assert!(Coordinates::from_parts(Some(52.0), None).is_none());
        assert!(Coordinates::from_parts(Some(52.0), Some(6.0)).is_some());
    }
}
