use crate::contracts::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6_371.0;

/// Great-circle distance between two WGS84 points.
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let a1 = lat1.to_radians();
    let a2 = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lng = (lng2 - lng1).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let h = sin_lat * sin_lat + a1.cos() * a2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_KM * central_angle
}

pub fn distance_between(a: &GeoPoint, b: &GeoPoint) -> f64 {
    haversine_km(a.lat, a.lng, b.lat, b.lng)
}

#[cfg(test)]
mod tests {
    use super::haversine_km;

    #[test]
    fn zero_distance_for_same_point() {
        let distance = haversine_km(53.5511, 9.9937, 53.5511, 9.9937);
        assert!(distance < 1e-9);
    }

    #[test]
    fn london_to_paris_is_around_343_km() {
        let distance = haversine_km(51.5074, -0.1278, 48.8566, 2.3522);
        assert!((distance - 343.0).abs() < 5.0);
    }

    #[test]
    fn short_city_hop_is_around_five_km() {
        let distance = haversine_km(43.238949, 76.889709, 43.25, 76.95);
        assert!((distance - 5.04).abs() < 0.05);
    }
}
