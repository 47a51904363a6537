use crate::models::ride::VehicleType;

const AVG_SPEED_KMH: f64 = 21.0;

struct Rates {
    base: f64,
    per_km: f64,
    per_minute: f64,
}

fn rates_for(vehicle_type: VehicleType) -> Rates {
    match vehicle_type {
        VehicleType::Economy => Rates { base: 500.0, per_km: 100.0, per_minute: 50.0 },
        VehicleType::Premium => Rates { base: 800.0, per_km: 120.0, per_minute: 60.0 },
        VehicleType::Xl => Rates { base: 1000.0, per_km: 150.0, per_minute: 75.0 },
    }
}

/// Duration estimate from distance at average city speed, ceiled to whole
/// minutes, minimum 1.
pub fn estimate_duration_minutes(distance_km: f64) -> u32 {
    let minutes = (distance_km / AVG_SPEED_KMH) * 60.0;
    (minutes.ceil() as u32).max(1)
}

/// base + per-km * km + per-min * min. Used both for the creation-time
/// estimate and for the final fare from driver-reported actuals.
pub fn compute_fare(vehicle_type: VehicleType, distance_km: f64, duration_minutes: u32) -> f64 {
    let rates = rates_for(vehicle_type);
    rates.base + rates.per_km * distance_km.max(0.0) + rates.per_minute * duration_minutes as f64
}

/// Driver share of a fare.
pub fn driver_earnings(fare: f64) -> f64 {
    fare * 0.8
}

/// Priority in [1, 10] from vehicle class and trip distance.
pub fn compute_priority(vehicle_type: VehicleType, trip_distance_km: f64) -> i32 {
    let base = match vehicle_type {
        VehicleType::Economy => 3,
        VehicleType::Premium => 5,
        VehicleType::Xl => 7,
    };

    let distance = trip_distance_km.max(0.0);
    let step = if distance >= 15.0 {
        3
    } else if distance >= 8.0 {
        2
    } else if distance >= 3.0 {
        1
    } else {
        0
    };

    (base + step).clamp(1, 10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn economy_estimate_for_a_five_km_city_trip() {
        // 5.07 km across town: 15 minutes, 500 + 100*5.07 + 50*15
        let minutes = estimate_duration_minutes(5.07);
        assert_eq!(minutes, 15);

        let fare = compute_fare(VehicleType::Economy, 5.07, minutes);
        assert!((fare - 1757.0).abs() < 1e-9);
        assert_eq!(compute_priority(VehicleType::Economy, 5.07), 4);
    }

    #[test]
    fn final_fare_recomputes_from_actuals() {
        let fare = compute_fare(VehicleType::Economy, 5.1, 16);
        assert!((fare - 1810.0).abs() < 1e-9);
    }

    #[test]
    fn duration_never_drops_below_one_minute() {
        assert_eq!(estimate_duration_minutes(0.0), 1);
        assert_eq!(estimate_duration_minutes(0.1), 1);
    }

    #[test]
    fn premium_and_xl_rates_apply() {
        assert!((compute_fare(VehicleType::Premium, 10.0, 30) - (800.0 + 1200.0 + 1800.0)).abs() < 1e-9);
        assert!((compute_fare(VehicleType::Xl, 10.0, 30) - (1000.0 + 1500.0 + 2250.0)).abs() < 1e-9);
    }

    #[test]
    fn driver_keeps_eighty_percent() {
        assert!((driver_earnings(1757.0) - 1405.6).abs() < 1e-9);
    }

    #[test]
    fn priority_steps_with_distance_and_clamps() {
        assert_eq!(compute_priority(VehicleType::Economy, 1.0), 3);
        assert_eq!(compute_priority(VehicleType::Economy, 3.0), 4);
        assert_eq!(compute_priority(VehicleType::Premium, 8.0), 7);
        assert_eq!(compute_priority(VehicleType::Xl, 15.0), 10);
        assert_eq!(compute_priority(VehicleType::Xl, 100.0), 10);
    }
}
