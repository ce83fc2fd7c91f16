use chrono::{DateTime, Utc};

use crate::core::matcher::MatchingConfig;
use crate::core::scoring::vehicle_match_score;
use crate::models::{
    DriverCandidate, DriverStatus, RideRequest, RideType, Subscription, Tier, VehicleCandidate,
    VehicleCategory,
};

/// Search radius for a ride: VIP first, then long-haul ride types
pub fn search_radius_km(ride: &RideRequest, config: &MatchingConfig) -> f64 {
    match ride.tier {
        Tier::Vip => config.vip_radius_km,
        Tier::Premium | Tier::Normal => match ride.ride_type {
            RideType::Airport | RideType::Corporate => config.extended_radius_km,
            RideType::Normal | RideType::Hotel => config.default_radius_km,
        },
    }
}

/// Stage 1: active, online, available and with a known location
#[inline]
pub fn is_dispatchable(driver: &DriverCandidate) -> bool {
    driver.status == DriverStatus::Active
        && driver.is_online
        && driver.is_available
        && driver.location.is_some()
}

/// Stage 2: premium and VIP rides need a premium or VIP driver
#[inline]
pub fn meets_tier_floor(driver: &DriverCandidate, tier: Tier) -> bool {
    match tier {
        Tier::Vip | Tier::Premium => {
            matches!(driver.subscription_tier, Tier::Premium | Tier::Vip)
        }
        Tier::Normal => true,
    }
}

/// Whether a vehicle category can serve a ride tier at all
#[inline]
pub fn category_qualifies(category: VehicleCategory, tier: Tier) -> bool {
    match tier {
        Tier::Vip => matches!(category, VehicleCategory::Premium | VehicleCategory::Luxury),
        Tier::Premium => matches!(category, VehicleCategory::Premium | VehicleCategory::Classic),
        Tier::Normal => true,
    }
}

/// Stage 4: best usable vehicle for the ride, if any.
///
/// Picks the highest vehicle-match score among active, qualifying vehicles;
/// the first listed vehicle wins ties.
pub fn select_vehicle<'a>(
    ride: &RideRequest,
    vehicles: &'a [VehicleCandidate],
) -> Option<&'a VehicleCandidate> {
    let mut best: Option<(&VehicleCandidate, f64)> = None;
    for vehicle in vehicles
        .iter()
        .filter(|v| v.is_active && category_qualifies(v.category, ride.tier))
    {
        let score = vehicle_match_score(ride, vehicle);
        match best {
            Some((_, best_score)) if best_score >= score => {}
            _ => best = Some((vehicle, score)),
        }
    }
    best.map(|(vehicle, _)| vehicle)
}

/// Stage 5: the driver's subscription must be live and cover the tier
#[inline]
pub fn subscription_permits(
    subscription: Option<&Subscription>,
    tier: Tier,
    now: DateTime<Utc>,
) -> bool {
    match subscription {
        Some(sub) => sub.is_active && sub.expires_at > now && sub.tier.rank() >= tier.rank(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Location, NewRide, SpecialRequirements};

    fn ride(tier: Tier, ride_type: RideType) -> RideRequest {
        RideRequest::new(
            NewRide {
                rider_id: "rider".to_string(),
                pickup: Location::new(6.52, 3.38),
                destination: Location::new(6.60, 3.35),
                tier,
                ride_type,
                requirements: SpecialRequirements::default(),
                preferred_driver_id: None,
            },
            Utc::now(),
        )
    }

    fn driver(tier: Tier) -> DriverCandidate {
        DriverCandidate {
            driver_id: "d1".to_string(),
            status: DriverStatus::Active,
            is_online: true,
            is_available: true,
            location: Some(Location::new(6.52, 3.38)),
            subscription_tier: tier,
            average_rating: Some(4.5),
            completion_rate: 90.0,
            fleet_id: None,
            last_location_update: None,
        }
    }

    fn vehicle(id: &str, category: VehicleCategory) -> VehicleCandidate {
        VehicleCandidate {
            vehicle_id: id.to_string(),
            driver_id: "d1".to_string(),
            category,
            has_ac: true,
            has_baby_seat: false,
            wheelchair_accessible: false,
            luxury_interior: false,
            is_active: true,
        }
    }

    #[test]
    fn test_search_radius() {
        let config = MatchingConfig::default();
        assert_eq!(search_radius_km(&ride(Tier::Vip, RideType::Normal), &config), 50.0);
        assert_eq!(search_radius_km(&ride(Tier::Vip, RideType::Airport), &config), 50.0);
        assert_eq!(search_radius_km(&ride(Tier::Normal, RideType::Airport), &config), 30.0);
        assert_eq!(search_radius_km(&ride(Tier::Premium, RideType::Corporate), &config), 30.0);
        assert_eq!(search_radius_km(&ride(Tier::Normal, RideType::Hotel), &config), 20.0);
    }

    #[test]
    fn test_dispatchable() {
        assert!(is_dispatchable(&driver(Tier::Normal)));

        let mut offline = driver(Tier::Normal);
        offline.is_online = false;
        assert!(!is_dispatchable(&offline));

        let mut lost = driver(Tier::Normal);
        lost.location = None;
        assert!(!is_dispatchable(&lost));

        let mut suspended = driver(Tier::Normal);
        suspended.status = DriverStatus::Suspended;
        assert!(!is_dispatchable(&suspended));
    }

    #[test]
    fn test_tier_floor() {
        assert!(!meets_tier_floor(&driver(Tier::Normal), Tier::Premium));
        assert!(!meets_tier_floor(&driver(Tier::Normal), Tier::Vip));
        assert!(meets_tier_floor(&driver(Tier::Premium), Tier::Vip));
        assert!(meets_tier_floor(&driver(Tier::Normal), Tier::Normal));
    }

    #[test]
    fn test_vip_needs_premium_or_luxury_vehicle() {
        let vip = ride(Tier::Vip, RideType::Normal);
        let economy = [vehicle("v1", VehicleCategory::Economy)];
        assert!(select_vehicle(&vip, &economy).is_none());

        let mixed = [
            vehicle("v1", VehicleCategory::Economy),
            vehicle("v2", VehicleCategory::Luxury),
        ];
        assert_eq!(select_vehicle(&vip, &mixed).unwrap().vehicle_id, "v2");
    }

    #[test]
    fn test_inactive_vehicle_skipped() {
        let normal = ride(Tier::Normal, RideType::Normal);
        let mut parked = vehicle("v1", VehicleCategory::Comfort);
        parked.is_active = false;
        assert!(select_vehicle(&normal, &[parked]).is_none());
    }

    #[test]
    fn test_vehicle_with_requested_feature_preferred() {
        let mut with_seat = ride(Tier::Normal, RideType::Normal);
        with_seat.requirements.baby_seat = true;

        let plain = vehicle("v1", VehicleCategory::Economy);
        let mut seated = vehicle("v2", VehicleCategory::Economy);
        seated.has_baby_seat = true;

        assert_eq!(select_vehicle(&with_seat, &[plain, seated]).unwrap().vehicle_id, "v2");
    }

    #[test]
    fn test_subscription_permits() {
        let now = Utc::now();
        let sub = Subscription {
            driver_id: "d1".to_string(),
            tier: Tier::Premium,
            is_active: true,
            expires_at: now + chrono::Duration::days(3),
        };
        assert!(subscription_permits(Some(&sub), Tier::Premium, now));
        assert!(subscription_permits(Some(&sub), Tier::Normal, now));
        assert!(!subscription_permits(Some(&sub), Tier::Vip, now));
        assert!(!subscription_permits(Some(&sub), Tier::Normal, now + chrono::Duration::days(4)));
        assert!(!subscription_permits(None, Tier::Normal, now));
    }
}
