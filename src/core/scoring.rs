use chrono::{DateTime, Utc};

use crate::models::{
    DriverCandidate, DriverScore, Location, RideRequest, ScoringWeights, Tier, VehicleCandidate,
    VehicleCategory,
};

/// Average city speed used for arrival estimates
const AVERAGE_SPEED_KMH: f64 = 30.0;
/// Share of the surge premium that shows up as extra travel time
const SURGE_DELAY_FACTOR: f64 = 0.3;
const ARRIVAL_BUFFER_MINUTES: f64 = 2.0;
const MIN_ARRIVAL_MINUTES: f64 = 1.0;
const MAX_ARRIVAL_MINUTES: f64 = 60.0;

/// Everything needed to score one driver/vehicle pair for one ride
#[derive(Debug, Clone, Copy)]
pub struct ScoringInput<'a> {
    pub ride: &'a RideRequest,
    pub driver: &'a DriverCandidate,
    pub vehicle: &'a VehicleCandidate,
    pub driver_location: Location,
    pub distance_km: f64,
    pub search_radius_km: f64,
    pub surge_multiplier: f64,
    /// Completed VIP rides this rider already took with the driver
    pub prior_vip_rides: u32,
    pub now: DateTime<Utc>,
}

/// Weighted multi-factor driver scorer
///
/// score = (
///     distance     * 0.30 +   # closer = higher, zero at the search radius
///     tier_match   * 0.25 +   # exact subscription tier is best
///     vehicle      * 0.20 +   # category and requested features
///     rating       * 0.15 +   # average rating / 5
///     availability * 0.10     # location freshness and completion rate
/// ) + vip_trust_bonus + fleet_bonus
///
/// Scoring is pure: the same input always yields the same `DriverScore`.
#[derive(Debug, Clone)]
pub struct DriverScorer {
    weights: ScoringWeights,
}

impl DriverScorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> ScoringWeights {
        self.weights
    }

    pub fn score(&self, input: &ScoringInput<'_>) -> DriverScore {
        let ride = input.ride;
        let driver = input.driver;
        let mut reasons = Vec::new();

        let distance = distance_component(input.distance_km, input.search_radius_km);
        if input.distance_km < 2.0 {
            reasons.push(format!("Very close ({:.1} km away)", input.distance_km));
        } else if input.distance_km < 5.0 {
            reasons.push(format!("Nearby ({:.1} km away)", input.distance_km));
        }

        let tier = tier_match_component(driver.subscription_tier, ride.tier);
        if driver.subscription_tier == ride.tier {
            reasons.push(format!("Exact {} tier match", ride.tier.as_str()));
        } else if tier > 0.0 {
            reasons.push(format!(
                "{} driver serving {} ride",
                driver.subscription_tier.as_str(),
                ride.tier.as_str()
            ));
        }

        let vehicle = vehicle_match_score(ride, input.vehicle);
        reasons.extend(vehicle_reasons(ride, input.vehicle));

        let rating = rating_component(driver.average_rating);
        if let Some(avg) = driver.average_rating {
            if avg >= 4.5 {
                reasons.push(format!("Highly rated ({:.1})", avg));
            }
        }

        let availability = availability_component(driver, input.now);
        if driver.completion_rate >= 95.0 {
            reasons.push(format!("Reliable ({:.0}% completion)", driver.completion_rate));
        }

        let trust = vip_trust_bonus(ride.tier, input.prior_vip_rides);
        if trust > 0.0 {
            reasons.push(format!(
                "Trusted VIP driver ({} prior rides)",
                input.prior_vip_rides
            ));
        }

        let fleet = fleet_bonus(ride.tier, driver.in_fleet());
        if fleet > 0.0 {
            reasons.push("Fleet priority driver".to_string());
        }

        if ride.preferred_driver_id.as_deref() == Some(driver.driver_id.as_str()) {
            reasons.push("Rider's preferred driver".to_string());
        }

        let weighted = distance * self.weights.distance
            + tier * self.weights.tier
            + vehicle * self.weights.vehicle
            + rating * self.weights.rating
            + availability * self.weights.availability;

        DriverScore {
            driver_id: driver.driver_id.clone(),
            vehicle_id: input.vehicle.vehicle_id.clone(),
            driver_location: input.driver_location,
            distance_km: input.distance_km,
            estimated_arrival_minutes: estimate_arrival_minutes(
                input.distance_km,
                input.surge_multiplier,
            ),
            surge_multiplier: input.surge_multiplier,
            score: weighted + trust + fleet,
            reasons,
        }
    }
}

impl Default for DriverScorer {
    fn default() -> Self {
        Self::new(ScoringWeights::default())
    }
}

/// Distance score (0-1), linear falloff to zero at the search radius
#[inline]
pub fn distance_component(distance_km: f64, search_radius_km: f64) -> f64 {
    if search_radius_km <= 0.0 {
        return 0.0;
    }
    ((search_radius_km - distance_km) / search_radius_km).max(0.0)
}

/// Tier match score (0-1)
///
/// A driver below the requested tier scores zero; the eligibility filter
/// normally keeps such drivers from being scored at all.
#[inline]
pub fn tier_match_component(driver_tier: Tier, ride_tier: Tier) -> f64 {
    match (ride_tier, driver_tier) {
        (Tier::Normal, Tier::Normal)
        | (Tier::Premium, Tier::Premium)
        | (Tier::Vip, Tier::Vip) => 1.0,
        (Tier::Premium, Tier::Vip) => 0.8,
        (Tier::Normal, Tier::Premium | Tier::Vip) => 0.5,
        (Tier::Premium, Tier::Normal) | (Tier::Vip, Tier::Normal | Tier::Premium) => 0.0,
    }
}

/// Vehicle score (0-1): category fit plus satisfied special requirements
pub fn vehicle_match_score(ride: &RideRequest, vehicle: &VehicleCandidate) -> f64 {
    let mut score: f64 = 0.5;

    match ride.tier {
        Tier::Vip => {
            if matches!(vehicle.category, VehicleCategory::Premium | VehicleCategory::Luxury) {
                score += 0.4;
            }
        }
        Tier::Premium => {
            if matches!(vehicle.category, VehicleCategory::Premium | VehicleCategory::Classic) {
                score += 0.3;
            }
        }
        Tier::Normal => {}
    }

    let req = &ride.requirements;
    if req.baby_seat && vehicle.has_baby_seat {
        score += 0.2;
    }
    if req.wheelchair_access && vehicle.wheelchair_accessible {
        score += 0.2;
    }
    if req.premium_vehicle && is_premium_vehicle(vehicle) {
        score += 0.2;
    }

    score.min(1.0)
}

#[inline]
fn is_premium_vehicle(vehicle: &VehicleCandidate) -> bool {
    matches!(
        vehicle.category,
        VehicleCategory::Premium | VehicleCategory::Luxury | VehicleCategory::Classic
    ) || vehicle.luxury_interior
}

fn vehicle_reasons(ride: &RideRequest, vehicle: &VehicleCandidate) -> Vec<String> {
    let mut reasons = Vec::new();
    let req = &ride.requirements;
    if req.baby_seat && vehicle.has_baby_seat {
        reasons.push("Vehicle has a baby seat".to_string());
    }
    if req.wheelchair_access && vehicle.wheelchair_accessible {
        reasons.push("Wheelchair accessible vehicle".to_string());
    }
    if req.premium_vehicle && is_premium_vehicle(vehicle) {
        reasons.push("Premium vehicle".to_string());
    }
    reasons
}

/// Rating score (0-1); unrated drivers sit in the middle
#[inline]
pub fn rating_component(average_rating: Option<f64>) -> f64 {
    match average_rating {
        Some(rating) => (rating / 5.0).clamp(0.0, 1.0),
        None => 0.5,
    }
}

/// Availability score (0-1): location freshness plus completion rate
pub fn availability_component(driver: &DriverCandidate, now: DateTime<Utc>) -> f64 {
    let mut score = 0.5;

    if let Some(updated) = driver.last_location_update {
        let age = now - updated;
        if age < chrono::Duration::minutes(5) {
            score += 0.3;
        } else if age < chrono::Duration::minutes(15) {
            score += 0.2;
        }
    }

    if driver.completion_rate >= 95.0 {
        score += 0.2;
    } else if driver.completion_rate >= 85.0 {
        score += 0.1;
    }

    score
}

/// Bonus for drivers this VIP rider has ridden with before
#[inline]
pub fn vip_trust_bonus(ride_tier: Tier, prior_vip_rides: u32) -> f64 {
    if ride_tier != Tier::Vip {
        return 0.0;
    }
    match prior_vip_rides {
        0 => 0.0,
        1 => 0.1,
        2..=4 => 0.2,
        _ => 0.3,
    }
}

#[inline]
pub fn fleet_bonus(ride_tier: Tier, in_fleet: bool) -> f64 {
    if !in_fleet {
        return 0.0;
    }
    match ride_tier {
        Tier::Vip => 0.15,
        Tier::Premium => 0.10,
        Tier::Normal => 0.05,
    }
}

/// Estimated pickup time in whole minutes, clamped to [1, 60]
pub fn estimate_arrival_minutes(distance_km: f64, surge_multiplier: f64) -> u32 {
    let base = distance_km / AVERAGE_SPEED_KMH * 60.0;
    let congestion = 1.0 + (surge_multiplier - 1.0) * SURGE_DELAY_FACTOR;
    let minutes = base * congestion + ARRIVAL_BUFFER_MINUTES;
    minutes.clamp(MIN_ARRIVAL_MINUTES, MAX_ARRIVAL_MINUTES).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DriverStatus, NewRide, RideType, SpecialRequirements};

    fn ride(tier: Tier) -> RideRequest {
        RideRequest::new(
            NewRide {
                rider_id: "rider".to_string(),
                pickup: Location::new(6.52, 3.38),
                destination: Location::new(6.60, 3.35),
                tier,
                ride_type: RideType::Normal,
                requirements: SpecialRequirements::default(),
                preferred_driver_id: None,
            },
            Utc::now(),
        )
    }

    fn driver(tier: Tier, fleet: bool, now: DateTime<Utc>) -> DriverCandidate {
        DriverCandidate {
            driver_id: "d1".to_string(),
            status: DriverStatus::Active,
            is_online: true,
            is_available: true,
            location: Some(Location::new(6.5244, 3.3792)),
            subscription_tier: tier,
            average_rating: Some(4.5),
            completion_rate: 95.0,
            fleet_id: fleet.then(|| "fleet-1".to_string()),
            last_location_update: Some(now - chrono::Duration::minutes(1)),
        }
    }

    fn vehicle(category: VehicleCategory) -> VehicleCandidate {
        VehicleCandidate {
            vehicle_id: "v1".to_string(),
            driver_id: "d1".to_string(),
            category,
            has_ac: true,
            has_baby_seat: true,
            wheelchair_accessible: false,
            luxury_interior: false,
            is_active: true,
        }
    }

    #[test]
    fn test_distance_component() {
        assert_eq!(distance_component(0.0, 20.0), 1.0);
        assert_eq!(distance_component(10.0, 20.0), 0.5);
        assert_eq!(distance_component(20.0, 20.0), 0.0);
        assert_eq!(distance_component(25.0, 20.0), 0.0);
    }

    #[test]
    fn test_tier_match_component() {
        assert_eq!(tier_match_component(Tier::Premium, Tier::Premium), 1.0);
        assert_eq!(tier_match_component(Tier::Vip, Tier::Premium), 0.8);
        assert_eq!(tier_match_component(Tier::Premium, Tier::Normal), 0.5);
        assert_eq!(tier_match_component(Tier::Vip, Tier::Normal), 0.5);
        assert_eq!(tier_match_component(Tier::Normal, Tier::Vip), 0.0);
    }

    #[test]
    fn test_vehicle_score_caps_at_one() {
        let mut vip = ride(Tier::Vip);
        vip.requirements = SpecialRequirements {
            baby_seat: true,
            wheelchair_access: false,
            premium_vehicle: true,
        };
        // 0.5 + 0.4 + 0.2 + 0.2 would be 1.3
        assert_eq!(vehicle_match_score(&vip, &vehicle(VehicleCategory::Luxury)), 1.0);
        assert_eq!(vehicle_match_score(&ride(Tier::Normal), &vehicle(VehicleCategory::Economy)), 0.5);
        let premium = vehicle_match_score(&ride(Tier::Premium), &vehicle(VehicleCategory::Classic));
        assert!((premium - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_rating_component() {
        assert_eq!(rating_component(Some(5.0)), 1.0);
        assert_eq!(rating_component(Some(4.0)), 0.8);
        assert_eq!(rating_component(None), 0.5);
    }

    #[test]
    fn test_availability_component() {
        let now = Utc::now();
        let mut d = driver(Tier::Normal, false, now);
        assert!((availability_component(&d, now) - 1.0).abs() < 1e-9);

        d.last_location_update = Some(now - chrono::Duration::minutes(10));
        d.completion_rate = 88.0;
        assert!((availability_component(&d, now) - 0.8).abs() < 1e-9);

        d.last_location_update = Some(now - chrono::Duration::hours(1));
        d.completion_rate = 50.0;
        assert_eq!(availability_component(&d, now), 0.5);
    }

    #[test]
    fn test_bonuses() {
        assert_eq!(vip_trust_bonus(Tier::Vip, 6), 0.3);
        assert_eq!(vip_trust_bonus(Tier::Vip, 2), 0.2);
        assert_eq!(vip_trust_bonus(Tier::Vip, 1), 0.1);
        assert_eq!(vip_trust_bonus(Tier::Premium, 9), 0.0);

        assert_eq!(fleet_bonus(Tier::Vip, true), 0.15);
        assert_eq!(fleet_bonus(Tier::Premium, true), 0.10);
        assert_eq!(fleet_bonus(Tier::Normal, true), 0.05);
        assert_eq!(fleet_bonus(Tier::Vip, false), 0.0);
    }

    #[test]
    fn test_estimate_arrival() {
        // 15km at 30km/h = 30min, +2 buffer
        assert_eq!(estimate_arrival_minutes(15.0, 1.0), 32);
        // surge 2.0 inflates by 30%
        assert_eq!(estimate_arrival_minutes(15.0, 2.0), 41);
        assert_eq!(estimate_arrival_minutes(0.0, 1.0), 2);
        assert_eq!(estimate_arrival_minutes(200.0, 3.0), 60);
    }

    #[test]
    fn test_score_is_deterministic() {
        let now = Utc::now();
        let r = ride(Tier::Premium);
        let d = driver(Tier::Premium, true, now);
        let v = vehicle(VehicleCategory::Premium);
        let input = ScoringInput {
            ride: &r,
            driver: &d,
            vehicle: &v,
            driver_location: Location::new(6.5244, 3.3792),
            distance_km: 0.8,
            search_radius_km: 20.0,
            surge_multiplier: 1.5,
            prior_vip_rides: 0,
            now,
        };
        let scorer = DriverScorer::default();
        let first = scorer.score(&input);
        let second = scorer.score(&input);
        assert_eq!(first, second);
        assert!(first.score > 0.5);
        assert!(first.reasons.iter().any(|r| r.contains("Exact premium")));
        assert!(first.reasons.iter().any(|r| r == "Fleet priority driver"));
    }

    #[test]
    fn test_vip_bonuses_stack_without_cap() {
        let now = Utc::now();
        let r = ride(Tier::Vip);
        let d = driver(Tier::Vip, true, now);
        let v = vehicle(VehicleCategory::Luxury);
        let base = ScoringInput {
            ride: &r,
            driver: &d,
            vehicle: &v,
            driver_location: Location::new(6.52, 3.38),
            distance_km: 0.0,
            search_radius_km: 50.0,
            surge_multiplier: 1.0,
            prior_vip_rides: 0,
            now,
        };
        let scorer = DriverScorer::default();
        let without = scorer.score(&base).score;
        let with = scorer.score(&ScoringInput { prior_vip_rides: 5, ..base }).score;
        assert!((with - without - 0.3).abs() < 1e-9);
        // ~0.97 weighted + 0.3 trust + 0.15 fleet
        assert!(with > 1.4);
    }
}
