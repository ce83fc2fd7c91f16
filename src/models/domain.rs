use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Service level shared by riders (requested tier) and drivers (subscription tier)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "ride_tier", rename_all = "snake_case")]
pub enum Tier {
    Normal,
    Premium,
    Vip,
}

impl Tier {
    /// Ordinal used for floor comparisons (normal < premium < vip)
    pub fn rank(self) -> u8 {
        match self {
            Tier::Normal => 0,
            Tier::Premium => 1,
            Tier::Vip => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Normal => "normal",
            Tier::Premium => "premium",
            Tier::Vip => "vip",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "ride_type", rename_all = "snake_case")]
pub enum RideType {
    Normal,
    Airport,
    Corporate,
    Hotel,
}

/// Ride lifecycle states relevant to matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "ride_status", rename_all = "snake_case")]
pub enum RideStatus {
    Requested,
    DriverSearch,
    DriverFound,
    Accepted,
    DriverEnRoute,
    DriverRejected,
    NoDriverFound,
    InProgress,
    Completed,
    Cancelled,
}

impl RideStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RideStatus::Requested => "requested",
            RideStatus::DriverSearch => "driver_search",
            RideStatus::DriverFound => "driver_found",
            RideStatus::Accepted => "accepted",
            RideStatus::DriverEnRoute => "driver_en_route",
            RideStatus::DriverRejected => "driver_rejected",
            RideStatus::NoDriverFound => "no_driver_found",
            RideStatus::InProgress => "in_progress",
            RideStatus::Completed => "completed",
            RideStatus::Cancelled => "cancelled",
        }
    }

    /// States a matching pass may start from. `NoDriverFound` only via an explicit retry.
    pub fn is_searchable(self) -> bool {
        matches!(
            self,
            RideStatus::Requested | RideStatus::DriverRejected | RideStatus::NoDriverFound
        )
    }

    /// Offers may only be accepted while the ride is waiting on drivers
    pub fn is_offerable(self) -> bool {
        matches!(self, RideStatus::DriverFound)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled)
    }

    /// Rides still waiting for a driver
    pub const PENDING_DEMAND: [RideStatus; 3] = [
        RideStatus::Requested,
        RideStatus::DriverSearch,
        RideStatus::DriverFound,
    ];

    /// Rides holding a driver but not yet started
    pub const ACTIVE_DEMAND: [RideStatus; 2] = [RideStatus::Accepted, RideStatus::DriverEnRoute];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "offer_status", rename_all = "snake_case")]
pub enum OfferStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "vehicle_category", rename_all = "snake_case")]
pub enum VehicleCategory {
    Economy,
    Comfort,
    Premium,
    Classic,
    Luxury,
    Van,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "driver_status", rename_all = "snake_case")]
pub enum DriverStatus {
    Active,
    Suspended,
    Inactive,
}

/// WGS84 coordinate in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialRequirements {
    #[serde(rename = "babySeat", default)]
    pub baby_seat: bool,
    #[serde(rename = "wheelchairAccess", default)]
    pub wheelchair_access: bool,
    #[serde(rename = "premiumVehicle", default)]
    pub premium_vehicle: bool,
}

/// Fields supplied by the rider when requesting a ride
#[derive(Debug, Clone)]
pub struct NewRide {
    pub rider_id: String,
    pub pickup: Location,
    pub destination: Location,
    pub tier: Tier,
    pub ride_type: RideType,
    pub requirements: SpecialRequirements,
    pub preferred_driver_id: Option<String>,
}

/// A ride request and its matching state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideRequest {
    pub id: Uuid,
    #[serde(rename = "riderId")]
    pub rider_id: String,
    pub pickup: Location,
    pub destination: Location,
    pub tier: Tier,
    #[serde(rename = "rideType")]
    pub ride_type: RideType,
    pub requirements: SpecialRequirements,
    #[serde(rename = "preferredDriverId")]
    pub preferred_driver_id: Option<String>,
    pub status: RideStatus,
    #[serde(rename = "driverId")]
    pub driver_id: Option<String>,
    #[serde(rename = "vehicleId")]
    pub vehicle_id: Option<String>,
    #[serde(rename = "surgeMultiplier")]
    pub surge_multiplier: f64,
    #[serde(rename = "matchingAttempts")]
    pub matching_attempts: u32,
    #[serde(rename = "cancellationReason")]
    pub cancellation_reason: Option<String>,
    /// Set when the latest matching pass aborted on a store failure; cleared
    /// by the next pass that completes
    #[serde(rename = "lastMatchingError")]
    pub last_matching_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RideRequest {
    pub fn new(new_ride: NewRide, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            rider_id: new_ride.rider_id,
            pickup: new_ride.pickup,
            destination: new_ride.destination,
            tier: new_ride.tier,
            ride_type: new_ride.ride_type,
            requirements: new_ride.requirements,
            preferred_driver_id: new_ride.preferred_driver_id,
            status: RideStatus::Requested,
            driver_id: None,
            vehicle_id: None,
            surge_multiplier: 1.0,
            matching_attempts: 0,
            cancellation_reason: None,
            last_matching_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Point-in-time projection of a driver from the driver directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverCandidate {
    #[serde(rename = "driverId")]
    pub driver_id: String,
    pub status: DriverStatus,
    #[serde(rename = "isOnline")]
    pub is_online: bool,
    #[serde(rename = "isAvailable")]
    pub is_available: bool,
    pub location: Option<Location>,
    #[serde(rename = "subscriptionTier")]
    pub subscription_tier: Tier,
    #[serde(rename = "averageRating")]
    pub average_rating: Option<f64>,
    /// Percentage of accepted rides completed, 0-100
    #[serde(rename = "completionRate")]
    pub completion_rate: f64,
    #[serde(rename = "fleetId")]
    pub fleet_id: Option<String>,
    #[serde(rename = "lastLocationUpdate")]
    pub last_location_update: Option<DateTime<Utc>>,
}

impl DriverCandidate {
    pub fn in_fleet(&self) -> bool {
        self.fleet_id.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleCandidate {
    #[serde(rename = "vehicleId")]
    pub vehicle_id: String,
    #[serde(rename = "driverId")]
    pub driver_id: String,
    pub category: VehicleCategory,
    #[serde(rename = "hasAc", default)]
    pub has_ac: bool,
    #[serde(rename = "hasBabySeat", default)]
    pub has_baby_seat: bool,
    #[serde(rename = "wheelchairAccessible", default)]
    pub wheelchair_accessible: bool,
    #[serde(rename = "luxuryInterior", default)]
    pub luxury_interior: bool,
    #[serde(rename = "isActive")]
    pub is_active: bool,
}

/// A driver's current subscription record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(rename = "driverId")]
    pub driver_id: String,
    pub tier: Tier,
    #[serde(rename = "isActive")]
    pub is_active: bool,
    #[serde(rename = "expiresAt")]
    pub expires_at: DateTime<Utc>,
}

/// Result of scoring one driver/vehicle pair for one ride
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverScore {
    #[serde(rename = "driverId")]
    pub driver_id: String,
    #[serde(rename = "vehicleId")]
    pub vehicle_id: String,
    #[serde(rename = "driverLocation")]
    pub driver_location: Location,
    #[serde(rename = "distanceKm")]
    pub distance_km: f64,
    #[serde(rename = "estimatedArrivalMinutes")]
    pub estimated_arrival_minutes: u32,
    #[serde(rename = "surgeMultiplier")]
    pub surge_multiplier: f64,
    pub score: f64,
    pub reasons: Vec<String>,
}

/// A time-bounded proposal of one ride to one driver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub id: Uuid,
    #[serde(rename = "rideId")]
    pub ride_id: Uuid,
    #[serde(rename = "driverId")]
    pub driver_id: String,
    #[serde(rename = "vehicleId")]
    pub vehicle_id: String,
    #[serde(rename = "estimatedArrivalMinutes")]
    pub estimated_arrival_minutes: u32,
    #[serde(rename = "driverLocation")]
    pub driver_location: Location,
    pub score: f64,
    pub status: OfferStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

impl Offer {
    pub fn is_pending(&self) -> bool {
        self.status == OfferStatus::Pending
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurgeLevel {
    Normal,
    Low,
    Moderate,
    High,
    Extreme,
}

impl SurgeLevel {
    pub fn from_multiplier(multiplier: f64) -> Self {
        if multiplier >= 2.5 {
            SurgeLevel::Extreme
        } else if multiplier >= 2.0 {
            SurgeLevel::High
        } else if multiplier >= 1.5 {
            SurgeLevel::Moderate
        } else if multiplier > 1.0 {
            SurgeLevel::Low
        } else {
            SurgeLevel::Normal
        }
    }
}

/// Statically configured surge area (airport, stadium event, ...)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurgeZone {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: f64,
    pub multiplier: f64,
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
}

impl SurgeZone {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.starts_at.map_or(true, |start| now >= start)
            && self.ends_at.map_or(true, |end| now < end)
    }
}

/// Computed demand/supply figures for one grid cell
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemandSnapshot {
    #[serde(rename = "zoneId")]
    pub zone_id: String,
    pub center: Location,
    #[serde(rename = "radiusKm")]
    pub radius_km: f64,
    #[serde(rename = "activeRides")]
    pub active_rides: u32,
    #[serde(rename = "pendingRequests")]
    pub pending_requests: u32,
    #[serde(rename = "availableDrivers")]
    pub available_drivers: u32,
    /// `None` when no driver is available
    #[serde(rename = "demandRatio")]
    pub demand_ratio: Option<f64>,
    /// Multiplier before any tier cap
    pub multiplier: f64,
    pub computed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl DemandSnapshot {
    pub fn demand(&self) -> u32 {
        self.active_rides + self.pending_requests
    }
}

/// Append-only record of one matching pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingAttemptLog {
    pub id: Uuid,
    #[serde(rename = "rideId")]
    pub ride_id: Uuid,
    pub attempt: u32,
    #[serde(rename = "searchRadiusKm")]
    pub search_radius_km: f64,
    #[serde(rename = "driversFound")]
    pub drivers_found: usize,
    #[serde(rename = "driversEligible")]
    pub drivers_eligible: usize,
    #[serde(rename = "driversContacted")]
    pub drivers_contacted: usize,
    #[serde(rename = "offersCreated")]
    pub offers_created: usize,
    pub success: bool,
    #[serde(rename = "surgeMultiplier")]
    pub surge_multiplier: f64,
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Scoring weights for the five normalized components
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub distance: f64,
    pub tier: f64,
    pub vehicle: f64,
    pub rating: f64,
    pub availability: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            distance: 0.30,
            tier: 0.25,
            vehicle: 0.20,
            rating: 0.15,
            availability: 0.10,
        }
    }
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ordering() {
        assert!(Tier::Vip.rank() > Tier::Premium.rank());
        assert!(Tier::Premium.rank() > Tier::Normal.rank());
    }

    #[test]
    fn test_ride_status_serializes_snake_case() {
        let json = serde_json::to_string(&RideStatus::NoDriverFound).unwrap();
        assert_eq!(json, "\"no_driver_found\"");
        assert_eq!(RideStatus::NoDriverFound.as_str(), "no_driver_found");
    }

    #[test]
    fn test_surge_level_labels() {
        assert_eq!(SurgeLevel::from_multiplier(1.0), SurgeLevel::Normal);
        assert_eq!(SurgeLevel::from_multiplier(1.3), SurgeLevel::Low);
        assert_eq!(SurgeLevel::from_multiplier(1.5), SurgeLevel::Moderate);
        assert_eq!(SurgeLevel::from_multiplier(2.0), SurgeLevel::High);
        assert_eq!(SurgeLevel::from_multiplier(3.0), SurgeLevel::Extreme);
    }

    #[test]
    fn test_zone_window() {
        let now = Utc::now();
        let zone = SurgeZone {
            name: "stadium".to_string(),
            latitude: 6.5,
            longitude: 3.4,
            radius_km: 1.0,
            multiplier: 2.0,
            starts_at: Some(now - chrono::Duration::hours(1)),
            ends_at: Some(now + chrono::Duration::hours(1)),
        };
        assert!(zone.is_active_at(now));
        assert!(!zone.is_active_at(now + chrono::Duration::hours(2)));
    }
}
