use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::domain::{Location, NewRide, RideType, SpecialRequirements, Tier};

/// Coordinate as sent by clients
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Validate)]
pub struct LocationInput {
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,
}

impl From<LocationInput> for Location {
    fn from(value: LocationInput) -> Self {
        Location::new(value.latitude, value.longitude)
    }
}

/// Request a ride and trigger matching
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RequestRideRequest {
    #[validate(length(min = 1))]
    #[serde(alias = "rider_id", rename = "riderId")]
    pub rider_id: String,
    #[validate(nested)]
    pub pickup: LocationInput,
    #[validate(nested)]
    pub destination: LocationInput,
    #[serde(default = "default_tier")]
    pub tier: Tier,
    #[serde(default = "default_ride_type", alias = "ride_type", rename = "rideType")]
    pub ride_type: RideType,
    #[serde(default)]
    pub requirements: SpecialRequirements,
    #[serde(default, alias = "preferred_driver_id", rename = "preferredDriverId")]
    pub preferred_driver_id: Option<String>,
}

fn default_tier() -> Tier {
    Tier::Normal
}

fn default_ride_type() -> RideType {
    RideType::Normal
}

impl From<RequestRideRequest> for NewRide {
    fn from(req: RequestRideRequest) -> Self {
        NewRide {
            rider_id: req.rider_id,
            pickup: req.pickup.into(),
            destination: req.destination.into(),
            tier: req.tier,
            ride_type: req.ride_type,
            requirements: req.requirements,
            preferred_driver_id: req.preferred_driver_id,
        }
    }
}

/// Driver's answer to an offer
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RespondToOfferRequest {
    #[validate(length(min = 1))]
    #[serde(alias = "driver_id", rename = "driverId")]
    pub driver_id: String,
    pub accepted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DriverAvailabilityRequest {
    #[serde(alias = "is_available", rename = "isAvailable")]
    pub is_available: bool,
    #[validate(nested)]
    #[serde(default)]
    pub location: Option<LocationInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CancelRideRequest {
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let json = r#"{
            "riderId": "rider-1",
            "pickup": {"latitude": 6.52, "longitude": 3.38},
            "destination": {"latitude": 6.60, "longitude": 3.35}
        }"#;
        let req: RequestRideRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.tier, Tier::Normal);
        assert_eq!(req.ride_type, RideType::Normal);
        assert!(!req.requirements.baby_seat);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_out_of_range_pickup_rejected() {
        let req = RequestRideRequest {
            rider_id: "rider-1".to_string(),
            pickup: LocationInput { latitude: 120.0, longitude: 3.38 },
            destination: LocationInput { latitude: 6.6, longitude: 3.35 },
            tier: Tier::Vip,
            ride_type: RideType::Airport,
            requirements: SpecialRequirements::default(),
            preferred_driver_id: None,
        };
        assert!(req.validate().is_err());
    }
}
