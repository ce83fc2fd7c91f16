//! Ride Dispatch - driver matching and surge pricing engine
//!
//! Finds, scores and offers nearby drivers for ride requests, prices
//! demand with a per-area surge multiplier and runs offers through their
//! accept/reject/expire lifecycle.

pub mod config;
pub mod core;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;

// Re-export commonly used types
pub use core::{
    distance::{calculate_bounding_box, distance_km, haversine_distance},
    Collaborators, Dispatcher, EngineConfig, FollowUp,
};
pub use error::{EngineError, StoreError};
pub use models::{
    DriverScore, Location, MatchingResult, NewRide, Offer, OfferStatus, RideRequest, RideStatus,
    RideType, ScoringWeights, Tier,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        let bbox = calculate_bounding_box(6.52, 3.38, 10.0);
        assert!(bbox.min_lat < 6.52);
        assert_eq!(distance_km(Location::new(6.52, 3.38), Location::new(6.52, 3.38)), 0.0);
    }
}
