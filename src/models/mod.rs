// Model exports
pub mod domain;
pub mod requests;
pub mod responses;

pub use domain::{
    BoundingBox, DemandSnapshot, DriverCandidate, DriverScore, DriverStatus, Location,
    MatchingAttemptLog, NewRide, Offer, OfferStatus, RideRequest, RideStatus, RideType,
    ScoringWeights, SpecialRequirements, Subscription, SurgeLevel, SurgeZone, Tier,
    VehicleCandidate, VehicleCategory,
};
pub use requests::{
    CancelRideRequest, DriverAvailabilityRequest, LocationInput, RequestRideRequest,
    RespondToOfferRequest,
};
pub use responses::{
    AckResponse, ActiveOffersResponse, ErrorResponse, HealthResponse, MatchingResult,
    OfferResponse, RequestRideResponse, RideDetailsResponse, SurgeLevelView, SurgeLevelsResponse,
};
