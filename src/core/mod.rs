// Core engine exports
pub mod book;
pub mod candidates;
pub mod dispatch;
pub mod distance;
pub mod filters;
pub mod matcher;
pub mod offers;
pub mod scoring;
pub mod surge;

pub use book::RideBook;
pub use candidates::{Candidate, CandidateFinder, CandidateSearch};
pub use dispatch::{Collaborators, Dispatcher, EngineConfig};
pub use distance::{calculate_bounding_box, distance_km, haversine_distance, is_within_radius};
pub use matcher::{MatchingConfig, MatchingEngine};
pub use offers::{FollowUp, OfferConfig, OfferLifecycleController, OfferOutcome};
pub use scoring::{DriverScorer, ScoringInput};
pub use surge::{SurgeConfig, SurgeEstimator};
