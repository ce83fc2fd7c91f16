use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::domain::{DriverScore, Offer, RideRequest, SurgeLevel};

/// Outcome of one matching pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingResult {
    #[serde(rename = "rideId")]
    pub ride_id: Uuid,
    pub success: bool,
    #[serde(rename = "driversFound")]
    pub drivers_found: usize,
    #[serde(rename = "offersCreated")]
    pub offers_created: usize,
    #[serde(rename = "surgeMultiplier")]
    pub surge_multiplier: f64,
    #[serde(rename = "searchRadiusKm")]
    pub search_radius_km: f64,
    #[serde(rename = "rankedScores")]
    pub ranked_scores: Vec<DriverScore>,
    pub offers: Vec<Offer>,
}

/// Response for the request ride endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRideResponse {
    #[serde(rename = "rideId")]
    pub ride_id: Uuid,
    #[serde(rename = "matchingResult")]
    pub matching_result: MatchingResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveOffersResponse {
    #[serde(rename = "driverId")]
    pub driver_id: String,
    pub offers: Vec<Offer>,
}

/// One row of the surge export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurgeLevelView {
    #[serde(rename = "zoneName")]
    pub zone_name: String,
    pub level: SurgeLevel,
    pub multiplier: f64,
    #[serde(rename = "demandRatio")]
    pub demand_ratio: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurgeLevelsResponse {
    pub zones: Vec<SurgeLevelView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideDetailsResponse {
    pub ride: RideRequest,
    pub offers: Vec<Offer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub success: bool,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status_code: u16,
}
