//! Interfaces to the collaborators the engine reads from and writes to.
//!
//! Implementations must be safe to share across tasks. Reads may block on
//! I/O and are the engine's only suspension points besides offer writes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{
    DriverCandidate, Location, MatchingAttemptLog, Offer, RideRequest, RideStatus, Subscription,
    VehicleCandidate,
};

/// Live driver locations and availability
#[async_trait]
pub trait DriverDirectory: Send + Sync + 'static {
    /// Drivers near `center`. May return a superset (e.g. a bounding box);
    /// callers apply the exact radius and eligibility rules.
    async fn find_near(
        &self,
        center: Location,
        radius_km: f64,
    ) -> Result<Vec<DriverCandidate>, StoreError>;

    async fn get_driver(&self, driver_id: &str) -> Result<Option<DriverCandidate>, StoreError>;

    /// Flip the driver to unavailable only if they are still available.
    /// Returns false when someone else claimed them first.
    async fn claim_driver(&self, driver_id: &str) -> Result<bool, StoreError>;

    /// Returns false when the driver does not exist
    async fn set_availability(
        &self,
        driver_id: &str,
        is_available: bool,
        location: Option<Location>,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Active, online and available drivers within `radius_km`
    async fn count_available_near(
        &self,
        center: Location,
        radius_km: f64,
    ) -> Result<u32, StoreError>;
}

#[async_trait]
pub trait VehicleDirectory: Send + Sync + 'static {
    async fn vehicles_for_driver(&self, driver_id: &str)
        -> Result<Vec<VehicleCandidate>, StoreError>;
}

#[async_trait]
pub trait SubscriptionDirectory: Send + Sync + 'static {
    async fn subscription_for(&self, driver_id: &str) -> Result<Option<Subscription>, StoreError>;
}

/// Historical ride reads used for demand estimation and trust bonuses
#[async_trait]
pub trait RideHistory: Send + Sync + 'static {
    /// Rides in one of `statuses`, created at or after `since`, with a
    /// pickup within `radius_km` of `center`
    async fn count_rides(
        &self,
        center: Location,
        radius_km: f64,
        since: DateTime<Utc>,
        statuses: &[RideStatus],
    ) -> Result<u32, StoreError>;

    /// Completed VIP rides this rider took with this driver
    async fn count_vip_rides_with_driver(
        &self,
        rider_id: &str,
        driver_id: &str,
    ) -> Result<u32, StoreError>;
}

/// Persistence sink for engine state transitions
#[async_trait]
pub trait MatchStore: Send + Sync + 'static {
    async fn save_ride(&self, ride: &RideRequest) -> Result<(), StoreError>;

    async fn save_offers(&self, offers: &[Offer]) -> Result<(), StoreError>;

    async fn append_attempt(&self, log: &MatchingAttemptLog) -> Result<(), StoreError>;
}
