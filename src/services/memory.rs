use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::core::distance::is_within_radius;
use crate::error::StoreError;
use crate::models::{
    DriverCandidate, DriverStatus, Location, MatchingAttemptLog, Offer, RideRequest, RideStatus,
    Subscription, Tier, VehicleCandidate,
};
use crate::services::directory::{
    DriverDirectory, MatchStore, RideHistory, SubscriptionDirectory, VehicleDirectory,
};

/// In-process implementation of every collaborator.
///
/// Backs the binary when no database is configured, and the tests. All
/// state sits behind `parking_lot` locks; no lock is held across an await.
#[derive(Default)]
pub struct InMemoryStore {
    drivers: RwLock<HashMap<String, DriverCandidate>>,
    vehicles: RwLock<HashMap<String, Vec<VehicleCandidate>>>,
    subscriptions: RwLock<HashMap<String, Subscription>>,
    rides: RwLock<HashMap<Uuid, RideRequest>>,
    offers: RwLock<HashMap<Uuid, Offer>>,
    attempts: RwLock<Vec<MatchingAttemptLog>>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_driver(&self, driver: DriverCandidate) {
        self.drivers.write().insert(driver.driver_id.clone(), driver);
    }

    pub fn add_vehicle(&self, vehicle: VehicleCandidate) {
        self.vehicles
            .write()
            .entry(vehicle.driver_id.clone())
            .or_default()
            .push(vehicle);
    }

    pub fn set_subscription(&self, subscription: Subscription) {
        self.subscriptions
            .write()
            .insert(subscription.driver_id.clone(), subscription);
    }

    /// Insert a historical ride directly
    pub fn insert_ride(&self, ride: RideRequest) {
        self.rides.write().insert(ride.id, ride);
    }

    pub fn driver(&self, driver_id: &str) -> Option<DriverCandidate> {
        self.drivers.read().get(driver_id).cloned()
    }

    pub fn ride(&self, ride_id: Uuid) -> Option<RideRequest> {
        self.rides.read().get(&ride_id).cloned()
    }

    pub fn offers(&self) -> Vec<Offer> {
        self.offers.read().values().cloned().collect()
    }

    pub fn attempts(&self) -> Vec<MatchingAttemptLog> {
        self.attempts.read().clone()
    }

    /// Simulate an outage of the read side; every directory call fails
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self, what: &str) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("{} directory offline", what)));
        }
        Ok(())
    }
}

fn is_supply(driver: &DriverCandidate) -> bool {
    driver.status == DriverStatus::Active && driver.is_online && driver.is_available
}

#[async_trait]
impl DriverDirectory for InMemoryStore {
    async fn find_near(
        &self,
        center: Location,
        radius_km: f64,
    ) -> Result<Vec<DriverCandidate>, StoreError> {
        self.check_available("driver")?;
        let mut found: Vec<DriverCandidate> = self
            .drivers
            .read()
            .values()
            .filter(|d| {
                d.location
                    .map_or(false, |loc| is_within_radius(center, loc, radius_km))
            })
            .cloned()
            .collect();
        // HashMap order is not stable; keep enumeration deterministic
        found.sort_by(|a, b| a.driver_id.cmp(&b.driver_id));
        Ok(found)
    }

    async fn get_driver(&self, driver_id: &str) -> Result<Option<DriverCandidate>, StoreError> {
        self.check_available("driver")?;
        Ok(self.driver(driver_id))
    }

    async fn claim_driver(&self, driver_id: &str) -> Result<bool, StoreError> {
        self.check_available("driver")?;
        let mut drivers = self.drivers.write();
        match drivers.get_mut(driver_id) {
            Some(driver) if driver.is_available => {
                driver.is_available = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_availability(
        &self,
        driver_id: &str,
        is_available: bool,
        location: Option<Location>,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.check_available("driver")?;
        let mut drivers = self.drivers.write();
        let Some(driver) = drivers.get_mut(driver_id) else {
            return Ok(false);
        };
        driver.is_available = is_available;
        if let Some(location) = location {
            driver.location = Some(location);
            driver.last_location_update = Some(at);
        }
        Ok(true)
    }

    async fn count_available_near(
        &self,
        center: Location,
        radius_km: f64,
    ) -> Result<u32, StoreError> {
        self.check_available("driver")?;
        let count = self
            .drivers
            .read()
            .values()
            .filter(|d| is_supply(d))
            .filter(|d| {
                d.location
                    .map_or(false, |loc| is_within_radius(center, loc, radius_km))
            })
            .count();
        Ok(count as u32)
    }
}

#[async_trait]
impl VehicleDirectory for InMemoryStore {
    async fn vehicles_for_driver(
        &self,
        driver_id: &str,
    ) -> Result<Vec<VehicleCandidate>, StoreError> {
        self.check_available("vehicle")?;
        Ok(self
            .vehicles
            .read()
            .get(driver_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl SubscriptionDirectory for InMemoryStore {
    async fn subscription_for(&self, driver_id: &str) -> Result<Option<Subscription>, StoreError> {
        self.check_available("subscription")?;
        Ok(self.subscriptions.read().get(driver_id).cloned())
    }
}

#[async_trait]
impl RideHistory for InMemoryStore {
    async fn count_rides(
        &self,
        center: Location,
        radius_km: f64,
        since: DateTime<Utc>,
        statuses: &[RideStatus],
    ) -> Result<u32, StoreError> {
        self.check_available("ride history")?;
        let count = self
            .rides
            .read()
            .values()
            .filter(|r| r.created_at >= since && statuses.contains(&r.status))
            .filter(|r| is_within_radius(center, r.pickup, radius_km))
            .count();
        Ok(count as u32)
    }

    async fn count_vip_rides_with_driver(
        &self,
        rider_id: &str,
        driver_id: &str,
    ) -> Result<u32, StoreError> {
        self.check_available("ride history")?;
        let count = self
            .rides
            .read()
            .values()
            .filter(|r| {
                r.rider_id == rider_id
                    && r.driver_id.as_deref() == Some(driver_id)
                    && r.tier == Tier::Vip
                    && r.status == RideStatus::Completed
            })
            .count();
        Ok(count as u32)
    }
}

// Writes ignore the outage switch: it models the read side going away.
#[async_trait]
impl MatchStore for InMemoryStore {
    async fn save_ride(&self, ride: &RideRequest) -> Result<(), StoreError> {
        self.rides.write().insert(ride.id, ride.clone());
        Ok(())
    }

    async fn save_offers(&self, offers: &[Offer]) -> Result<(), StoreError> {
        let mut stored = self.offers.write();
        for offer in offers {
            stored.insert(offer.id, offer.clone());
        }
        Ok(())
    }

    async fn append_attempt(&self, log: &MatchingAttemptLog) -> Result<(), StoreError> {
        self.attempts.write().push(log.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(id: &str, lat: f64, lon: f64) -> DriverCandidate {
        DriverCandidate {
            driver_id: id.to_string(),
            status: DriverStatus::Active,
            is_online: true,
            is_available: true,
            location: Some(Location::new(lat, lon)),
            subscription_tier: Tier::Normal,
            average_rating: Some(4.8),
            completion_rate: 97.0,
            fleet_id: None,
            last_location_update: Some(Utc::now()),
        }
    }

    #[tokio::test]
    async fn test_claim_is_conditional() {
        let store = InMemoryStore::new();
        store.upsert_driver(driver("d1", 6.52, 3.38));

        assert!(store.claim_driver("d1").await.unwrap());
        assert!(!store.claim_driver("d1").await.unwrap());
        assert!(!store.claim_driver("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_count_available_near() {
        let store = InMemoryStore::new();
        store.upsert_driver(driver("near", 6.521, 3.381));
        store.upsert_driver(driver("far", 7.5, 3.38));
        let mut busy = driver("busy", 6.52, 3.38);
        busy.is_available = false;
        store.upsert_driver(busy);

        let count = store
            .count_available_near(Location::new(6.52, 3.38), 3.0)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_outage_switch() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);
        assert!(store.find_near(Location::new(0.0, 0.0), 5.0).await.is_err());
        store.set_unavailable(false);
        assert!(store.find_near(Location::new(0.0, 0.0), 5.0).await.is_ok());
    }
}
