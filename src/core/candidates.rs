use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;

use crate::core::distance::distance_km;
use crate::core::filters::{
    is_dispatchable, meets_tier_floor, search_radius_km, select_vehicle, subscription_permits,
};
use crate::core::matcher::MatchingConfig;
use crate::error::StoreError;
use crate::models::{DriverCandidate, Location, RideRequest, VehicleCandidate};
use crate::services::directory::{DriverDirectory, SubscriptionDirectory, VehicleDirectory};

/// An eligible driver with the vehicle they would use
#[derive(Debug, Clone)]
pub struct Candidate {
    pub driver: DriverCandidate,
    pub vehicle: VehicleCandidate,
    pub location: Location,
    pub distance_km: f64,
}

#[derive(Debug, Clone)]
pub struct CandidateSearch {
    pub search_radius_km: f64,
    /// Drivers returned by the directory before any filtering
    pub drivers_found: usize,
    /// Eligible candidates, nearest first
    pub candidates: Vec<Candidate>,
}

/// Finds eligible driver/vehicle pairs around a pickup point.
///
/// # Pipeline Stages
/// 1. Dispatchable: active, online, available, located
/// 2. Tier floor for premium and VIP rides
/// 3. Exact haversine radius check
/// 4. Usable vehicle
/// 5. Live subscription covering the tier
/// 6. Pool cap on eligible candidates (nearest first)
///
/// Stages 4 and 5 hit the directories. Drivers are checked nearest first in
/// batches of `candidate_pool_cap`, concurrently within a batch, and the
/// walk stops once the pool is full.
pub struct CandidateFinder {
    drivers: Arc<dyn DriverDirectory>,
    vehicles: Arc<dyn VehicleDirectory>,
    subscriptions: Arc<dyn SubscriptionDirectory>,
    config: MatchingConfig,
}

struct Nearby {
    driver: DriverCandidate,
    location: Location,
    distance_km: f64,
}

impl CandidateFinder {
    pub fn new(
        drivers: Arc<dyn DriverDirectory>,
        vehicles: Arc<dyn VehicleDirectory>,
        subscriptions: Arc<dyn SubscriptionDirectory>,
        config: MatchingConfig,
    ) -> Self {
        Self {
            drivers,
            vehicles,
            subscriptions,
            config,
        }
    }

    /// Eligible candidates for `ride`, skipping drivers in `exclude`.
    ///
    /// Candidates come back ordered by distance, then driver id; that order
    /// is the tie-break for equal scores downstream.
    pub async fn find(
        &self,
        ride: &RideRequest,
        exclude: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> Result<CandidateSearch, StoreError> {
        let radius = search_radius_km(ride, &self.config);
        let pool = self.drivers.find_near(ride.pickup, radius).await?;
        let drivers_found = pool.len();

        let mut nearby: Vec<Nearby> = pool
            .into_iter()
            .filter(|d| !exclude.contains(&d.driver_id))
            .filter(is_dispatchable)
            .filter(|d| meets_tier_floor(d, ride.tier))
            .filter_map(|driver| {
                let location = driver.location?;
                let distance = distance_km(ride.pickup, location);
                (distance <= radius).then_some(Nearby {
                    driver,
                    location,
                    distance_km: distance,
                })
            })
            .collect();

        nearby.sort_by(|a, b| {
            a.distance_km
                .total_cmp(&b.distance_km)
                .then_with(|| a.driver.driver_id.cmp(&b.driver.driver_id))
        });

        tracing::debug!(
            "Ride {}: {} drivers in directory, {} within {}km after filters",
            ride.id,
            drivers_found,
            nearby.len(),
            radius
        );

        let cap = self.config.candidate_pool_cap;

        // The preferred driver is checked up front and never competes for a slot
        let preferred = ride
            .preferred_driver_id
            .as_deref()
            .and_then(|id| nearby.iter().position(|n| n.driver.driver_id == id))
            .map(|pos| nearby.remove(pos));
        let preferred = match preferred {
            Some(driver) => self.qualify(ride, driver, now).await?,
            None => None,
        };

        let wanted = cap.saturating_sub(usize::from(preferred.is_some()));
        let mut candidates = Vec::with_capacity(cap);
        let mut remaining = nearby.into_iter();

        while candidates.len() < wanted {
            let batch: Vec<Nearby> = remaining.by_ref().take(cap.max(1)).collect();
            if batch.is_empty() {
                break;
            }

            let checks = batch
                .into_iter()
                .map(|candidate| self.qualify(ride, candidate, now));
            for result in join_all(checks).await {
                if let Some(candidate) = result? {
                    if candidates.len() < wanted {
                        candidates.push(candidate);
                    }
                }
            }
        }

        if let Some(preferred) = preferred {
            let pos = candidates
                .iter()
                .position(|c| {
                    c.distance_km
                        .total_cmp(&preferred.distance_km)
                        .then_with(|| c.driver.driver_id.cmp(&preferred.driver.driver_id))
                        .is_gt()
                })
                .unwrap_or(candidates.len());
            candidates.insert(pos, preferred);
        }

        Ok(CandidateSearch {
            search_radius_km: radius,
            drivers_found,
            candidates,
        })
    }

    async fn qualify(
        &self,
        ride: &RideRequest,
        nearby: Nearby,
        now: DateTime<Utc>,
    ) -> Result<Option<Candidate>, StoreError> {
        let driver_id = nearby.driver.driver_id.as_str();

        let vehicles = self.vehicles.vehicles_for_driver(driver_id).await?;
        let Some(vehicle) = select_vehicle(ride, &vehicles).cloned() else {
            tracing::debug!("Driver {} has no qualifying vehicle", driver_id);
            return Ok(None);
        };

        let subscription = self.subscriptions.subscription_for(driver_id).await?;
        if !subscription_permits(subscription.as_ref(), ride.tier, now) {
            tracing::debug!("Driver {} subscription does not cover {:?}", driver_id, ride.tier);
            return Ok(None);
        }

        Ok(Some(Candidate {
            driver: nearby.driver,
            vehicle,
            location: nearby.location,
            distance_km: nearby.distance_km,
        }))
    }
}
