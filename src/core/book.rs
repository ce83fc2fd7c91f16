use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{Offer, OfferStatus, RideRequest, RideStatus};

/// Outcome of committing an acceptance
#[derive(Debug, Clone)]
pub struct AcceptanceCommit {
    pub ride: RideRequest,
    pub offer: Offer,
    /// Other offers moved to rejected: the ride's siblings and the
    /// driver's pending offers for other rides
    pub rejected: Vec<Offer>,
    /// Other rides left without pending offers by the cascade
    pub exhausted_rides: Vec<RideRequest>,
}

/// Offers moved to expired by one sweep
#[derive(Debug, Clone, Default)]
pub struct ExpirySweep {
    pub expired: Vec<Offer>,
    /// Rides left with no pending and no accepted offer
    pub exhausted_rides: Vec<RideRequest>,
}

#[derive(Default)]
struct BookState {
    rides: HashMap<Uuid, RideRequest>,
    offers: HashMap<Uuid, Offer>,
    offers_by_ride: HashMap<Uuid, Vec<Uuid>>,
    offers_by_driver: HashMap<String, Vec<Uuid>>,
}

impl BookState {
    fn insert_offers(&mut self, offers: &[Offer]) {
        for offer in offers {
            self.offers.insert(offer.id, offer.clone());
            self.offers_by_ride.entry(offer.ride_id).or_default().push(offer.id);
            self.offers_by_driver
                .entry(offer.driver_id.clone())
                .or_default()
                .push(offer.id);
        }
    }

    fn ride_offers(&self, ride_id: Uuid) -> impl Iterator<Item = &Offer> {
        self.offers_by_ride
            .get(&ride_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.offers.get(id))
    }

    fn has_pending(&self, ride_id: Uuid) -> bool {
        self.ride_offers(ride_id).any(|o| o.status == OfferStatus::Pending)
    }

    fn has_accepted(&self, ride_id: Uuid) -> bool {
        self.ride_offers(ride_id).any(|o| o.status == OfferStatus::Accepted)
    }

    /// Move a ride whose offers all resolved without a winner to
    /// `DriverRejected`, returning it
    fn settle_exhausted(&mut self, ride_id: Uuid, now: DateTime<Utc>) -> Option<RideRequest> {
        if self.has_pending(ride_id) || self.has_accepted(ride_id) {
            return None;
        }
        let ride = self.rides.get_mut(&ride_id)?;
        if ride.status != RideStatus::DriverFound {
            return None;
        }
        ride.status = RideStatus::DriverRejected;
        ride.updated_at = now;
        Some(ride.clone())
    }

    fn resolve(&mut self, offer_id: Uuid, status: OfferStatus, now: DateTime<Utc>) -> Option<Offer> {
        let offer = self.offers.get_mut(&offer_id)?;
        if offer.status != OfferStatus::Pending {
            return None;
        }
        offer.status = status;
        offer.responded_at = Some(now);
        Some(offer.clone())
    }
}

/// Authoritative in-process state for rides and offers.
///
/// Every multi-record transition (acceptance cascade, sweep, cancel) runs
/// under one write lock, so readers never see half of it. Per-ride async
/// locks serialize whole matching passes and responses for the same ride.
#[derive(Default)]
pub struct RideBook {
    state: RwLock<BookState>,
    ride_locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl RideBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock serializing work on one ride
    pub fn ride_lock(&self, ride_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        self.ride_locks
            .lock()
            .entry(ride_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drop locks nobody holds or waits on
    pub fn prune_locks(&self) {
        self.ride_locks
            .lock()
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn insert_ride(&self, ride: RideRequest) {
        self.state.write().rides.insert(ride.id, ride);
    }

    pub fn ride(&self, ride_id: Uuid) -> Option<RideRequest> {
        self.state.read().rides.get(&ride_id).cloned()
    }

    pub fn require_ride(&self, ride_id: Uuid) -> Result<RideRequest, EngineError> {
        self.ride(ride_id)
            .ok_or_else(|| EngineError::not_found("ride", ride_id))
    }

    /// Apply `update` to a ride and return the new version
    pub fn update_ride<F>(&self, ride_id: Uuid, update: F) -> Result<RideRequest, EngineError>
    where
        F: FnOnce(&mut RideRequest),
    {
        let mut state = self.state.write();
        let ride = state
            .rides
            .get_mut(&ride_id)
            .ok_or_else(|| EngineError::not_found("ride", ride_id))?;
        update(ride);
        Ok(ride.clone())
    }

    /// Compare-and-set on ride status
    pub fn transition_ride(
        &self,
        ride_id: Uuid,
        from: &[RideStatus],
        to: RideStatus,
        now: DateTime<Utc>,
    ) -> Result<RideRequest, EngineError> {
        let mut state = self.state.write();
        let ride = state
            .rides
            .get_mut(&ride_id)
            .ok_or_else(|| EngineError::not_found("ride", ride_id))?;
        if !from.contains(&ride.status) {
            return Err(EngineError::invalid_state(format!(
                "ride {} is {}, cannot move to {}",
                ride_id,
                ride.status.as_str(),
                to.as_str()
            )));
        }
        ride.status = to;
        ride.updated_at = now;
        Ok(ride.clone())
    }

    pub fn offer(&self, offer_id: Uuid) -> Option<Offer> {
        self.state.read().offers.get(&offer_id).cloned()
    }

    pub fn offers_for_ride(&self, ride_id: Uuid) -> Vec<Offer> {
        self.state.read().ride_offers(ride_id).cloned().collect()
    }

    pub fn offers_for_driver(&self, driver_id: &str) -> Vec<Offer> {
        let state = self.state.read();
        state
            .offers_by_driver
            .get(driver_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.offers.get(id))
            .cloned()
            .collect()
    }

    /// Drivers that already received an offer for this ride, in any state
    pub fn offered_drivers(&self, ride_id: Uuid) -> HashSet<String> {
        self.state
            .read()
            .ride_offers(ride_id)
            .map(|o| o.driver_id.clone())
            .collect()
    }

    pub fn insert_offers(&self, offers: &[Offer]) {
        let mut state = self.state.write();
        state.insert_offers(offers);
    }

    /// Publish a pass's offers and move the ride to `DriverFound` together.
    ///
    /// Fails if the ride left `DriverSearch` in the meantime (a cancel),
    /// in which case no offer becomes visible.
    pub fn open_offers(
        &self,
        ride_id: Uuid,
        offers: &[Offer],
        now: DateTime<Utc>,
    ) -> Result<RideRequest, EngineError> {
        let mut state = self.state.write();
        let ride = state
            .rides
            .get_mut(&ride_id)
            .ok_or_else(|| EngineError::not_found("ride", ride_id))?;
        if ride.status != RideStatus::DriverSearch {
            return Err(EngineError::invalid_state(format!(
                "ride {} is {}, offers withdrawn",
                ride_id,
                ride.status.as_str()
            )));
        }
        ride.status = RideStatus::DriverFound;
        ride.updated_at = now;
        let ride = ride.clone();
        state.insert_offers(offers);
        Ok(ride)
    }

    /// Accept one offer and reject everything it displaces, atomically.
    ///
    /// Fails without changing anything if the offer is no longer pending,
    /// has expired, or the ride has left the offerable state.
    pub fn commit_acceptance(
        &self,
        offer_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<AcceptanceCommit, EngineError> {
        let mut state = self.state.write();

        let offer = state
            .offers
            .get(&offer_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("offer", offer_id))?;
        if offer.status != OfferStatus::Pending {
            return Err(EngineError::invalid_state(format!(
                "offer {} already resolved",
                offer_id
            )));
        }
        if offer.is_expired_at(now) {
            return Err(EngineError::invalid_state(format!("offer {} has expired", offer_id)));
        }
        let ride_status = state
            .rides
            .get(&offer.ride_id)
            .map(|r| r.status)
            .ok_or_else(|| EngineError::not_found("ride", offer.ride_id))?;
        if !ride_status.is_offerable() {
            return Err(EngineError::invalid_state(format!(
                "ride {} is {}, no longer accepting drivers",
                offer.ride_id,
                ride_status.as_str()
            )));
        }

        let ride = {
            let ride = state
                .rides
                .get_mut(&offer.ride_id)
                .ok_or_else(|| EngineError::not_found("ride", offer.ride_id))?;
            ride.status = RideStatus::Accepted;
            ride.driver_id = Some(offer.driver_id.clone());
            ride.vehicle_id = Some(offer.vehicle_id.clone());
            ride.updated_at = now;
            ride.clone()
        };

        let accepted = state
            .resolve(offer_id, OfferStatus::Accepted, now)
            .ok_or_else(|| EngineError::invalid_state("offer changed during acceptance"))?;

        let siblings: Vec<Uuid> = state
            .ride_offers(offer.ride_id)
            .filter(|o| o.id != offer_id)
            .map(|o| o.id)
            .collect();
        let driver_elsewhere: Vec<Uuid> = state
            .offers_by_driver
            .get(&offer.driver_id)
            .into_iter()
            .flatten()
            .copied()
            .filter(|id| *id != offer_id)
            .collect();

        let mut rejected = Vec::new();
        for id in siblings.into_iter().chain(driver_elsewhere) {
            if let Some(o) = state.resolve(id, OfferStatus::Rejected, now) {
                rejected.push(o);
            }
        }

        let other_rides: HashSet<Uuid> = rejected
            .iter()
            .map(|o| o.ride_id)
            .filter(|id| *id != offer.ride_id)
            .collect();
        let exhausted_rides = other_rides
            .into_iter()
            .filter_map(|id| state.settle_exhausted(id, now))
            .collect();

        Ok(AcceptanceCommit {
            ride,
            offer: accepted,
            rejected,
            exhausted_rides,
        })
    }

    /// Reject one pending offer. Returns the offer and, if it was the
    /// ride's last pending one, the ride now in `DriverRejected`.
    pub fn reject_offer(
        &self,
        offer_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(Offer, Option<RideRequest>), EngineError> {
        let mut state = self.state.write();
        let current = state
            .offers
            .get(&offer_id)
            .ok_or_else(|| EngineError::not_found("offer", offer_id))?;
        if current.status != OfferStatus::Pending {
            return Err(EngineError::invalid_state(format!(
                "offer {} already resolved",
                offer_id
            )));
        }

        let offer = state
            .resolve(offer_id, OfferStatus::Rejected, now)
            .ok_or_else(|| EngineError::invalid_state("offer changed during rejection"))?;
        let exhausted = state.settle_exhausted(offer.ride_id, now);
        Ok((offer, exhausted))
    }

    /// Expire pending offers past their deadline, optionally only one
    /// driver's. Running it twice changes nothing the second time.
    pub fn expire_pending(&self, now: DateTime<Utc>, driver_id: Option<&str>) -> ExpirySweep {
        let mut state = self.state.write();

        let stale: Vec<Uuid> = match driver_id {
            Some(driver) => state
                .offers_by_driver
                .get(driver)
                .into_iter()
                .flatten()
                .filter_map(|id| state.offers.get(id))
                .filter(|o| o.is_pending() && o.is_expired_at(now))
                .map(|o| o.id)
                .collect(),
            None => state
                .offers
                .values()
                .filter(|o| o.is_pending() && o.is_expired_at(now))
                .map(|o| o.id)
                .collect(),
        };

        let mut sweep = ExpirySweep::default();
        for id in stale {
            if let Some(offer) = state.resolve(id, OfferStatus::Expired, now) {
                sweep.expired.push(offer);
            }
        }

        let mut rides: Vec<Uuid> = sweep.expired.iter().map(|o| o.ride_id).collect();
        rides.sort();
        rides.dedup();
        sweep.exhausted_rides = rides
            .into_iter()
            .filter_map(|id| state.settle_exhausted(id, now))
            .collect();

        sweep
    }

    /// Cancel a ride and reject its pending offers in one step
    pub fn cancel_ride(
        &self,
        ride_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(RideRequest, Vec<Offer>), EngineError> {
        let mut state = self.state.write();
        let ride = state
            .rides
            .get_mut(&ride_id)
            .ok_or_else(|| EngineError::not_found("ride", ride_id))?;
        if ride.status.is_terminal() {
            return Err(EngineError::invalid_state(format!(
                "ride {} is already {}",
                ride_id,
                ride.status.as_str()
            )));
        }
        ride.status = RideStatus::Cancelled;
        ride.cancellation_reason = Some(reason.to_string());
        ride.updated_at = now;
        let ride = ride.clone();

        let pending: Vec<Uuid> = state
            .ride_offers(ride_id)
            .filter(|o| o.is_pending())
            .map(|o| o.id)
            .collect();
        let rejected = pending
            .into_iter()
            .filter_map(|id| state.resolve(id, OfferStatus::Rejected, now))
            .collect();

        Ok((ride, rejected))
    }
}
