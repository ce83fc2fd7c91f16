use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::core::book::RideBook;
use crate::error::EngineError;
use crate::models::{DriverScore, Offer, OfferStatus, RideRequest};
use crate::services::directory::{DriverDirectory, MatchStore};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OfferConfig {
    /// How long a driver has to answer an offer
    pub timeout_minutes: i64,
    /// Period of the background expiry sweep
    pub sweep_interval_secs: u64,
}

impl Default for OfferConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: 2,
            sweep_interval_secs: 15,
        }
    }
}

/// Work a caller must dispatch after an offer transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUp {
    /// Every offer for the ride failed; run a re-search
    Rematch { ride_id: Uuid },
}

/// Result of answering an offer
#[derive(Debug, Clone)]
pub struct OfferOutcome {
    pub offer: Offer,
    pub follow_ups: Vec<FollowUp>,
}

/// Drives offers through PENDING -> ACCEPTED | REJECTED | EXPIRED.
///
/// Transitions are applied to the ride book first and mirrored to the
/// store afterwards; a failed mirror write is logged and does not undo
/// the transition. Nothing here starts a re-search itself: transitions
/// that leave a ride without offers return a `FollowUp` instead.
pub struct OfferLifecycleController {
    book: Arc<RideBook>,
    drivers: Arc<dyn DriverDirectory>,
    sink: Arc<dyn MatchStore>,
    config: OfferConfig,
}

impl OfferLifecycleController {
    pub fn new(
        book: Arc<RideBook>,
        drivers: Arc<dyn DriverDirectory>,
        sink: Arc<dyn MatchStore>,
        config: OfferConfig,
    ) -> Self {
        Self {
            book,
            drivers,
            sink,
            config,
        }
    }

    pub fn config(&self) -> &OfferConfig {
        &self.config
    }

    /// One pending offer per ranked driver, published together with the
    /// ride's move to `DriverFound`
    pub async fn create_offers(
        &self,
        ride: &RideRequest,
        ranked: &[DriverScore],
        now: DateTime<Utc>,
    ) -> Result<Vec<Offer>, EngineError> {
        let expires_at = now + Duration::minutes(self.config.timeout_minutes);
        let offers: Vec<Offer> = ranked
            .iter()
            .map(|score| Offer {
                id: Uuid::new_v4(),
                ride_id: ride.id,
                driver_id: score.driver_id.clone(),
                vehicle_id: score.vehicle_id.clone(),
                estimated_arrival_minutes: score.estimated_arrival_minutes,
                driver_location: score.driver_location,
                score: score.score,
                status: OfferStatus::Pending,
                created_at: now,
                expires_at,
                responded_at: None,
            })
            .collect();

        let ride = self.book.open_offers(ride.id, &offers, now)?;

        tracing::info!(
            "Created {} offers for ride {}, expiring at {}",
            offers.len(),
            ride.id,
            expires_at
        );

        self.persist(&[ride], &offers).await;
        Ok(offers)
    }

    pub async fn accept_offer(
        &self,
        offer_id: Uuid,
        driver_id: &str,
    ) -> Result<OfferOutcome, EngineError> {
        self.accept_offer_at(offer_id, driver_id, Utc::now()).await
    }

    /// Accept an offer on behalf of its driver.
    ///
    /// The driver is claimed first (conditional availability flip), then
    /// the acceptance and its rejection cascade commit in one step. If the
    /// commit loses a race the claim is released again.
    pub async fn accept_offer_at(
        &self,
        offer_id: Uuid,
        driver_id: &str,
        now: DateTime<Utc>,
    ) -> Result<OfferOutcome, EngineError> {
        let offer = self.owned_offer(offer_id, driver_id)?;
        if !offer.is_pending() {
            return Err(EngineError::invalid_state(format!(
                "offer {} is already {:?}",
                offer_id, offer.status
            )));
        }
        if offer.is_expired_at(now) {
            return Err(EngineError::invalid_state(format!("offer {} has expired", offer_id)));
        }

        if !self.drivers.claim_driver(driver_id).await? {
            return Err(EngineError::invalid_state(format!(
                "driver {} is no longer available",
                driver_id
            )));
        }

        let commit = match self.book.commit_acceptance(offer_id, now) {
            Ok(commit) => commit,
            Err(e) => {
                self.release_driver(driver_id, now).await;
                return Err(e);
            }
        };

        tracing::info!(
            "Driver {} accepted ride {} (offer {}), {} other offers rejected",
            driver_id,
            commit.ride.id,
            offer_id,
            commit.rejected.len()
        );

        let follow_ups = commit
            .exhausted_rides
            .iter()
            .map(|ride| FollowUp::Rematch { ride_id: ride.id })
            .collect();

        let mut rides = vec![commit.ride];
        rides.extend(commit.exhausted_rides);
        let mut offers = vec![commit.offer.clone()];
        offers.extend(commit.rejected);
        self.persist(&rides, &offers).await;

        Ok(OfferOutcome {
            offer: commit.offer,
            follow_ups,
        })
    }

    pub async fn reject_offer(
        &self,
        offer_id: Uuid,
        driver_id: &str,
    ) -> Result<OfferOutcome, EngineError> {
        self.reject_offer_at(offer_id, driver_id, Utc::now()).await
    }

    /// Decline an offer. Rejecting the ride's last pending offer yields a
    /// re-search follow-up.
    pub async fn reject_offer_at(
        &self,
        offer_id: Uuid,
        driver_id: &str,
        now: DateTime<Utc>,
    ) -> Result<OfferOutcome, EngineError> {
        self.owned_offer(offer_id, driver_id)?;
        let (offer, exhausted) = self.book.reject_offer(offer_id, now)?;

        tracing::info!("Driver {} rejected offer {} for ride {}", driver_id, offer_id, offer.ride_id);

        let mut follow_ups = Vec::new();
        let rides: Vec<RideRequest> = exhausted.into_iter().collect();
        for ride in &rides {
            tracing::info!("All offers for ride {} declined", ride.id);
            follow_ups.push(FollowUp::Rematch { ride_id: ride.id });
        }
        self.persist(&rides, std::slice::from_ref(&offer)).await;

        Ok(OfferOutcome { offer, follow_ups })
    }

    pub async fn expire_stale_offers(&self) -> Vec<FollowUp> {
        self.expire_stale_offers_at(Utc::now(), None).await
    }

    /// Expire pending offers past their deadline, all of them or only one
    /// driver's. Idempotent: a second run at the same instant is a no-op.
    pub async fn expire_stale_offers_at(
        &self,
        now: DateTime<Utc>,
        driver_id: Option<&str>,
    ) -> Vec<FollowUp> {
        let sweep = self.book.expire_pending(now, driver_id);
        if sweep.expired.is_empty() {
            return Vec::new();
        }

        tracing::info!(
            "Expired {} offers, {} rides need a re-search",
            sweep.expired.len(),
            sweep.exhausted_rides.len()
        );

        self.persist(&sweep.exhausted_rides, &sweep.expired).await;
        sweep
            .exhausted_rides
            .iter()
            .map(|ride| FollowUp::Rematch { ride_id: ride.id })
            .collect()
    }

    /// Cancel a ride, reject its pending offers and free an assigned driver
    pub async fn cancel_ride(
        &self,
        ride_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<RideRequest, EngineError> {
        let (ride, rejected) = self.book.cancel_ride(ride_id, reason, now)?;

        tracing::info!(
            "Ride {} cancelled ({}), {} pending offers rejected",
            ride_id,
            reason,
            rejected.len()
        );

        if let Some(driver_id) = ride.driver_id.as_deref() {
            self.release_driver(driver_id, now).await;
        }

        self.persist(std::slice::from_ref(&ride), &rejected).await;
        Ok(ride)
    }

    /// Offer lookup that hides offers addressed to other drivers
    fn owned_offer(&self, offer_id: Uuid, driver_id: &str) -> Result<Offer, EngineError> {
        self.book
            .offer(offer_id)
            .filter(|offer| offer.driver_id == driver_id)
            .ok_or_else(|| EngineError::not_found("offer", offer_id))
    }

    async fn release_driver(&self, driver_id: &str, now: DateTime<Utc>) {
        match self.drivers.set_availability(driver_id, true, None, now).await {
            Ok(true) => tracing::debug!("Released driver {}", driver_id),
            Ok(false) => tracing::warn!("Driver {} vanished before release", driver_id),
            Err(e) => tracing::warn!("Failed to release driver {}: {}", driver_id, e),
        }
    }

    async fn persist(&self, rides: &[RideRequest], offers: &[Offer]) {
        for ride in rides {
            if let Err(e) = self.sink.save_ride(ride).await {
                tracing::warn!("Failed to persist ride {}: {}", ride.id, e);
            }
        }
        if offers.is_empty() {
            return;
        }
        if let Err(e) = self.sink.save_offers(offers).await {
            tracing::warn!("Failed to persist {} offers: {}", offers.len(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        DriverCandidate, DriverStatus, Location, NewRide, RideStatus, RideType, Tier,
    };
    use crate::services::memory::InMemoryStore;

    fn setup() -> (Arc<InMemoryStore>, Arc<RideBook>, OfferLifecycleController) {
        let store = Arc::new(InMemoryStore::new());
        let book = Arc::new(RideBook::new());
        let controller =
            OfferLifecycleController::new(book.clone(), store.clone(), store.clone(), OfferConfig::default());
        (store, book, controller)
    }

    fn add_driver(store: &InMemoryStore, id: &str) {
        store.upsert_driver(DriverCandidate {
            driver_id: id.to_string(),
            status: DriverStatus::Active,
            is_online: true,
            is_available: true,
            location: Some(Location::new(6.52, 3.38)),
            subscription_tier: Tier::Normal,
            average_rating: Some(4.2),
            completion_rate: 90.0,
            fleet_id: None,
            last_location_update: Some(Utc::now()),
        });
    }

    fn searching_ride(book: &RideBook) -> RideRequest {
        let mut ride = RideRequest::new(
            NewRide {
                rider_id: "rider".to_string(),
                pickup: Location::new(6.52, 3.38),
                destination: Location::new(6.60, 3.35),
                tier: Tier::Normal,
                ride_type: RideType::Normal,
                requirements: Default::default(),
                preferred_driver_id: None,
            },
            Utc::now(),
        );
        ride.status = RideStatus::DriverSearch;
        book.insert_ride(ride.clone());
        ride
    }

    fn score(driver: &str) -> DriverScore {
        DriverScore {
            driver_id: driver.to_string(),
            vehicle_id: format!("{}-car", driver),
            driver_location: Location::new(6.52, 3.38),
            distance_km: 1.0,
            estimated_arrival_minutes: 4,
            surge_multiplier: 1.0,
            score: 0.7,
            reasons: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_create_offers_sets_deadline() {
        let (_, book, controller) = setup();
        let ride = searching_ride(&book);
        let now = Utc::now();

        let offers = controller
            .create_offers(&ride, &[score("a"), score("b")], now)
            .await
            .unwrap();

        assert_eq!(offers.len(), 2);
        assert!(offers.iter().all(|o| o.expires_at == now + Duration::minutes(2)));
        assert_eq!(book.ride(ride.id).unwrap().status, RideStatus::DriverFound);
    }

    #[tokio::test]
    async fn test_offers_withdrawn_after_cancel() {
        let (_, book, controller) = setup();
        let ride = searching_ride(&book);
        book.cancel_ride(ride.id, "changed plans", Utc::now()).unwrap();

        let result = controller.create_offers(&ride, &[score("a")], Utc::now()).await;
        assert!(matches!(result, Err(EngineError::InvalidState(_))));
        assert!(book.offers_for_ride(ride.id).is_empty());
    }

    #[tokio::test]
    async fn test_accept_claims_driver() {
        let (store, book, controller) = setup();
        add_driver(&store, "a");
        add_driver(&store, "b");
        let ride = searching_ride(&book);
        let offers = controller
            .create_offers(&ride, &[score("a"), score("b")], Utc::now())
            .await
            .unwrap();

        let outcome = controller.accept_offer(offers[0].id, "a").await.unwrap();
        assert_eq!(outcome.offer.status, OfferStatus::Accepted);
        assert!(outcome.follow_ups.is_empty());
        assert!(!store.driver("a").unwrap().is_available);
        assert_eq!(book.offer(offers[1].id).unwrap().status, OfferStatus::Rejected);

        let late = controller.accept_offer(offers[1].id, "b").await;
        assert!(matches!(late, Err(EngineError::InvalidState(_))));
        assert!(store.driver("b").unwrap().is_available);
    }

    #[tokio::test]
    async fn test_wrong_driver_sees_not_found() {
        let (store, book, controller) = setup();
        add_driver(&store, "a");
        let ride = searching_ride(&book);
        let offers = controller
            .create_offers(&ride, &[score("a")], Utc::now())
            .await
            .unwrap();

        let result = controller.accept_offer(offers[0].id, "intruder").await;
        assert!(matches!(result, Err(EngineError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_last_rejection_requests_rematch() {
        let (_, book, controller) = setup();
        let ride = searching_ride(&book);
        let offers = controller
            .create_offers(&ride, &[score("a"), score("b")], Utc::now())
            .await
            .unwrap();

        let first = controller.reject_offer(offers[0].id, "a").await.unwrap();
        assert!(first.follow_ups.is_empty());

        let second = controller.reject_offer(offers[1].id, "b").await.unwrap();
        assert_eq!(second.follow_ups, vec![FollowUp::Rematch { ride_id: ride.id }]);
        assert_eq!(book.ride(ride.id).unwrap().status, RideStatus::DriverRejected);
    }

    #[tokio::test]
    async fn test_expiry_sweep_requests_rematch_once() {
        let (store, book, controller) = setup();
        let ride = searching_ride(&book);
        let created = Utc::now() - Duration::minutes(5);
        controller
            .create_offers(&ride, &[score("a")], created)
            .await
            .unwrap();

        let now = Utc::now();
        let first = controller.expire_stale_offers_at(now, None).await;
        assert_eq!(first, vec![FollowUp::Rematch { ride_id: ride.id }]);
        assert!(controller.expire_stale_offers_at(now, None).await.is_empty());
        assert!(store.offers().iter().all(|o| o.status == OfferStatus::Expired));
    }

    #[tokio::test]
    async fn test_cancel_releases_assigned_driver() {
        let (store, book, controller) = setup();
        add_driver(&store, "a");
        let ride = searching_ride(&book);
        let offers = controller
            .create_offers(&ride, &[score("a")], Utc::now())
            .await
            .unwrap();
        controller.accept_offer(offers[0].id, "a").await.unwrap();
        assert!(!store.driver("a").unwrap().is_available);

        let cancelled = controller
            .cancel_ride(ride.id, "rider no-show", Utc::now())
            .await
            .unwrap();
        assert_eq!(cancelled.status, RideStatus::Cancelled);
        assert!(store.driver("a").unwrap().is_available);
    }
}
