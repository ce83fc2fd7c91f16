use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Deserialize;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::core::book::RideBook;
use crate::core::candidates::CandidateFinder;
use crate::core::matcher::{MatchingConfig, MatchingEngine};
use crate::core::offers::{FollowUp, OfferConfig, OfferLifecycleController};
use crate::core::scoring::DriverScorer;
use crate::core::surge::{SurgeConfig, SurgeEstimator};
use crate::error::EngineError;
use crate::models::{
    Location, MatchingResult, NewRide, Offer, RequestRideResponse, RideDetailsResponse,
    RideRequest, ScoringWeights, SurgeLevelView,
};
use crate::services::directory::{
    DriverDirectory, MatchStore, RideHistory, SubscriptionDirectory, VehicleDirectory,
};

/// Configuration for every engine component
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub matching: MatchingConfig,
    pub surge: SurgeConfig,
    pub weights: ScoringWeights,
    pub offers: OfferConfig,
}

/// The external systems the engine reads from and writes to
#[derive(Clone)]
pub struct Collaborators {
    pub drivers: Arc<dyn DriverDirectory>,
    pub vehicles: Arc<dyn VehicleDirectory>,
    pub subscriptions: Arc<dyn SubscriptionDirectory>,
    pub history: Arc<dyn RideHistory>,
    pub sink: Arc<dyn MatchStore>,
}

impl Collaborators {
    /// Use one store for every collaborator
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: DriverDirectory + VehicleDirectory + SubscriptionDirectory + RideHistory + MatchStore,
    {
        Self {
            drivers: store.clone(),
            vehicles: store.clone(),
            subscriptions: store.clone(),
            history: store.clone(),
            sink: store,
        }
    }
}

/// Entry point for request handlers and the background sweeper.
///
/// Owns the component graph and dispatches the follow-ups that offer
/// transitions return.
pub struct Dispatcher {
    book: Arc<RideBook>,
    engine: MatchingEngine,
    offers: Arc<OfferLifecycleController>,
    surge: Arc<SurgeEstimator>,
    drivers: Arc<dyn DriverDirectory>,
    sink: Arc<dyn MatchStore>,
}

impl Dispatcher {
    pub fn new(collaborators: Collaborators, config: EngineConfig) -> Self {
        let book = Arc::new(RideBook::new());
        let surge = Arc::new(SurgeEstimator::new(
            config.surge,
            collaborators.drivers.clone(),
            collaborators.history.clone(),
        ));
        let offers = Arc::new(OfferLifecycleController::new(
            book.clone(),
            collaborators.drivers.clone(),
            collaborators.sink.clone(),
            config.offers,
        ));
        let finder = CandidateFinder::new(
            collaborators.drivers.clone(),
            collaborators.vehicles,
            collaborators.subscriptions,
            config.matching.clone(),
        );
        let engine = MatchingEngine::new(
            finder,
            DriverScorer::new(config.weights),
            surge.clone(),
            offers.clone(),
            book.clone(),
            collaborators.history,
            collaborators.sink.clone(),
            config.matching,
        );

        Self {
            book,
            engine,
            offers,
            surge,
            drivers: collaborators.drivers,
            sink: collaborators.sink,
        }
    }

    /// Register a ride and run its first matching pass
    pub async fn request_ride(&self, new_ride: NewRide) -> Result<RequestRideResponse, EngineError> {
        let ride = RideRequest::new(new_ride, Utc::now());
        let ride_id = ride.id;

        tracing::info!(
            "Ride {} requested by {} ({} tier, {:?})",
            ride_id,
            ride.rider_id,
            ride.tier.as_str(),
            ride.ride_type
        );

        self.surge.record_demand_event(ride.pickup);
        if let Err(e) = self.sink.save_ride(&ride).await {
            tracing::warn!("Failed to persist ride {}: {}", ride_id, e);
        }
        self.book.insert_ride(ride);

        let matching_result = self.engine.process_ride_request(ride_id).await?;
        Ok(RequestRideResponse {
            ride_id,
            matching_result,
        })
    }

    /// Explicit retry of a ride that found no driver or whose pass failed.
    ///
    /// Covers re-searches that aborted on a store failure too: those rides
    /// sit in `driver_rejected` with `last_matching_error` set, and nothing
    /// retries them automatically.
    pub async fn retry_matching(&self, ride_id: Uuid) -> Result<MatchingResult, EngineError> {
        self.engine.process_ride_request(ride_id).await
    }

    /// Accept or decline an offer, then run any re-search it caused
    pub async fn respond_to_offer(
        &self,
        offer_id: Uuid,
        driver_id: &str,
        accepted: bool,
    ) -> Result<Offer, EngineError> {
        if self.drivers.get_driver(driver_id).await?.is_none() {
            return Err(EngineError::not_found("driver", driver_id));
        }

        let outcome = if accepted {
            self.offers.accept_offer(offer_id, driver_id).await?
        } else {
            self.offers.reject_offer(offer_id, driver_id).await?
        };

        self.dispatch(outcome.follow_ups).await;
        Ok(outcome.offer)
    }

    /// A driver's pending offers, after expiring their stale ones
    pub async fn list_active_offers(&self, driver_id: &str) -> Vec<Offer> {
        let now = Utc::now();
        let follow_ups = self.offers.expire_stale_offers_at(now, Some(driver_id)).await;
        self.dispatch(follow_ups).await;

        let mut offers: Vec<Offer> = self
            .book
            .offers_for_driver(driver_id)
            .into_iter()
            .filter(|offer| offer.is_pending())
            .collect();
        offers.sort_by_key(|offer| offer.expires_at);
        offers
    }

    pub async fn update_driver_availability(
        &self,
        driver_id: &str,
        is_available: bool,
        location: Option<Location>,
    ) -> Result<(), EngineError> {
        let updated = self
            .drivers
            .set_availability(driver_id, is_available, location, Utc::now())
            .await?;
        if !updated {
            return Err(EngineError::not_found("driver", driver_id));
        }

        tracing::debug!("Driver {} availability set to {}", driver_id, is_available);
        Ok(())
    }

    pub fn get_surge_levels(&self, zone_filter: Option<&str>) -> Vec<SurgeLevelView> {
        self.surge.surge_levels(zone_filter, Utc::now())
    }

    /// Cancel a ride. Runs without waiting for an in-flight pass; a pass
    /// that finishes afterwards finds the ride cancelled and drops its offers.
    pub async fn cancel_ride(&self, ride_id: Uuid, reason: &str) -> Result<(), EngineError> {
        let ride = self.offers.cancel_ride(ride_id, reason, Utc::now()).await?;
        self.surge.record_demand_event(ride.pickup);
        Ok(())
    }

    pub fn get_ride(&self, ride_id: Uuid) -> Result<RideDetailsResponse, EngineError> {
        let ride = self.book.require_ride(ride_id)?;
        let offers = self.book.offers_for_ride(ride_id);
        Ok(RideDetailsResponse { ride, offers })
    }

    /// Expire stale offers everywhere and re-search emptied rides.
    /// Returns the number of re-searches dispatched.
    pub async fn run_expiry_sweep(&self) -> usize {
        self.run_expiry_sweep_at(Utc::now()).await
    }

    pub async fn run_expiry_sweep_at(&self, now: DateTime<Utc>) -> usize {
        let follow_ups = self.offers.expire_stale_offers_at(now, None).await;
        let count = follow_ups.len();
        self.dispatch(follow_ups).await;
        self.book.prune_locks();
        count
    }

    /// Run the expiry sweep on a fixed period until the task is aborted
    pub fn spawn_expiry_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        let period = Duration::from_secs(self.offers.config().sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let rematched = self.run_expiry_sweep().await;
                if rematched > 0 {
                    tracing::info!("Expiry sweep re-searched {} rides", rematched);
                }
            }
        })
    }

    async fn dispatch(&self, follow_ups: Vec<FollowUp>) {
        let passes = follow_ups.into_iter().map(|follow_up| async move {
            match follow_up {
                FollowUp::Rematch { ride_id } => match self.engine.rematch(ride_id).await {
                    Ok(Some(result)) if !result.success => {
                        tracing::info!("Re-search for ride {} found no driver", ride_id)
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(
                        "Re-search for ride {} failed, waiting for an explicit retry: {}",
                        ride_id,
                        e
                    ),
                },
            }
        });
        join_all(passes).await;
    }
}
