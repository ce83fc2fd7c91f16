use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Deserialize;
use uuid::Uuid;

use crate::core::book::RideBook;
use crate::core::candidates::{CandidateFinder, CandidateSearch};
use crate::core::filters::search_radius_km;
use crate::core::offers::OfferLifecycleController;
use crate::core::scoring::{DriverScorer, ScoringInput};
use crate::core::surge::SurgeEstimator;
use crate::error::EngineError;
use crate::models::{
    DriverScore, MatchingAttemptLog, MatchingResult, RideRequest, RideStatus, Tier,
};
use crate::services::directory::{MatchStore, RideHistory};

/// Candidate counts and search radii for matching passes
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Offers created by a first pass
    pub top_n: usize,
    /// Offers created by a re-search after every offer failed
    pub rematch_top_n: usize,
    /// Nearest drivers kept before the per-driver directory checks
    pub candidate_pool_cap: usize,
    pub vip_radius_km: f64,
    /// Airport and corporate rides
    pub extended_radius_km: f64,
    pub default_radius_km: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            top_n: 5,
            rematch_top_n: 3,
            candidate_pool_cap: 50,
            vip_radius_km: 50.0,
            extended_radius_km: 30.0,
            default_radius_km: 20.0,
        }
    }
}

/// Counters gathered during one pass, flushed to the attempt log
#[derive(Debug, Default)]
struct PassStats {
    attempt: u32,
    search_radius_km: f64,
    drivers_found: usize,
    drivers_eligible: usize,
    drivers_contacted: usize,
    offers_created: usize,
    surge_multiplier: f64,
    success: bool,
}

/// Main matching orchestrator
///
/// # Pipeline Stages
/// 1. Surge multiplier for the pickup point and tier
/// 2. Candidate search at the tier's radius
/// 3. Scoring and ranking (score descending, then distance, then driver id)
/// 4. Offer creation for the top N
///
/// Passes for the same ride are serialized on the ride's lock.
pub struct MatchingEngine {
    finder: CandidateFinder,
    scorer: DriverScorer,
    surge: Arc<SurgeEstimator>,
    offers: Arc<OfferLifecycleController>,
    book: Arc<RideBook>,
    history: Arc<dyn RideHistory>,
    sink: Arc<dyn MatchStore>,
    config: MatchingConfig,
}

impl MatchingEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        finder: CandidateFinder,
        scorer: DriverScorer,
        surge: Arc<SurgeEstimator>,
        offers: Arc<OfferLifecycleController>,
        book: Arc<RideBook>,
        history: Arc<dyn RideHistory>,
        sink: Arc<dyn MatchStore>,
        config: MatchingConfig,
    ) -> Self {
        Self {
            finder,
            scorer,
            surge,
            offers,
            book,
            history,
            sink,
            config,
        }
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    /// Run a matching pass for a new ride, or an explicit retry of one
    /// that found no driver
    pub async fn process_ride_request(&self, ride_id: Uuid) -> Result<MatchingResult, EngineError> {
        let lock = self.book.ride_lock(ride_id);
        let _guard = lock.lock().await;

        let ride = self.book.require_ride(ride_id)?;
        if !ride.status.is_searchable() {
            return Err(EngineError::invalid_state(format!(
                "ride {} is {}, matching not allowed",
                ride_id,
                ride.status.as_str()
            )));
        }

        self.search(ride, self.config.top_n).await
    }

    /// Re-search after every offer was rejected or expired.
    ///
    /// Returns `Ok(None)` when the ride moved on in the meantime (accepted,
    /// cancelled or already re-searched), so stale follow-ups are harmless.
    pub async fn rematch(&self, ride_id: Uuid) -> Result<Option<MatchingResult>, EngineError> {
        let lock = self.book.ride_lock(ride_id);
        let _guard = lock.lock().await;

        let ride = self.book.require_ride(ride_id)?;
        if ride.status != RideStatus::DriverRejected {
            tracing::debug!(
                "Skipping re-search for ride {} in status {}",
                ride_id,
                ride.status.as_str()
            );
            return Ok(None);
        }

        tracing::info!("Re-searching drivers for ride {}", ride_id);
        self.search(ride, self.config.rematch_top_n).await.map(Some)
    }

    /// One pass; the caller holds the ride lock
    async fn search(&self, ride: RideRequest, top_n: usize) -> Result<MatchingResult, EngineError> {
        let started = Instant::now();
        let now = Utc::now();
        let previous = ride.status;

        self.book
            .transition_ride(ride.id, &[previous], RideStatus::DriverSearch, now)?;
        let ride = self.book.update_ride(ride.id, |r| {
            r.matching_attempts += 1;
            r.last_matching_error = None;
        })?;

        let mut stats = PassStats {
            attempt: ride.matching_attempts,
            search_radius_km: search_radius_km(&ride, &self.config),
            surge_multiplier: ride.surge_multiplier,
            ..PassStats::default()
        };

        let outcome = self.attempt(&ride, top_n, now, &mut stats).await;

        match &outcome {
            Err(e) if e.is_retryable() => {
                tracing::error!("Matching pass for ride {} aborted: {}", ride.id, e);
                let reverted = self
                    .book
                    .transition_ride(ride.id, &[RideStatus::DriverSearch], previous, Utc::now())
                    .and_then(|_| {
                        self.book
                            .update_ride(ride.id, |r| r.last_matching_error = Some(e.to_string()))
                    });
                if let Ok(reverted) = reverted {
                    self.mirror_ride(&reverted).await;
                }
            }
            Err(e) => tracing::warn!("Matching pass for ride {} stopped: {}", ride.id, e),
            Ok(_) => {}
        }

        let log = MatchingAttemptLog {
            id: Uuid::new_v4(),
            ride_id: ride.id,
            attempt: stats.attempt,
            search_radius_km: stats.search_radius_km,
            drivers_found: stats.drivers_found,
            drivers_eligible: stats.drivers_eligible,
            drivers_contacted: stats.drivers_contacted,
            offers_created: stats.offers_created,
            success: stats.success,
            surge_multiplier: stats.surge_multiplier,
            duration_ms: started.elapsed().as_millis() as u64,
            error: outcome.as_ref().err().map(|e| e.to_string()),
            created_at: now,
        };
        if let Err(e) = self.sink.append_attempt(&log).await {
            tracing::warn!("Failed to record matching attempt for ride {}: {}", ride.id, e);
        }

        outcome
    }

    async fn attempt(
        &self,
        ride: &RideRequest,
        top_n: usize,
        now: DateTime<Utc>,
        stats: &mut PassStats,
    ) -> Result<MatchingResult, EngineError> {
        let surge = self.surge.estimate_at(ride.pickup, ride.tier, now).await?;
        stats.surge_multiplier = surge;
        let ride = self.book.update_ride(ride.id, |r| r.surge_multiplier = surge)?;

        let exclude = self.book.offered_drivers(ride.id);
        let search = self.finder.find(&ride, &exclude, now).await?;
        stats.search_radius_km = search.search_radius_km;
        stats.drivers_found = search.drivers_found;
        stats.drivers_eligible = search.candidates.len();

        let mut ranked = self.rank(&ride, &search, surge, now).await?;
        ranked.truncate(top_n);
        stats.drivers_contacted = ranked.len();

        tracing::debug!(
            "Ride {}: {} found, {} eligible, contacting {}",
            ride.id,
            search.drivers_found,
            search.candidates.len(),
            ranked.len()
        );

        if ranked.is_empty() {
            let ride = self.book.transition_ride(
                ride.id,
                &[RideStatus::DriverSearch],
                RideStatus::NoDriverFound,
                now,
            )?;
            self.mirror_ride(&ride).await;
            tracing::info!(
                "No driver found for ride {} within {}km",
                ride.id,
                search.search_radius_km
            );

            return Ok(MatchingResult {
                ride_id: ride.id,
                success: false,
                drivers_found: search.candidates.len(),
                offers_created: 0,
                surge_multiplier: surge,
                search_radius_km: search.search_radius_km,
                ranked_scores: Vec::new(),
                offers: Vec::new(),
            });
        }

        let offers = self.offers.create_offers(&ride, &ranked, now).await?;
        stats.offers_created = offers.len();
        stats.success = true;

        Ok(MatchingResult {
            ride_id: ride.id,
            success: true,
            drivers_found: search.candidates.len(),
            offers_created: offers.len(),
            surge_multiplier: surge,
            search_radius_km: search.search_radius_km,
            ranked_scores: ranked,
            offers,
        })
    }

    /// Score every candidate and order by score, descending.
    ///
    /// The sort is stable over the finder's distance/driver-id order, which
    /// settles equal scores.
    async fn rank(
        &self,
        ride: &RideRequest,
        search: &CandidateSearch,
        surge: f64,
        now: DateTime<Utc>,
    ) -> Result<Vec<DriverScore>, EngineError> {
        let prior_rides = match ride.tier {
            Tier::Vip => join_all(search.candidates.iter().map(|c| {
                self.history
                    .count_vip_rides_with_driver(&ride.rider_id, &c.driver.driver_id)
            }))
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?,
            Tier::Premium | Tier::Normal => vec![0; search.candidates.len()],
        };

        let mut scores: Vec<DriverScore> = search
            .candidates
            .iter()
            .zip(prior_rides)
            .map(|(candidate, prior_vip_rides)| {
                self.scorer.score(&ScoringInput {
                    ride,
                    driver: &candidate.driver,
                    vehicle: &candidate.vehicle,
                    driver_location: candidate.location,
                    distance_km: candidate.distance_km,
                    search_radius_km: search.search_radius_km,
                    surge_multiplier: surge,
                    prior_vip_rides,
                    now,
                })
            })
            .collect();

        scores.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(scores)
    }

    async fn mirror_ride(&self, ride: &RideRequest) {
        if let Err(e) = self.sink.save_ride(ride).await {
            tracing::warn!("Failed to persist ride {}: {}", ride.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MatchingConfig::default();
        assert_eq!(config.top_n, 5);
        assert_eq!(config.rematch_top_n, 3);
        assert!(config.vip_radius_km > config.extended_radius_km);
        assert!(config.extended_radius_km > config.default_radius_km);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: MatchingConfig = serde_json::from_str(r#"{"top_n": 8}"#).unwrap();
        assert_eq!(config.top_n, 8);
        assert_eq!(config.candidate_pool_cap, 50);
        assert_eq!(config.default_radius_km, 20.0);
    }
}
