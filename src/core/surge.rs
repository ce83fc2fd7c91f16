use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::future::Cache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::distance::is_within_radius;
use crate::error::StoreError;
use crate::models::{
    DemandSnapshot, Location, RideStatus, SurgeLevel, SurgeLevelView, SurgeZone, Tier,
};
use crate::services::directory::{DriverDirectory, RideHistory};

/// Demand/supply ratio at or above `min_ratio` maps to `multiplier`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurgeBreakpoint {
    pub min_ratio: f64,
    pub multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SurgeConfig {
    pub lookback_minutes: i64,
    pub radius_km: f64,
    /// Ceiling, reached only when no driver is available
    pub max_multiplier: f64,
    pub breakpoints: Vec<SurgeBreakpoint>,
    pub vip_cap: f64,
    pub premium_cap: f64,
    pub snapshot_ttl_secs: u64,
    pub snapshot_capacity: u64,
    /// Grid cell edge in degrees; one snapshot per cell
    pub cell_size_deg: f64,
    /// Demand events in a cell that force an early recompute
    pub material_change_events: u32,
    pub zones: Vec<SurgeZone>,
}

impl Default for SurgeConfig {
    fn default() -> Self {
        Self {
            lookback_minutes: 30,
            radius_km: 3.0,
            max_multiplier: 3.0,
            breakpoints: vec![
                SurgeBreakpoint { min_ratio: 2.0, multiplier: 2.5 },
                SurgeBreakpoint { min_ratio: 1.5, multiplier: 2.0 },
                SurgeBreakpoint { min_ratio: 1.0, multiplier: 1.5 },
                SurgeBreakpoint { min_ratio: 0.7, multiplier: 1.3 },
            ],
            vip_cap: 2.0,
            premium_cap: 2.5,
            snapshot_ttl_secs: 300,
            snapshot_capacity: 10_000,
            cell_size_deg: 0.01,
            material_change_events: 5,
            zones: Vec::new(),
        }
    }
}

/// Map a demand/supply ratio through the breakpoint table
pub fn multiplier_for_ratio(ratio: f64, config: &SurgeConfig) -> f64 {
    config
        .breakpoints
        .iter()
        .filter(|bp| ratio >= bp.min_ratio)
        .map(|bp| bp.multiplier)
        .fold(1.0, f64::max)
}

/// Multiplier before tier caps. Zero supply means maximum surge.
pub fn raw_multiplier(demand: u32, supply: u32, config: &SurgeConfig) -> (Option<f64>, f64) {
    if supply == 0 {
        return (None, config.max_multiplier);
    }
    let ratio = demand as f64 / supply as f64;
    (Some(ratio), multiplier_for_ratio(ratio, config))
}

/// Clamp into [1.0, tier ceiling]
pub fn apply_tier_cap(multiplier: f64, tier: Tier, config: &SurgeConfig) -> f64 {
    let cap = match tier {
        Tier::Vip => config.vip_cap,
        Tier::Premium => config.premium_cap,
        Tier::Normal => config.max_multiplier,
    };
    multiplier.clamp(1.0, cap.max(1.0))
}

/// Computes surge multipliers from static zones or live demand.
///
/// Dynamic figures are cached per grid cell; concurrent lookups for the
/// same cell share one computation.
pub struct SurgeEstimator {
    config: SurgeConfig,
    drivers: Arc<dyn DriverDirectory>,
    history: Arc<dyn RideHistory>,
    snapshots: Cache<String, DemandSnapshot>,
    demand_events: Mutex<HashMap<String, u32>>,
}

impl SurgeEstimator {
    pub fn new(
        config: SurgeConfig,
        drivers: Arc<dyn DriverDirectory>,
        history: Arc<dyn RideHistory>,
    ) -> Self {
        let snapshots = Cache::builder()
            .max_capacity(config.snapshot_capacity)
            .time_to_live(Duration::from_secs(config.snapshot_ttl_secs))
            .build();

        Self {
            config,
            drivers,
            history,
            snapshots,
            demand_events: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SurgeConfig {
        &self.config
    }

    pub async fn estimate(&self, pickup: Location, tier: Tier) -> Result<f64, StoreError> {
        self.estimate_at(pickup, tier, Utc::now()).await
    }

    /// Surge multiplier for a pickup point and rider tier.
    ///
    /// A configured zone covering the point wins outright; otherwise the
    /// cell's demand snapshot decides.
    pub async fn estimate_at(
        &self,
        pickup: Location,
        tier: Tier,
        now: DateTime<Utc>,
    ) -> Result<f64, StoreError> {
        if let Some(zone) = self.covering_zone(pickup, now) {
            let multiplier = apply_tier_cap(
                zone.multiplier.min(self.config.max_multiplier),
                tier,
                &self.config,
            );
            tracing::debug!("Surge zone {} applies: {}x", zone.name, multiplier);
            return Ok(multiplier);
        }

        let snapshot = self.snapshot_at(pickup, now).await?;
        let multiplier = apply_tier_cap(snapshot.multiplier, tier, &self.config);

        tracing::debug!(
            "Surge for {} ({:?}): demand {} / supply {} -> {}x",
            snapshot.zone_id,
            tier,
            snapshot.demand(),
            snapshot.available_drivers,
            multiplier
        );

        Ok(multiplier)
    }

    /// Current demand snapshot for the cell covering `location`
    pub async fn snapshot_at(
        &self,
        location: Location,
        now: DateTime<Utc>,
    ) -> Result<DemandSnapshot, StoreError> {
        let (cell_id, center) = self.cell_for(location);

        if self.take_material_change(&cell_id) {
            tracing::debug!("Demand moved materially in {}, recomputing", cell_id);
            self.snapshots.invalidate(&cell_id).await;
        }

        if let Some(cached) = self.snapshots.get(&cell_id).await {
            if cached.expires_at >= now {
                return Ok(cached);
            }
            self.snapshots.invalidate(&cell_id).await;
        }

        self.snapshots
            .try_get_with(cell_id.clone(), self.compute_snapshot(cell_id, center, now))
            .await
            .map_err(|e| (*e).clone())
    }

    /// Note a ride being requested or cancelled near `location`
    pub fn record_demand_event(&self, location: Location) {
        let (cell_id, _) = self.cell_for(location);
        *self.demand_events.lock().entry(cell_id).or_insert(0) += 1;
    }

    /// Export of active zones and cached cell snapshots, sorted by name
    pub fn surge_levels(&self, filter: Option<&str>, now: DateTime<Utc>) -> Vec<SurgeLevelView> {
        let filter = filter.map(|f| f.to_lowercase());
        let matches = |name: &str| {
            filter
                .as_deref()
                .map_or(true, |f| name.to_lowercase().contains(f))
        };

        let mut levels: Vec<SurgeLevelView> = self
            .config
            .zones
            .iter()
            .filter(|zone| zone.is_active_at(now) && matches(&zone.name))
            .map(|zone| {
                let multiplier = zone.multiplier.clamp(1.0, self.config.max_multiplier);
                SurgeLevelView {
                    zone_name: zone.name.clone(),
                    level: SurgeLevel::from_multiplier(multiplier),
                    multiplier,
                    demand_ratio: None,
                }
            })
            .collect();

        levels.extend(
            self.snapshots
                .iter()
                .filter(|(_, snapshot)| snapshot.expires_at >= now)
                .filter(|(cell_id, _)| matches(cell_id.as_str()))
                .map(|(cell_id, snapshot)| SurgeLevelView {
                    zone_name: cell_id.to_string(),
                    level: SurgeLevel::from_multiplier(snapshot.multiplier),
                    multiplier: snapshot.multiplier,
                    demand_ratio: snapshot.demand_ratio,
                }),
        );

        levels.sort_by(|a, b| a.zone_name.cmp(&b.zone_name));
        levels
    }

    fn covering_zone(&self, point: Location, now: DateTime<Utc>) -> Option<&SurgeZone> {
        self.config.zones.iter().find(|zone| {
            zone.is_active_at(now)
                && is_within_radius(
                    Location::new(zone.latitude, zone.longitude),
                    point,
                    zone.radius_km,
                )
        })
    }

    fn cell_for(&self, location: Location) -> (String, Location) {
        let size = self.config.cell_size_deg;
        let row = (location.latitude / size).floor();
        let col = (location.longitude / size).floor();
        let center = Location::new((row + 0.5) * size, (col + 0.5) * size);
        (format!("cell:{}:{}", row as i64, col as i64), center)
    }

    fn take_material_change(&self, cell_id: &str) -> bool {
        let mut events = self.demand_events.lock();
        match events.get(cell_id) {
            Some(count) if *count >= self.config.material_change_events => {
                events.remove(cell_id);
                true
            }
            _ => false,
        }
    }

    /// Count demand and supply within `radius_km` of the cell centre rather
    /// than the pickup point, so every pickup in a cell shares one snapshot.
    /// The counting circle is offset from the pickup by at most half a cell
    /// diagonal (about 0.78 km at the default 0.01 degree cell size).
    async fn compute_snapshot(
        &self,
        cell_id: String,
        center: Location,
        now: DateTime<Utc>,
    ) -> Result<DemandSnapshot, StoreError> {
        let since = now - chrono::Duration::minutes(self.config.lookback_minutes);
        let radius = self.config.radius_km;

        let (pending, active, supply) = tokio::try_join!(
            self.history
                .count_rides(center, radius, since, &RideStatus::PENDING_DEMAND),
            self.history
                .count_rides(center, radius, since, &RideStatus::ACTIVE_DEMAND),
            self.drivers.count_available_near(center, radius),
        )?;

        self.demand_events.lock().remove(&cell_id);

        let (demand_ratio, multiplier) = raw_multiplier(pending + active, supply, &self.config);
        let ttl = chrono::Duration::seconds(self.config.snapshot_ttl_secs as i64);

        Ok(DemandSnapshot {
            zone_id: cell_id,
            center,
            radius_km: radius,
            active_rides: active,
            pending_requests: pending,
            available_drivers: supply,
            demand_ratio,
            multiplier,
            computed_at: now,
            expires_at: now + ttl,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DriverCandidate, DriverStatus, NewRide, RideRequest, RideType};
    use crate::services::memory::InMemoryStore;

    fn config() -> SurgeConfig {
        SurgeConfig::default()
    }

    fn driver(id: &str, at: Location) -> DriverCandidate {
        DriverCandidate {
            driver_id: id.to_string(),
            status: DriverStatus::Active,
            is_online: true,
            is_available: true,
            location: Some(at),
            subscription_tier: Tier::Normal,
            average_rating: None,
            completion_rate: 90.0,
            fleet_id: None,
            last_location_update: Some(Utc::now()),
        }
    }

    fn requested_ride(at: Location) -> RideRequest {
        RideRequest::new(
            NewRide {
                rider_id: "r".to_string(),
                pickup: at,
                destination: Location::new(6.6, 3.3),
                tier: Tier::Normal,
                ride_type: RideType::Normal,
                requirements: Default::default(),
                preferred_driver_id: None,
            },
            Utc::now(),
        )
    }

    fn estimator(store: Arc<InMemoryStore>, config: SurgeConfig) -> SurgeEstimator {
        SurgeEstimator::new(config, store.clone(), store)
    }

    #[test]
    fn test_breakpoints() {
        let c = config();
        assert_eq!(multiplier_for_ratio(0.0, &c), 1.0);
        assert_eq!(multiplier_for_ratio(0.69, &c), 1.0);
        assert_eq!(multiplier_for_ratio(0.7, &c), 1.3);
        assert_eq!(multiplier_for_ratio(1.0, &c), 1.5);
        assert_eq!(multiplier_for_ratio(1.5, &c), 2.0);
        assert_eq!(multiplier_for_ratio(2.0, &c), 2.5);
        assert_eq!(multiplier_for_ratio(50.0, &c), 2.5);
    }

    #[test]
    fn test_zero_supply_is_max() {
        let c = config();
        assert_eq!(raw_multiplier(4, 0, &c), (None, 3.0));
        assert_eq!(apply_tier_cap(3.0, Tier::Normal, &c), 3.0);
        assert_eq!(apply_tier_cap(3.0, Tier::Premium, &c), 2.5);
        assert_eq!(apply_tier_cap(3.0, Tier::Vip, &c), 2.0);
    }

    #[test]
    fn test_bounds_hold_for_any_input() {
        let c = config();
        for demand in 0..40 {
            for supply in 0..10 {
                let (_, raw) = raw_multiplier(demand, supply, &c);
                for tier in [Tier::Normal, Tier::Premium, Tier::Vip] {
                    let m = apply_tier_cap(raw, tier, &c);
                    assert!((1.0..=3.0).contains(&m));
                    if tier == Tier::Vip {
                        assert!(m <= 2.0);
                    }
                    if tier == Tier::Premium {
                        assert!(m <= 2.5);
                    }
                }
            }
        }
    }

    #[tokio::test]
    async fn test_dynamic_surge_from_store() {
        let store = Arc::new(InMemoryStore::new());
        let pickup = Location::new(6.5205, 3.3805);
        store.upsert_driver(driver("d1", pickup));
        store.upsert_driver(driver("d2", pickup));
        for _ in 0..3 {
            store.insert_ride(requested_ride(pickup));
        }

        let surge = estimator(store, config());
        // 3 / 2 = 1.5
        let m = surge.estimate(pickup, Tier::Normal).await.unwrap();
        assert_eq!(m, 2.0);
    }

    #[tokio::test]
    async fn test_snapshot_is_cached_until_material_change() {
        let store = Arc::new(InMemoryStore::new());
        let pickup = Location::new(6.5205, 3.3805);
        store.upsert_driver(driver("d1", pickup));

        let mut c = config();
        c.material_change_events = 2;
        let surge = estimator(store.clone(), c);

        assert_eq!(surge.estimate(pickup, Tier::Normal).await.unwrap(), 1.0);

        store.insert_ride(requested_ride(pickup));
        store.insert_ride(requested_ride(pickup));
        // Cached: still the old figure
        assert_eq!(surge.estimate(pickup, Tier::Normal).await.unwrap(), 1.0);

        surge.record_demand_event(pickup);
        surge.record_demand_event(pickup);
        // 2 / 1 = 2.0
        assert_eq!(surge.estimate(pickup, Tier::Normal).await.unwrap(), 2.5);
    }

    #[tokio::test]
    async fn test_static_zone_takes_precedence() {
        let store = Arc::new(InMemoryStore::new());
        let mut c = config();
        c.zones.push(SurgeZone {
            name: "Airport".to_string(),
            latitude: 6.5774,
            longitude: 3.3212,
            radius_km: 2.0,
            multiplier: 2.8,
            starts_at: None,
            ends_at: None,
        });
        let surge = estimator(store, c);
        let at_airport = Location::new(6.578, 3.322);

        assert_eq!(surge.estimate(at_airport, Tier::Normal).await.unwrap(), 2.8);
        assert_eq!(surge.estimate(at_airport, Tier::Vip).await.unwrap(), 2.0);

        let levels = surge.surge_levels(Some("air"), Utc::now());
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].level, SurgeLevel::Extreme);
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let store = Arc::new(InMemoryStore::new());
        store.set_unavailable(true);
        let surge = estimator(store, config());
        assert!(surge.estimate(Location::new(1.0, 1.0), Tier::Normal).await.is_err());
    }
}
