use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::time::Duration;

use crate::core::distance::{calculate_bounding_box, is_within_radius};
use crate::error::StoreError;
use crate::models::{
    DriverCandidate, DriverStatus, Location, MatchingAttemptLog, Offer, RideRequest, RideStatus,
    Subscription, Tier, VehicleCandidate, VehicleCategory,
};
use crate::services::directory::{
    DriverDirectory, MatchStore, RideHistory, SubscriptionDirectory, VehicleDirectory,
};

const DRIVER_COLUMNS: &str = r#"
    id, status, is_online, is_available, latitude, longitude, subscription_tier,
    average_rating, completion_rate, fleet_id, location_updated_at
"#;

/// PostgreSQL implementation of the driver/vehicle directories, ride
/// history and the persistence sink.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect and run embedded migrations
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(600))
            .test_before_acquire(true)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Health check for the database connection
    pub async fn health_check(&self) -> Result<bool, StoreError> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|_| true)
            .map_err(Into::into)
    }
}

fn driver_from_row(row: &PgRow) -> Result<DriverCandidate, sqlx::Error> {
    let latitude: Option<f64> = row.try_get("latitude")?;
    let longitude: Option<f64> = row.try_get("longitude")?;

    Ok(DriverCandidate {
        driver_id: row.try_get("id")?,
        status: row.try_get::<DriverStatus, _>("status")?,
        is_online: row.try_get("is_online")?,
        is_available: row.try_get("is_available")?,
        location: latitude.zip(longitude).map(|(lat, lon)| Location::new(lat, lon)),
        subscription_tier: row.try_get::<Tier, _>("subscription_tier")?,
        average_rating: row.try_get("average_rating")?,
        completion_rate: row.try_get("completion_rate")?,
        fleet_id: row.try_get("fleet_id")?,
        last_location_update: row.try_get("location_updated_at")?,
    })
}

fn status_labels(statuses: &[RideStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

#[async_trait]
impl DriverDirectory for PostgresStore {
    async fn find_near(
        &self,
        center: Location,
        radius_km: f64,
    ) -> Result<Vec<DriverCandidate>, StoreError> {
        let bbox = calculate_bounding_box(center.latitude, center.longitude, radius_km);
        let query = format!(
            r#"
            SELECT {}
            FROM drivers
            WHERE latitude BETWEEN $1 AND $2
              AND longitude BETWEEN $3 AND $4
            ORDER BY id
            "#,
            DRIVER_COLUMNS
        );

        let rows = sqlx::query(&query)
            .bind(bbox.min_lat)
            .bind(bbox.max_lat)
            .bind(bbox.min_lon)
            .bind(bbox.max_lon)
            .fetch_all(&self.pool)
            .await?;

        let drivers = rows
            .iter()
            .map(driver_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!("Bounding box query returned {} drivers", drivers.len());

        Ok(drivers)
    }

    async fn get_driver(&self, driver_id: &str) -> Result<Option<DriverCandidate>, StoreError> {
        let query = format!("SELECT {} FROM drivers WHERE id = $1", DRIVER_COLUMNS);
        let row = sqlx::query(&query)
            .bind(driver_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(driver_from_row).transpose()?)
    }

    async fn claim_driver(&self, driver_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE drivers
            SET is_available = FALSE
            WHERE id = $1 AND is_available = TRUE
            "#,
        )
        .bind(driver_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_availability(
        &self,
        driver_id: &str,
        is_available: bool,
        location: Option<Location>,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = match location {
            Some(location) => {
                sqlx::query(
                    r#"
                    UPDATE drivers
                    SET is_available = $2, latitude = $3, longitude = $4, location_updated_at = $5
                    WHERE id = $1
                    "#,
                )
                .bind(driver_id)
                .bind(is_available)
                .bind(location.latitude)
                .bind(location.longitude)
                .bind(at)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query("UPDATE drivers SET is_available = $2 WHERE id = $1")
                    .bind(driver_id)
                    .bind(is_available)
                    .execute(&self.pool)
                    .await?
            }
        };

        Ok(result.rows_affected() > 0)
    }

    async fn count_available_near(
        &self,
        center: Location,
        radius_km: f64,
    ) -> Result<u32, StoreError> {
        let bbox = calculate_bounding_box(center.latitude, center.longitude, radius_km);
        let rows = sqlx::query(
            r#"
            SELECT latitude, longitude
            FROM drivers
            WHERE status = 'active' AND is_online AND is_available
              AND latitude BETWEEN $1 AND $2
              AND longitude BETWEEN $3 AND $4
            "#,
        )
        .bind(bbox.min_lat)
        .bind(bbox.max_lat)
        .bind(bbox.min_lon)
        .bind(bbox.max_lon)
        .fetch_all(&self.pool)
        .await?;

        let mut count = 0;
        for row in &rows {
            let point = Location::new(row.try_get("latitude")?, row.try_get("longitude")?);
            if is_within_radius(center, point, radius_km) {
                count += 1;
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl VehicleDirectory for PostgresStore {
    async fn vehicles_for_driver(
        &self,
        driver_id: &str,
    ) -> Result<Vec<VehicleCandidate>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, driver_id, category, has_ac, has_baby_seat, wheelchair_accessible,
                   luxury_interior, is_active
            FROM vehicles
            WHERE driver_id = $1
            ORDER BY id
            "#,
        )
        .bind(driver_id)
        .fetch_all(&self.pool)
        .await?;

        let vehicles = rows
            .iter()
            .map(|row| {
                Ok(VehicleCandidate {
                    vehicle_id: row.try_get("id")?,
                    driver_id: row.try_get("driver_id")?,
                    category: row.try_get::<VehicleCategory, _>("category")?,
                    has_ac: row.try_get("has_ac")?,
                    has_baby_seat: row.try_get("has_baby_seat")?,
                    wheelchair_accessible: row.try_get("wheelchair_accessible")?,
                    luxury_interior: row.try_get("luxury_interior")?,
                    is_active: row.try_get("is_active")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        Ok(vehicles)
    }
}

#[async_trait]
impl SubscriptionDirectory for PostgresStore {
    async fn subscription_for(&self, driver_id: &str) -> Result<Option<Subscription>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT driver_id, tier, is_active, expires_at
            FROM driver_subscriptions
            WHERE driver_id = $1
            ORDER BY expires_at DESC
            LIMIT 1
            "#,
        )
        .bind(driver_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(Subscription {
            driver_id: row.try_get("driver_id")?,
            tier: row.try_get::<Tier, _>("tier")?,
            is_active: row.try_get("is_active")?,
            expires_at: row.try_get("expires_at")?,
        }))
    }
}

#[async_trait]
impl RideHistory for PostgresStore {
    async fn count_rides(
        &self,
        center: Location,
        radius_km: f64,
        since: DateTime<Utc>,
        statuses: &[RideStatus],
    ) -> Result<u32, StoreError> {
        let bbox = calculate_bounding_box(center.latitude, center.longitude, radius_km);
        let rows = sqlx::query(
            r#"
            SELECT pickup_lat, pickup_lng
            FROM rides
            WHERE status::text = ANY($1)
              AND created_at >= $2
              AND pickup_lat BETWEEN $3 AND $4
              AND pickup_lng BETWEEN $5 AND $6
            "#,
        )
        .bind(status_labels(statuses))
        .bind(since)
        .bind(bbox.min_lat)
        .bind(bbox.max_lat)
        .bind(bbox.min_lon)
        .bind(bbox.max_lon)
        .fetch_all(&self.pool)
        .await?;

        let mut count = 0;
        for row in &rows {
            let pickup = Location::new(row.try_get("pickup_lat")?, row.try_get("pickup_lng")?);
            if is_within_radius(center, pickup, radius_km) {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn count_vip_rides_with_driver(
        &self,
        rider_id: &str,
        driver_id: &str,
    ) -> Result<u32, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS rides
            FROM rides
            WHERE rider_id = $1 AND driver_id = $2 AND tier = 'vip' AND status = 'completed'
            "#,
        )
        .bind(rider_id)
        .bind(driver_id)
        .fetch_one(&self.pool)
        .await?;

        let rides: i64 = row.try_get("rides")?;
        Ok(rides.max(0) as u32)
    }
}

#[async_trait]
impl MatchStore for PostgresStore {
    async fn save_ride(&self, ride: &RideRequest) -> Result<(), StoreError> {
        let query = r#"
            INSERT INTO rides (
                id, rider_id, pickup_lat, pickup_lng, destination_lat, destination_lng,
                tier, ride_type, needs_baby_seat, needs_wheelchair, needs_premium_vehicle,
                preferred_driver_id, status, driver_id, vehicle_id, surge_multiplier,
                matching_attempts, cancellation_reason, last_matching_error, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)
            ON CONFLICT (id)
            DO UPDATE SET
                status = EXCLUDED.status,
                driver_id = EXCLUDED.driver_id,
                vehicle_id = EXCLUDED.vehicle_id,
                surge_multiplier = EXCLUDED.surge_multiplier,
                matching_attempts = EXCLUDED.matching_attempts,
                cancellation_reason = EXCLUDED.cancellation_reason,
                last_matching_error = EXCLUDED.last_matching_error,
                updated_at = EXCLUDED.updated_at
        "#;

        sqlx::query(query)
            .bind(ride.id)
            .bind(&ride.rider_id)
            .bind(ride.pickup.latitude)
            .bind(ride.pickup.longitude)
            .bind(ride.destination.latitude)
            .bind(ride.destination.longitude)
            .bind(ride.tier)
            .bind(ride.ride_type)
            .bind(ride.requirements.baby_seat)
            .bind(ride.requirements.wheelchair_access)
            .bind(ride.requirements.premium_vehicle)
            .bind(&ride.preferred_driver_id)
            .bind(ride.status)
            .bind(&ride.driver_id)
            .bind(&ride.vehicle_id)
            .bind(ride.surge_multiplier)
            .bind(ride.matching_attempts as i32)
            .bind(&ride.cancellation_reason)
            .bind(&ride.last_matching_error)
            .bind(ride.created_at)
            .bind(ride.updated_at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn save_offers(&self, offers: &[Offer]) -> Result<(), StoreError> {
        let query = r#"
            INSERT INTO ride_offers (
                id, ride_id, driver_id, vehicle_id, estimated_arrival_minutes,
                driver_lat, driver_lng, score, status, created_at, expires_at, responded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id)
            DO UPDATE SET
                status = EXCLUDED.status,
                responded_at = EXCLUDED.responded_at
        "#;

        let mut tx = self.pool.begin().await?;
        for offer in offers {
            sqlx::query(query)
                .bind(offer.id)
                .bind(offer.ride_id)
                .bind(&offer.driver_id)
                .bind(&offer.vehicle_id)
                .bind(offer.estimated_arrival_minutes as i32)
                .bind(offer.driver_location.latitude)
                .bind(offer.driver_location.longitude)
                .bind(offer.score)
                .bind(offer.status)
                .bind(offer.created_at)
                .bind(offer.expires_at)
                .bind(offer.responded_at)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn append_attempt(&self, log: &MatchingAttemptLog) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO matching_attempts (
                id, ride_id, attempt, search_radius_km, drivers_found, drivers_eligible,
                drivers_contacted, offers_created, success, surge_multiplier, duration_ms,
                error, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(log.id)
        .bind(log.ride_id)
        .bind(log.attempt as i32)
        .bind(log.search_radius_km)
        .bind(log.drivers_found as i32)
        .bind(log.drivers_eligible as i32)
        .bind(log.drivers_contacted as i32)
        .bind(log.offers_created as i32)
        .bind(log.success)
        .bind(log.surge_multiplier)
        .bind(log.duration_ms as i64)
        .bind(&log.error)
        .bind(log.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_labels_match_enum_values() {
        let labels = status_labels(&RideStatus::ACTIVE_DEMAND);
        assert_eq!(labels, vec!["accepted", "driver_en_route"]);
    }

    #[tokio::test]
    #[ignore = "Requires PostgreSQL"]
    async fn test_claim_driver_roundtrip() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL");
        let store = PostgresStore::new(&url, 2, 1).await.expect("connect");
        assert!(store.health_check().await.unwrap());

        sqlx::query(
            r#"
            INSERT INTO drivers (id, status, is_online, is_available, latitude, longitude,
                                 subscription_tier, completion_rate)
            VALUES ('pg-test-driver', 'active', TRUE, TRUE, 6.52, 3.38, 'premium', 96.0)
            ON CONFLICT (id) DO UPDATE SET is_available = TRUE
            "#,
        )
        .execute(&store.pool)
        .await
        .unwrap();

        assert!(store.claim_driver("pg-test-driver").await.unwrap());
        assert!(!store.claim_driver("pg-test-driver").await.unwrap());
    }
}
