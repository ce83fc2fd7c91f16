use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::core::Dispatcher;
use crate::error::EngineError;
use crate::models::{
    AckResponse, ActiveOffersResponse, CancelRideRequest, DriverAvailabilityRequest,
    ErrorResponse, HealthResponse, OfferResponse, RequestRideRequest, RespondToOfferRequest,
    SurgeLevelsResponse,
};
use crate::services::PostgresStore;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    /// Present when running against PostgreSQL
    pub database: Option<Arc<PostgresStore>>,
}

/// Configure all dispatch routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        .route("/health", web::get().to(health_check))
        .route("/rides", web::post().to(request_ride))
        .route("/rides/{ride_id}", web::get().to(get_ride))
        .route("/rides/{ride_id}/cancel", web::post().to(cancel_ride))
        .route("/rides/{ride_id}/retry", web::post().to(retry_matching))
        .route("/offers/{offer_id}/respond", web::post().to(respond_to_offer))
        .route("/drivers/{driver_id}/offers", web::get().to(list_active_offers))
        .route("/drivers/{driver_id}/availability", web::put().to(update_availability))
        .route("/surge", web::get().to(get_surge_levels));
}

fn validation_failed(errors: validator::ValidationErrors) -> HttpResponse {
    tracing::info!("Validation failed: {}", errors);
    HttpResponse::BadRequest().json(ErrorResponse {
        error: "Validation failed".to_string(),
        message: errors.to_string(),
        status_code: 400,
    })
}

/// Health check endpoint
async fn health_check(state: web::Data<AppState>) -> impl Responder {
    let healthy = match &state.database {
        Some(db) => db.health_check().await.unwrap_or(false),
        None => true,
    };

    let status = if healthy { "healthy" } else { "degraded" };

    HttpResponse::Ok().json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
    })
}

/// Request a ride and run the first matching pass
///
/// POST /api/v1/rides
///
/// Request body:
/// ```json
/// {
///   "riderId": "string",
///   "pickup": {"latitude": 6.52, "longitude": 3.38},
///   "destination": {"latitude": 6.60, "longitude": 3.35},
///   "tier": "normal|premium|vip",
///   "rideType": "normal|airport|corporate|hotel",
///   "requirements": {"babySeat": false, "wheelchairAccess": false, "premiumVehicle": false},
///   "preferredDriverId": "string"
/// }
/// ```
async fn request_ride(
    state: web::Data<AppState>,
    req: web::Json<RequestRideRequest>,
) -> Result<HttpResponse, EngineError> {
    if let Err(errors) = req.validate() {
        return Ok(validation_failed(errors));
    }

    let response = state.dispatcher.request_ride(req.into_inner().into()).await?;
    Ok(HttpResponse::Created().json(response))
}

/// GET /api/v1/rides/{ride_id}
async fn get_ride(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, EngineError> {
    let details = state.dispatcher.get_ride(path.into_inner())?;
    Ok(HttpResponse::Ok().json(details))
}

/// POST /api/v1/rides/{ride_id}/cancel
async fn cancel_ride(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    req: web::Json<CancelRideRequest>,
) -> Result<HttpResponse, EngineError> {
    if let Err(errors) = req.validate() {
        return Ok(validation_failed(errors));
    }

    state
        .dispatcher
        .cancel_ride(path.into_inner(), &req.reason)
        .await?;
    Ok(HttpResponse::Ok().json(AckResponse { success: true }))
}

/// Retry matching for a ride that found no driver
///
/// POST /api/v1/rides/{ride_id}/retry
async fn retry_matching(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, EngineError> {
    let result = state.dispatcher.retry_matching(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(result))
}

/// Accept or decline an offer
///
/// POST /api/v1/offers/{offer_id}/respond
///
/// Request body:
/// ```json
/// {
///   "driverId": "string",
///   "accepted": true
/// }
/// ```
async fn respond_to_offer(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    req: web::Json<RespondToOfferRequest>,
) -> Result<HttpResponse, EngineError> {
    if let Err(errors) = req.validate() {
        return Ok(validation_failed(errors));
    }

    let offer = state
        .dispatcher
        .respond_to_offer(path.into_inner(), &req.driver_id, req.accepted)
        .await?;

    let message = if req.accepted {
        format!("Ride {} accepted", offer.ride_id)
    } else {
        format!("Offer for ride {} declined", offer.ride_id)
    };

    Ok(HttpResponse::Ok().json(OfferResponse {
        success: true,
        message,
    }))
}

/// GET /api/v1/drivers/{driver_id}/offers
async fn list_active_offers(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let driver_id = path.into_inner();
    let offers = state.dispatcher.list_active_offers(&driver_id).await;

    HttpResponse::Ok().json(ActiveOffersResponse { driver_id, offers })
}

/// PUT /api/v1/drivers/{driver_id}/availability
async fn update_availability(
    state: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<DriverAvailabilityRequest>,
) -> Result<HttpResponse, EngineError> {
    if let Err(errors) = req.validate() {
        return Ok(validation_failed(errors));
    }

    state
        .dispatcher
        .update_driver_availability(&path, req.is_available, req.location.map(Into::into))
        .await?;
    Ok(HttpResponse::Ok().json(AckResponse { success: true }))
}

#[derive(Debug, Deserialize)]
struct SurgeQuery {
    zone: Option<String>,
}

/// GET /api/v1/surge?zone={filter}
async fn get_surge_levels(
    state: web::Data<AppState>,
    query: web::Query<SurgeQuery>,
) -> impl Responder {
    let zones = state.dispatcher.get_surge_levels(query.zone.as_deref());
    HttpResponse::Ok().json(SurgeLevelsResponse { zones })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Collaborators, EngineConfig};
    use crate::services::InMemoryStore;
    use actix_web::{http::StatusCode, test, App};

    fn state() -> AppState {
        let store = Arc::new(InMemoryStore::new());
        AppState {
            dispatcher: Arc::new(Dispatcher::new(
                Collaborators::from_store(store),
                EngineConfig::default(),
            )),
            database: None,
        }
    }

    #[actix_web::test]
    async fn test_health_without_database() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state()))
                .configure(configure),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: HealthResponse = test::read_body_json(resp).await;
        assert_eq!(body.status, "healthy");
    }

    #[actix_web::test]
    async fn test_invalid_pickup_rejected() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/rides")
            .set_json(serde_json::json!({
                "riderId": "rider-1",
                "pickup": {"latitude": 123.0, "longitude": 3.38},
                "destination": {"latitude": 6.60, "longitude": 3.35}
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_unknown_ride_is_404() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state()))
                .configure(configure),
        )
        .await;

        let uri = format!("/rides/{}", Uuid::new_v4());
        let resp = test::call_service(&app, test::TestRequest::get().uri(&uri).to_request()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_request_ride_without_drivers() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/rides")
            .set_json(serde_json::json!({
                "riderId": "rider-1",
                "pickup": {"latitude": 6.52, "longitude": 3.38},
                "destination": {"latitude": 6.60, "longitude": 3.35},
                "tier": "premium"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["matchingResult"]["success"], false);
        assert_eq!(body["matchingResult"]["offersCreated"], 0);
    }
}
