// Route exports
pub mod dispatch;

use actix_web::web;

pub use dispatch::AppState;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .configure(dispatch::configure),
    );
}
