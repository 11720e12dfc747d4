// API route configuration

use crate::api::handlers;
use actix_web::web;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // Health check (no auth required)
        .route("/health", web::get().to(handlers::health_check))
        // API v1 routes (all require authentication)
        .service(
            web::scope("/api/v1")
                // Sync control
                .route("/sync/trigger", web::post().to(handlers::trigger_sync))
                .route("/sync/status", web::get().to(handlers::sync_status))
                .route("/sync/cancel", web::post().to(handlers::cancel_sync))
                .route("/sync/events", web::get().to(handlers::sync_events))
                .route("/daemon/start", web::post().to(handlers::start_daemon))
                // Storage
                .route("/stats", web::get().to(handlers::table_stats))
                .route("/db/init", web::post().to(handlers::init_db)),
        );
}
