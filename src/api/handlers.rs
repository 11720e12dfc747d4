// HTTP request handlers for API endpoints

use actix_web::{web, HttpResponse, Result};
use futures::{stream, StreamExt};
use tokio::sync::broadcast::error::RecvError;

use crate::api::models::*;
use crate::database_ops::backfill::Season;
use crate::error::RunnerError;
use crate::orchestrator::SyncRequest;
use crate::realtime::DashboardEvent;

fn runner_error(e: RunnerError) -> HttpResponse {
    let body = ApiResponse::<()>::error(e.to_string());
    match e {
        RunnerError::Busy | RunnerError::DaemonActive => HttpResponse::Conflict().json(body),
        RunnerError::Invalid(_) => HttpResponse::BadRequest().json(body),
    }
}

/// Health check endpoint
pub async fn health_check(state: web::Data<AppState>) -> Result<HttpResponse> {
    let db_status = match state.runner.storage().team_codes().await {
        Ok(_) => "connected",
        Err(_) => "disconnected",
    };

    let response = ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        database: db_status.to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        daemon_active: state.runner.daemon_active(),
    });

    Ok(HttpResponse::Ok().json(response))
}

/// Start a one-shot sync in the background
pub async fn trigger_sync(
    payload: web::Json<SyncTriggerRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    tracing::info!(
        entity = %payload.entity,
        season = ?payload.season,
        all_seasons = payload.all_seasons,
        "sync trigger requested"
    );

    let request = match SyncRequest::parse(
        &payload.entity,
        payload.season.as_deref(),
        payload.all_seasons,
    ) {
        Ok(r) => r,
        Err(e) => return Ok(runner_error(e.into())),
    };
    let seasons = request.seasons(state.runner.backfill_start_year());

    let handle = match state.runner.request_one_shot(request) {
        Ok(h) => h,
        Err(e) => return Ok(runner_error(e)),
    };
    tokio::spawn(async move {
        match handle.await {
            Ok(summary) => tracing::info!(
                status = summary.status.label(),
                failures = summary.failures().count(),
                "triggered sync finished"
            ),
            Err(e) => tracing::error!(error = %e, "triggered sync task failed"),
        }
    });

    let response = ApiResponse::success(SyncAccepted {
        entity: request.target.to_string(),
        seasons,
        status: "started".to_string(),
    });
    Ok(HttpResponse::Accepted().json(response))
}

pub async fn sync_status(state: web::Data<AppState>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(ApiResponse::success(state.runner.status())))
}

pub async fn cancel_sync(state: web::Data<AppState>) -> Result<HttpResponse> {
    state.runner.cancel();
    Ok(HttpResponse::Ok().json(ApiResponse::success(state.runner.status())))
}

/// Server-sent events: a status snapshot first, then every status change and
/// log line.
pub async fn sync_events(state: web::Data<AppState>) -> Result<HttpResponse> {
    let first = DashboardEvent::Status(state.runner.status());
    let rx = state.runner.subscribe();

    let head = stream::once(async move {
        Ok::<_, actix_web::Error>(web::Bytes::from(first.to_sse_frame()))
    });
    let tail = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    return Some((
                        Ok::<_, actix_web::Error>(web::Bytes::from(event.to_sse_frame())),
                        rx,
                    ))
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "dashboard subscriber lagging");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(head.chain(tail)))
}

pub async fn start_daemon(
    payload: Option<web::Json<DaemonStartRequest>>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let payload = payload.map(web::Json::into_inner).unwrap_or_default();
    let pinned = match payload.season.as_deref().map(Season::parse).transpose() {
        Ok(season) => season,
        Err(e) => return Ok(runner_error(e.into())),
    };
    if let Err(e) = state.runner.start_daemon(pinned) {
        return Ok(runner_error(e));
    }
    Ok(HttpResponse::Accepted().json(ApiResponse::success(state.runner.status())))
}

/// Row count and freshness per table
pub async fn table_stats(state: web::Data<AppState>) -> Result<HttpResponse> {
    match state.runner.storage().table_summaries().await {
        Ok(summaries) => Ok(HttpResponse::Ok().json(ApiResponse::success(summaries))),
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "table summaries failed");
            Ok(HttpResponse::InternalServerError().json(ApiResponse::<()>::error(e.to_string())))
        }
    }
}

pub async fn init_db(state: web::Data<AppState>) -> Result<HttpResponse> {
    match state.runner.storage().init_schema().await {
        Ok(()) => Ok(HttpResponse::Ok().json(ApiResponse::success("schema up to date"))),
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "schema init failed");
            Ok(HttpResponse::InternalServerError().json(ApiResponse::<()>::error(e.to_string())))
        }
    }
}
