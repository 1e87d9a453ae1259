//! HTTP handler functions for the canvass API.

use actix_web::{HttpResponse, web};
use canvass_pipeline::{ErrorClass, PipelineError, SnapshotRequest, null_progress, parse_territory};
use canvass_server_models::{
    ApiError, ApiHealth, ApiRegion, LinkResponse, ManualOverrideBody, MatchesResponse,
    OrphansResponse, SnapshotRequestBody, SnapshotResponse,
};

use crate::AppState;

/// Maps a pipeline failure onto a status code, keeping the raw cause in
/// the body.
fn error_response(context: &str, e: &PipelineError) -> HttpResponse {
    let body = ApiError::new(e);
    match e.class() {
        ErrorClass::InvalidInput => {
            log::warn!("{context}: {e}");
            HttpResponse::BadRequest().json(body)
        }
        ErrorClass::NotFound => HttpResponse::NotFound().json(body),
        ErrorClass::Internal => {
            log::error!("{context}: {e}");
            HttpResponse::InternalServerError().json(body)
        }
    }
}

/// `GET /api/health`
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(ApiHealth {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// `GET /api/regions`
///
/// Lists every configured extraction region.
pub async fn regions() -> HttpResponse {
    let regions: Vec<ApiRegion> = canvass_region::all_regions()
        .into_iter()
        .map(|r| ApiRegion {
            bbox: r.bounds(),
            code: r.code,
            name: r.name,
            country: r.country,
        })
        .collect();

    HttpResponse::Ok().json(regions)
}

/// `POST /api/snapshots`
///
/// Extracts every requested theme inside the territory, writes the
/// compressed artifacts and returns the snapshot metadata with signed
/// URLs. Regenerating a campaign replaces its artifacts in place.
pub async fn create_snapshot(
    state: web::Data<AppState>,
    body: web::Json<SnapshotRequestBody>,
) -> HttpResponse {
    let body = body.into_inner();
    let polygon = match parse_territory(&body.polygon) {
        Ok(polygon) => polygon,
        Err(e) => return error_response("Invalid territory", &PipelineError::from(e)),
    };

    let request = SnapshotRequest {
        campaign_id: body.campaign_id,
        region: body.region,
        polygon,
        limits: body.limits,
        include_roads: body.include_roads,
        include_divisions: body.include_divisions,
    };

    let progress = null_progress();
    match state
        .pipeline
        .generate_snapshot(request, progress.as_ref())
        .await
    {
        Ok(meta) => HttpResponse::Ok().json(SnapshotResponse::from(meta)),
        Err(e) => error_response("Failed to generate snapshot", &e),
    }
}

/// `GET /api/campaigns/{id}/snapshot`
///
/// Returns the stored snapshot metadata with freshly signed URLs.
pub async fn get_snapshot(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    match state.pipeline.get_snapshot(&path).await {
        Ok(meta) => HttpResponse::Ok().json(SnapshotResponse::from(meta)),
        Err(e) => error_response("Failed to load snapshot", &e),
    }
}

/// `POST /api/campaigns/{id}/link`
///
/// Runs a linking pass over the campaign's snapshot.
pub async fn link(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let campaign_id = path.into_inner();
    match state.pipeline.run_linking(&campaign_id).await {
        Ok(run) => HttpResponse::Ok().json(LinkResponse {
            campaign_id,
            computed_matches: run.computed_matches,
            review_rows: run.review_rows,
            manual: run.manual,
            summary: run.summary,
        }),
        Err(e) => error_response("Failed to link campaign", &e),
    }
}

/// `GET /api/campaigns/{id}/matches`
pub async fn matches(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    match state.pipeline.matches(&path).await {
        Ok((matches, summary)) => HttpResponse::Ok().json(MatchesResponse { matches, summary }),
        Err(e) => error_response("Failed to query matches", &e),
    }
}

/// `GET /api/campaigns/{id}/orphans`
///
/// Addresses awaiting review, nearest building first.
pub async fn orphans(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    match state.pipeline.review_queue(&path).await {
        Ok(orphans) => HttpResponse::Ok().json(OrphansResponse {
            total: orphans.len(),
            orphans,
        }),
        Err(e) => error_response("Failed to query orphans", &e),
    }
}

/// `POST /api/campaigns/{id}/addresses/{address_id}/manual`
///
/// Records a reviewer's building choice for one address.
pub async fn manual_override(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    body: web::Json<ManualOverrideBody>,
) -> HttpResponse {
    let (campaign_id, address_id) = path.into_inner();
    match state
        .pipeline
        .set_manual_override(&campaign_id, &address_id, body.into_inner().building_id)
        .await
    {
        Ok(m) => HttpResponse::Ok().json(m),
        Err(e) => error_response("Failed to set manual override", &e),
    }
}

#[cfg(test)]
mod tests {
    use actix_web::http::StatusCode;
    use actix_web::{App, test};

    use super::*;

    #[::core::prelude::v1::test]
    fn maps_error_classes_to_status_codes() {
        let bad = error_response("x", &PipelineError::InvalidRequest("campaign id".into()));
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

        let slow = error_response("x", &PipelineError::Timeout { secs: 5 });
        assert_eq!(slow.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[actix_web::test]
    async fn health_and_regions_routes() {
        let app = test::init_service(App::new().service(crate::api_scope())).await;

        let req = test::TestRequest::get().uri("/api/health").to_request();
        let health: ApiHealth = test::call_and_read_body_json(&app, req).await;
        assert!(health.healthy);

        let req = test::TestRequest::get().uri("/api/regions").to_request();
        let regions: Vec<ApiRegion> = test::call_and_read_body_json(&app, req).await;
        assert!(regions.iter().any(|r| r.code == "ON"));
    }
}
