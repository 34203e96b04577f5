use crate::diff::detect_mismatches;
use crate::image_reference::ImageProjection;
use crate::prober::ContextProbeView;
use crate::report::{Report, build_report};
use crate::state::AppContext;
use axum::extract::{Query, State};
use axum::{Json, Router, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub async fn readiness_probe(State(ctx): State<AppContext>) -> impl IntoResponse {
    match ctx.latest().await {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::SERVICE_UNAVAILABLE,
    }
}

pub async fn liveness_probe() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextsResponse {
    generated_at: DateTime<Utc>,
    contexts: Vec<ContextProbeView>,
}

async fn list_contexts(
    State(ctx): State<AppContext>,
) -> Result<Json<ContextsResponse>, StatusCode> {
    let snapshot = ctx.latest().await.ok_or(StatusCode::SERVICE_UNAVAILABLE)?;
    Ok(Json(ContextsResponse {
        generated_at: snapshot.generated_at,
        contexts: snapshot.probes.iter().map(ContextProbeView::from).collect(),
    }))
}

/// Projection overrides; unset fields keep the configured value.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffQuery {
    registry: Option<bool>,
    name: Option<bool>,
    tag: Option<bool>,
    digest: Option<bool>,
    differences_only: Option<bool>,
}

impl DiffQuery {
    fn projection(&self, base: ImageProjection) -> ImageProjection {
        ImageProjection {
            registry: self.registry.unwrap_or(base.registry),
            name: self.name.unwrap_or(base.name),
            tag: self.tag.unwrap_or(base.tag),
            digest: self.digest.unwrap_or(base.digest),
        }
    }
}

async fn diff(
    State(ctx): State<AppContext>,
    Query(query): Query<DiffQuery>,
) -> Result<Json<Report>, StatusCode> {
    let snapshot = ctx.latest().await.ok_or(StatusCode::SERVICE_UNAVAILABLE)?;
    let projection = query.projection(ctx.config.projection);
    let mismatches = detect_mismatches(&snapshot.index, &projection);

    Ok(Json(build_report(
        &snapshot.index,
        &mismatches,
        &snapshot.failures,
        &snapshot.contexts,
        projection,
        query
            .differences_only
            .unwrap_or(ctx.config.differences_only),
    )))
}

pub fn create_app(ctx: AppContext) -> Router {
    Router::new()
        .route("/health/live", get(liveness_probe))
        .route("/health/ready", get(readiness_probe))
        .route("/api/contexts", get(list_contexts))
        .route("/api/diff", get(diff))
        .with_state(ctx)
}
