use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, Json};
use serde_json::{json, Value};

use funnelflow_core::{
    dispatch,
    funnel::StepKind,
    gate::{self, GateDecision},
    track::{self, TrackEvent, TrackPayload, TrackStepPayload},
};

use crate::{error::AppError, state::AppState};

/// Rate-limit bucket for a tracking request.
///
/// Prefers the real client IP from `X-Forwarded-For` (first entry); falls
/// back to the session id so direct connections without a proxy still get
/// per-visitor buckets instead of one global one.
fn client_key(headers: &HeaderMap, session_id: &str) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("sess:{session_id}"))
}

fn not_tracked() -> Json<Value> {
    Json(json!({ "tracked": false, "conversions": 0 }))
}

/// `POST /api/track` — ingest one tracking signal (page view or custom event).
///
/// ## Auth
/// None required — this is the beacon the snippet fires from visitor pages.
///
/// ## Rate limiting
/// 60 req/min per client (IP or session fallback), returning 429. Disabled
/// via `FUNNELFLOW_RATE_LIMIT_DISABLE=1`.
///
/// ## Failure mode
/// Unknown sites, unresolvable custom-event steps and storage failures all
/// degrade to `200 {"tracked": false, "conversions": 0}` — a tracking beacon
/// must never break the host page. Only malformed payloads get a 400.
#[tracing::instrument(skip(state, headers, payload))]
pub async fn track(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<TrackPayload>,
) -> Result<Json<Value>, AppError> {
    if !track::session_id_valid(&payload.session_id) {
        return Err(AppError::BadRequest(format!(
            "session_id is required (max {} characters)",
            track::MAX_SESSION_ID_LEN
        )));
    }
    if !track::track_url_valid(&payload.current_url) {
        return Err(AppError::BadRequest(format!(
            "current_url is required (max {} characters)",
            track::MAX_TRACK_URL_LEN
        )));
    }
    if !state.config.rate_limit_disable {
        let key = client_key(&headers, &payload.session_id);
        if !state.check_rate_limit(&key).await {
            return Err(AppError::RateLimited);
        }
    }

    // Unknown site — not an error from the beacon's point of view.
    let website_id = match state.metadata.resolve_website(&payload.site_id).await {
        Ok(Some(id)) => id,
        Ok(None) => return Ok(not_tracked()),
        Err(e) => {
            tracing::error!(error = %e, site_id = %payload.site_id, "site resolution failed");
            return Ok(not_tracked());
        }
    };

    match run_track(&state, &website_id, &payload).await {
        Ok(inserted) => Ok(Json(json!({
            "tracked": inserted > 0,
            "conversions": inserted
        }))),
        Err(e) => {
            tracing::error!(error = %e, website_id, "tracking failed");
            Ok(not_tracked())
        }
    }
}

/// The fallible part of [`track`], so the handler can collapse all storage
/// errors into one soft response.
async fn run_track(
    state: &AppState,
    website_id: &str,
    payload: &TrackPayload,
) -> anyhow::Result<usize> {
    state
        .funnels
        .touch_session(website_id, &payload.session_id)
        .await?;

    let staged = match &payload.event {
        TrackEvent::PageView => {
            let funnels = state.funnels.active_funnels(website_id).await?;
            if funnels.is_empty() {
                return Ok(0);
            }
            let completed = state
                .funnels
                .completed_steps(website_id, &payload.session_id)
                .await?;
            dispatch::plan_page_view(&funnels, &completed, &payload.current_url)
        }
        TrackEvent::CustomEvent { custom_event } => {
            let Some((funnel, step)) = state
                .funnels
                .find_step(website_id, &custom_event.step_id)
                .await?
            else {
                return Ok(0);
            };
            // The snippet's funnel_id and step_number are advisory; the stored
            // config wins and a mismatch means stale client state.
            if !funnel.is_active || funnel.id != custom_event.funnel_id {
                return Ok(0);
            }
            if !matches!(step.kind, StepKind::CustomEvent { .. }) {
                return Ok(0);
            }
            let done = state
                .funnels
                .completed_steps_for_funnel(&funnel.id, &payload.session_id)
                .await?;
            match gate::evaluate(step.step_number, &done) {
                GateDecision::Allowed => {
                    vec![dispatch::stage_for_step(&step, &payload.current_url)]
                }
                GateDecision::AlreadyCompleted | GateDecision::Blocked { .. } => Vec::new(),
            }
        }
    };

    if staged.is_empty() {
        return Ok(0);
    }
    state
        .funnels
        .record_completions(website_id, &payload.session_id, &staged)
        .await
}

/// `POST /api/track/step` — mark one specific step complete for a session.
///
/// Used by the snippet's custom-event listeners that know their step id
/// up front. Responds 200 for every tracking outcome; the body carries
/// `success` plus either the completed step's name/number, an
/// `already_completed` flag, or the blocking predecessor.
#[tracing::instrument(skip(state, headers, payload))]
pub async fn track_step(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<TrackStepPayload>,
) -> Result<Json<Value>, AppError> {
    if !track::session_id_valid(&payload.session_id) {
        return Err(AppError::BadRequest(format!(
            "session_id is required (max {} characters)",
            track::MAX_SESSION_ID_LEN
        )));
    }
    if payload.step_id.trim().is_empty() {
        return Err(AppError::BadRequest("step_id is required".to_string()));
    }
    if let Some(url) = &payload.current_url {
        if !track::track_url_valid(url) {
            return Err(AppError::BadRequest(format!(
                "current_url must be non-empty (max {} characters)",
                track::MAX_TRACK_URL_LEN
            )));
        }
    }
    if !state.config.rate_limit_disable {
        let key = client_key(&headers, &payload.session_id);
        if !state.check_rate_limit(&key).await {
            return Err(AppError::RateLimited);
        }
    }

    let website_id = match state.metadata.resolve_website(&payload.site_id).await {
        Ok(Some(id)) => id,
        Ok(None) => {
            return Ok(Json(
                json!({ "success": false, "error": "Website not found" }),
            ))
        }
        Err(e) => {
            tracing::error!(error = %e, site_id = %payload.site_id, "site resolution failed");
            return Ok(Json(
                json!({ "success": false, "error": "Website not found" }),
            ));
        }
    };

    match run_track_step(&state, &website_id, &payload).await {
        Ok(body) => Ok(Json(body)),
        Err(e) => {
            tracing::error!(error = %e, website_id, "step tracking failed");
            Ok(Json(json!({ "success": false, "error": "Tracking failed" })))
        }
    }
}

async fn run_track_step(
    state: &AppState,
    website_id: &str,
    payload: &TrackStepPayload,
) -> anyhow::Result<Value> {
    state
        .funnels
        .touch_session(website_id, &payload.session_id)
        .await?;

    let Some((funnel, step)) = state.funnels.find_step(website_id, &payload.step_id).await? else {
        return Ok(json!({ "success": false, "error": "Step not found" }));
    };

    let done = state
        .funnels
        .completed_steps_for_funnel(&funnel.id, &payload.session_id)
        .await?;
    match gate::evaluate(step.step_number, &done) {
        GateDecision::AlreadyCompleted => Ok(json!({
            "success": true,
            "already_completed": true,
            "step_name": step.name,
            "step_number": step.step_number
        })),
        GateDecision::Blocked { required_step } => Ok(json!({
            "success": false,
            "error": "Previous step not completed",
            "required_previous_step": required_step
        })),
        GateDecision::Allowed => {
            let url = payload.current_url.as_deref().unwrap_or("");
            let staged = [dispatch::stage_for_step(&step, url)];
            state
                .funnels
                .record_completions(website_id, &payload.session_id, &staged)
                .await?;
            Ok(json!({
                "success": true,
                "step_name": step.name,
                "step_number": step.step_number
            }))
        }
    }
}
