use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};

use funnelflow_core::funnel::{CreateFunnelRequest, ReportWindow, UpdateFunnelRequest};

use crate::{error::AppError, state::AppState};

fn unprocessable(code: &str, message: &str, field: Option<&str>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({
            "error": {
                "code": code,
                "message": message,
                "field": field
            }
        })),
    )
}

/// Field name carried by a `validation_error:<field>` sentinel from the
/// storage layer, if the error is one.
fn validation_field(msg: &str) -> Option<&str> {
    let rest = msg.split("validation_error:").nth(1)?;
    match rest
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .next()
    {
        Some(field) if !field.is_empty() => Some(field),
        _ => None,
    }
}

fn validation_response(field: &str) -> (StatusCode, Json<Value>) {
    let message = match field {
        "name" => "name must be 1-100 characters",
        "description" => "description must be 500 characters or fewer",
        "steps" => "funnels must have between 2 and 8 steps",
        "step_name" => "step name must be 120 characters or fewer",
        "url_pattern" => "url_pattern must be valid and 500 characters or fewer",
        "trigger" => "step trigger configuration is invalid",
        _ => "invalid funnel payload",
    };
    unprocessable("validation_error", message, Some(field))
}

/// Reporting-window query accepted by the list and results endpoints.
///
/// `days` is shorthand for "the last N calendar days ending today" and is
/// mutually exclusive with explicit dates. No parameters at all means
/// all-time.
#[derive(Debug, Deserialize)]
pub struct FunnelWindowQuery {
    pub days: Option<i64>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub timezone: Option<String>,
}

fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest(format!("invalid {field} (expected YYYY-MM-DD)")))
}

fn parse_window(query: &FunnelWindowQuery) -> Result<ReportWindow, AppError> {
    let timezone = match query.timezone.as_deref() {
        Some(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Err(AppError::BadRequest(
                    "timezone cannot be empty when provided".to_string(),
                ));
            }
            Some(trimmed.to_string())
        }
        None => None,
    };

    if query.days.is_some() && (query.start_date.is_some() || query.end_date.is_some()) {
        return Err(AppError::BadRequest(
            "days cannot be combined with start_date/end_date".to_string(),
        ));
    }

    if let Some(days) = query.days {
        if days < 1 {
            return Err(AppError::BadRequest("days must be at least 1".to_string()));
        }
        let today = chrono::Utc::now().date_naive();
        return Ok(ReportWindow {
            start_date: Some(today - chrono::Duration::days(days - 1)),
            end_date: Some(today),
            timezone,
        });
    }

    let start_date = match query.start_date.as_deref() {
        Some(raw) => Some(parse_date("start_date", raw)?),
        None => None,
    };
    let end_date = match query.end_date.as_deref() {
        Some(raw) => Some(parse_date("end_date", raw)?),
        None => None,
    };
    if let (Some(start), Some(end)) = (start_date, end_date) {
        if end < start {
            return Err(AppError::BadRequest(
                "end_date must be on or after start_date".to_string(),
            ));
        }
    }

    Ok(ReportWindow {
        start_date,
        end_date,
        timezone,
    })
}

/// Map aggregation-path errors onto HTTP errors: the timezone sentinels are
/// the caller's fault, everything else is ours.
fn map_results_error(e: anyhow::Error) -> AppError {
    let msg = e.to_string();
    if msg.contains("invalid_timezone")
        || msg.contains("invalid_timezone_transition")
        || msg.contains("invalid_date_boundary")
    {
        AppError::BadRequest("invalid timezone".to_string())
    } else {
        AppError::Internal(e)
    }
}

/// `GET /api/websites/{website_id}/funnels` — funnel configs with embedded
/// per-step counts and conversion rates over the requested window.
pub async fn list_funnels(
    State(state): State<Arc<AppState>>,
    Path(website_id): Path<String>,
    Query(query): Query<FunnelWindowQuery>,
) -> Result<impl IntoResponse, AppError> {
    if !state.is_valid_website(&website_id).await {
        return Err(AppError::NotFound("Website not found".to_string()));
    }
    let window = parse_window(&query)?;

    let data = state
        .funnels
        .list_funnel_results(&website_id, &window)
        .await
        .map_err(map_results_error)?;
    Ok(Json(json!({ "data": data })))
}

/// `GET /api/websites/{website_id}/funnels/{funnel_id}` — funnel config only.
pub async fn get_funnel(
    State(state): State<Arc<AppState>>,
    Path((website_id, funnel_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    if !state.is_valid_website(&website_id).await {
        return Err(AppError::NotFound("Website not found".to_string()));
    }

    let data = state
        .funnels
        .get_funnel(&website_id, &funnel_id)
        .await
        .map_err(AppError::Internal)?
        .ok_or_else(|| AppError::NotFound("Funnel not found".to_string()))?;
    Ok(Json(json!({ "data": data })))
}

/// `POST /api/websites/{website_id}/funnels` — create a funnel with its
/// ordered step list.
pub async fn create_funnel(
    State(state): State<Arc<AppState>>,
    Path(website_id): Path<String>,
    Json(req): Json<CreateFunnelRequest>,
) -> Result<impl IntoResponse, AppError> {
    if !state.is_valid_website(&website_id).await {
        return Err(AppError::NotFound("Website not found".to_string()));
    }

    let data = match state.funnels.create_funnel(&website_id, req).await {
        Ok(data) => data,
        Err(e) => {
            let msg = e.to_string();
            if msg.contains("limit_exceeded") {
                return Ok(unprocessable(
                    "limit_exceeded",
                    "maximum of 20 funnels per website reached",
                    Some("funnels"),
                ));
            }
            if msg.contains("duplicate_name") {
                return Ok(unprocessable(
                    "duplicate_name",
                    "funnel name already exists for this website",
                    Some("name"),
                ));
            }
            if let Some(field) = validation_field(&msg) {
                return Ok(validation_response(field));
            }
            return Err(AppError::Internal(e));
        }
    };

    Ok((StatusCode::CREATED, Json(json!({ "data": data }))))
}

/// `PUT /api/websites/{website_id}/funnels/{funnel_id}` — update name,
/// description or active flag; when `steps` is present the whole step list
/// is replaced atomically.
pub async fn update_funnel(
    State(state): State<Arc<AppState>>,
    Path((website_id, funnel_id)): Path<(String, String)>,
    Json(req): Json<UpdateFunnelRequest>,
) -> Result<impl IntoResponse, AppError> {
    if !state.is_valid_website(&website_id).await {
        return Err(AppError::NotFound("Website not found".to_string()));
    }

    if req.name.is_none()
        && req.description.is_none()
        && req.is_active.is_none()
        && req.steps.is_none()
    {
        return Err(AppError::BadRequest(
            "request must include at least one updatable field".to_string(),
        ));
    }

    let data = match state
        .funnels
        .update_funnel(&website_id, &funnel_id, req)
        .await
    {
        Ok(Some(data)) => data,
        Ok(None) => return Err(AppError::NotFound("Funnel not found".to_string())),
        Err(e) => {
            let msg = e.to_string();
            if msg.contains("duplicate_name") {
                return Ok(unprocessable(
                    "duplicate_name",
                    "funnel name already exists for this website",
                    Some("name"),
                ));
            }
            if let Some(field) = validation_field(&msg) {
                return Ok(validation_response(field));
            }
            return Err(AppError::Internal(e));
        }
    };

    Ok((StatusCode::OK, Json(json!({ "data": data }))))
}

/// `DELETE /api/websites/{website_id}/funnels/{funnel_id}` — delete the
/// funnel, its steps and its completions.
pub async fn delete_funnel(
    State(state): State<Arc<AppState>>,
    Path((website_id, funnel_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    if !state.is_valid_website(&website_id).await {
        return Err(AppError::NotFound("Website not found".to_string()));
    }

    let deleted = state
        .funnels
        .delete_funnel(&website_id, &funnel_id)
        .await
        .map_err(AppError::Internal)?;
    if !deleted {
        return Err(AppError::NotFound("Funnel not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/websites/{website_id}/funnels/{funnel_id}/results` — per-step
/// and overall conversion aggregation over the requested window.
pub async fn get_funnel_results(
    State(state): State<Arc<AppState>>,
    Path((website_id, funnel_id)): Path<(String, String)>,
    Query(query): Query<FunnelWindowQuery>,
) -> Result<impl IntoResponse, AppError> {
    if !state.is_valid_website(&website_id).await {
        return Err(AppError::NotFound("Website not found".to_string()));
    }
    let window = parse_window(&query)?;

    let data = state
        .funnels
        .funnel_results(&website_id, &funnel_id, &window)
        .await
        .map_err(map_results_error)?
        .ok_or_else(|| AppError::NotFound("Funnel not found".to_string()))?;
    Ok(Json(json!({ "data": data })))
}

/// `DELETE /api/websites/{website_id}/funnels/{funnel_id}/completions` —
/// reset recorded completions so the funnel starts counting from scratch.
pub async fn reset_funnel_completions(
    State(state): State<Arc<AppState>>,
    Path((website_id, funnel_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    if !state.is_valid_website(&website_id).await {
        return Err(AppError::NotFound("Website not found".to_string()));
    }

    let deleted = state
        .funnels
        .reset_funnel_completions(&website_id, &funnel_id)
        .await
        .map_err(AppError::Internal)?;
    match deleted {
        Some(count) => Ok(Json(json!({ "data": { "deleted": count } }))),
        None => Err(AppError::NotFound("Funnel not found".to_string())),
    }
}
