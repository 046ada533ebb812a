use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use funnelflow_metadata::{CreateWebsiteParams, UpdateWebsiteParams};

use crate::{error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct CreateWebsiteRequest {
    pub name: String,
    pub domain: String,
    pub timezone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateWebsiteRequest {
    pub name: Option<String>,
    pub domain: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListWebsitesQuery {
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

/// Websites carry the IANA timezone used for report day boundaries; reject
/// unknown zones at write time so reads never trip over stored garbage.
fn validate_timezone(timezone: Option<&str>) -> Result<(), AppError> {
    if let Some(raw) = timezone {
        if raw.trim().parse::<chrono_tz::Tz>().is_err() {
            return Err(AppError::BadRequest(format!("invalid timezone: {raw}")));
        }
    }
    Ok(())
}

fn duplicate_domain() -> (StatusCode, Json<Value>) {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({
            "error": {
                "code": "duplicate_domain",
                "message": "domain is already registered",
                "field": "domain"
            }
        })),
    )
}

/// `POST /api/websites` — Create a new website.
pub async fn create_website(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateWebsiteRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.name.trim().is_empty() {
        return Err(AppError::BadRequest("name is required".to_string()));
    }
    if req.domain.trim().is_empty() {
        return Err(AppError::BadRequest("domain is required".to_string()));
    }
    validate_timezone(req.timezone.as_deref())?;

    let website = match state
        .metadata
        .create_website(CreateWebsiteParams {
            name: req.name,
            domain: req.domain,
            timezone: req.timezone,
        })
        .await
    {
        Ok(website) => website,
        Err(e) => {
            if e.to_string().contains("duplicate_domain") {
                return Ok(duplicate_domain());
            }
            return Err(AppError::Internal(e));
        }
    };

    // Add to website cache.
    {
        let mut cache = state.website_cache.write().await;
        cache.insert(website.id.clone());
    }

    let tracking_snippet = format!(
        r#"<script defer src="{}/funnel.js" data-website-id="{}"></script>"#,
        state.config.public_url, website.id
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "data": {
                "id": website.id,
                "name": website.name,
                "domain": website.domain,
                "timezone": website.timezone,
                "tracking_snippet": tracking_snippet,
                "created_at": website.created_at,
            }
        })),
    ))
}

/// `GET /api/websites` — List all websites.
pub async fn list_websites(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListWebsitesQuery>,
) -> Result<impl IntoResponse, AppError> {
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let cursor = query.cursor.as_deref();

    let (websites, total, has_more) = state
        .metadata
        .list_websites(limit, cursor)
        .await
        .map_err(AppError::Internal)?;

    let next_cursor = if has_more {
        websites.last().map(|w| w.id.clone())
    } else {
        None
    };

    Ok(Json(json!({
        "data": websites,
        "pagination": {
            "total": total,
            "limit": limit,
            "cursor": next_cursor,
            "has_more": has_more,
        }
    })))
}

/// `GET /api/websites/:id` — Fetch a single website.
pub async fn get_website(
    State(state): State<Arc<AppState>>,
    Path(website_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let website = state
        .metadata
        .get_website(&website_id)
        .await
        .map_err(AppError::Internal)?
        .ok_or_else(|| AppError::NotFound("Website not found".to_string()))?;
    Ok(Json(json!({ "data": website })))
}

/// `PUT /api/websites/:id` — Update a website.
pub async fn update_website(
    State(state): State<Arc<AppState>>,
    Path(website_id): Path<String>,
    Json(req): Json<UpdateWebsiteRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.name.is_none() && req.domain.is_none() && req.timezone.is_none() {
        return Err(AppError::BadRequest(
            "request must include at least one updatable field".to_string(),
        ));
    }
    if req.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(AppError::BadRequest(
            "name cannot be empty when provided".to_string(),
        ));
    }
    if req.domain.as_deref().is_some_and(|d| d.trim().is_empty()) {
        return Err(AppError::BadRequest(
            "domain cannot be empty when provided".to_string(),
        ));
    }
    validate_timezone(req.timezone.as_deref())?;

    let result = match state
        .metadata
        .update_website(
            &website_id,
            UpdateWebsiteParams {
                name: req.name,
                domain: req.domain,
                timezone: req.timezone,
            },
        )
        .await
    {
        Ok(result) => result,
        Err(e) => {
            if e.to_string().contains("duplicate_domain") {
                return Ok(duplicate_domain().into_response());
            }
            return Err(AppError::Internal(e));
        }
    };

    match result {
        Some(website) => Ok(Json(json!({
            "data": {
                "id": website.id,
                "name": website.name,
                "domain": website.domain,
                "timezone": website.timezone,
                "updated_at": website.updated_at,
            }
        }))
        .into_response()),
        None => Err(AppError::NotFound("Website not found".to_string())),
    }
}

/// `DELETE /api/websites/:id` — Delete a website and all its funnel data.
pub async fn delete_website(
    State(state): State<Arc<AppState>>,
    Path(website_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let deleted = state
        .metadata
        .delete_website(&website_id)
        .await
        .map_err(AppError::Internal)?;

    if !deleted {
        return Err(AppError::NotFound("Website not found".to_string()));
    }

    // Evict from website cache.
    {
        let mut cache = state.website_cache.write().await;
        cache.remove(&website_id);
    }

    Ok(StatusCode::NO_CONTENT)
}
