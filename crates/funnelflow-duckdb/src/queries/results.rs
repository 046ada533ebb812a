use std::collections::HashMap;

use anyhow::{anyhow, Result};
use chrono::{LocalResult, TimeZone};
use chrono_tz::Tz;

use funnelflow_core::funnel::{Funnel, FunnelResults, ReportWindow, StepResult};

use crate::queries::funnels::get_funnel_with_conn;
use crate::DuckDbBackend;

fn resolve_timezone(
    conn: &duckdb::Connection,
    website_id: &str,
    requested_timezone: Option<&str>,
) -> Result<Tz> {
    if let Some(raw) = requested_timezone {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(anyhow!("invalid_timezone"));
        }
        return trimmed
            .parse::<Tz>()
            .map_err(|_| anyhow!("invalid_timezone"));
    }

    let website_tz: String = conn
        .prepare("SELECT timezone FROM websites WHERE id = ?1")?
        .query_row(duckdb::params![website_id], |row| row.get(0))
        .unwrap_or_else(|_| "UTC".to_string());

    website_tz
        .parse::<Tz>()
        .or_else(|_| "UTC".parse::<Tz>())
        .map_err(|_| anyhow!("invalid_timezone"))
}

fn local_midnight_utc(tz: Tz, date: chrono::NaiveDate) -> Result<chrono::NaiveDateTime> {
    let naive = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow!("invalid_date_boundary"))?;
    let zoned = match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(a, b) => a.min(b),
        LocalResult::None => return Err(anyhow!("invalid_timezone_transition")),
    };
    Ok(zoned.with_timezone(&chrono::Utc).naive_utc())
}

/// Convert an optionally-bounded window of local calendar days into UTC
/// timestamp strings for `completed_at` comparisons. The end bound is
/// exclusive (midnight after the last requested day).
fn utc_bounds_for_window(
    tz: Tz,
    start_date: Option<chrono::NaiveDate>,
    end_date: Option<chrono::NaiveDate>,
) -> Result<(Option<String>, Option<String>)> {
    let start = match start_date {
        Some(date) => Some(
            local_midnight_utc(tz, date)?
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
        ),
        None => None,
    };
    let end = match end_date {
        Some(date) => Some(
            local_midnight_utc(tz, date + chrono::Duration::days(1))?
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
        ),
        None => None,
    };
    Ok((start, end))
}

/// Per-step completion counts for one funnel within optional UTC bounds.
fn step_completion_counts(
    conn: &duckdb::Connection,
    funnel_id: &str,
    bounds: &(Option<String>, Option<String>),
) -> Result<HashMap<u32, i64>> {
    let mut sql = String::from(
        "SELECT step_number, COUNT(*) FROM step_completions WHERE funnel_id = ?1",
    );
    let mut params: Vec<Box<dyn duckdb::types::ToSql>> =
        vec![Box::new(funnel_id.to_string()) as Box<dyn duckdb::types::ToSql>];
    let mut param_idx = 2;
    if let Some(start) = &bounds.0 {
        sql.push_str(&format!(" AND completed_at >= ?{param_idx}"));
        params.push(Box::new(start.clone()));
        param_idx += 1;
    }
    if let Some(end) = &bounds.1 {
        sql.push_str(&format!(" AND completed_at < ?{param_idx}"));
        params.push(Box::new(end.clone()));
    }
    sql.push_str(" GROUP BY step_number");

    let param_refs: Vec<&dyn duckdb::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), |row| {
        let step_number: i64 = row.get(0)?;
        let count: i64 = row.get(1)?;
        Ok((step_number as u32, count))
    })?;

    let mut counts = HashMap::new();
    for row in rows {
        let (step_number, count) = row?;
        counts.insert(step_number, count);
    }
    Ok(counts)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Fold per-step completion counts into the report shape.
///
/// "Entered" for step 1 is its own completion count (completing step 1 is how
/// a session enters the funnel); for step N it is the completion count of
/// step N-1. Rates are percentages rounded to two decimals; a step nobody
/// entered reports 0 rather than dividing by zero.
pub(crate) fn compute_funnel_results(funnel: &Funnel, completed_counts: &[i64]) -> FunnelResults {
    let mut steps = Vec::with_capacity(funnel.steps.len());

    for (idx, step) in funnel.steps.iter().enumerate() {
        let completed = completed_counts.get(idx).copied().unwrap_or(0);
        let entered = if idx == 0 {
            completed
        } else {
            completed_counts.get(idx - 1).copied().unwrap_or(0)
        };
        let dropped = (entered - completed).max(0);
        let conversion_rate = if entered > 0 {
            round2(completed as f64 / entered as f64 * 100.0)
        } else {
            0.0
        };
        steps.push(StepResult {
            step_id: step.id.clone(),
            step_number: step.step_number,
            name: step.name.clone(),
            kind: step.kind.clone(),
            entered_count: entered,
            completed_count: completed,
            dropped_count: dropped,
            conversion_rate,
        });
    }

    let total_entered = completed_counts.first().copied().unwrap_or(0);
    let total_completed = completed_counts.last().copied().unwrap_or(0);
    let overall_conversion_rate = if total_entered > 0 {
        round2(total_completed as f64 / total_entered as f64 * 100.0)
    } else {
        0.0
    };

    FunnelResults {
        funnel_id: funnel.id.clone(),
        name: funnel.name.clone(),
        description: funnel.description.clone(),
        is_active: funnel.is_active,
        total_entered,
        total_completed,
        overall_conversion_rate,
        steps,
    }
}

fn results_for_funnel(
    conn: &duckdb::Connection,
    funnel: &Funnel,
    bounds: &(Option<String>, Option<String>),
) -> Result<FunnelResults> {
    let counts = step_completion_counts(conn, &funnel.id, bounds)?;
    let completed_counts: Vec<i64> = funnel
        .steps
        .iter()
        .map(|step| counts.get(&step.step_number).copied().unwrap_or(0))
        .collect();
    Ok(compute_funnel_results(funnel, &completed_counts))
}

fn window_bounds(
    conn: &duckdb::Connection,
    website_id: &str,
    window: &ReportWindow,
) -> Result<(Option<String>, Option<String>)> {
    // All-time windows never need a timezone; don't fail them on one.
    if window.start_date.is_none() && window.end_date.is_none() {
        return Ok((None, None));
    }
    let tz = resolve_timezone(conn, website_id, window.timezone.as_deref())?;
    utc_bounds_for_window(tz, window.start_date, window.end_date)
}

pub async fn funnel_results_inner(
    db: &DuckDbBackend,
    website_id: &str,
    funnel_id: &str,
    window: &ReportWindow,
) -> Result<Option<FunnelResults>> {
    let conn = db.conn.lock().await;
    let Some(funnel) = get_funnel_with_conn(&conn, website_id, funnel_id)? else {
        return Ok(None);
    };
    let bounds = window_bounds(&conn, website_id, window)?;
    Ok(Some(results_for_funnel(&conn, &funnel, &bounds)?))
}

pub async fn list_funnel_results_inner(
    db: &DuckDbBackend,
    website_id: &str,
    window: &ReportWindow,
) -> Result<Vec<FunnelResults>> {
    let conn = db.conn.lock().await;
    let funnels = super::funnels::load_funnels_for_listing(&conn, website_id)?;
    let bounds = window_bounds(&conn, website_id, window)?;

    let mut results = Vec::with_capacity(funnels.len());
    for funnel in &funnels {
        results.push(results_for_funnel(&conn, funnel, &bounds)?);
    }
    Ok(results)
}
