use anyhow::{anyhow, Result};
use duckdb::Error;

use funnelflow_core::funnel::{
    CreateFunnelRequest, CreateStepRequest, Funnel, FunnelStep, MatchType, StepKind, TriggerRule,
    UpdateFunnelRequest,
};
use funnelflow_core::matcher::check_regex_pattern;

use crate::backend::generate_id;
use crate::DuckDbBackend;

const MAX_FUNNELS_PER_WEBSITE: i64 = 20;
const MAX_STEPS_PER_FUNNEL: usize = 8;
const MIN_STEPS_PER_FUNNEL: usize = 2;

fn match_type_to_str(match_type: MatchType) -> &'static str {
    match match_type {
        MatchType::Exact => "exact",
        MatchType::Contains => "contains",
        MatchType::StartsWith => "starts_with",
        MatchType::Regex => "regex",
    }
}

fn match_type_from_str(raw: &str) -> Result<MatchType> {
    match raw {
        "exact" => Ok(MatchType::Exact),
        "contains" => Ok(MatchType::Contains),
        "starts_with" => Ok(MatchType::StartsWith),
        "regex" => Ok(MatchType::Regex),
        _ => Err(anyhow!("invalid match_type")),
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() || name.len() > 100 {
        return Err(anyhow!("validation_error:name"));
    }
    Ok(())
}

fn validate_description(description: Option<&str>) -> Result<()> {
    if let Some(description) = description {
        if description.len() > 500 {
            return Err(anyhow!("validation_error:description"));
        }
    }
    Ok(())
}

fn validate_steps(steps: &[CreateStepRequest]) -> Result<()> {
    if !(MIN_STEPS_PER_FUNNEL..=MAX_STEPS_PER_FUNNEL).contains(&steps.len()) {
        return Err(anyhow!("validation_error:steps"));
    }

    for step in steps {
        if let Some(name) = &step.name {
            if name.trim().is_empty() || name.len() > 120 {
                return Err(anyhow!("validation_error:step_name"));
            }
        }
        match &step.kind {
            StepKind::PageView {
                url_pattern,
                match_type,
            } => {
                if url_pattern.trim().is_empty() || url_pattern.len() > 500 {
                    return Err(anyhow!("validation_error:url_pattern"));
                }
                // Broken regexes would otherwise fail closed on every page
                // view; reject them before they are stored.
                if *match_type == MatchType::Regex && check_regex_pattern(url_pattern).is_err() {
                    return Err(anyhow!("validation_error:url_pattern"));
                }
            }
            StepKind::CustomEvent { trigger } => match trigger {
                TriggerRule::Click { selector } => {
                    if selector.trim().is_empty() || selector.len() > 500 {
                        return Err(anyhow!("validation_error:trigger"));
                    }
                }
                TriggerRule::Scroll { percent } => {
                    if !(1..=100).contains(percent) {
                        return Err(anyhow!("validation_error:trigger"));
                    }
                }
                TriggerRule::Custom { event_name } => {
                    if event_name.trim().is_empty() || event_name.len() > 120 {
                        return Err(anyhow!("validation_error:trigger"));
                    }
                }
            },
        }
    }
    Ok(())
}

/// Step name shown in reports when the request left it out.
fn default_step_name(kind: &StepKind) -> String {
    match kind {
        StepKind::PageView { url_pattern, .. } => url_pattern.clone(),
        StepKind::CustomEvent { trigger } => match trigger {
            TriggerRule::Click { selector } => selector.clone(),
            TriggerRule::Scroll { percent } => format!("scroll {percent}%"),
            TriggerRule::Custom { event_name } => event_name.clone(),
        },
    }
}

fn is_duplicate_name_constraint(error: &Error) -> bool {
    let message = error.to_string().to_lowercase();
    (message.contains("unique constraint") || message.contains("duplicate key"))
        && message.contains("idx_funnels_website_name")
}

fn insert_step(
    tx: &duckdb::Transaction<'_>,
    funnel_id: &str,
    step_number: i64,
    step: &CreateStepRequest,
) -> Result<()> {
    let step_id = generate_id("fstep", 21);
    let name = step
        .name
        .clone()
        .unwrap_or_else(|| default_step_name(&step.kind));

    let (step_type, url_pattern, match_type, trigger_json) = match &step.kind {
        StepKind::PageView {
            url_pattern,
            match_type,
        } => (
            "page_view",
            Some(url_pattern.clone()),
            Some(match_type_to_str(*match_type).to_string()),
            None,
        ),
        StepKind::CustomEvent { trigger } => (
            "custom_event",
            None,
            None,
            Some(serde_json::to_string(trigger)?),
        ),
    };

    tx.execute(
        r#"
        INSERT INTO funnel_steps (
            id,
            funnel_id,
            step_number,
            name,
            step_type,
            url_pattern,
            match_type,
            trigger_json,
            created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, CURRENT_TIMESTAMP)
        "#,
        duckdb::params![
            step_id,
            funnel_id,
            step_number,
            name,
            step_type,
            url_pattern,
            match_type,
            trigger_json,
        ],
    )?;
    Ok(())
}

pub(crate) fn load_funnel_steps(
    conn: &duckdb::Connection,
    funnel_id: &str,
) -> Result<Vec<FunnelStep>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT
            id,
            funnel_id,
            step_number,
            name,
            step_type,
            url_pattern,
            match_type,
            trigger_json,
            CAST(created_at AS VARCHAR)
        FROM funnel_steps
        WHERE funnel_id = ?1
        ORDER BY step_number ASC
        "#,
    )?;

    let rows = stmt.query_map(duckdb::params![funnel_id], |row| {
        let step_number: i64 = row.get(2)?;
        let step_type: String = row.get(4)?;
        let kind = match step_type.as_str() {
            "page_view" => {
                let url_pattern: Option<String> = row.get(5)?;
                let match_type_raw: Option<String> = row.get(6)?;
                let url_pattern = url_pattern.ok_or(duckdb::Error::InvalidQuery)?;
                let match_type = match_type_raw
                    .as_deref()
                    .and_then(|raw| match_type_from_str(raw).ok())
                    .ok_or(duckdb::Error::InvalidQuery)?;
                StepKind::PageView {
                    url_pattern,
                    match_type,
                }
            }
            "custom_event" => {
                let trigger_json: Option<String> = row.get(7)?;
                let trigger_json = trigger_json.ok_or(duckdb::Error::InvalidQuery)?;
                let trigger: TriggerRule = serde_json::from_str(&trigger_json)
                    .map_err(|_| duckdb::Error::InvalidQuery)?;
                StepKind::CustomEvent { trigger }
            }
            _ => return Err(duckdb::Error::InvalidQuery),
        };
        Ok(FunnelStep {
            id: row.get(0)?,
            funnel_id: row.get(1)?,
            step_number: step_number as u32,
            name: row.get(3)?,
            kind,
            created_at: row.get(8)?,
        })
    })?;

    let mut steps = Vec::new();
    for row in rows {
        steps.push(row?);
    }
    Ok(steps)
}

pub(crate) fn get_funnel_with_conn(
    conn: &duckdb::Connection,
    website_id: &str,
    funnel_id: &str,
) -> Result<Option<Funnel>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT
            id,
            website_id,
            name,
            description,
            is_active,
            CAST(created_at AS VARCHAR),
            CAST(updated_at AS VARCHAR)
        FROM funnels
        WHERE website_id = ?1 AND id = ?2
        "#,
    )?;

    let row = match stmt.query_row(duckdb::params![website_id, funnel_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, bool>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, String>(6)?,
        ))
    }) {
        Ok(row) => Some(row),
        Err(Error::QueryReturnedNoRows) => None,
        Err(error) => return Err(error.into()),
    };

    let Some((id, website_id, name, description, is_active, created_at, updated_at)) = row else {
        return Ok(None);
    };

    let steps = load_funnel_steps(conn, &id)?;
    Ok(Some(Funnel {
        id,
        website_id,
        name,
        description,
        is_active,
        steps,
        created_at,
        updated_at,
    }))
}

fn load_funnels_where(
    conn: &duckdb::Connection,
    website_id: &str,
    active_only: bool,
) -> Result<Vec<Funnel>> {
    let sql = format!(
        r#"
        SELECT
            id,
            website_id,
            name,
            description,
            is_active,
            CAST(created_at AS VARCHAR),
            CAST(updated_at AS VARCHAR)
        FROM funnels
        WHERE website_id = ?1{}
        ORDER BY created_at ASC, id ASC
        "#,
        if active_only { " AND is_active" } else { "" }
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(duckdb::params![website_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, bool>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, String>(6)?,
        ))
    })?;

    let mut shells = Vec::new();
    for row in rows {
        shells.push(row?);
    }

    let mut funnels = Vec::with_capacity(shells.len());
    for (id, website_id, name, description, is_active, created_at, updated_at) in shells {
        let steps = load_funnel_steps(conn, &id)?;
        funnels.push(Funnel {
            id,
            website_id,
            name,
            description,
            is_active,
            steps,
            created_at,
            updated_at,
        });
    }
    Ok(funnels)
}

/// All funnels of a website with steps loaded, oldest first. Takes a held
/// connection so result listing can reuse one lock acquisition.
pub(crate) fn load_funnels_for_listing(
    conn: &duckdb::Connection,
    website_id: &str,
) -> Result<Vec<Funnel>> {
    load_funnels_where(conn, website_id, false)
}

/// Active funnels only; the ingestion path never sees paused ones.
pub async fn active_funnels_inner(db: &DuckDbBackend, website_id: &str) -> Result<Vec<Funnel>> {
    let conn = db.conn.lock().await;
    load_funnels_where(&conn, website_id, true)
}

pub async fn get_funnel_inner(
    db: &DuckDbBackend,
    website_id: &str,
    funnel_id: &str,
) -> Result<Option<Funnel>> {
    let conn = db.conn.lock().await;
    get_funnel_with_conn(&conn, website_id, funnel_id)
}

/// Locate a step by id, scoped to the website through its owning funnel.
pub async fn find_step_inner(
    db: &DuckDbBackend,
    website_id: &str,
    step_id: &str,
) -> Result<Option<(Funnel, FunnelStep)>> {
    let conn = db.conn.lock().await;

    let funnel_id: Option<String> = match conn
        .prepare(
            "SELECT fs.funnel_id FROM funnel_steps fs \
             JOIN funnels f ON f.id = fs.funnel_id \
             WHERE fs.id = ?1 AND f.website_id = ?2",
        )?
        .query_row(duckdb::params![step_id, website_id], |row| row.get(0))
    {
        Ok(id) => Some(id),
        Err(Error::QueryReturnedNoRows) => None,
        Err(error) => return Err(error.into()),
    };

    let Some(funnel_id) = funnel_id else {
        return Ok(None);
    };

    let Some(funnel) = get_funnel_with_conn(&conn, website_id, &funnel_id)? else {
        return Ok(None);
    };
    let Some(step) = funnel.steps.iter().find(|s| s.id == step_id).cloned() else {
        return Ok(None);
    };
    Ok(Some((funnel, step)))
}

pub async fn create_funnel_inner(
    db: &DuckDbBackend,
    website_id: &str,
    req: CreateFunnelRequest,
) -> Result<Funnel> {
    validate_name(&req.name)?;
    validate_description(req.description.as_deref())?;
    validate_steps(&req.steps)?;

    let mut conn = db.conn.lock().await;

    let funnel_id = generate_id("fun", 21);
    let tx = conn.transaction()?;
    let count: i64 = tx
        .prepare("SELECT COUNT(*) FROM funnels WHERE website_id = ?1")?
        .query_row(duckdb::params![website_id], |row| row.get(0))?;
    if count >= MAX_FUNNELS_PER_WEBSITE {
        return Err(anyhow!("limit_exceeded"));
    }

    let duplicate_count: i64 = tx
        .prepare("SELECT COUNT(*) FROM funnels WHERE website_id = ?1 AND name = ?2")?
        .query_row(duckdb::params![website_id, &req.name], |row| row.get(0))?;
    if duplicate_count > 0 {
        return Err(anyhow!("duplicate_name"));
    }

    if let Err(error) = tx.execute(
        r#"
        INSERT INTO funnels (
            id,
            website_id,
            name,
            description,
            is_active,
            created_at,
            updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
        "#,
        duckdb::params![
            &funnel_id,
            website_id,
            &req.name,
            &req.description,
            req.is_active.unwrap_or(true),
        ],
    ) {
        if is_duplicate_name_constraint(&error) {
            return Err(anyhow!("duplicate_name"));
        }
        return Err(error.into());
    }

    // step_number is derived from request position, never client-supplied.
    for (idx, step) in req.steps.iter().enumerate() {
        insert_step(&tx, &funnel_id, (idx + 1) as i64, step)?;
    }

    tx.commit()?;

    get_funnel_with_conn(&conn, website_id, &funnel_id)?
        .ok_or_else(|| anyhow!("failed to load created funnel"))
}

pub async fn update_funnel_inner(
    db: &DuckDbBackend,
    website_id: &str,
    funnel_id: &str,
    req: UpdateFunnelRequest,
) -> Result<Option<Funnel>> {
    if req.name.is_none()
        && req.description.is_none()
        && req.is_active.is_none()
        && req.steps.is_none()
    {
        return get_funnel_inner(db, website_id, funnel_id).await;
    }

    if let Some(name) = &req.name {
        validate_name(name)?;
    }
    if let Some(description) = &req.description {
        validate_description(description.as_deref())?;
    }
    if let Some(steps) = &req.steps {
        validate_steps(steps)?;
    }

    let mut conn = db.conn.lock().await;
    let exists: i64 = conn
        .prepare("SELECT COUNT(*) FROM funnels WHERE website_id = ?1 AND id = ?2")?
        .query_row(duckdb::params![website_id, funnel_id], |row| row.get(0))?;
    if exists == 0 {
        return Ok(None);
    }

    if let Some(name) = &req.name {
        let duplicate_count: i64 = conn
            .prepare(
                "SELECT COUNT(*) FROM funnels WHERE website_id = ?1 AND name = ?2 AND id != ?3",
            )?
            .query_row(duckdb::params![website_id, name, funnel_id], |row| {
                row.get(0)
            })?;
        if duplicate_count > 0 {
            return Err(anyhow!("duplicate_name"));
        }
    }

    let tx = conn.transaction()?;

    if let Some(name) = &req.name {
        if let Err(error) = tx.execute(
            "UPDATE funnels SET name = ?1 WHERE website_id = ?2 AND id = ?3",
            duckdb::params![name, website_id, funnel_id],
        ) {
            if is_duplicate_name_constraint(&error) {
                return Err(anyhow!("duplicate_name"));
            }
            return Err(error.into());
        }
    }
    if let Some(description) = &req.description {
        tx.execute(
            "UPDATE funnels SET description = ?1 WHERE website_id = ?2 AND id = ?3",
            duckdb::params![description, website_id, funnel_id],
        )?;
    }
    if let Some(is_active) = req.is_active {
        tx.execute(
            "UPDATE funnels SET is_active = ?1 WHERE website_id = ?2 AND id = ?3",
            duckdb::params![is_active, website_id, funnel_id],
        )?;
    }
    tx.execute(
        "UPDATE funnels SET updated_at = CURRENT_TIMESTAMP WHERE website_id = ?1 AND id = ?2",
        duckdb::params![website_id, funnel_id],
    )?;

    // Steps are replaced as a whole set so numbering stays contiguous from 1.
    // Historical completions keep their recorded step_number and survive the
    // rewrite; the reset endpoint exists for when that history is unwanted.
    if let Some(steps) = &req.steps {
        tx.execute(
            "DELETE FROM funnel_steps WHERE funnel_id = ?1",
            duckdb::params![funnel_id],
        )?;
        for (idx, step) in steps.iter().enumerate() {
            insert_step(&tx, funnel_id, (idx + 1) as i64, step)?;
        }
    }

    tx.commit()?;
    get_funnel_with_conn(&conn, website_id, funnel_id)
}

pub async fn delete_funnel_inner(
    db: &DuckDbBackend,
    website_id: &str,
    funnel_id: &str,
) -> Result<bool> {
    let mut conn = db.conn.lock().await;
    let tx = conn.transaction()?;

    let exists: i64 = tx
        .prepare("SELECT COUNT(*) FROM funnels WHERE website_id = ?1 AND id = ?2")?
        .query_row(duckdb::params![website_id, funnel_id], |row| row.get(0))?;
    if exists == 0 {
        return Ok(false);
    }

    tx.execute(
        "DELETE FROM step_completions WHERE funnel_id = ?1",
        duckdb::params![funnel_id],
    )?;
    tx.execute(
        "DELETE FROM funnel_steps WHERE funnel_id = ?1",
        duckdb::params![funnel_id],
    )?;
    tx.execute(
        "DELETE FROM funnels WHERE website_id = ?1 AND id = ?2",
        duckdb::params![website_id, funnel_id],
    )?;
    tx.commit()?;
    Ok(true)
}
