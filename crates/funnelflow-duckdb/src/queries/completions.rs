use std::collections::{BTreeSet, HashMap};

use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use funnelflow_core::dispatch::StagedCompletion;

use crate::DuckDbBackend;

fn is_completion_conflict(error: &duckdb::Error) -> bool {
    let message = error.to_string().to_lowercase();
    (message.contains("unique constraint") || message.contains("duplicate key"))
        && message.contains("step_completions")
}

/// Persist a batch of staged completions in one transaction.
///
/// `INSERT OR IGNORE` makes this idempotent against the UNIQUE
/// (step_id, session_id) constraint: replays and concurrent duplicates of the
/// same completion simply insert zero rows. Returns how many rows were
/// actually inserted, which is what the tracking response reports as
/// conversions.
pub async fn record_completions_inner(
    db: &DuckDbBackend,
    website_id: &str,
    session_id: &str,
    staged: &[StagedCompletion],
    now: DateTime<Utc>,
) -> Result<usize> {
    if staged.is_empty() {
        return Ok(0);
    }

    let mut conn = db.conn.lock().await;
    let tx = conn.transaction()?;
    let completed_at = now.format("%Y-%m-%d %H:%M:%S%.f").to_string();

    let mut inserted = 0usize;
    for completion in staged {
        let result = tx.execute(
            r#"
            INSERT OR IGNORE INTO step_completions (
                id,
                website_id,
                funnel_id,
                step_id,
                step_number,
                session_id,
                url,
                completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            duckdb::params![
                Uuid::new_v4().to_string(),
                website_id,
                completion.funnel_id,
                completion.step_id,
                completion.step_number as i64,
                session_id,
                completion.url,
                completed_at,
            ],
        );
        match result {
            Ok(rows) => inserted += rows,
            // A conflict that slips past OR IGNORE still means "someone else
            // recorded it first", which is success for the caller.
            Err(error) if is_completion_conflict(&error) => {}
            Err(error) => return Err(error.into()),
        }
    }

    tx.commit()?;
    tracing::debug!(
        staged = staged.len(),
        inserted,
        session_id,
        "recorded step completions"
    );
    Ok(inserted)
}

/// Completed step numbers for every funnel this session has touched.
pub async fn completed_steps_inner(
    db: &DuckDbBackend,
    website_id: &str,
    session_id: &str,
) -> Result<HashMap<String, BTreeSet<u32>>> {
    let conn = db.conn.lock().await;
    let mut stmt = conn.prepare(
        "SELECT funnel_id, step_number FROM step_completions \
         WHERE website_id = ?1 AND session_id = ?2",
    )?;
    let rows = stmt.query_map(duckdb::params![website_id, session_id], |row| {
        let funnel_id: String = row.get(0)?;
        let step_number: i64 = row.get(1)?;
        Ok((funnel_id, step_number as u32))
    })?;

    let mut completed: HashMap<String, BTreeSet<u32>> = HashMap::new();
    for row in rows {
        let (funnel_id, step_number) = row?;
        completed.entry(funnel_id).or_default().insert(step_number);
    }
    Ok(completed)
}

pub async fn completed_steps_for_funnel_inner(
    db: &DuckDbBackend,
    funnel_id: &str,
    session_id: &str,
) -> Result<BTreeSet<u32>> {
    let conn = db.conn.lock().await;
    let mut stmt = conn.prepare(
        "SELECT step_number FROM step_completions WHERE funnel_id = ?1 AND session_id = ?2",
    )?;
    let rows = stmt.query_map(duckdb::params![funnel_id, session_id], |row| {
        let step_number: i64 = row.get(0)?;
        Ok(step_number as u32)
    })?;

    let mut completed = BTreeSet::new();
    for row in rows {
        completed.insert(row?);
    }
    Ok(completed)
}

/// Wipe a funnel's completion history. Returns the deleted row count, or
/// None when the funnel does not belong to this website.
pub async fn reset_funnel_completions_inner(
    db: &DuckDbBackend,
    website_id: &str,
    funnel_id: &str,
) -> Result<Option<u64>> {
    let conn = db.conn.lock().await;

    let exists: i64 = conn
        .prepare("SELECT COUNT(*) FROM funnels WHERE website_id = ?1 AND id = ?2")?
        .query_row(duckdb::params![website_id, funnel_id], |row| row.get(0))?;
    if exists == 0 {
        return Ok(None);
    }

    let deleted = conn.execute(
        "DELETE FROM step_completions WHERE funnel_id = ?1",
        duckdb::params![funnel_id],
    )?;
    Ok(Some(deleted as u64))
}
