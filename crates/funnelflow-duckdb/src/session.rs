use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::DuckDbBackend;

/// Upsert the session row for a tracked signal.
///
/// First contact inserts (first_seen = last_seen = now); anything later just
/// bumps last_seen. The composite key keeps client-generated session ids
/// scoped per website.
pub(crate) async fn touch_session_inner(
    db: &DuckDbBackend,
    website_id: &str,
    session_id: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let conn = db.conn.lock().await;
    let now_str = now.format("%Y-%m-%d %H:%M:%S%.f").to_string();
    conn.execute(
        "INSERT INTO sessions (website_id, session_id, first_seen, last_seen) \
         VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT (website_id, session_id) DO UPDATE SET last_seen = EXCLUDED.last_seen",
        duckdb::params![website_id, session_id, now_str, now_str],
    )?;
    Ok(())
}
