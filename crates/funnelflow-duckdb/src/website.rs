use anyhow::{anyhow, Result};

use funnelflow_metadata::{CreateWebsiteParams, UpdateWebsiteParams, Website};

use crate::backend::generate_id;
use crate::DuckDbBackend;

fn is_duplicate_domain_constraint(error: &duckdb::Error) -> bool {
    let message = error.to_string().to_lowercase();
    (message.contains("unique constraint") || message.contains("duplicate key"))
        && message.contains("domain")
}

fn website_from_row(row: &duckdb::Row<'_>) -> duckdb::Result<Website> {
    Ok(Website {
        id: row.get(0)?,
        name: row.get(1)?,
        domain: row.get(2)?,
        timezone: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

const WEBSITE_COLUMNS: &str =
    "id, name, domain, timezone, CAST(created_at AS VARCHAR), CAST(updated_at AS VARCHAR)";

impl DuckDbBackend {
    pub async fn create_website(&self, params: CreateWebsiteParams) -> Result<Website> {
        let conn = self.conn.lock().await;
        let id = generate_id("site", 10);
        let domain = params.domain.trim().to_lowercase();
        let timezone = params.timezone.unwrap_or_else(|| "UTC".to_string());

        let duplicate_count: i64 = conn
            .prepare("SELECT COUNT(*) FROM websites WHERE domain = ?1")?
            .query_row(duckdb::params![domain], |row| row.get(0))?;
        if duplicate_count > 0 {
            return Err(anyhow!("duplicate_domain"));
        }

        if let Err(error) = conn.execute(
            "INSERT INTO websites (id, name, domain, timezone, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)",
            duckdb::params![id, params.name, domain, timezone],
        ) {
            if is_duplicate_domain_constraint(&error) {
                return Err(anyhow!("duplicate_domain"));
            }
            return Err(error.into());
        }

        // Read back the created row to get timestamps.
        let mut stmt = conn.prepare(&format!(
            "SELECT {WEBSITE_COLUMNS} FROM websites WHERE id = ?1"
        ))?;
        let website = stmt.query_row(duckdb::params![id], website_from_row)?;
        Ok(website)
    }

    pub async fn list_websites(
        &self,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<(Vec<Website>, i64, bool)> {
        let conn = self.conn.lock().await;

        let total: i64 = conn
            .prepare("SELECT COUNT(*) FROM websites")?
            .query_row([], |row| row.get(0))?;

        let (sql, params): (String, Vec<Box<dyn duckdb::types::ToSql>>) =
            if let Some(cursor) = cursor {
                (
                    format!(
                        "SELECT {WEBSITE_COLUMNS} FROM websites WHERE id > ?1 ORDER BY id LIMIT ?2"
                    ),
                    vec![
                        Box::new(cursor.to_string()) as Box<dyn duckdb::types::ToSql>,
                        Box::new(limit),
                    ],
                )
            } else {
                (
                    format!("SELECT {WEBSITE_COLUMNS} FROM websites ORDER BY id LIMIT ?1"),
                    vec![Box::new(limit) as Box<dyn duckdb::types::ToSql>],
                )
            };

        let param_refs: Vec<&dyn duckdb::types::ToSql> =
            params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), website_from_row)?;

        let mut websites = Vec::new();
        for row in rows {
            websites.push(row?);
        }

        let has_more = if let Some(last) = websites.last() {
            let remaining: i64 = conn
                .prepare("SELECT COUNT(*) FROM websites WHERE id > ?1")?
                .query_row(duckdb::params![last.id], |row| row.get(0))?;
            remaining > 0
        } else {
            false
        };

        Ok((websites, total, has_more))
    }

    pub async fn website_exists(&self, website_id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT COUNT(*) FROM websites WHERE id = ?1")?;
        let count: i64 = stmt.query_row(duckdb::params![website_id], |row| row.get(0))?;
        Ok(count > 0)
    }

    pub async fn get_website(&self, id: &str) -> Result<Option<Website>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {WEBSITE_COLUMNS} FROM websites WHERE id = ?1"
        ))?;
        let result = stmt.query_row(duckdb::params![id], website_from_row).ok();
        Ok(result)
    }

    pub async fn update_website(
        &self,
        id: &str,
        params: UpdateWebsiteParams,
    ) -> Result<Option<Website>> {
        let conn = self.conn.lock().await;

        let exists: i64 = conn
            .prepare("SELECT COUNT(*) FROM websites WHERE id = ?1")?
            .query_row(duckdb::params![id], |row| row.get(0))?;
        if exists == 0 {
            return Ok(None);
        }

        if let Some(ref name) = params.name {
            conn.execute(
                "UPDATE websites SET name = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
                duckdb::params![name, id],
            )?;
        }
        if let Some(ref domain) = params.domain {
            let domain = domain.trim().to_lowercase();
            let duplicate_count: i64 = conn
                .prepare("SELECT COUNT(*) FROM websites WHERE domain = ?1 AND id != ?2")?
                .query_row(duckdb::params![domain, id], |row| row.get(0))?;
            if duplicate_count > 0 {
                return Err(anyhow!("duplicate_domain"));
            }
            if let Err(error) = conn.execute(
                "UPDATE websites SET domain = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
                duckdb::params![domain, id],
            ) {
                if is_duplicate_domain_constraint(&error) {
                    return Err(anyhow!("duplicate_domain"));
                }
                return Err(error.into());
            }
        }
        if let Some(ref timezone) = params.timezone {
            conn.execute(
                "UPDATE websites SET timezone = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
                duckdb::params![timezone, id],
            )?;
        }

        let website = conn
            .prepare(&format!(
                "SELECT {WEBSITE_COLUMNS} FROM websites WHERE id = ?1"
            ))?
            .query_row(duckdb::params![id], website_from_row)?;
        Ok(Some(website))
    }

    /// Delete a website and all associated data.
    ///
    /// DuckDB does not defer FK checks, so the schema has no FKs and the
    /// cascade runs manually: completions → sessions → steps → funnels →
    /// website, all inside one transaction.
    pub async fn delete_website(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let exists: i64 = tx
            .prepare("SELECT COUNT(*) FROM websites WHERE id = ?1")?
            .query_row(duckdb::params![id], |row| row.get(0))?;
        if exists == 0 {
            return Ok(false);
        }

        tx.execute(
            "DELETE FROM step_completions WHERE website_id = ?1",
            duckdb::params![id],
        )?;
        tx.execute(
            "DELETE FROM sessions WHERE website_id = ?1",
            duckdb::params![id],
        )?;
        tx.execute(
            "DELETE FROM funnel_steps WHERE funnel_id IN (SELECT id FROM funnels WHERE website_id = ?1)",
            duckdb::params![id],
        )?;
        tx.execute(
            "DELETE FROM funnels WHERE website_id = ?1",
            duckdb::params![id],
        )?;
        tx.execute("DELETE FROM websites WHERE id = ?1", duckdb::params![id])?;
        tx.commit()?;

        Ok(true)
    }

    /// Resolve a tracking-side site reference to a website id.
    ///
    /// Ids win over domains: a reference is first tried as an id, then as a
    /// registered domain (lowercased). Returns None when neither matches.
    pub async fn resolve_website(&self, site_ref: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().await;

        let by_id: Option<String> = conn
            .prepare("SELECT id FROM websites WHERE id = ?1")?
            .query_row(duckdb::params![site_ref], |row| row.get(0))
            .ok();
        if by_id.is_some() {
            return Ok(by_id);
        }

        let by_domain: Option<String> = conn
            .prepare("SELECT id FROM websites WHERE domain = ?1")?
            .query_row(duckdb::params![site_ref.trim().to_lowercase()], |row| {
                row.get(0)
            })
            .ok();
        Ok(by_domain)
    }
}
