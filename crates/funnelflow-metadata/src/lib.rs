use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Website {
    pub id: String,
    pub name: String,
    pub domain: String,
    /// IANA timezone name; reporting windows fall back to this.
    pub timezone: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct CreateWebsiteParams {
    pub name: String,
    pub domain: String,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UpdateWebsiteParams {
    pub name: Option<String>,
    pub domain: Option<String>,
    pub timezone: Option<String>,
}

/// Storage interface for website and settings metadata.
///
/// Kept separate from the funnel backend so a deployment could swap the
/// website directory for another store while keeping route handlers
/// unchanged.
#[async_trait]
pub trait MetadataStore: Send + Sync + 'static {
    async fn get_setting(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn set_setting(&self, key: &str, value: &str) -> anyhow::Result<()>;

    async fn create_website(&self, params: CreateWebsiteParams) -> anyhow::Result<Website>;
    async fn list_websites(
        &self,
        limit: i64,
        cursor: Option<&str>,
    ) -> anyhow::Result<(Vec<Website>, i64, bool)>;
    async fn website_exists(&self, id: &str) -> anyhow::Result<bool>;
    async fn get_website(&self, id: &str) -> anyhow::Result<Option<Website>>;
    async fn update_website(
        &self,
        id: &str,
        params: UpdateWebsiteParams,
    ) -> anyhow::Result<Option<Website>>;
    async fn delete_website(&self, id: &str) -> anyhow::Result<bool>;

    /// Resolve a tracking-side site reference to a website id.
    ///
    /// Accepts a website id or a registered domain (matched
    /// case-insensitively). Returns `Ok(None)` when neither matches.
    async fn resolve_website(&self, site_ref: &str) -> anyhow::Result<Option<String>>;
}
