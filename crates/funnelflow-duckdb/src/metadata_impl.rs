use async_trait::async_trait;

use funnelflow_metadata::{CreateWebsiteParams, MetadataStore, UpdateWebsiteParams, Website};

use crate::DuckDbBackend;

#[async_trait]
impl MetadataStore for DuckDbBackend {
    async fn get_setting(&self, key: &str) -> anyhow::Result<Option<String>> {
        DuckDbBackend::get_setting(self, key).await
    }

    async fn set_setting(&self, key: &str, value: &str) -> anyhow::Result<()> {
        DuckDbBackend::set_setting(self, key, value).await
    }

    async fn create_website(&self, params: CreateWebsiteParams) -> anyhow::Result<Website> {
        DuckDbBackend::create_website(self, params).await
    }

    async fn list_websites(
        &self,
        limit: i64,
        cursor: Option<&str>,
    ) -> anyhow::Result<(Vec<Website>, i64, bool)> {
        DuckDbBackend::list_websites(self, limit, cursor).await
    }

    async fn website_exists(&self, id: &str) -> anyhow::Result<bool> {
        DuckDbBackend::website_exists(self, id).await
    }

    async fn get_website(&self, id: &str) -> anyhow::Result<Option<Website>> {
        DuckDbBackend::get_website(self, id).await
    }

    async fn update_website(
        &self,
        id: &str,
        params: UpdateWebsiteParams,
    ) -> anyhow::Result<Option<Website>> {
        DuckDbBackend::update_website(self, id, params).await
    }

    async fn delete_website(&self, id: &str) -> anyhow::Result<bool> {
        DuckDbBackend::delete_website(self, id).await
    }

    async fn resolve_website(&self, site_ref: &str) -> anyhow::Result<Option<String>> {
        DuckDbBackend::resolve_website(self, site_ref).await
    }
}
