use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::Utc;

use funnelflow_core::dispatch::StagedCompletion;
use funnelflow_core::funnel::{
    CreateFunnelRequest, Funnel, FunnelBackend, FunnelResults, FunnelStep, ReportWindow,
    UpdateFunnelRequest,
};

use crate::DuckDbBackend;

#[async_trait]
impl FunnelBackend for DuckDbBackend {
    async fn get_funnel(
        &self,
        website_id: &str,
        funnel_id: &str,
    ) -> anyhow::Result<Option<Funnel>> {
        crate::queries::funnels::get_funnel_inner(self, website_id, funnel_id).await
    }

    async fn create_funnel(
        &self,
        website_id: &str,
        req: CreateFunnelRequest,
    ) -> anyhow::Result<Funnel> {
        crate::queries::funnels::create_funnel_inner(self, website_id, req).await
    }

    async fn update_funnel(
        &self,
        website_id: &str,
        funnel_id: &str,
        req: UpdateFunnelRequest,
    ) -> anyhow::Result<Option<Funnel>> {
        crate::queries::funnels::update_funnel_inner(self, website_id, funnel_id, req).await
    }

    async fn delete_funnel(&self, website_id: &str, funnel_id: &str) -> anyhow::Result<bool> {
        crate::queries::funnels::delete_funnel_inner(self, website_id, funnel_id).await
    }

    async fn active_funnels(&self, website_id: &str) -> anyhow::Result<Vec<Funnel>> {
        crate::queries::funnels::active_funnels_inner(self, website_id).await
    }

    async fn find_step(
        &self,
        website_id: &str,
        step_id: &str,
    ) -> anyhow::Result<Option<(Funnel, FunnelStep)>> {
        crate::queries::funnels::find_step_inner(self, website_id, step_id).await
    }

    async fn touch_session(&self, website_id: &str, session_id: &str) -> anyhow::Result<()> {
        crate::session::touch_session_inner(self, website_id, session_id, Utc::now()).await
    }

    async fn completed_steps(
        &self,
        website_id: &str,
        session_id: &str,
    ) -> anyhow::Result<HashMap<String, BTreeSet<u32>>> {
        crate::queries::completions::completed_steps_inner(self, website_id, session_id).await
    }

    async fn completed_steps_for_funnel(
        &self,
        funnel_id: &str,
        session_id: &str,
    ) -> anyhow::Result<BTreeSet<u32>> {
        crate::queries::completions::completed_steps_for_funnel_inner(self, funnel_id, session_id)
            .await
    }

    async fn record_completions(
        &self,
        website_id: &str,
        session_id: &str,
        staged: &[StagedCompletion],
    ) -> anyhow::Result<usize> {
        crate::queries::completions::record_completions_inner(
            self,
            website_id,
            session_id,
            staged,
            Utc::now(),
        )
        .await
    }

    async fn funnel_results(
        &self,
        website_id: &str,
        funnel_id: &str,
        window: &ReportWindow,
    ) -> anyhow::Result<Option<FunnelResults>> {
        crate::queries::results::funnel_results_inner(self, website_id, funnel_id, window).await
    }

    async fn list_funnel_results(
        &self,
        website_id: &str,
        window: &ReportWindow,
    ) -> anyhow::Result<Vec<FunnelResults>> {
        crate::queries::results::list_funnel_results_inner(self, website_id, window).await
    }

    async fn reset_funnel_completions(
        &self,
        website_id: &str,
        funnel_id: &str,
    ) -> anyhow::Result<Option<u64>> {
        crate::queries::completions::reset_funnel_completions_inner(self, website_id, funnel_id)
            .await
    }
}
