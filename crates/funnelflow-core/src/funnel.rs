//! Funnel domain types and the storage backend abstraction.

use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::dispatch::StagedCompletion;

/// How a page-view step's `url_pattern` is compared against the normalized
/// path of the tracked URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Contains,
    StartsWith,
    Regex,
}

/// Client-side trigger that fires a custom-event step.
///
/// The trigger definition is stored with the step so the tracking snippet can
/// arm the right listener; the server only needs it back for config reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerRule {
    Click { selector: String },
    Scroll { percent: u8 },
    Custom { event_name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step_type", rename_all = "snake_case")]
pub enum StepKind {
    PageView {
        url_pattern: String,
        match_type: MatchType,
    },
    CustomEvent {
        trigger: TriggerRule,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelStep {
    pub id: String,
    pub funnel_id: String,
    /// 1-based position; contiguous within a funnel.
    pub step_number: u32,
    pub name: String,
    #[serde(flatten)]
    pub kind: StepKind,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Funnel {
    pub id: String,
    pub website_id: String,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    /// Ordered by `step_number` ascending.
    pub steps: Vec<FunnelStep>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStepRequest {
    pub name: Option<String>,
    #[serde(flatten)]
    pub kind: StepKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFunnelRequest {
    pub name: String,
    pub description: Option<String>,
    pub is_active: Option<bool>,
    pub steps: Vec<CreateStepRequest>,
}

/// `description: null` clears the field; an absent key leaves it untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateFunnelRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_nullable")]
    pub description: Option<Option<String>>,
    pub is_active: Option<bool>,
    pub steps: Option<Vec<CreateStepRequest>>,
}

fn deserialize_optional_nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: serde::Deserialize<'de>,
{
    Ok(Some(Option::<T>::deserialize(deserializer)?))
}

/// Per-step slice of a funnel report: the step's configuration plus the
/// session counts derived from recorded completions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub step_number: u32,
    pub name: String,
    #[serde(flatten)]
    pub kind: StepKind,
    /// Sessions eligible to attempt this step. Step 1: sessions that
    /// completed it; step N: sessions that completed step N-1.
    pub entered_count: i64,
    pub completed_count: i64,
    pub dropped_count: i64,
    /// completed / entered * 100, rounded to two decimals. 0 when nothing entered.
    pub conversion_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelResults {
    pub funnel_id: String,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub total_entered: i64,
    pub total_completed: i64,
    pub overall_conversion_rate: f64,
    pub steps: Vec<StepResult>,
}

/// Reporting window. Open ends mean "from the beginning" / "until now";
/// the default window covers all recorded completions.
///
/// Dates are calendar days in the website's timezone (or the explicit
/// override), converted to UTC bounds at query time.
#[derive(Debug, Clone, Default)]
pub struct ReportWindow {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub timezone: Option<String>,
}

#[async_trait::async_trait]
pub trait FunnelBackend: Send + Sync + 'static {
    async fn get_funnel(
        &self,
        website_id: &str,
        funnel_id: &str,
    ) -> anyhow::Result<Option<Funnel>>;

    async fn create_funnel(
        &self,
        website_id: &str,
        req: CreateFunnelRequest,
    ) -> anyhow::Result<Funnel>;

    async fn update_funnel(
        &self,
        website_id: &str,
        funnel_id: &str,
        req: UpdateFunnelRequest,
    ) -> anyhow::Result<Option<Funnel>>;

    /// Returns false when the funnel does not exist for this website.
    async fn delete_funnel(&self, website_id: &str, funnel_id: &str) -> anyhow::Result<bool>;

    /// Active funnels with steps loaded, for ingestion-time matching.
    async fn active_funnels(&self, website_id: &str) -> anyhow::Result<Vec<Funnel>>;

    /// Locate a step by id within the website's funnels (active or not),
    /// returning the owning funnel alongside it.
    async fn find_step(
        &self,
        website_id: &str,
        step_id: &str,
    ) -> anyhow::Result<Option<(Funnel, FunnelStep)>>;

    /// Upsert the session row, bumping `last_seen`.
    async fn touch_session(&self, website_id: &str, session_id: &str) -> anyhow::Result<()>;

    /// Completed step numbers for every funnel this session has touched,
    /// keyed by funnel id. Funnels with no completions are absent.
    async fn completed_steps(
        &self,
        website_id: &str,
        session_id: &str,
    ) -> anyhow::Result<HashMap<String, BTreeSet<u32>>>;

    /// Completed step numbers for one funnel. Funnel ids are globally
    /// unique, so no website scope is needed here.
    async fn completed_steps_for_funnel(
        &self,
        funnel_id: &str,
        session_id: &str,
    ) -> anyhow::Result<BTreeSet<u32>>;

    /// Persist staged completions in one transaction. Rows that collide with
    /// an existing (step, session) completion are skipped; returns the number
    /// actually inserted.
    async fn record_completions(
        &self,
        website_id: &str,
        session_id: &str,
        staged: &[StagedCompletion],
    ) -> anyhow::Result<usize>;

    async fn funnel_results(
        &self,
        website_id: &str,
        funnel_id: &str,
        window: &ReportWindow,
    ) -> anyhow::Result<Option<FunnelResults>>;

    /// Results for every funnel of the website, ordered by creation time.
    async fn list_funnel_results(
        &self,
        website_id: &str,
        window: &ReportWindow,
    ) -> anyhow::Result<Vec<FunnelResults>>;

    /// Delete all recorded completions for a funnel. Returns the deleted row
    /// count, or None when the funnel does not exist for this website.
    async fn reset_funnel_completions(
        &self,
        website_id: &str,
        funnel_id: &str,
    ) -> anyhow::Result<Option<u64>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_request_distinguishes_null_from_absent_description() {
        let absent: UpdateFunnelRequest = serde_json::from_str(r#"{"name": "n"}"#).unwrap();
        assert_eq!(absent.description, None);

        let null: UpdateFunnelRequest = serde_json::from_str(r#"{"description": null}"#).unwrap();
        assert_eq!(null.description, Some(None));

        let value: UpdateFunnelRequest =
            serde_json::from_str(r#"{"description": "d"}"#).unwrap();
        assert_eq!(value.description, Some(Some("d".to_string())));
    }

    #[test]
    fn step_kind_round_trips_through_flattened_tags() {
        let step: CreateStepRequest = serde_json::from_str(
            r#"{"step_type": "page_view", "url_pattern": "/checkout", "match_type": "exact"}"#,
        )
        .unwrap();
        assert_eq!(
            step.kind,
            StepKind::PageView {
                url_pattern: "/checkout".to_string(),
                match_type: MatchType::Exact,
            }
        );

        let event: CreateStepRequest = serde_json::from_str(
            r#"{"step_type": "custom_event", "trigger": {"type": "scroll", "percent": 75}}"#,
        )
        .unwrap();
        assert_eq!(
            event.kind,
            StepKind::CustomEvent {
                trigger: TriggerRule::Scroll { percent: 75 },
            }
        );
    }
}
