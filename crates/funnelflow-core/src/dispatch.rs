//! Ingestion-time planning: which step completions does one tracked signal
//! produce?
//!
//! Planning is pure. The caller snapshots the session's completed steps,
//! hands them in together with the website's active funnels, and persists
//! whatever comes back. Reading state once per request keeps the hot path at
//! one SELECT plus one batched INSERT.

use std::collections::{BTreeSet, HashMap};

use crate::funnel::{Funnel, FunnelStep, StepKind};
use crate::gate::{self, GateDecision};
use crate::matcher;

/// A completion the planner decided to record. Carries the denormalized
/// identifiers the completions table stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedCompletion {
    pub funnel_id: String,
    pub step_id: String,
    pub step_number: u32,
    pub url: String,
}

/// Build the staged row for a step the gate allowed.
pub fn stage_for_step(step: &FunnelStep, current_url: &str) -> StagedCompletion {
    StagedCompletion {
        funnel_id: step.funnel_id.clone(),
        step_id: step.id.clone(),
        step_number: step.step_number,
        url: current_url.to_string(),
    }
}

/// Plan completions for a page view against every given funnel.
///
/// Funnels progress independently: one page view may advance several funnels
/// at once. Within a funnel, steps are walked in order and each staged
/// completion immediately counts as completed for the rest of the walk, so a
/// URL whose patterns overlap across consecutive steps satisfies them in one
/// call. Callers pass active funnels only; the planner does not re-check
/// `is_active`.
pub fn plan_page_view(
    funnels: &[Funnel],
    completed: &HashMap<String, BTreeSet<u32>>,
    current_url: &str,
) -> Vec<StagedCompletion> {
    let mut staged = Vec::new();
    for funnel in funnels {
        let mut done = completed.get(&funnel.id).cloned().unwrap_or_default();
        for step in &funnel.steps {
            let StepKind::PageView {
                url_pattern,
                match_type,
            } = &step.kind
            else {
                continue;
            };
            if !matcher::step_matches_url(url_pattern, *match_type, current_url) {
                continue;
            }
            if gate::evaluate(step.step_number, &done) == GateDecision::Allowed {
                staged.push(stage_for_step(step, current_url));
                done.insert(step.step_number);
            }
        }
    }
    staged
}
