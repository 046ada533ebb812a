use serde::{Deserialize, Serialize};

pub const MAX_SESSION_ID_LEN: usize = 128;
pub const MAX_TRACK_URL_LEN: usize = 2048;

/// The payload the snippet sends to POST /api/track.
///
/// `site_id` accepts either a website id or a registered domain; the server
/// resolves it before any funnel work happens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackPayload {
    pub site_id: String,
    /// Client-generated opaque session identifier.
    pub session_id: String,
    pub current_url: String,
    #[serde(flatten)]
    pub event: TrackEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum TrackEvent {
    PageView,
    CustomEvent { custom_event: CustomEventRef },
}

/// Reference to the custom-event step the snippet believes it fired.
///
/// The server re-validates everything against stored config; `step_number`
/// here is advisory and the stored value wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomEventRef {
    pub funnel_id: String,
    pub step_id: String,
    pub step_number: u32,
    /// Which trigger fired on the client ("click", "scroll", "custom").
    pub event_type: Option<String>,
    pub event_data: Option<serde_json::Value>,
}

/// The payload for POST /api/track/step, the direct single-step endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackStepPayload {
    pub site_id: String,
    pub session_id: String,
    pub step_id: String,
    pub current_url: Option<String>,
}

/// Session ids come straight from the client; bound them before they touch
/// storage.
pub fn session_id_valid(session_id: &str) -> bool {
    !session_id.trim().is_empty() && session_id.len() <= MAX_SESSION_ID_LEN
}

pub fn track_url_valid(current_url: &str) -> bool {
    !current_url.trim().is_empty() && current_url.len() <= MAX_TRACK_URL_LEN
}
