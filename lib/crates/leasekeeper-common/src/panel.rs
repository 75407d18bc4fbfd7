use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where the shared summary view currently lives. Both ids are opaque to
/// the orchestrator; the publisher decides what they mean.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PanelLocation {
    pub channel_id: String,
    pub message_id: String,
}

/// Process-wide panel pointer, persisted across restarts.
///
/// Unknown fields are ignored on load so older binaries can read files
/// written by newer ones.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PanelState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<PanelLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
}
