use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TabRequest {
    #[validate(length(min = 1, max = 128, message = "tabId must be 1-128 characters"))]
    pub(crate) tab_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ClaimStatusQuery {
    #[serde(default)]
    pub(crate) tab_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ClaimResponse {
    pub(crate) granted: bool,
    pub(crate) owner_tab_id: Option<String>,
    pub(crate) last_heartbeat_at: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct HeartbeatResponse {
    pub(crate) owner: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct ReleaseResponse {
    pub(crate) released: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ClaimStatusResponse {
    pub(crate) owner_tab_id: Option<String>,
    pub(crate) last_heartbeat_at: Option<String>,
    pub(crate) stale: bool,
    pub(crate) is_owner: bool,
}
