use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::claude::count_tokens::types::{
    BetaContentBlockParam, BetaMessageRole, BetaMessageType, BetaStopReason, BetaUsage, Model,
};

pub type JsonValue = Value;
pub type JsonObject = BTreeMap<String, JsonValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetaMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetaServiceTier {
    Auto,
    StandardOnly,
}

/// Server-managed code execution containers are not part of this spec's
/// scope; kept as opaque passthrough so a request carrying one still parses.
pub type BetaContainerParam = JsonValue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetaMessage {
    pub id: String,
    pub content: Vec<BetaContentBlockParam>,
    pub model: Model,
    pub role: BetaMessageRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<BetaStopReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
    #[serde(rename = "type")]
    pub r#type: BetaMessageType,
    pub usage: BetaUsage,
}
