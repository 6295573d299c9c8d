use serde::{Deserialize, Serialize};

use crate::claude::count_tokens::types::{
    BetaMessageRole, BetaMessageType, BetaStopReason, BetaTextBlock, BetaToolUseBlock, JsonValue,
    Model,
};
use crate::claude::error::ErrorDetail;
use crate::claude::types::RequestId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetaStreamUsage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetaStreamMessage {
    pub id: String,
    /// Message start events include an empty content array.
    pub content: Vec<BetaStreamContentBlock>,
    pub model: Model,
    pub role: BetaMessageRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<BetaStopReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
    #[serde(rename = "type")]
    pub r#type: BetaMessageType,
    pub usage: BetaStreamUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetaStreamMessageDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<BetaStopReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
}

/// Only text and tool_use blocks are produced by this proxy's bridged
/// streams; thinking, server tools, citations, containers and MCP blocks are
/// out of scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BetaStreamContentBlock {
    Text(BetaTextBlock),
    ToolUse(BetaToolUseBlock),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BetaStreamContentBlockDelta {
    TextDelta {
        text: String,
    },
    /// Partial JSON string; accumulate and parse after content_block_stop.
    InputJsonDelta {
        partial_json: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BetaStreamEventKnown {
    MessageStart {
        message: BetaStreamMessage,
    },
    ContentBlockStart {
        index: u32,
        content_block: BetaStreamContentBlock,
    },
    ContentBlockDelta {
        index: u32,
        delta: BetaStreamContentBlockDelta,
    },
    ContentBlockStop {
        index: u32,
    },
    MessageDelta {
        delta: BetaStreamMessageDelta,
        /// Token counts are cumulative for the stream so far.
        usage: BetaStreamUsage,
    },
    MessageStop,
    Ping,
    Error {
        error: ErrorDetail,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<RequestId>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BetaStreamEvent {
    Known(BetaStreamEventKnown),
    Unknown(JsonValue),
}

impl BetaStreamEventKnown {
    /// The SSE `event:` field name for this variant, per Anthropic's framing
    /// (each event line names the type redundantly with the JSON body).
    pub fn event_name(&self) -> &'static str {
        match self {
            BetaStreamEventKnown::MessageStart { .. } => "message_start",
            BetaStreamEventKnown::ContentBlockStart { .. } => "content_block_start",
            BetaStreamEventKnown::ContentBlockDelta { .. } => "content_block_delta",
            BetaStreamEventKnown::ContentBlockStop { .. } => "content_block_stop",
            BetaStreamEventKnown::MessageDelta { .. } => "message_delta",
            BetaStreamEventKnown::MessageStop => "message_stop",
            BetaStreamEventKnown::Ping => "ping",
            BetaStreamEventKnown::Error { .. } => "error",
        }
    }
}
