use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub type JsonValue = Value;
pub type JsonObject = BTreeMap<String, JsonValue>;

/// Model identifier. Accepts any string so unknown/future model names still
/// round-trip; `passthrough` routing substitutes the client-supplied value
/// verbatim regardless of which variant this deserializes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Model {
    Known(KnownModel),
    Custom(String),
}

impl Model {
    pub fn as_str(&self) -> std::borrow::Cow<'_, str> {
        match self {
            Model::Custom(s) => std::borrow::Cow::Borrowed(s),
            Model::Known(known) => serde_json::to_value(known)
                .ok()
                .and_then(|v| v.as_str().map(|s| s.to_string()))
                .map(std::borrow::Cow::Owned)
                .unwrap_or(std::borrow::Cow::Borrowed("unknown")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KnownModel {
    #[serde(rename = "claude-opus-4-5-20251101")]
    ClaudeOpus4_5,
    #[serde(rename = "claude-sonnet-4-5-20250929")]
    ClaudeSonnet4_5,
    #[serde(rename = "claude-haiku-4-5-20251001")]
    ClaudeHaiku4_5,
    #[serde(rename = "claude-3-5-haiku-20241022")]
    Claude3_5Haiku,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetaMessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BetaMessageType {
    #[serde(rename = "message")]
    Message,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetaStopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
    PauseTurn,
    Refusal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BetaTextBlockType {
    #[serde(rename = "text")]
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetaTextBlock {
    pub text: String,
    #[serde(rename = "type")]
    pub r#type: BetaTextBlockType,
}

impl BetaTextBlock {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            r#type: BetaTextBlockType::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BetaToolUseBlockType {
    #[serde(rename = "tool_use")]
    ToolUse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetaToolUseBlock {
    pub id: String,
    pub input: JsonObject,
    pub name: String,
    #[serde(rename = "type")]
    pub r#type: BetaToolUseBlockType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BetaToolResultBlockType {
    #[serde(rename = "tool_result")]
    ToolResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BetaToolResultContent {
    Text(String),
    Blocks(Vec<BetaTextBlock>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetaToolResultBlockParam {
    pub tool_use_id: String,
    #[serde(rename = "type")]
    pub r#type: BetaToolResultBlockType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<BetaToolResultContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

/// Inbound/outbound content blocks. Intentionally a subset of the full
/// Anthropic block vocabulary (text, tool_use, tool_result); images,
/// documents, thinking, citations, server tools and containers are not
/// supported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BetaContentBlockParam {
    Text(BetaTextBlock),
    ToolUse(BetaToolUseBlock),
    ToolResult(BetaToolResultBlockParam),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BetaMessageContent {
    Text(String),
    Blocks(Vec<BetaContentBlockParam>),
}

impl BetaMessageContent {
    /// Normalizes to a list of text strings for fingerprinting; tool blocks
    /// contribute their name/id/input as opaque text so structurally
    /// distinct tool calls fingerprint differently.
    pub fn canonical_text_parts(&self) -> Vec<String> {
        match self {
            BetaMessageContent::Text(text) => vec![text.clone()],
            BetaMessageContent::Blocks(blocks) => blocks
                .iter()
                .map(|block| match block {
                    BetaContentBlockParam::Text(t) => t.text.clone(),
                    BetaContentBlockParam::ToolUse(t) => {
                        format!("tool_use:{}:{}:{}", t.id, t.name, t.input.len())
                    }
                    BetaContentBlockParam::ToolResult(t) => {
                        format!("tool_result:{}:{:?}", t.tool_use_id, t.content)
                    }
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetaMessageParam {
    pub role: BetaMessageRole,
    pub content: BetaMessageContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BetaSystemParam {
    Text(String),
    Blocks(Vec<BetaTextBlock>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BetaToolInputSchemaType {
    #[serde(rename = "object")]
    Object,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetaToolInputSchema {
    #[serde(rename = "type")]
    pub r#type: BetaToolInputSchemaType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<JsonObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_properties: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetaTool {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: BetaToolInputSchema,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BetaToolChoice {
    Auto {
        #[serde(skip_serializing_if = "Option::is_none")]
        disable_parallel_tool_use: Option<bool>,
    },
    Any {
        #[serde(skip_serializing_if = "Option::is_none")]
        disable_parallel_tool_use: Option<bool>,
    },
    None,
    Tool {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        disable_parallel_tool_use: Option<bool>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetaUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u32>,
}

/// Structured output / thinking / context management / MCP servers are out of
/// this spec's scope; these are kept as opaque JSON passthrough so a request
/// carrying one of these beta fields still parses instead of failing.
pub type BetaJSONOutputFormat = JsonValue;
pub type BetaOutputConfig = JsonValue;
pub type BetaThinkingConfigParam = JsonValue;
pub type BetaContextManagementConfig = JsonValue;
pub type BetaRequestMCPServerURLDefinition = JsonValue;
