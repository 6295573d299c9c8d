use thiserror::Error;

/// Failures raised while bridging between the Anthropic Messages wire format
/// and an OpenAI-compatible upstream, or while converting between a single
/// buffered message and its streamed equivalent.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("tool `{name}` has a non-object input_schema and cannot be bridged")]
    InvalidToolSchema { name: String },
    #[error("upstream tool call `{name}` arguments are not valid JSON: {source}")]
    InvalidToolArguments {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("stream chunk referenced tool_call index {index} with no matching start")]
    UnknownToolCallIndex { index: i64 },
}
