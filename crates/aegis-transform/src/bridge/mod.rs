//! Bridges the Anthropic Messages wire format to OpenAI Chat Completions and
//! back, for providers that only speak the OpenAI surface.

mod request;
mod response;
mod schema;
mod stream;

pub use request::transform_request;
pub use response::transform_response;
pub use stream::OpenAIToClaudeStreamState;
