use crate::claude::create_message::types::BetaMessage;

/// A non-streaming `POST /v1/messages` response is a complete `BetaMessage`.
pub type CreateMessageResponse = BetaMessage;
