//! Accumulates a sequence of Claude SSE stream events into a single
//! `CreateMessageResponse`.
//!
//! Used by the broadcaster when a subscriber joins an in-flight upstream
//! call requesting a non-streamed response while the producer is forwarding
//! a streamed one (the dedup fingerprint deliberately ignores the `stream`
//! flag, so producer and joiner can disagree on it).

use std::collections::BTreeMap;

use aegis_protocol::claude::count_tokens::types::{BetaContentBlockParam, BetaStopReason, JsonObject};
use aegis_protocol::claude::create_message::response::CreateMessageResponse;
use aegis_protocol::claude::create_message::stream::{
    BetaStreamContentBlock, BetaStreamContentBlockDelta, BetaStreamEvent, BetaStreamEventKnown,
    BetaStreamMessage, BetaStreamMessageDelta, BetaStreamUsage,
};
use aegis_protocol::claude::create_message::types::{BetaMessage, BetaUsage};

#[derive(Debug, Clone, Default)]
pub struct StreamToMessage {
    message: Option<BetaMessage>,
    stream_blocks: BTreeMap<u32, BetaStreamContentBlock>,
    content_blocks: BTreeMap<u32, BetaContentBlockParam>,
    pending_json: BTreeMap<u32, String>,
}

impl StreamToMessage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one stream event; returns the completed message once a
    /// `message_stop` event has been folded in.
    pub fn push_event(&mut self, event: BetaStreamEvent) -> Option<CreateMessageResponse> {
        match event {
            BetaStreamEvent::Known(known) => self.push_known_event(known),
            BetaStreamEvent::Unknown(_) => None,
        }
    }

    /// Finalizes using whatever was accumulated so far, for a producer that
    /// disconnected before emitting `message_stop`.
    pub fn finalize_on_eof(&mut self) -> Option<CreateMessageResponse> {
        let mut message = self.message.take()?;
        if message.stop_reason.is_none() {
            message.stop_reason = Some(BetaStopReason::PauseTurn);
        }
        message.content = self.ordered_content();
        Some(message)
    }

    fn push_known_event(&mut self, event: BetaStreamEventKnown) -> Option<CreateMessageResponse> {
        match event {
            BetaStreamEventKnown::MessageStart { message } => {
                self.message = Some(map_message_start(message));
                None
            }
            BetaStreamEventKnown::ContentBlockStart { index, content_block } => {
                self.stream_blocks.insert(index, content_block);
                None
            }
            BetaStreamEventKnown::ContentBlockDelta { index, delta } => {
                self.handle_content_block_delta(index, delta);
                None
            }
            BetaStreamEventKnown::ContentBlockStop { index } => {
                self.finish_content_block(index);
                None
            }
            BetaStreamEventKnown::MessageDelta { delta, usage } => {
                self.handle_message_delta(delta, usage);
                None
            }
            BetaStreamEventKnown::MessageStop => self.finalize(),
            BetaStreamEventKnown::Ping | BetaStreamEventKnown::Error { .. } => None,
        }
    }

    fn finalize(&mut self) -> Option<CreateMessageResponse> {
        let mut message = self.message.take()?;
        message.content = self.ordered_content();
        Some(message)
    }

    fn handle_content_block_delta(&mut self, index: u32, delta: BetaStreamContentBlockDelta) {
        match delta {
            BetaStreamContentBlockDelta::TextDelta { text } => {
                if let Some(BetaStreamContentBlock::Text(block)) = self.stream_blocks.get_mut(&index) {
                    block.text.push_str(&text);
                }
            }
            BetaStreamContentBlockDelta::InputJsonDelta { partial_json } => {
                self.pending_json
                    .entry(index)
                    .and_modify(|value| value.push_str(&partial_json))
                    .or_insert(partial_json);
            }
        }
    }

    fn finish_content_block(&mut self, index: u32) {
        let Some(mut block) = self.stream_blocks.remove(&index) else {
            return;
        };

        if let Some(json) = self.pending_json.remove(&index)
            && let Ok(serde_json::Value::Object(object)) = serde_json::from_str(&json)
        {
            let mapped: JsonObject = object.into_iter().collect();
            if let BetaStreamContentBlock::ToolUse(tool) = &mut block {
                tool.input = mapped;
            }
        }

        self.content_blocks.insert(index, map_stream_block(block));
    }

    fn handle_message_delta(&mut self, delta: BetaStreamMessageDelta, usage: BetaStreamUsage) {
        if let Some(message) = self.message.as_mut() {
            if delta.stop_reason.is_some() {
                message.stop_reason = delta.stop_reason;
            }
            if delta.stop_sequence.is_some() {
                message.stop_sequence = delta.stop_sequence;
            }
            message.usage = map_usage(&usage);
        }
    }

    fn ordered_content(&self) -> Vec<BetaContentBlockParam> {
        self.content_blocks.values().cloned().collect()
    }
}

fn map_message_start(message: BetaStreamMessage) -> BetaMessage {
    BetaMessage {
        id: message.id,
        content: message.content.into_iter().map(map_stream_block).collect(),
        model: message.model,
        role: message.role,
        stop_reason: message.stop_reason,
        stop_sequence: message.stop_sequence,
        r#type: message.r#type,
        usage: map_usage(&message.usage),
    }
}

fn map_stream_block(block: BetaStreamContentBlock) -> BetaContentBlockParam {
    match block {
        BetaStreamContentBlock::Text(text) => BetaContentBlockParam::Text(text),
        BetaStreamContentBlock::ToolUse(tool) => BetaContentBlockParam::ToolUse(tool),
    }
}

fn map_usage(usage: &BetaStreamUsage) -> BetaUsage {
    BetaUsage {
        input_tokens: usage.input_tokens.unwrap_or(0),
        output_tokens: usage.output_tokens.unwrap_or(0),
        cache_creation_input_tokens: usage.cache_creation_input_tokens,
        cache_read_input_tokens: usage.cache_read_input_tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_protocol::claude::count_tokens::types::{
        BetaMessageRole, BetaMessageType, BetaTextBlock, Model,
    };

    fn message_start() -> BetaStreamEvent {
        BetaStreamEvent::Known(BetaStreamEventKnown::MessageStart {
            message: BetaStreamMessage {
                id: "msg_1".to_string(),
                content: Vec::new(),
                model: Model::Custom("claude-sonnet-4-5-20250929".to_string()),
                role: BetaMessageRole::Assistant,
                stop_reason: None,
                stop_sequence: None,
                r#type: BetaMessageType::Message,
                usage: BetaStreamUsage {
                    input_tokens: Some(5),
                    output_tokens: Some(0),
                    cache_creation_input_tokens: None,
                    cache_read_input_tokens: None,
                },
            },
        })
    }

    #[test]
    fn accumulates_text_block_into_message() {
        let mut acc = StreamToMessage::new();
        assert!(acc.push_event(message_start()).is_none());
        assert!(acc
            .push_event(BetaStreamEvent::Known(BetaStreamEventKnown::ContentBlockStart {
                index: 0,
                content_block: BetaStreamContentBlock::Text(BetaTextBlock::new("")),
            }))
            .is_none());
        assert!(acc
            .push_event(BetaStreamEvent::Known(BetaStreamEventKnown::ContentBlockDelta {
                index: 0,
                delta: BetaStreamContentBlockDelta::TextDelta { text: "hi".to_string() },
            }))
            .is_none());
        assert!(acc
            .push_event(BetaStreamEvent::Known(BetaStreamEventKnown::ContentBlockStop { index: 0 }))
            .is_none());
        assert!(acc
            .push_event(BetaStreamEvent::Known(BetaStreamEventKnown::MessageDelta {
                delta: BetaStreamMessageDelta {
                    stop_reason: Some(BetaStopReason::EndTurn),
                    stop_sequence: None,
                },
                usage: BetaStreamUsage {
                    input_tokens: Some(5),
                    output_tokens: Some(1),
                    cache_creation_input_tokens: None,
                    cache_read_input_tokens: None,
                },
            }))
            .is_none());

        let message = acc
            .push_event(BetaStreamEvent::Known(BetaStreamEventKnown::MessageStop))
            .expect("message stop finalizes");
        assert_eq!(message.stop_reason, Some(BetaStopReason::EndTurn));
        match &message.content[0] {
            BetaContentBlockParam::Text(text) => assert_eq!(text.text, "hi"),
            _ => panic!("expected text block"),
        }
    }

    #[test]
    fn finalize_on_eof_defaults_to_pause_turn() {
        let mut acc = StreamToMessage::new();
        acc.push_event(message_start());
        let message = acc.finalize_on_eof().expect("eof finalizes with partial content");
        assert_eq!(message.stop_reason, Some(BetaStopReason::PauseTurn));
    }
}
