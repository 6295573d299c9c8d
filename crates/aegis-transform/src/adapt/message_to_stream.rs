//! Synthesizes Claude SSE stream events from a single, already-complete
//! `CreateMessageResponse`.
//!
//! Used by the broadcaster when a subscriber joins an in-flight upstream
//! call requesting a streamed response while the producer made (or already
//! completed) a non-streamed upstream call.

use aegis_protocol::claude::count_tokens::types::{BetaContentBlockParam, JsonObject};
use aegis_protocol::claude::create_message::response::CreateMessageResponse;
use aegis_protocol::claude::create_message::stream::{
    BetaStreamContentBlock, BetaStreamContentBlockDelta, BetaStreamEvent, BetaStreamEventKnown,
    BetaStreamMessage, BetaStreamMessageDelta, BetaStreamUsage,
};

/// Expands a finished message into the ordered sequence of stream events
/// that would have produced it.
pub fn streamify_message(message: CreateMessageResponse) -> Vec<BetaStreamEvent> {
    let mut events = Vec::new();

    let usage = stream_usage(&message.usage);
    events.push(BetaStreamEvent::Known(BetaStreamEventKnown::MessageStart {
        message: BetaStreamMessage {
            id: message.id.clone(),
            content: Vec::new(),
            model: message.model.clone(),
            role: message.role,
            stop_reason: None,
            stop_sequence: None,
            r#type: message.r#type,
            usage: usage.clone(),
        },
    }));

    for (index, block) in message.content.into_iter().enumerate() {
        let index = index as u32;
        let (start_block, deltas) = streamify_block(block);
        events.push(BetaStreamEvent::Known(BetaStreamEventKnown::ContentBlockStart {
            index,
            content_block: start_block,
        }));
        for delta in deltas {
            events.push(BetaStreamEvent::Known(BetaStreamEventKnown::ContentBlockDelta { index, delta }));
        }
        events.push(BetaStreamEvent::Known(BetaStreamEventKnown::ContentBlockStop { index }));
    }

    events.push(BetaStreamEvent::Known(BetaStreamEventKnown::MessageDelta {
        delta: BetaStreamMessageDelta {
            stop_reason: message.stop_reason,
            stop_sequence: message.stop_sequence,
        },
        usage,
    }));
    events.push(BetaStreamEvent::Known(BetaStreamEventKnown::MessageStop));
    events
}

fn streamify_block(
    block: BetaContentBlockParam,
) -> (BetaStreamContentBlock, Vec<BetaStreamContentBlockDelta>) {
    match block {
        BetaContentBlockParam::Text(text) => {
            let delta = (!text.text.is_empty()).then(|| BetaStreamContentBlockDelta::TextDelta {
                text: text.text.clone(),
            });
            let mut start = text;
            start.text.clear();
            (BetaStreamContentBlock::Text(start), delta.into_iter().collect())
        }
        BetaContentBlockParam::ToolUse(tool) => {
            let partial_json = serde_json::to_string(&tool.input).unwrap_or_else(|_| "{}".to_string());
            let mut start = tool;
            start.input = JsonObject::new();
            (
                BetaStreamContentBlock::ToolUse(start),
                vec![BetaStreamContentBlockDelta::InputJsonDelta { partial_json }],
            )
        }
        BetaContentBlockParam::ToolResult(_) => {
            // tool_result never appears in an assistant-authored response.
            (
                BetaStreamContentBlock::Text(aegis_protocol::claude::count_tokens::types::BetaTextBlock::new("")),
                Vec::new(),
            )
        }
    }
}

fn stream_usage(usage: &aegis_protocol::claude::create_message::types::BetaUsage) -> BetaStreamUsage {
    BetaStreamUsage {
        input_tokens: Some(usage.input_tokens),
        output_tokens: Some(usage.output_tokens),
        cache_creation_input_tokens: usage.cache_creation_input_tokens,
        cache_read_input_tokens: usage.cache_read_input_tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_protocol::claude::count_tokens::types::{
        BetaMessageRole, BetaMessageType, BetaStopReason, BetaTextBlock, Model,
    };
    use aegis_protocol::claude::create_message::types::{BetaMessage, BetaUsage};

    #[test]
    fn roundtrips_text_message_into_stream_events() {
        let message = BetaMessage {
            id: "msg_1".to_string(),
            content: vec![BetaContentBlockParam::Text(BetaTextBlock::new("hi"))],
            model: Model::Custom("claude-sonnet-4-5-20250929".to_string()),
            role: BetaMessageRole::Assistant,
            stop_reason: Some(BetaStopReason::EndTurn),
            stop_sequence: None,
            r#type: BetaMessageType::Message,
            usage: BetaUsage {
                input_tokens: 3,
                output_tokens: 2,
                cache_creation_input_tokens: None,
                cache_read_input_tokens: None,
            },
        };

        let events = streamify_message(message);
        assert!(matches!(
            events.first(),
            Some(BetaStreamEvent::Known(BetaStreamEventKnown::MessageStart { .. }))
        ));
        assert!(matches!(
            events.last(),
            Some(BetaStreamEvent::Known(BetaStreamEventKnown::MessageStop))
        ));
        let has_text_delta = events.iter().any(|event| {
            matches!(
                event,
                BetaStreamEvent::Known(BetaStreamEventKnown::ContentBlockDelta {
                    delta: BetaStreamContentBlockDelta::TextDelta { text },
                    ..
                }) if text == "hi"
            )
        });
        assert!(has_text_delta);
    }
}
