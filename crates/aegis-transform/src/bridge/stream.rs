//! OpenAI chat-completions stream chunks -> Claude SSE stream events.

use std::collections::BTreeMap;

use aegis_protocol::claude::count_tokens::types::{
    BetaMessageRole, BetaMessageType, BetaStopReason, BetaTextBlock, BetaToolUseBlock,
    BetaToolUseBlockType, JsonObject, Model as ClaudeModel,
};
use aegis_protocol::claude::create_message::stream::{
    BetaStreamContentBlock, BetaStreamContentBlockDelta, BetaStreamEvent, BetaStreamEventKnown,
    BetaStreamMessage, BetaStreamMessageDelta, BetaStreamUsage,
};
use aegis_protocol::openai::create_chat_completions::stream::CreateChatCompletionStreamResponse;
use aegis_protocol::openai::create_chat_completions::types::{
    ChatCompletionFinishReason, ChatCompletionMessageToolCallChunk, CompletionUsage,
};

#[derive(Debug, Clone, Copy)]
struct ToolBlockInfo {
    block_index: u32,
}

/// Per-upstream-call state for converting a sequence of OpenAI stream chunks
/// into Anthropic-shaped stream events. One instance lives for the lifetime
/// of a single upstream SSE stream.
#[derive(Debug, Clone)]
pub struct OpenAIToClaudeStreamState {
    id: String,
    model: ClaudeModel,
    message_started: bool,
    finish_emitted: bool,
    pending_finish: Option<BetaStopReason>,
    next_block_index: u32,
    text_block_index: Option<u32>,
    tool_blocks: BTreeMap<i64, ToolBlockInfo>,
}

impl OpenAIToClaudeStreamState {
    pub fn new() -> Self {
        Self {
            id: "unknown".to_string(),
            model: ClaudeModel::Custom("unknown".to_string()),
            message_started: false,
            finish_emitted: false,
            pending_finish: None,
            next_block_index: 0,
            text_block_index: None,
            tool_blocks: BTreeMap::new(),
        }
    }

    pub fn transform_chunk(&mut self, chunk: CreateChatCompletionStreamResponse) -> Vec<BetaStreamEvent> {
        let mut events = Vec::new();

        if !self.message_started {
            self.id = chunk.id.clone();
            self.model = ClaudeModel::Custom(chunk.model.clone());
            self.message_started = true;
            events.push(BetaStreamEvent::Known(BetaStreamEventKnown::MessageStart {
                message: BetaStreamMessage {
                    id: self.id.clone(),
                    content: Vec::new(),
                    model: self.model.clone(),
                    role: BetaMessageRole::Assistant,
                    stop_reason: None,
                    stop_sequence: None,
                    r#type: BetaMessageType::Message,
                    usage: BetaStreamUsage {
                        input_tokens: None,
                        output_tokens: None,
                        cache_creation_input_tokens: None,
                        cache_read_input_tokens: None,
                    },
                },
            }));
        }

        let choice = chunk.choices.first();

        if let Some(choice) = choice {
            if let Some(content) = &choice.delta.content {
                events.extend(self.emit_text(content));
            }
            if let Some(tool_calls) = &choice.delta.tool_calls {
                for call in tool_calls {
                    events.extend(self.emit_tool_call(call));
                }
            }
        }

        let usage = map_usage(chunk.usage);
        let finish_reason = choice.and_then(|choice| choice.finish_reason.map(map_finish_reason));

        if let Some(reason) = finish_reason
            && !self.finish_emitted
        {
            events.extend(self.close_open_blocks());
            self.pending_finish = Some(reason);
        }

        if let Some(usage) = usage {
            if let Some(reason) = self.pending_finish.take() {
                events.push(BetaStreamEvent::Known(BetaStreamEventKnown::MessageDelta {
                    delta: BetaStreamMessageDelta {
                        stop_reason: Some(reason),
                        stop_sequence: None,
                    },
                    usage,
                }));
                events.push(BetaStreamEvent::Known(BetaStreamEventKnown::MessageStop));
                self.finish_emitted = true;
            } else {
                events.push(BetaStreamEvent::Known(BetaStreamEventKnown::MessageDelta {
                    delta: BetaStreamMessageDelta {
                        stop_reason: None,
                        stop_sequence: None,
                    },
                    usage,
                }));
            }
        }

        events
    }

    fn emit_text(&mut self, text: &str) -> Vec<BetaStreamEvent> {
        if text.is_empty() {
            return Vec::new();
        }

        let mut events = Vec::new();
        let block_index = match self.text_block_index {
            Some(index) => index,
            None => {
                let index = self.next_block_index;
                self.next_block_index += 1;
                self.text_block_index = Some(index);
                events.push(BetaStreamEvent::Known(
                    BetaStreamEventKnown::ContentBlockStart {
                        index,
                        content_block: BetaStreamContentBlock::Text(BetaTextBlock::new("")),
                    },
                ));
                index
            }
        };

        events.push(BetaStreamEvent::Known(
            BetaStreamEventKnown::ContentBlockDelta {
                index: block_index,
                delta: BetaStreamContentBlockDelta::TextDelta {
                    text: text.to_string(),
                },
            },
        ));

        events
    }

    fn emit_tool_call(&mut self, call: &ChatCompletionMessageToolCallChunk) -> Vec<BetaStreamEvent> {
        let mut events = Vec::new();
        let index = call.index;

        let info = *self.tool_blocks.entry(index).or_insert_with(|| {
            let block_index = self.next_block_index;
            self.next_block_index += 1;
            let id = call.id.clone().unwrap_or_else(|| format!("toolcall-{index}"));
            let name = call
                .function
                .as_ref()
                .and_then(|function| function.name.clone())
                .unwrap_or_else(|| "tool".to_string());

            events.push(BetaStreamEvent::Known(
                BetaStreamEventKnown::ContentBlockStart {
                    index: block_index,
                    content_block: BetaStreamContentBlock::ToolUse(BetaToolUseBlock {
                        id,
                        input: JsonObject::new(),
                        name,
                        r#type: BetaToolUseBlockType::ToolUse,
                    }),
                },
            ));

            ToolBlockInfo { block_index }
        });

        if let Some(function) = &call.function
            && let Some(arguments) = &function.arguments
        {
            events.push(BetaStreamEvent::Known(
                BetaStreamEventKnown::ContentBlockDelta {
                    index: info.block_index,
                    delta: BetaStreamContentBlockDelta::InputJsonDelta {
                        partial_json: arguments.clone(),
                    },
                },
            ));
        }

        events
    }

    fn close_open_blocks(&mut self) -> Vec<BetaStreamEvent> {
        let mut events = Vec::new();

        if let Some(index) = self.text_block_index.take() {
            events.push(BetaStreamEvent::Known(BetaStreamEventKnown::ContentBlockStop { index }));
        }

        let tool_blocks = std::mem::take(&mut self.tool_blocks);
        for (_, info) in tool_blocks {
            events.push(BetaStreamEvent::Known(BetaStreamEventKnown::ContentBlockStop {
                index: info.block_index,
            }));
        }

        events
    }
}

impl Default for OpenAIToClaudeStreamState {
    fn default() -> Self {
        Self::new()
    }
}

fn map_finish_reason(reason: ChatCompletionFinishReason) -> BetaStopReason {
    match reason {
        ChatCompletionFinishReason::Stop => BetaStopReason::EndTurn,
        ChatCompletionFinishReason::Length => BetaStopReason::MaxTokens,
        ChatCompletionFinishReason::ToolCalls => BetaStopReason::ToolUse,
        ChatCompletionFinishReason::ContentFilter => BetaStopReason::Refusal,
    }
}

fn map_usage(usage: Option<CompletionUsage>) -> Option<BetaStreamUsage> {
    let usage = usage?;
    Some(BetaStreamUsage {
        input_tokens: Some(usage.prompt_tokens),
        output_tokens: Some(usage.completion_tokens),
        cache_creation_input_tokens: None,
        cache_read_input_tokens: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_protocol::openai::create_chat_completions::stream::{
        ChatCompletionChunkObjectType, ChatCompletionStreamChoice,
    };
    use aegis_protocol::openai::create_chat_completions::types::ChatCompletionStreamResponseDelta;

    fn chunk(
        delta: ChatCompletionStreamResponseDelta,
        finish_reason: Option<ChatCompletionFinishReason>,
        usage: Option<CompletionUsage>,
    ) -> CreateChatCompletionStreamResponse {
        CreateChatCompletionStreamResponse {
            id: "chatcmpl-1".to_string(),
            object: ChatCompletionChunkObjectType::ChatCompletionChunk,
            created: 0,
            model: "gpt-4o-mini".to_string(),
            choices: vec![ChatCompletionStreamChoice {
                index: 0,
                delta,
                logprobs: None,
                finish_reason,
            }],
            usage,
            service_tier: None,
            system_fingerprint: None,
        }
    }

    #[test]
    fn text_delta_opens_block_once() {
        let mut state = OpenAIToClaudeStreamState::new();
        let events = state.transform_chunk(chunk(
            ChatCompletionStreamResponseDelta {
                role: None,
                content: Some("hel".to_string()),
                tool_calls: None,
            },
            None,
            None,
        ));
        assert!(matches!(events[0], BetaStreamEvent::Known(BetaStreamEventKnown::MessageStart { .. })));
        assert!(matches!(
            events[1],
            BetaStreamEvent::Known(BetaStreamEventKnown::ContentBlockStart { index: 0, .. })
        ));

        let events = state.transform_chunk(chunk(
            ChatCompletionStreamResponseDelta {
                role: None,
                content: Some("lo".to_string()),
                tool_calls: None,
            },
            None,
            None,
        ));
        assert!(events
            .iter()
            .all(|event| !matches!(event, BetaStreamEvent::Known(BetaStreamEventKnown::MessageStart { .. }))));
    }

    #[test]
    fn finish_and_usage_close_stream() {
        let mut state = OpenAIToClaudeStreamState::new();
        state.transform_chunk(chunk(
            ChatCompletionStreamResponseDelta {
                role: None,
                content: Some("hi".to_string()),
                tool_calls: None,
            },
            None,
            None,
        ));
        let events = state.transform_chunk(chunk(
            ChatCompletionStreamResponseDelta {
                role: None,
                content: None,
                tool_calls: None,
            },
            Some(ChatCompletionFinishReason::Stop),
            Some(CompletionUsage {
                prompt_tokens: 10,
                completion_tokens: 2,
                total_tokens: 12,
            }),
        ));
        assert!(matches!(
            events.last(),
            Some(BetaStreamEvent::Known(BetaStreamEventKnown::MessageStop))
        ));
        assert!(state.finish_emitted);
    }
}
