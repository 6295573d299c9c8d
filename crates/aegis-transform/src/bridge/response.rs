//! OpenAI `chat.completion` response -> Claude message response.

use aegis_protocol::claude::count_tokens::types::{
    BetaContentBlockParam, BetaMessageRole, BetaMessageType, BetaStopReason, BetaTextBlock,
    BetaToolUseBlock, BetaToolUseBlockType, BetaUsage, JsonObject, JsonValue, Model as ClaudeModel,
};
use aegis_protocol::claude::create_message::response::CreateMessageResponse;
use aegis_protocol::claude::create_message::types::BetaMessage;
use aegis_protocol::openai::create_chat_completions::response::CreateChatCompletionResponse;
use aegis_protocol::openai::create_chat_completions::types::{
    ChatCompletionFinishReason, ChatCompletionMessageToolCall, ChatCompletionResponseMessage,
    CompletionUsage,
};

pub fn transform_response(response: CreateChatCompletionResponse) -> CreateMessageResponse {
    let choice = response.choices.into_iter().next();

    let (content, stop_reason) = match choice {
        Some(choice) => (
            map_response_message(&choice.message),
            map_finish_reason(choice.finish_reason),
        ),
        None => (Vec::new(), None),
    };

    BetaMessage {
        id: response.id,
        content,
        model: ClaudeModel::Custom(response.model),
        role: BetaMessageRole::Assistant,
        stop_reason,
        stop_sequence: None,
        r#type: BetaMessageType::Message,
        usage: map_usage(response.usage),
    }
}

fn map_response_message(message: &ChatCompletionResponseMessage) -> Vec<BetaContentBlockParam> {
    let mut blocks = Vec::new();

    if let Some(content) = &message.content
        && !content.is_empty()
    {
        blocks.push(BetaContentBlockParam::Text(BetaTextBlock::new(content.clone())));
    }

    if let Some(tool_calls) = &message.tool_calls {
        for tool_call in tool_calls {
            blocks.push(BetaContentBlockParam::ToolUse(map_tool_call(tool_call)));
        }
    }

    blocks
}

fn map_tool_call(tool_call: &ChatCompletionMessageToolCall) -> BetaToolUseBlock {
    BetaToolUseBlock {
        id: tool_call.id.clone(),
        input: parse_tool_arguments(&tool_call.function.arguments),
        name: tool_call.function.name.clone(),
        r#type: BetaToolUseBlockType::ToolUse,
    }
}

/// OpenAI streams/returns tool arguments as a JSON-encoded string; a provider
/// that emits malformed JSON still produces a usable (if opaque) tool_use
/// block rather than failing the whole response.
fn parse_tool_arguments(arguments: &str) -> JsonObject {
    match serde_json::from_str::<JsonValue>(arguments) {
        Ok(JsonValue::Object(map)) => map.into_iter().collect(),
        Ok(other) => {
            let mut map = JsonObject::new();
            map.insert("arguments".to_string(), other);
            map
        }
        Err(_) => {
            let mut map = JsonObject::new();
            map.insert(
                "arguments".to_string(),
                JsonValue::String(arguments.to_string()),
            );
            map
        }
    }
}

fn map_finish_reason(reason: ChatCompletionFinishReason) -> Option<BetaStopReason> {
    Some(match reason {
        ChatCompletionFinishReason::Stop => BetaStopReason::EndTurn,
        ChatCompletionFinishReason::Length => BetaStopReason::MaxTokens,
        ChatCompletionFinishReason::ToolCalls => BetaStopReason::ToolUse,
        ChatCompletionFinishReason::ContentFilter => BetaStopReason::Refusal,
    })
}

fn map_usage(usage: Option<CompletionUsage>) -> BetaUsage {
    let usage = usage.unwrap_or(CompletionUsage {
        prompt_tokens: 0,
        completion_tokens: 0,
        total_tokens: 0,
    });
    BetaUsage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        cache_creation_input_tokens: None,
        cache_read_input_tokens: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_protocol::openai::create_chat_completions::response::{
        ChatCompletionChoice, ChatCompletionObjectType,
    };
    use aegis_protocol::openai::create_chat_completions::types::{
        ChatCompletionMessageToolCallFunction, ChatCompletionRole, ChatCompletionToolCallType,
    };

    fn response_with(message: ChatCompletionResponseMessage, finish_reason: ChatCompletionFinishReason) -> CreateChatCompletionResponse {
        CreateChatCompletionResponse {
            id: "chatcmpl-1".to_string(),
            object: ChatCompletionObjectType::ChatCompletion,
            created: 0,
            model: "gpt-4o-mini".to_string(),
            choices: vec![ChatCompletionChoice {
                index: 0,
                message,
                finish_reason,
                logprobs: None,
            }],
            usage: Some(CompletionUsage {
                prompt_tokens: 12,
                completion_tokens: 4,
                total_tokens: 16,
            }),
            service_tier: None,
            system_fingerprint: None,
        }
    }

    #[test]
    fn maps_text_response() {
        let response = response_with(
            ChatCompletionResponseMessage {
                role: ChatCompletionRole::Assistant,
                content: Some("hi there".to_string()),
                tool_calls: None,
            },
            ChatCompletionFinishReason::Stop,
        );
        let claude = transform_response(response);
        assert_eq!(claude.stop_reason, Some(BetaStopReason::EndTurn));
        assert_eq!(claude.usage.input_tokens, 12);
        assert_eq!(claude.content.len(), 1);
        match &claude.content[0] {
            BetaContentBlockParam::Text(text) => assert_eq!(text.text, "hi there"),
            _ => panic!("expected text block"),
        }
    }

    #[test]
    fn maps_tool_call_response() {
        let response = response_with(
            ChatCompletionResponseMessage {
                role: ChatCompletionRole::Assistant,
                content: None,
                tool_calls: Some(vec![ChatCompletionMessageToolCall {
                    id: "call_1".to_string(),
                    r#type: ChatCompletionToolCallType::Function,
                    function: ChatCompletionMessageToolCallFunction {
                        name: "lookup".to_string(),
                        arguments: "{\"q\":\"rust\"}".to_string(),
                    },
                }]),
            },
            ChatCompletionFinishReason::ToolCalls,
        );
        let claude = transform_response(response);
        assert_eq!(claude.stop_reason, Some(BetaStopReason::ToolUse));
        match &claude.content[0] {
            BetaContentBlockParam::ToolUse(tool) => {
                assert_eq!(tool.name, "lookup");
                assert_eq!(tool.input.get("q").and_then(JsonValue::as_str), Some("rust"));
            }
            _ => panic!("expected tool_use block"),
        }
    }
}
