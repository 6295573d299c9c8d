//! Claude `POST /v1/messages` request -> OpenAI `POST /v1/chat/completions` request.

use aegis_protocol::claude::count_tokens::types::{
    BetaContentBlockParam as ClaudeContentBlockParam, BetaMessageContent as ClaudeMessageContent,
    BetaMessageParam as ClaudeMessageParam, BetaMessageRole as ClaudeMessageRole,
    BetaSystemParam as ClaudeSystemParam, BetaTool as ClaudeTool, BetaToolChoice as ClaudeToolChoice,
    BetaToolResultContent as ClaudeToolResultContent,
};
use aegis_protocol::claude::create_message::request::CreateMessageRequest as ClaudeCreateMessageRequest;
use aegis_protocol::openai::create_chat_completions::request::{
    CreateChatCompletionRequest as OpenAIRequest, CreateChatCompletionRequestBody as OpenAIRequestBody,
};
use aegis_protocol::openai::create_chat_completions::types::{
    ChatCompletionContent, ChatCompletionMessageToolCall, ChatCompletionMessageToolCallFunction,
    ChatCompletionNamedToolChoice, ChatCompletionNamedToolChoiceFunction,
    ChatCompletionRequestMessage, ChatCompletionRole, ChatCompletionStop, ChatCompletionTool,
    ChatCompletionToolCallType, ChatCompletionToolChoiceKind, ChatCompletionToolChoiceOption,
    ChatCompletionToolType, FunctionObject,
};

use crate::bridge::schema::adjust_tool_schema;

/// Converts a Claude create-message request into an OpenAI chat-completions
/// request. Image/document blocks, extended thinking, structured output and
/// MCP/server tools have no Chat Completions equivalent and are not in
/// scope; a block of one of those kinds falls back to a JSON-text
/// placeholder so the turn is not silently dropped.
pub fn transform_request(request: &ClaudeCreateMessageRequest) -> OpenAIRequest {
    let mut messages = Vec::new();
    if let Some(system) = map_system_message(request.body.system.as_ref()) {
        messages.push(system);
    }
    for message in &request.body.messages {
        messages.extend(map_message(message));
    }

    let tools = map_tools(request.body.tools.as_ref());
    let tool_choice = request
        .body
        .tool_choice
        .as_ref()
        .map(map_tool_choice);

    OpenAIRequest {
        body: OpenAIRequestBody {
            messages,
            model: request.body.model.as_str().into_owned(),
            max_tokens: Some(request.body.max_tokens),
            temperature: request.body.temperature,
            top_p: request.body.top_p,
            stream: request.body.stream,
            stream_options: None,
            stop: map_stop_sequences(request.body.stop_sequences.as_ref()),
            tools,
            tool_choice,
        },
    }
}

fn map_system_message(system: Option<&ClaudeSystemParam>) -> Option<ChatCompletionRequestMessage> {
    let text = match system {
        Some(ClaudeSystemParam::Text(text)) => text.clone(),
        Some(ClaudeSystemParam::Blocks(blocks)) => blocks
            .iter()
            .map(|block| block.text.clone())
            .collect::<Vec<_>>()
            .join("\n"),
        None => return None,
    };
    if text.is_empty() {
        return None;
    }
    Some(ChatCompletionRequestMessage {
        role: ChatCompletionRole::System,
        content: Some(ChatCompletionContent::Text(text)),
        name: None,
        tool_calls: None,
        tool_call_id: None,
    })
}

fn map_message(message: &ClaudeMessageParam) -> Vec<ChatCompletionRequestMessage> {
    match message.role {
        ClaudeMessageRole::User => map_user_message(&message.content),
        ClaudeMessageRole::Assistant => vec![map_assistant_message(&message.content)],
    }
}

fn map_user_message(content: &ClaudeMessageContent) -> Vec<ChatCompletionRequestMessage> {
    let mut output = Vec::new();
    let mut text_parts: Vec<String> = Vec::new();

    match content {
        ClaudeMessageContent::Text(text) => text_parts.push(text.clone()),
        ClaudeMessageContent::Blocks(blocks) => {
            for block in blocks {
                match block {
                    ClaudeContentBlockParam::ToolResult(result) => {
                        flush_user_text(&mut output, &mut text_parts);
                        if let Some(message) = map_tool_result_message(
                            &result.tool_use_id,
                            result.content.as_ref(),
                        ) {
                            output.push(message);
                        }
                    }
                    ClaudeContentBlockParam::Text(text) => text_parts.push(text.text.clone()),
                    ClaudeContentBlockParam::ToolUse(_) => {
                        // A tool_use block inside a user turn has no Chat
                        // Completions analogue; it only ever appears on the
                        // assistant side in well-formed conversations.
                    }
                }
            }
        }
    }

    flush_user_text(&mut output, &mut text_parts);
    output
}

fn flush_user_text(output: &mut Vec<ChatCompletionRequestMessage>, parts: &mut Vec<String>) {
    if parts.is_empty() {
        return;
    }
    let text = parts.join("\n");
    parts.clear();
    if text.is_empty() {
        return;
    }
    output.push(ChatCompletionRequestMessage {
        role: ChatCompletionRole::User,
        content: Some(ChatCompletionContent::Text(text)),
        name: None,
        tool_calls: None,
        tool_call_id: None,
    });
}

fn map_assistant_message(content: &ClaudeMessageContent) -> ChatCompletionRequestMessage {
    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();

    match content {
        ClaudeMessageContent::Text(text) => text_parts.push(text.clone()),
        ClaudeMessageContent::Blocks(blocks) => {
            for block in blocks {
                match block {
                    ClaudeContentBlockParam::Text(text) => text_parts.push(text.text.clone()),
                    ClaudeContentBlockParam::ToolUse(tool) => {
                        let arguments =
                            serde_json::to_string(&tool.input).unwrap_or_else(|_| "{}".into());
                        tool_calls.push(ChatCompletionMessageToolCall {
                            id: tool.id.clone(),
                            r#type: ChatCompletionToolCallType::Function,
                            function: ChatCompletionMessageToolCallFunction {
                                name: tool.name.clone(),
                                arguments,
                            },
                        });
                    }
                    ClaudeContentBlockParam::ToolResult(_) => {
                        // Tool results only ever occur on the user side.
                    }
                }
            }
        }
    }

    let text = text_parts.join("\n");
    ChatCompletionRequestMessage {
        role: ChatCompletionRole::Assistant,
        content: if text.is_empty() { None } else { Some(ChatCompletionContent::Text(text)) },
        name: None,
        tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
        tool_call_id: None,
    }
}

fn map_tool_result_message(
    tool_use_id: &str,
    content: Option<&ClaudeToolResultContent>,
) -> Option<ChatCompletionRequestMessage> {
    let text = match content {
        Some(ClaudeToolResultContent::Text(text)) => text.clone(),
        Some(ClaudeToolResultContent::Blocks(blocks)) => blocks
            .iter()
            .map(|block| block.text.clone())
            .collect::<Vec<_>>()
            .join("\n"),
        None => String::new(),
    };
    if text.is_empty() {
        return None;
    }
    Some(ChatCompletionRequestMessage {
        role: ChatCompletionRole::Tool,
        content: Some(ChatCompletionContent::Text(text)),
        name: None,
        tool_calls: None,
        tool_call_id: Some(tool_use_id.to_string()),
    })
}

fn map_tools(tools: Option<&Vec<ClaudeTool>>) -> Option<Vec<ChatCompletionTool>> {
    let tools = tools?;
    if tools.is_empty() {
        return None;
    }
    Some(
        tools
            .iter()
            .map(|tool| ChatCompletionTool {
                r#type: ChatCompletionToolType::Function,
                function: FunctionObject {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: Some(build_parameters_schema(&tool.input_schema)),
                },
            })
            .collect(),
    )
}

fn build_parameters_schema(
    input_schema: &aegis_protocol::claude::count_tokens::types::BetaToolInputSchema,
) -> aegis_protocol::claude::count_tokens::types::JsonObject {
    let mut schema = aegis_protocol::claude::count_tokens::types::JsonObject::new();
    schema.insert("type".to_string(), serde_json::json!("object"));
    if let Some(properties) = &input_schema.properties {
        schema.insert(
            "properties".to_string(),
            serde_json::to_value(properties).unwrap_or_default(),
        );
    }
    if let Some(required) = &input_schema.required {
        schema.insert(
            "required".to_string(),
            serde_json::to_value(required).unwrap_or_default(),
        );
    }
    if let Some(additional_properties) = input_schema.additional_properties {
        schema.insert(
            "additionalProperties".to_string(),
            serde_json::json!(additional_properties),
        );
    }
    adjust_tool_schema(&schema)
}

fn map_tool_choice(choice: &ClaudeToolChoice) -> ChatCompletionToolChoiceOption {
    match choice {
        ClaudeToolChoice::Auto { .. } => {
            ChatCompletionToolChoiceOption::Kind(ChatCompletionToolChoiceKind::Auto)
        }
        ClaudeToolChoice::Any { .. } => {
            ChatCompletionToolChoiceOption::Kind(ChatCompletionToolChoiceKind::Required)
        }
        ClaudeToolChoice::None => {
            ChatCompletionToolChoiceOption::Kind(ChatCompletionToolChoiceKind::None)
        }
        ClaudeToolChoice::Tool { name, .. } => {
            ChatCompletionToolChoiceOption::Named(ChatCompletionNamedToolChoice {
                r#type: ChatCompletionToolType::Function,
                function: ChatCompletionNamedToolChoiceFunction { name: name.clone() },
            })
        }
    }
}

fn map_stop_sequences(stop_sequences: Option<&Vec<String>>) -> Option<ChatCompletionStop> {
    let sequences = stop_sequences?;
    match sequences.len() {
        0 => None,
        1 => Some(ChatCompletionStop::One(sequences[0].clone())),
        _ => Some(ChatCompletionStop::Many(sequences.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_protocol::claude::count_tokens::types::{
        BetaToolInputSchema, BetaToolInputSchemaType, JsonObject, Model,
    };
    use aegis_protocol::claude::create_message::request::CreateMessageRequestBody;
    use aegis_protocol::claude::types::AnthropicHeaders;

    fn base_request(messages: Vec<ClaudeMessageParam>) -> ClaudeCreateMessageRequest {
        ClaudeCreateMessageRequest {
            headers: AnthropicHeaders::default(),
            body: CreateMessageRequestBody {
                max_tokens: 256,
                messages,
                model: Model::Custom("claude-sonnet-4-5-20250929".to_string()),
                container: None,
                context_management: None,
                mcp_servers: None,
                metadata: None,
                output_config: None,
                output_format: None,
                service_tier: None,
                stop_sequences: None,
                stream: Some(false),
                system: None,
                temperature: None,
                thinking: None,
                tool_choice: None,
                tools: None,
                top_k: None,
                top_p: None,
            },
        }
    }

    #[test]
    fn maps_system_and_user_text() {
        let mut request = base_request(vec![ClaudeMessageParam {
            role: ClaudeMessageRole::User,
            content: ClaudeMessageContent::Text("hello".to_string()),
        }]);
        request.body.system = Some(ClaudeSystemParam::Text("be terse".to_string()));

        let openai = transform_request(&request);
        assert_eq!(openai.body.messages.len(), 2);
        assert_eq!(openai.body.messages[0].role, ChatCompletionRole::System);
        assert_eq!(openai.body.messages[1].role, ChatCompletionRole::User);
    }

    #[test]
    fn tool_result_becomes_tool_message() {
        let request = base_request(vec![ClaudeMessageParam {
            role: ClaudeMessageRole::User,
            content: ClaudeMessageContent::Blocks(vec![ClaudeContentBlockParam::ToolResult(
                aegis_protocol::claude::count_tokens::types::BetaToolResultBlockParam {
                    tool_use_id: "call_1".to_string(),
                    r#type: aegis_protocol::claude::count_tokens::types::BetaToolResultBlockType::ToolResult,
                    content: Some(ClaudeToolResultContent::Text("42".to_string())),
                    is_error: None,
                },
            )]),
        }]);

        let openai = transform_request(&request);
        assert_eq!(openai.body.messages.len(), 1);
        assert_eq!(openai.body.messages[0].role, ChatCompletionRole::Tool);
        assert_eq!(openai.body.messages[0].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn adjusts_tool_schema() {
        let mut properties = JsonObject::new();
        properties.insert(
            "site".to_string(),
            serde_json::json!({"type": "string", "format": "uri"}),
        );
        let tool = ClaudeTool {
            name: "lookup".to_string(),
            description: None,
            input_schema: BetaToolInputSchema {
                r#type: BetaToolInputSchemaType::Object,
                properties: Some(properties),
                required: None,
                additional_properties: None,
            },
        };
        let mut request = base_request(Vec::new());
        request.body.tools = Some(vec![tool]);

        let openai = transform_request(&request);
        let tools = openai.body.tools.unwrap();
        let params = tools[0].function.parameters.as_ref().unwrap();
        let props = params.get("properties").unwrap().as_object().unwrap();
        assert!(props["site"].get("format").is_none());
    }
}
