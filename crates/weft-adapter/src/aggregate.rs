use weft_core::chunks::{
    AssistantMessage, ChatCompletion, CompletionChoice, FunctionCall, ToolCall,
};
use weft_core::ids::RequestId;

use crate::adapter::{escape_fragment, BlockKind, StreamAdapter, THOUGHTS_CLOSE, THOUGHTS_OPEN};

impl StreamAdapter {
    /// Synthesize one aggregate response from the fully-materialized message:
    /// text blocks concatenated as content, thinking and tool-use blocks as
    /// function-call entries. Consumes the adapter; state is never reused.
    pub fn into_completion(
        self,
        request_id: &RequestId,
        fallback_model: &str,
        created: i64,
    ) -> ChatCompletion {
        let finish_reason = self.finish_reason();
        let state = self.state;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for block in state.blocks.values() {
            match block.kind {
                BlockKind::Text => content.push_str(&block.text),
                BlockKind::Thinking => tool_calls.push(ToolCall {
                    id: block.tool_id.clone(),
                    kind: "function".into(),
                    function: FunctionCall {
                        name: "thinking".into(),
                        arguments: format!(
                            "{THOUGHTS_OPEN}{}{THOUGHTS_CLOSE}",
                            escape_fragment(&block.text)
                        ),
                    },
                }),
                BlockKind::ToolUse => tool_calls.push(ToolCall {
                    id: block.tool_id.clone(),
                    kind: "function".into(),
                    function: FunctionCall {
                        name: block.tool_name.clone(),
                        arguments: format!("{{{}}}", block.partial_json),
                    },
                }),
            }
        }

        ChatCompletion {
            id: request_id.to_string(),
            object: "chat.completion".into(),
            created,
            model: state.model.unwrap_or_else(|| fallback_model.into()),
            choices: vec![CompletionChoice {
                index: 0,
                message: AssistantMessage {
                    role: "assistant".into(),
                    content: (!content.is_empty()).then_some(content),
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                },
                finish_reason,
            }],
            usage: state.usage.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::chunks::FinishReason;
    use weft_core::events::StreamEvent;

    fn feed(adapter: &mut StreamAdapter, json: &str) {
        let event: StreamEvent = serde_json::from_str(json).unwrap();
        adapter.process(&event).unwrap();
    }

    fn request_id() -> RequestId {
        RequestId::from_raw("chatcmpl_agg")
    }

    #[test]
    fn text_blocks_concatenate_in_index_order() {
        let mut adapter = StreamAdapter::new();
        feed(&mut adapter, r#"{"type":"message_start","message":{"model":"claude-web","usage":{"input_tokens":8}}}"#);
        feed(&mut adapter, r#"{"type":"content_block_start","index":1,"content_block":{"type":"text","text":" world"}}"#);
        feed(&mut adapter, r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":"hello"}}"#);
        feed(&mut adapter, r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":4}}"#);
        feed(&mut adapter, r#"{"type":"message_stop"}"#);

        let completion = adapter.into_completion(&request_id(), "fallback", 1_700_000_000);
        assert_eq!(completion.model, "claude-web");
        assert_eq!(completion.object, "chat.completion");
        let message = &completion.choices[0].message;
        assert_eq!(message.content.as_deref(), Some("hello world"));
        assert!(message.tool_calls.is_none());
        assert_eq!(completion.choices[0].finish_reason, Some(FinishReason::Stop));
        assert_eq!(completion.usage.prompt_tokens, 8);
        assert_eq!(completion.usage.completion_tokens, 4);
        assert_eq!(completion.usage.total_tokens, 12);
    }

    #[test]
    fn thinking_and_tool_blocks_become_function_calls() {
        let mut adapter = StreamAdapter::new();
        feed(&mut adapter, r#"{"type":"message_start","message":{}}"#);
        feed(&mut adapter, r#"{"type":"content_block_start","index":0,"content_block":{"type":"thinking","thinking":""}}"#);
        feed(&mut adapter, r#"{"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"plan\nfirst"}}"#);
        feed(&mut adapter, r#"{"type":"content_block_stop","index":0}"#);
        feed(&mut adapter, r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_7","name":"search"}}"#);
        feed(&mut adapter, r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"\"q\":\"x\""}}"#);
        feed(&mut adapter, r#"{"type":"content_block_stop","index":1}"#);
        feed(&mut adapter, r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"}}"#);
        feed(&mut adapter, r#"{"type":"message_stop"}"#);

        let completion = adapter.into_completion(&request_id(), "m", 0);
        let message = &completion.choices[0].message;
        assert!(message.content.is_none());

        let calls = message.tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "thinking_0");
        assert_eq!(calls[0].function.name, "thinking");
        let thoughts: serde_json::Value =
            serde_json::from_str(&calls[0].function.arguments).unwrap();
        assert_eq!(thoughts["thoughts"], "plan\nfirst");

        assert_eq!(calls[1].id, "toolu_7");
        assert_eq!(calls[1].function.name, "search");
        let args: serde_json::Value = serde_json::from_str(&calls[1].function.arguments).unwrap();
        assert_eq!(args["q"], "x");

        // Tool use overrides the raw stop reason.
        assert_eq!(completion.choices[0].finish_reason, Some(FinishReason::ToolCalls));
    }

    #[test]
    fn fallback_model_used_when_vendor_never_reported_one() {
        let mut adapter = StreamAdapter::new();
        feed(&mut adapter, r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":"hi"}}"#);
        feed(&mut adapter, r#"{"type":"message_stop"}"#);
        let completion = adapter.into_completion(&request_id(), "requested-model", 0);
        assert_eq!(completion.model, "requested-model");
    }

    #[test]
    fn wire_shape_is_openai_compatible() {
        let mut adapter = StreamAdapter::new();
        feed(&mut adapter, r#"{"type":"message_start","message":{"model":"claude-web"}}"#);
        feed(&mut adapter, r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":"ok"}}"#);
        feed(&mut adapter, r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"}}"#);
        feed(&mut adapter, r#"{"type":"message_stop"}"#);

        let completion = adapter.into_completion(&request_id(), "m", 42);
        let json = serde_json::to_value(&completion).unwrap();
        assert_eq!(json["object"], "chat.completion");
        assert_eq!(json["created"], 42);
        assert_eq!(json["choices"][0]["message"]["role"], "assistant");
        assert_eq!(json["choices"][0]["message"]["content"], "ok");
        assert_eq!(json["choices"][0]["finish_reason"], "stop");
        assert!(json["usage"]["total_tokens"].is_number());
    }
}
