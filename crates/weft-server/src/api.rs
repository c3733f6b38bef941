use serde::Deserialize;
use serde_json::Value;

use weft_core::errors::GatewayError;

/// `POST /v1/chat/completions` request body.
#[derive(Clone, Debug, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ApiMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub response_format: Option<ResponseFormat>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ApiMessage {
    pub role: String,
    pub content: MessageContent,
}

/// OpenAI message content: either a bare string or typed parts.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Clone, Debug, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub schema: Option<Value>,
}

impl MessageContent {
    pub fn flatten(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter(|p| p.kind == "text")
                .map(|p| p.text.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Decode and validate a completion request body.
pub fn parse_request(body: &Value) -> Result<ChatCompletionRequest, GatewayError> {
    let request: ChatCompletionRequest = serde_json::from_value(body.clone())
        .map_err(|err| GatewayError::InvalidRequest(err.to_string()))?;
    if request.model.is_empty() {
        return Err(GatewayError::InvalidRequest("model must not be empty".into()));
    }
    if request.messages.is_empty() {
        return Err(GatewayError::InvalidRequest("messages must not be empty".into()));
    }
    Ok(request)
}

/// Render the conversation to the single prompt text submitted into the
/// vendor chat UI. `response_format: json_object` prepends one system
/// instruction demanding fenced JSON matching the supplied schema.
pub fn render_prompt(request: &ChatCompletionRequest) -> String {
    let mut sections = Vec::with_capacity(request.messages.len() + 1);

    if let Some(format) = &request.response_format {
        if format.kind == "json_object" {
            sections.push(format!("System: {}", json_instruction(format.schema.as_ref())));
        }
    }

    for message in &request.messages {
        sections.push(format!(
            "{}: {}",
            role_label(&message.role),
            message.content.flatten()
        ));
    }

    sections.join("\n\n")
}

fn role_label(role: &str) -> &'static str {
    match role {
        "system" | "developer" => "System",
        "assistant" => "Assistant",
        "tool" => "Tool",
        _ => "User",
    }
}

fn json_instruction(schema: Option<&Value>) -> String {
    match schema {
        Some(schema) => format!(
            "Respond with exactly one fenced ```json code block containing a single \
             JSON object that matches this schema, and nothing else:\n{}",
            serde_json::to_string(schema).unwrap_or_default()
        ),
        None => "Respond with exactly one fenced ```json code block containing a single \
                 JSON object, and nothing else."
            .into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_minimal_request() {
        let body = json!({
            "model": "claude-web",
            "messages": [{"role": "user", "content": "hello"}]
        });
        let request = parse_request(&body).unwrap();
        assert_eq!(request.model, "claude-web");
        assert!(!request.stream);
        assert!(request.response_format.is_none());
        assert_eq!(request.messages[0].content.flatten(), "hello");
    }

    #[test]
    fn parse_rejects_garbage_and_empty_messages() {
        assert!(matches!(
            parse_request(&json!({"model": "m"})),
            Err(GatewayError::InvalidRequest(_))
        ));
        assert!(matches!(
            parse_request(&json!({"model": "m", "messages": []})),
            Err(GatewayError::InvalidRequest(_))
        ));
        assert!(matches!(
            parse_request(&json!({"model": "", "messages": [{"role":"user","content":"x"}]})),
            Err(GatewayError::InvalidRequest(_))
        ));
        assert!(matches!(
            parse_request(&json!("not an object")),
            Err(GatewayError::InvalidRequest(_))
        ));
    }

    #[test]
    fn content_parts_flatten_text_only() {
        let body = json!({
            "model": "m",
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": "first"},
                    {"type": "image_url", "image_url": {"url": "http://x"}},
                    {"type": "text", "text": "second"}
                ]
            }]
        });
        let request = parse_request(&body).unwrap();
        assert_eq!(request.messages[0].content.flatten(), "first\nsecond");
    }

    #[test]
    fn render_prompt_labels_roles_in_order() {
        let body = json!({
            "model": "m",
            "messages": [
                {"role": "system", "content": "be terse"},
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"},
                {"role": "user", "content": "bye"}
            ]
        });
        let request = parse_request(&body).unwrap();
        let prompt = render_prompt(&request);
        assert_eq!(
            prompt,
            "System: be terse\n\nUser: hi\n\nAssistant: hello\n\nUser: bye"
        );
    }

    #[test]
    fn json_object_format_prepends_one_instruction() {
        let body = json!({
            "model": "m",
            "messages": [{"role": "user", "content": "list three colors"}],
            "response_format": {"type": "json_object", "schema": {"type": "object", "properties": {"colors": {"type": "array"}}}}
        });
        let request = parse_request(&body).unwrap();
        let prompt = render_prompt(&request);
        assert!(prompt.starts_with("System: Respond with exactly one fenced ```json"));
        assert!(prompt.contains("\"colors\""));
        assert_eq!(prompt.matches("```json").count(), 1);
        assert!(prompt.ends_with("User: list three colors"));
    }

    #[test]
    fn non_json_response_format_is_ignored() {
        let body = json!({
            "model": "m",
            "messages": [{"role": "user", "content": "hi"}],
            "response_format": {"type": "text"}
        });
        let request = parse_request(&body).unwrap();
        assert_eq!(render_prompt(&request), "User: hi");
    }

    #[test]
    fn unknown_roles_render_as_user() {
        let body = json!({
            "model": "m",
            "messages": [{"role": "critic", "content": "hm"}]
        });
        let request = parse_request(&body).unwrap();
        assert_eq!(render_prompt(&request), "User: hm");
    }
}
