use serde::{Deserialize, Serialize};

use crate::ids::RequestId;
use crate::usage::TokenUsage;

/// One increment of the target streaming response format, before wire
/// rendering. Invariant: a tool-call's argument stream is valid JSON only
/// once all fragments including the closing one are concatenated; no prefix
/// is required to parse on its own.
#[derive(Clone, Debug, PartialEq)]
pub enum TargetChunk {
    /// Opens the assistant turn. Emitted once per message.
    RoleIntro,
    ContentDelta {
        text: String,
    },
    ToolCallStart {
        index: usize,
        id: String,
        name: String,
        arguments: String,
    },
    ToolCallDelta {
        index: usize,
        arguments: String,
    },
    Terminal {
        finish_reason: Option<FinishReason>,
        usage: TokenUsage,
    },
}

impl TargetChunk {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal { .. })
    }

    /// Render onto the wire as one `chat.completion.chunk` object.
    pub fn into_wire(self, id: &RequestId, model: &str, created: i64) -> ChatCompletionChunk {
        let (delta, finish_reason, usage) = match self {
            Self::RoleIntro => (
                ChunkDelta {
                    role: Some("assistant".into()),
                    ..Default::default()
                },
                None,
                None,
            ),
            Self::ContentDelta { text } => (
                ChunkDelta {
                    content: Some(text),
                    ..Default::default()
                },
                None,
                None,
            ),
            Self::ToolCallStart {
                index,
                id,
                name,
                arguments,
            } => (
                ChunkDelta {
                    tool_calls: Some(vec![ToolCallFragment {
                        index,
                        id: Some(id),
                        kind: Some("function".into()),
                        function: FunctionFragment {
                            name: Some(name),
                            arguments: Some(arguments),
                        },
                    }]),
                    ..Default::default()
                },
                None,
                None,
            ),
            Self::ToolCallDelta { index, arguments } => (
                ChunkDelta {
                    tool_calls: Some(vec![ToolCallFragment {
                        index,
                        id: None,
                        kind: None,
                        function: FunctionFragment {
                            name: None,
                            arguments: Some(arguments),
                        },
                    }]),
                    ..Default::default()
                },
                None,
                None,
            ),
            Self::Terminal {
                finish_reason,
                usage,
            } => (
                ChunkDelta::default(),
                finish_reason,
                Some(CompletionUsage::from(usage)),
            ),
        };

        ChatCompletionChunk {
            id: id.to_string(),
            object: "chat.completion.chunk".into(),
            created,
            model: model.into(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
}

// --- Streaming wire shapes ---

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<CompletionUsage>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    pub finish_reason: Option<FinishReason>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallFragment>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCallFragment {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub function: FunctionFragment,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FunctionFragment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

// --- Aggregate (non-streaming) wire shapes ---

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<CompletionChoice>,
    pub usage: CompletionUsage,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompletionChoice {
    pub index: u32,
    pub message: AssistantMessage,
    pub finish_reason: Option<FinishReason>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub role: String,
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletionUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl From<TokenUsage> for CompletionUsage {
    fn from(usage: TokenUsage) -> Self {
        Self {
            prompt_tokens: usage.input_tokens,
            completion_tokens: usage.output_tokens,
            total_tokens: usage.total_tokens(),
        }
    }
}
