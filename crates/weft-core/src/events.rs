use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::usage::UsagePayload;

/// Inbound frames from a browser-tab worker, decoded once at the transport
/// boundary. Unknown tags fail deserialization and surface as a
/// transport-parse error.
///
/// Ordering contract per worker:
///
/// MessageStart → (ContentBlockStart → ContentBlockDelta* → ContentBlockStop)* →
/// MessageDelta* → MessageStop
///
/// Housekeeping frames (Ping, WorkerRegister, WorkerUpdateActiveConversation,
/// TabFocus) can appear at any point. Error can appear at any point.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart {
        message: MessageStartPayload,
    },

    ContentBlockStart {
        index: usize,
        content_block: ContentBlock,
    },

    ContentBlockDelta {
        index: usize,
        delta: BlockDelta,
    },

    ContentBlockStop {
        index: usize,
    },

    MessageDelta {
        #[serde(default)]
        delta: MessageDeltaPayload,
        #[serde(default)]
        usage: Option<UsagePayload>,
    },

    MessageStop,

    Ping,

    Error {
        error: ErrorPayload,
    },

    WorkerRegister {
        #[serde(rename = "clientId")]
        client_id: String,
        #[serde(rename = "tabId")]
        tab_id: String,
        #[serde(rename = "isWorker", default)]
        is_worker: bool,
        #[serde(default)]
        pathname: Option<String>,
    },

    WorkerUpdateActiveConversation {
        #[serde(rename = "clientId")]
        client_id: String,
        #[serde(rename = "tabId")]
        tab_id: String,
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },

    TabFocus {
        active: bool,
    },
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MessageStartPayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub usage: Option<UsagePayload>,
}

/// One content block as announced by `content_block_start`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
}

/// Per-block increments carried by `content_block_delta`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockDelta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    ThinkingSummaryDelta { summary: String },
    InputJsonDelta { partial_json: String },
    SignatureDelta { signature: String },
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MessageDeltaPayload {
    #[serde(default)]
    pub stop_reason: Option<VendorStopReason>,
}

/// Stop reasons as the vendor reports them.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VendorStopReason {
    EndTurn,
    StopSequence,
    MaxTokens,
    ToolUse,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

impl StreamEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MessageStart { .. } => "message_start",
            Self::ContentBlockStart { .. } => "content_block_start",
            Self::ContentBlockDelta { .. } => "content_block_delta",
            Self::ContentBlockStop { .. } => "content_block_stop",
            Self::MessageDelta { .. } => "message_delta",
            Self::MessageStop => "message_stop",
            Self::Ping => "ping",
            Self::Error { .. } => "error",
            Self::WorkerRegister { .. } => "worker_register",
            Self::WorkerUpdateActiveConversation { .. } => "worker_update_active_conversation",
            Self::TabFocus { .. } => "tab_focus",
        }
    }

    /// True for frames that mutate worker/session state rather than a message.
    pub fn is_housekeeping(&self) -> bool {
        matches!(
            self,
            Self::Ping
                | Self::WorkerRegister { .. }
                | Self::WorkerUpdateActiveConversation { .. }
                | Self::TabFocus { .. }
        )
    }
}

/// Outbound frames sent to a browser-tab worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerFrame {
    NewChatRequest { data: NewChatData },
    Ping,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewChatData {
    pub chat_messages: Vec<ChatMessageText>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessageText {
    pub text: String,
}

impl WorkerFrame {
    /// Build the frame instructing a tab to submit one synthesized prompt.
    pub fn new_chat(prompt: impl Into<String>) -> Self {
        Self::NewChatRequest {
            data: NewChatData {
                chat_messages: vec![ChatMessageText { text: prompt.into() }],
            },
        }
    }
}
