use std::collections::BTreeMap;

use weft_core::chunks::{FinishReason, TargetChunk};
use weft_core::errors::GatewayError;
use weft_core::events::{BlockDelta, ContentBlock, StreamEvent, VendorStopReason};
use weft_core::ids::ToolCallId;
use weft_core::usage::TokenUsage;

/// Opening argument fragment for a thinking tool call. The closing fragment
/// completes it into `{"thoughts":"<escaped text>"}`.
pub(crate) const THOUGHTS_OPEN: &str = "{\"thoughts\":\"";
pub(crate) const THOUGHTS_CLOSE: &str = "\"}";

/// State machine translating vendor stream events into target chunks.
/// One instance per in-flight completion request; never reused after a
/// fault, never shared across requests.
pub struct StreamAdapter {
    pub(crate) state: MessageState,
}

/// Accumulated per-message state, created on `message_start` and discarded
/// with the owning request.
#[derive(Default)]
pub struct MessageState {
    pub id: Option<String>,
    pub model: Option<String>,
    pub stop_reason: Option<VendorStopReason>,
    pub usage: TokenUsage,
    pub(crate) blocks: BTreeMap<usize, Block>,
    started: bool,
    finished: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BlockKind {
    Text,
    Thinking,
    ToolUse,
}

/// One content block, keyed by its message-local index.
pub(crate) struct Block {
    pub(crate) kind: BlockKind,
    pub(crate) closed: bool,
    /// Accumulated text or thinking, raw (unescaped).
    pub(crate) text: String,
    /// Raw partial-JSON fragments for tool-use; diagnostic only, never
    /// parsed mid-stream.
    pub(crate) partial_json: String,
    pub(crate) tool_id: String,
    pub(crate) tool_name: String,
}

impl Block {
    fn new(kind: BlockKind) -> Self {
        Self {
            kind,
            closed: false,
            text: String::new(),
            partial_json: String::new(),
            tool_id: String::new(),
            tool_name: String::new(),
        }
    }
}

impl Default for StreamAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAdapter {
    pub fn new() -> Self {
        Self {
            state: MessageState::default(),
        }
    }

    pub fn state(&self) -> &MessageState {
        &self.state
    }

    /// Translate one vendor event. Every event yields at most one chunk,
    /// except `message_stop`, which flushes synthetic closes for still-open
    /// blocks before the single terminal chunk. Chunks are never merged or
    /// reordered. An `error` event is raised as a fault, not translated;
    /// the instance must not be used again after `Err`.
    pub fn process(&mut self, event: &StreamEvent) -> Result<Vec<TargetChunk>, GatewayError> {
        match event {
            StreamEvent::MessageStart { message } => {
                if let Some(usage) = &message.usage {
                    self.state.usage.absorb(usage);
                }
                if self.state.started {
                    tracing::debug!("duplicate message_start dropped");
                    return Ok(Vec::new());
                }
                self.state.started = true;
                self.state.id.clone_from(&message.id);
                self.state.model.clone_from(&message.model);
                Ok(vec![TargetChunk::RoleIntro])
            }

            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => Ok(self.open_block(*index, content_block).into_iter().collect()),

            StreamEvent::ContentBlockDelta { index, delta } => {
                Ok(self.apply_delta(*index, delta).into_iter().collect())
            }

            StreamEvent::ContentBlockStop { index } => {
                Ok(self.close_block(*index).into_iter().collect())
            }

            StreamEvent::MessageDelta { delta, usage } => {
                if let Some(reason) = delta.stop_reason {
                    self.state.stop_reason = Some(reason);
                }
                if let Some(usage) = usage {
                    self.state.usage.absorb(usage);
                }
                Ok(Vec::new())
            }

            StreamEvent::MessageStop => Ok(self.finish()),

            StreamEvent::Error { error } => Err(GatewayError::VendorError {
                kind: error.kind.clone(),
                message: error.message.clone(),
            }),

            housekeeping => {
                tracing::debug!(
                    event = housekeeping.event_type(),
                    "housekeeping frame reached adapter"
                );
                Ok(Vec::new())
            }
        }
    }

    fn open_block(&mut self, index: usize, content_block: &ContentBlock) -> Option<TargetChunk> {
        if self.state.blocks.get(&index).is_some_and(|b| b.closed) {
            tracing::debug!(index, "content_block_start for closed index dropped");
            return None;
        }

        match content_block {
            ContentBlock::Text { text } => {
                let mut block = Block::new(BlockKind::Text);
                block.text.clone_from(text);
                self.state.blocks.insert(index, block);
                (!text.is_empty()).then(|| TargetChunk::ContentDelta { text: text.clone() })
            }

            ContentBlock::Thinking { thinking } => {
                let id = format!("thinking_{index}");
                let mut block = Block::new(BlockKind::Thinking);
                block.text.clone_from(thinking);
                block.tool_id.clone_from(&id);
                block.tool_name.push_str("thinking");
                self.state.blocks.insert(index, block);

                let mut arguments = String::from(THOUGHTS_OPEN);
                arguments.push_str(&escape_fragment(thinking));
                Some(TargetChunk::ToolCallStart {
                    index,
                    id,
                    name: "thinking".into(),
                    arguments,
                })
            }

            ContentBlock::ToolUse { id, name, input } => {
                // Structured input at start time is not emitted; the
                // input_json_delta stream is authoritative.
                if input.as_object().is_some_and(|o| !o.is_empty()) {
                    tracing::debug!(index, tool = %name, "tool input at block start ignored");
                }
                let tool_id = if id.is_empty() {
                    ToolCallId::new().to_string()
                } else {
                    id.clone()
                };
                let mut block = Block::new(BlockKind::ToolUse);
                block.tool_id.clone_from(&tool_id);
                block.tool_name.clone_from(name);
                self.state.blocks.insert(index, block);

                Some(TargetChunk::ToolCallStart {
                    index,
                    id: tool_id,
                    name: name.clone(),
                    arguments: "{".into(),
                })
            }
        }
    }

    fn apply_delta(&mut self, index: usize, delta: &BlockDelta) -> Option<TargetChunk> {
        let Some(block) = self.state.blocks.get_mut(&index) else {
            return self.materialize(index, delta);
        };
        if block.closed {
            tracing::debug!(index, "delta for closed block dropped");
            return None;
        }

        match (block.kind, delta) {
            (BlockKind::Text, BlockDelta::TextDelta { text }) => {
                block.text.push_str(text);
                Some(TargetChunk::ContentDelta { text: text.clone() })
            }
            (BlockKind::Thinking, BlockDelta::ThinkingDelta { thinking }) => {
                block.text.push_str(thinking);
                Some(TargetChunk::ToolCallDelta {
                    index,
                    arguments: escape_fragment(thinking),
                })
            }
            (BlockKind::Thinking, BlockDelta::ThinkingSummaryDelta { summary }) => {
                let wrapped = format!("\n[SUMMARY: {summary}]");
                block.text.push_str(&wrapped);
                Some(TargetChunk::ToolCallDelta {
                    index,
                    arguments: escape_fragment(&wrapped),
                })
            }
            (BlockKind::ToolUse, BlockDelta::InputJsonDelta { partial_json }) => {
                block.partial_json.push_str(partial_json);
                Some(TargetChunk::ToolCallDelta {
                    index,
                    arguments: partial_json.clone(),
                })
            }
            (_, BlockDelta::SignatureDelta { .. }) => None,
            (kind, delta) => {
                tracing::debug!(index, ?kind, delta = ?delta, "mismatched delta dropped");
                None
            }
        }
    }

    /// A delta naming an unknown index materializes the block instead of
    /// failing. The start chunk carries the opening fragment together with
    /// the first payload so fragment concatenation still parses.
    fn materialize(&mut self, index: usize, delta: &BlockDelta) -> Option<TargetChunk> {
        tracing::debug!(index, "materializing block for out-of-order delta");
        match delta {
            BlockDelta::TextDelta { text } => {
                let mut block = Block::new(BlockKind::Text);
                block.text.clone_from(text);
                self.state.blocks.insert(index, block);
                Some(TargetChunk::ContentDelta { text: text.clone() })
            }
            BlockDelta::ThinkingDelta { thinking } => {
                self.materialize_thinking(index, thinking)
            }
            BlockDelta::ThinkingSummaryDelta { summary } => {
                let wrapped = format!("\n[SUMMARY: {summary}]");
                self.materialize_thinking(index, &wrapped)
            }
            BlockDelta::InputJsonDelta { partial_json } => {
                let tool_id = ToolCallId::new().to_string();
                let mut block = Block::new(BlockKind::ToolUse);
                block.tool_id.clone_from(&tool_id);
                block.partial_json.clone_from(partial_json);
                self.state.blocks.insert(index, block);
                Some(TargetChunk::ToolCallStart {
                    index,
                    id: tool_id,
                    name: String::new(),
                    arguments: format!("{{{partial_json}"),
                })
            }
            BlockDelta::SignatureDelta { .. } => None,
        }
    }

    fn materialize_thinking(&mut self, index: usize, text: &str) -> Option<TargetChunk> {
        let id = format!("thinking_{index}");
        let mut block = Block::new(BlockKind::Thinking);
        block.text.push_str(text);
        block.tool_id.clone_from(&id);
        block.tool_name.push_str("thinking");
        self.state.blocks.insert(index, block);

        let mut arguments = String::from(THOUGHTS_OPEN);
        arguments.push_str(&escape_fragment(text));
        Some(TargetChunk::ToolCallStart {
            index,
            id,
            name: "thinking".into(),
            arguments,
        })
    }

    fn close_block(&mut self, index: usize) -> Option<TargetChunk> {
        let Some(block) = self.state.blocks.get_mut(&index) else {
            tracing::debug!(index, "content_block_stop for unknown index dropped");
            return None;
        };
        if block.closed {
            return None;
        }
        block.closed = true;
        match block.kind {
            BlockKind::Text => None,
            BlockKind::Thinking => Some(TargetChunk::ToolCallDelta {
                index,
                arguments: THOUGHTS_CLOSE.into(),
            }),
            BlockKind::ToolUse => Some(TargetChunk::ToolCallDelta {
                index,
                arguments: "}".into(),
            }),
        }
    }

    fn finish(&mut self) -> Vec<TargetChunk> {
        if self.state.finished {
            tracing::debug!("duplicate message_stop dropped");
            return Vec::new();
        }
        self.state.finished = true;

        let open: Vec<usize> = self
            .state
            .blocks
            .iter()
            .filter(|(_, b)| !b.closed)
            .map(|(i, _)| *i)
            .collect();

        let mut chunks = Vec::new();
        for index in open {
            chunks.extend(self.close_block(index));
        }
        chunks.push(TargetChunk::Terminal {
            finish_reason: self.finish_reason(),
            usage: self.state.usage,
        });
        chunks
    }

    /// Map the vendor stop reason. Any tool-use block overrides all else.
    pub fn finish_reason(&self) -> Option<FinishReason> {
        if self
            .state
            .blocks
            .values()
            .any(|b| b.kind == BlockKind::ToolUse)
        {
            return Some(FinishReason::ToolCalls);
        }
        match self.state.stop_reason {
            Some(VendorStopReason::EndTurn) | Some(VendorStopReason::StopSequence) => {
                Some(FinishReason::Stop)
            }
            Some(VendorStopReason::MaxTokens) => Some(FinishReason::Length),
            Some(VendorStopReason::ToolUse) => Some(FinishReason::ToolCalls),
            None => None,
        }
    }
}

/// Escape a text fragment for embedding inside a JSON string literal,
/// without surrounding quotes.
pub fn escape_fragment(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out
}
