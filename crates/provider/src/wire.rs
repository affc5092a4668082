//! Chat-completions request and stream-frame shapes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use types::{
    Context, FunctionDecl, Message, MessageRole, ProviderError, ProviderId, StreamItem, ToolCall,
    ToolCallDelta,
};

const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolSlot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    stream: bool,
}

impl ChatRequest {
    pub(crate) fn streaming(context: &Context) -> Result<Self, ProviderError> {
        let mut messages = Vec::with_capacity(context.messages.len());
        for message in &context.messages {
            messages.push(ChatMessage::encode(message)?);
        }
        let tools: Vec<ToolSlot> = context.tools.iter().map(ToolSlot::function).collect();
        Ok(Self {
            model: context.model.0.clone(),
            tool_choice: if tools.is_empty() { None } else { Some("auto") },
            messages,
            tools,
            stream: true,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    // Assistant tool-call turns carry an explicit `null`.
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<CallSlot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ChatMessage {
    fn encode(message: &Message) -> Result<Self, ProviderError> {
        let mut tool_calls = Vec::with_capacity(message.tool_calls.len());
        for call in &message.tool_calls {
            tool_calls.push(CallSlot::encode(call)?);
        }
        Ok(Self {
            role: wire_role(&message.role),
            content: message.content.clone(),
            tool_calls,
            tool_call_id: message.tool_call_id.clone(),
        })
    }
}

fn wire_role(role: &MessageRole) -> &'static str {
    match role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::Tool => "tool",
    }
}

#[derive(Debug, Serialize)]
struct CallSlot {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    function: CalledFunction,
}

impl CallSlot {
    fn encode(call: &ToolCall) -> Result<Self, ProviderError> {
        // Arguments travel as a JSON-encoded string, not an object.
        let arguments = serde_json::to_string(&call.arguments)?;
        Ok(Self {
            id: call.id.clone(),
            kind: "function",
            function: CalledFunction {
                name: call.name.clone(),
                arguments,
            },
        })
    }
}

#[derive(Debug, Serialize)]
struct CalledFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ToolSlot {
    #[serde(rename = "type")]
    kind: &'static str,
    function: FunctionDecl,
}

impl ToolSlot {
    fn function(decl: &FunctionDecl) -> Self {
        Self {
            kind: "function",
            function: decl.clone(),
        }
    }
}

/// One decoded `data:` payload.
#[derive(Debug)]
pub(crate) enum Frame {
    Delta(DeltaFrame),
    Done,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct DeltaFrame {
    #[serde(default)]
    choices: Vec<FrameChoice>,
}

#[derive(Debug, Deserialize)]
struct FrameChoice {
    #[serde(default)]
    delta: ChoiceDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChoiceDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<CallFragment>,
}

#[derive(Debug, Deserialize)]
struct CallFragment {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionFragment>,
}

#[derive(Debug, Default, Deserialize)]
struct FunctionFragment {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

impl FunctionFragment {
    fn is_blank(&self) -> bool {
        self.name.is_none() && self.arguments.is_none()
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorEnvelope {
    pub(crate) error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorDetail {
    pub(crate) message: String,
}

/// Blank payloads decode to an empty frame; `[DONE]` ends the stream.
pub(crate) fn decode_frame(payload: &str, provider: &ProviderId) -> Result<Frame, ProviderError> {
    match payload.trim() {
        "" => Ok(Frame::Delta(DeltaFrame::default())),
        DONE_SENTINEL => Ok(Frame::Done),
        body => serde_json::from_str(body)
            .map(Frame::Delta)
            .map_err(|error| ProviderError::ResponseParse {
                provider: provider.clone(),
                message: format!("failed to parse streaming payload: {error}"),
            }),
    }
}

/// Remembers the first id and name seen per tool-call index so every
/// emitted delta names its call. Argument fragments are forwarded as-is.
#[derive(Debug, Default)]
pub(crate) struct FragmentTracker {
    calls: HashMap<usize, KnownCall>,
}

#[derive(Debug, Default)]
struct KnownCall {
    id: Option<String>,
    name: Option<String>,
}

impl FragmentTracker {
    /// Flattens a frame into stream items: text, then tool-call deltas, then
    /// the finish reason, per choice.
    pub(crate) fn items(&mut self, frame: DeltaFrame) -> Vec<StreamItem> {
        let mut items = Vec::new();
        for FrameChoice {
            delta,
            finish_reason,
        } in frame.choices
        {
            if let Some(text) = delta.content.filter(|text| !text.is_empty()) {
                items.push(StreamItem::Text(text));
            }
            items.extend(
                delta
                    .tool_calls
                    .into_iter()
                    .filter_map(|fragment| self.track(fragment))
                    .map(StreamItem::ToolCallDelta),
            );
            if let Some(reason) = finish_reason.filter(|reason| !reason.is_empty()) {
                items.push(StreamItem::FinishReason(reason));
            }
        }
        items
    }

    fn track(&mut self, fragment: CallFragment) -> Option<ToolCallDelta> {
        let function = fragment.function.unwrap_or_default();
        if fragment.id.is_none() && function.is_blank() {
            return None;
        }
        let known = self.calls.entry(fragment.index).or_default();
        if let Some(id) = fragment.id {
            known.id = Some(id);
        }
        if let Some(name) = function.name {
            known.name = Some(name);
        }
        Some(ToolCallDelta {
            index: fragment.index,
            id: known.id.clone(),
            name: known.name.clone(),
            arguments: function.arguments,
        })
    }
}
