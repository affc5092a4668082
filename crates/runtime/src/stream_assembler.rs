use std::collections::BTreeMap;

use serde_json::Value;
use types::{ProviderStream, RuntimeError, StreamItem, ToolCall, ToolCallDelta};

use crate::{EventChannel, InterruptWatch, LatencySimulator};

/// Result of draining one model pass.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledStream {
    pub text: String,
    /// Present only when the pass finished without an interrupt and the
    /// streamed arguments formed valid JSON.
    pub tool_call: Option<ToolCall>,
    pub interrupted: bool,
}

#[derive(Debug, Default)]
struct ToolCallFragment {
    id: String,
    name: String,
    arguments: String,
}

/// Forwards text deltas as chunks and stitches tool-call fragments back
/// together. One assembler serves exactly one model pass.
#[derive(Debug, Default)]
pub struct StreamAssembler {
    text: String,
    fragments: BTreeMap<usize, ToolCallFragment>,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, delta: ToolCallDelta) {
        let fragment = self.fragments.entry(delta.index).or_default();
        if let Some(id) = delta.id
            && !id.is_empty()
        {
            fragment.id = id;
        }
        if let Some(name) = delta.name
            && !name.is_empty()
        {
            fragment.name = name;
        }
        if let Some(arguments) = delta.arguments {
            fragment.arguments.push_str(&arguments);
        }
    }

    pub async fn drain(
        mut self,
        mut stream: ProviderStream,
        channel: &mut EventChannel,
        watch: &InterruptWatch,
        latency: &LatencySimulator,
    ) -> Result<AssembledStream, RuntimeError> {
        let mut interrupted = false;
        loop {
            if watch.is_interrupted() {
                interrupted = true;
                break;
            }
            let item = tokio::select! {
                biased;
                _ = watch.interrupted() => {
                    interrupted = true;
                    break;
                }
                item = stream.recv() => item,
            };
            let Some(item) = item else {
                break;
            };
            if watch.is_interrupted() {
                interrupted = true;
                break;
            }

            match item {
                Ok(StreamItem::Text(text)) => {
                    if text.is_empty() {
                        continue;
                    }
                    self.text.push_str(&text);
                    channel.chunk(&text);
                    latency.token_delay().await;
                    latency.network_jitter().await;
                }
                Ok(StreamItem::ToolCallDelta(delta)) => self.merge(delta),
                Ok(item @ StreamItem::FinishReason(_)) => {
                    if item.is_terminal_finish() {
                        tracing::debug!(session_id = %watch.session_id(), ?item, "model pass finished");
                        break;
                    }
                }
                Ok(StreamItem::ConnectionLost(message)) => {
                    return Err(RuntimeError::ConnectionLost(message));
                }
                Err(error) => return Err(error.into()),
            }
        }

        if interrupted {
            tracing::info!(session_id = %watch.session_id(), "model pass interrupted");
            return Ok(AssembledStream {
                text: self.text,
                tool_call: None,
                interrupted: true,
            });
        }

        let tool_call = self.take_tool_call(watch.session_id());
        Ok(AssembledStream {
            text: self.text,
            tool_call,
            interrupted: false,
        })
    }

    /// Only the call at index 0 is honoured.
    fn take_tool_call(&mut self, session_id: &str) -> Option<ToolCall> {
        if self.fragments.len() > 1 {
            tracing::debug!(
                session_id,
                ignored = self.fragments.len() - 1,
                "ignoring additional parallel tool calls"
            );
        }
        let fragment = self.fragments.remove(&0)?;
        if fragment.name.is_empty() {
            return None;
        }
        let arguments = if fragment.arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str::<Value>(&fragment.arguments) {
                Ok(arguments) => arguments,
                Err(error) => {
                    tracing::warn!(
                        session_id,
                        tool = %fragment.name,
                        %error,
                        "discarding tool call with malformed arguments"
                    );
                    return None;
                }
            }
        };
        let id = if fragment.id.is_empty() {
            format!("call_{}", uuid::Uuid::new_v4().simple())
        } else {
            fragment.id
        };
        Some(ToolCall {
            id,
            name: fragment.name,
            arguments,
        })
    }
}
