use std::{sync::Arc, time::Duration};

use serde_json::{Value, json};
use tokio::time::Instant;
use tools::{ToolRegistry, switch_situation_schema};
use types::{
    Context, FunctionDecl, Message, ModelId, Provider, ProviderId, RuntimeError,
    SWITCH_SITUATION_TOOL, Situation, TurnPhase,
};

use crate::{
    AssembledStream, EventChannel, InterruptWatch, LatencySimulator, StreamAssembler,
    TurnStateMachine,
};

pub const BARGE_IN_FIRST_PASS: &str = "barge-in during first pass";
pub const BARGE_IN_TOOL: &str = "barge-in during tool execution";
pub const BARGE_IN_SECOND_PASS: &str = "barge-in during second pass";

/// Inputs for one orchestrated turn.
#[derive(Debug, Clone)]
pub struct TurnPlan {
    pub session_id: String,
    pub tenant_id: String,
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub situation: Situation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorOutcome {
    pub response: String,
    pub tool_used: Option<String>,
    pub situation: Situation,
    pub interrupted: bool,
    pub api_calls: u32,
    pub duration: Duration,
}

/// Drives at most two model passes with one tool round-trip between them.
pub struct TurnOrchestrator {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    latency: LatencySimulator,
    model: ModelId,
    stream_buffer_size: usize,
}

impl TurnOrchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        latency: LatencySimulator,
        model: ModelId,
        stream_buffer_size: usize,
    ) -> Self {
        Self {
            provider,
            tools,
            latency,
            model,
            stream_buffer_size: stream_buffer_size.max(1),
        }
    }

    pub fn provider_id(&self) -> &ProviderId {
        self.provider.provider_id()
    }

    /// Tools offered for the first pass in `situation`. Introduction only
    /// gets `switch_situation`. Every other situation gets the whole
    /// registry plus `switch_situation`, regardless of
    /// [`Situation::allowed_tools`], which only lists the tools each
    /// situation prompt steers the model toward.
    pub fn tool_catalog(&self, situation: Situation) -> Vec<FunctionDecl> {
        if situation == Situation::Introduction {
            return vec![switch_situation_schema()];
        }
        let mut catalog = self.tools.schemas();
        catalog.push(switch_situation_schema());
        catalog
    }

    pub async fn run(
        &self,
        plan: TurnPlan,
        state: &TurnStateMachine,
        channel: &mut EventChannel,
        watch: &InterruptWatch,
    ) -> Result<OrchestratorOutcome, RuntimeError> {
        let started = Instant::now();
        let TurnPlan {
            session_id,
            tenant_id,
            system_prompt,
            messages,
            situation,
        } = plan;

        let mut conversation = Vec::with_capacity(messages.len() + 3);
        conversation.push(Message::system(system_prompt));
        conversation.extend(messages);

        state.set_state(TurnPhase::Streaming)?;
        let first = self
            .pass(&conversation, self.tool_catalog(situation), channel, watch)
            .await?;

        if first.interrupted {
            channel.interrupted(BARGE_IN_FIRST_PASS);
            return Ok(OrchestratorOutcome {
                response: first.text,
                tool_used: None,
                situation,
                interrupted: true,
                api_calls: 1,
                duration: started.elapsed(),
            });
        }

        let Some(call) = first.tool_call else {
            channel.complete(elapsed_ms(started));
            return Ok(OrchestratorOutcome {
                response: first.text,
                tool_used: None,
                situation,
                interrupted: false,
                api_calls: 1,
                duration: started.elapsed(),
            });
        };

        state.set_state(TurnPhase::WaitingForTool)?;
        channel.tool_start(&call.name);
        tracing::info!(%session_id, %tenant_id, tool = %call.name, "executing tool call");
        self.latency.tool_delay().await;

        let (result, next_situation) = if call.name == SWITCH_SITUATION_TOOL {
            switch_situation(&session_id, situation, &call.arguments)
        } else {
            let result = self
                .tools
                .execute(&call.name, &tenant_id, &call.arguments)
                .await?;
            (result, situation)
        };
        channel.tool_done(&call.name, &result);

        if watch.is_interrupted() {
            channel.interrupted(BARGE_IN_TOOL);
            return Ok(OrchestratorOutcome {
                response: first.text,
                tool_used: Some(call.name),
                situation: next_situation,
                interrupted: true,
                api_calls: 1,
                duration: started.elapsed(),
            });
        }

        state.set_state(TurnPhase::Streaming)?;
        let tool_used = call.name.clone();
        let call_id = call.id.clone();
        conversation.push(Message::assistant_tool_call(&first.text, call));
        conversation.push(Message::tool_result(call_id, result.to_string()));

        let second = self.pass(&conversation, Vec::new(), channel, watch).await?;
        if second.tool_call.is_some() {
            tracing::debug!(%session_id, "ignoring tool call requested by second pass");
        }
        if second.interrupted {
            channel.interrupted(BARGE_IN_SECOND_PASS);
        } else {
            channel.complete(elapsed_ms(started));
        }

        Ok(OrchestratorOutcome {
            response: second.text,
            tool_used: Some(tool_used),
            situation: next_situation,
            interrupted: second.interrupted,
            api_calls: 2,
            duration: started.elapsed(),
        })
    }

    async fn pass(
        &self,
        messages: &[Message],
        tools: Vec<FunctionDecl>,
        channel: &mut EventChannel,
        watch: &InterruptWatch,
    ) -> Result<AssembledStream, RuntimeError> {
        let context = Context {
            provider: self.provider.provider_id().clone(),
            model: self.model.clone(),
            messages: messages.to_vec(),
            tools,
        };
        let stream = self
            .provider
            .stream(&context, self.stream_buffer_size)
            .await?;
        StreamAssembler::new()
            .drain(stream, channel, watch, &self.latency)
            .await
    }
}

/// Applies a `switch_situation` call. Unknown targets leave the situation
/// unchanged and report failure to the model.
pub fn switch_situation(
    session_id: &str,
    current: Situation,
    arguments: &Value,
) -> (Value, Situation) {
    let requested = arguments
        .get("newSituation")
        .and_then(Value::as_str)
        .unwrap_or_default();
    match requested.parse::<Situation>() {
        Ok(next) => {
            tracing::info!(session_id, from = %current, to = %next, "situation switched");
            (
                json!({
                    "success": true,
                    "situation": next.as_str(),
                    "message": format!("Situation switched to \"{next}\"."),
                }),
                next,
            )
        }
        Err(error) => {
            tracing::warn!(session_id, %error, "rejected situation switch");
            (
                json!({
                    "success": false,
                    "message": format!(
                        "Unknown situation: \"{requested}\". Valid values: {}.",
                        Situation::valid_names()
                    ),
                }),
                current,
            )
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
