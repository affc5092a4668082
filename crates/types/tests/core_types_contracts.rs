use std::{str::FromStr, time::Duration};

use chrono::Utc;
use serde_json::json;
use types::{
    AgentEvent, Context, EventBus, HistoryEntry, Message, MessageRole, ModelId, ProviderId,
    RuntimeError, SessionState, Situation, StreamItem, ToolCall, ToolError, TurnEvent, TurnPhase,
    UnknownSituation, init_tracing,
};

#[test]
fn context_serde_round_trip_keeps_tool_calls() {
    let tool_call = ToolCall {
        id: "call_1".to_owned(),
        name: "switch_situation".to_owned(),
        arguments: json!({ "newSituation": "resident" }),
    };
    let context = Context {
        provider: ProviderId::from("openai"),
        model: ModelId::from("gpt-4o-mini"),
        messages: vec![
            Message::system("be brief"),
            Message::user("I'm an existing resident"),
            Message::assistant_tool_call("", tool_call),
            Message::tool_result("call_1", r#"{"success":true}"#),
        ],
        tools: Vec::new(),
    };

    let encoded = serde_json::to_string(&context).expect("context should serialize");
    let decoded: Context = serde_json::from_str(&encoded).expect("context should deserialize");
    assert_eq!(decoded, context);
    assert_eq!(decoded.messages[2].content, None);
    assert_eq!(decoded.messages[3].role, MessageRole::Tool);
}

#[test]
fn terminal_finish_reasons_are_stop_and_tool_calls() {
    assert!(StreamItem::FinishReason("stop".to_owned()).is_terminal_finish());
    assert!(StreamItem::FinishReason("tool_calls".to_owned()).is_terminal_finish());
    assert!(!StreamItem::FinishReason("length".to_owned()).is_terminal_finish());
    assert!(!StreamItem::Text("stop".to_owned()).is_terminal_finish());
}

#[test]
fn situations_parse_and_gate_tools() {
    assert_eq!(Situation::from_str("resident"), Ok(Situation::Resident));
    assert_eq!(
        Situation::from_str("landlord"),
        Err(UnknownSituation {
            name: "landlord".to_owned()
        })
    );
    assert!(Situation::is_valid("prospect"));
    assert!(!Situation::is_valid("Prospect"));
    assert_eq!(Situation::default(), Situation::Introduction);
    assert_eq!(
        Situation::Introduction.allowed_tools(),
        &["switch_situation"]
    );
    assert!(Situation::Prospect.allowed_tools().contains(&"book_tour"));
    assert!(Situation::Resident.allowed_tools().contains(&"take_note"));
    assert_eq!(Situation::valid_names(), "introduction, resident, prospect");
    assert_eq!(
        serde_json::to_value(Situation::Prospect).expect("serialize"),
        json!("prospect")
    );
}

#[test]
fn turn_phase_table_matches_lifecycle() {
    assert!(TurnPhase::Idle.can_transition_to(TurnPhase::Listening));
    assert!(!TurnPhase::Idle.can_transition_to(TurnPhase::Processing));
    assert!(TurnPhase::Completed.can_transition_to(TurnPhase::Speaking));
    assert!(!TurnPhase::Speaking.can_transition_to(TurnPhase::Completed));
    assert_eq!(
        serde_json::to_value(TurnPhase::WaitingForTool).expect("serialize"),
        json!("WAITING_FOR_TOOL")
    );
}

#[test]
fn history_truncation_keeps_most_recent_in_order() {
    let mut state = SessionState::new(Utc::now());
    for index in 0..14 {
        state.history.push(HistoryEntry::user(format!("m{index}")));
    }
    state.truncate_history(10);
    let contents = state
        .history
        .iter()
        .map(|entry| entry.content.as_str())
        .collect::<Vec<_>>();
    assert_eq!(
        contents,
        ["m4", "m5", "m6", "m7", "m8", "m9", "m10", "m11", "m12", "m13"]
    );
}

#[test]
fn retryable_errors_carry_retry_hint() {
    let busy = RuntimeError::SessionBusy {
        session_id: "S1".to_owned(),
        retry_after: Duration::from_secs(10),
    };
    assert!(busy.is_retryable());
    assert_eq!(busy.retry_after(), Some(Duration::from_secs(10)));

    let limited = RuntimeError::RateLimitExceeded {
        tenant_id: "acme".to_owned(),
        retry_after: Duration::from_secs(42),
    };
    assert!(limited.is_retryable());
    assert!(limited.to_string().contains("retry after 42s"));

    let unknown: RuntimeError = ToolError::UnknownTool {
        tool: "launch_rocket".to_owned(),
    }
    .into();
    assert!(!unknown.is_retryable());
    assert_eq!(unknown.retry_after(), None);
    assert!(!RuntimeError::ShutdownCancelled.is_retryable());
}

#[test]
fn turn_events_use_tagged_wire_format() {
    let event = TurnEvent::Chunk {
        text: "Hi".to_owned(),
        index: 0,
    };
    assert_eq!(
        serde_json::to_value(&event).expect("serialize"),
        json!({ "type": "chunk", "text": "Hi", "index": 0 })
    );
}

#[tokio::test]
async fn event_bus_delivers_to_subscribers_and_tolerates_none() {
    let bus = EventBus::new(8);
    bus.publish(AgentEvent::NoteCreated {
        tenant_id: "acme".to_owned(),
        note_id: "n0".to_owned(),
    });

    let mut receiver = bus.subscribe();
    bus.clone().publish(AgentEvent::Interrupted {
        session_id: "S1".to_owned(),
        reason: "barge-in".to_owned(),
    });
    let event = receiver.recv().await.expect("event should arrive");
    assert_eq!(
        event,
        AgentEvent::Interrupted {
            session_id: "S1".to_owned(),
            reason: "barge-in".to_owned(),
        }
    );
}

#[test]
fn init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
}
