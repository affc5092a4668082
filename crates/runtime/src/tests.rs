use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use memory::{
    InMemoryConversationLog, InMemorySessionLock, InMemorySessionStore, InMemoryTenantDirectory,
};
use mockall::mock;
use serde_json::{Value, json};
use tokio::sync::{Notify, broadcast, mpsc, oneshot};
use tools::default_registry;
use types::{
    AgentEvent, AudioInput, AudioSegment, Context, ConversationLog, ConversationRecord,
    DelayRange, EventBus, HistoryEntry, HistoryRole, LatencyConfig, MessageRole, ModelId,
    Provider, ProviderError, ProviderId, ProviderStream, RuntimeError, SessionState,
    SessionStore, Situation, SpeechStream, SpeechToText, StoreError, StreamItem, Tenant,
    TextToSpeech, ToolCallDelta, TurnEvent, TurnPhase,
};

use super::*;

mock! {
    SessionStoreContract {}
    #[async_trait]
    impl SessionStore for SessionStoreContract {
        async fn get(
            &self,
            tenant_id: &str,
            session_id: &str,
        ) -> Result<Option<SessionState>, StoreError>;
        async fn put(
            &self,
            tenant_id: &str,
            session_id: &str,
            state: &SessionState,
            ttl: Duration,
        ) -> Result<(), StoreError>;
    }
}

mock! {
    ConversationLogContract {}
    #[async_trait]
    impl ConversationLog for ConversationLogContract {
        async fn append(&self, record: ConversationRecord) -> Result<(), StoreError>;
    }
}

#[derive(Debug)]
enum ProviderStep {
    Stream(Vec<Result<StreamItem, ProviderError>>),
    Live(ProviderStream),
}

struct ScriptedProvider {
    provider_id: ProviderId,
    steps: Mutex<VecDeque<ProviderStep>>,
    contexts: Mutex<Vec<Context>>,
}

impl ScriptedProvider {
    fn new(steps: Vec<ProviderStep>) -> Self {
        Self {
            provider_id: ProviderId::from("openai"),
            steps: Mutex::new(steps.into()),
            contexts: Mutex::new(Vec::new()),
        }
    }

    fn contexts(&self) -> Vec<Context> {
        self.contexts.lock().expect("contexts lock").clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn provider_id(&self) -> &ProviderId {
        &self.provider_id
    }

    async fn stream(
        &self,
        context: &Context,
        _buffer_size: usize,
    ) -> Result<ProviderStream, ProviderError> {
        self.contexts
            .lock()
            .expect("contexts lock")
            .push(context.clone());
        let step = self.steps.lock().expect("steps lock").pop_front();
        match step {
            Some(ProviderStep::Stream(items)) => {
                let (sender, receiver) = mpsc::channel(items.len().max(1));
                for item in items {
                    sender.try_send(item).expect("scripted stream fits its buffer");
                }
                Ok(receiver)
            }
            Some(ProviderStep::Live(receiver)) => Ok(receiver),
            None => Err(ProviderError::RequestFailed {
                provider: self.provider_id.clone(),
                message: "no scripted response left".to_owned(),
            }),
        }
    }
}

fn text(value: &str) -> Result<StreamItem, ProviderError> {
    Ok(StreamItem::Text(value.to_owned()))
}

fn finish(reason: &str) -> Result<StreamItem, ProviderError> {
    Ok(StreamItem::FinishReason(reason.to_owned()))
}

fn tool_delta(
    index: usize,
    id: Option<&str>,
    name: Option<&str>,
    arguments: Option<&str>,
) -> Result<StreamItem, ProviderError> {
    Ok(StreamItem::ToolCallDelta(ToolCallDelta {
        index,
        id: id.map(str::to_owned),
        name: name.map(str::to_owned),
        arguments: arguments.map(str::to_owned),
    }))
}

fn reply(value: &str) -> ProviderStep {
    ProviderStep::Stream(vec![text(value), finish("stop")])
}

fn drain_turn_events(receiver: &mut broadcast::Receiver<TurnEvent>) -> Vec<TurnEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

fn drain_agent_events(receiver: &mut broadcast::Receiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

fn test_tenant() -> Tenant {
    Tenant {
        id: "acme".to_owned(),
        name: "Acme Properties".to_owned(),
        system_prompt: "You are the Acme Properties assistant.".to_owned(),
    }
}

struct Harness {
    deps: Arc<TurnDependencies>,
    provider: Arc<ScriptedProvider>,
    store: Arc<InMemorySessionStore>,
    lock: Arc<InMemorySessionLock>,
    conversations: Arc<InMemoryConversationLog>,
    events: EventBus,
    turn_events: broadcast::Sender<TurnEvent>,
}

/// Collaborators a test may swap out before the harness is assembled.
struct HarnessParts {
    store: Arc<dyn SessionStore>,
    in_memory: Arc<InMemorySessionStore>,
    latency: LatencySimulator,
    text_to_speech: Option<Arc<dyn TextToSpeech>>,
    conversation_log: Option<Arc<dyn ConversationLog>>,
}

impl Default for HarnessParts {
    fn default() -> Self {
        let store = Arc::new(InMemorySessionStore::new());
        Self {
            store: store.clone(),
            in_memory: store,
            latency: LatencySimulator::disabled(),
            text_to_speech: None,
            conversation_log: None,
        }
    }
}

impl Harness {
    fn new(steps: Vec<ProviderStep>) -> Self {
        Self::assemble(steps, HarnessParts::default())
    }

    fn with_store(
        steps: Vec<ProviderStep>,
        store: Arc<dyn SessionStore>,
        in_memory: Arc<InMemorySessionStore>,
    ) -> Self {
        Self::assemble(
            steps,
            HarnessParts {
                store,
                in_memory,
                ..HarnessParts::default()
            },
        )
    }

    fn assemble(steps: Vec<ProviderStep>, parts: HarnessParts) -> Self {
        let HarnessParts {
            store,
            in_memory,
            latency,
            text_to_speech,
            conversation_log,
        } = parts;
        let events = EventBus::new(512);
        let provider = Arc::new(ScriptedProvider::new(steps));
        let lock = Arc::new(InMemorySessionLock::new());
        let conversations = Arc::new(InMemoryConversationLog::new());
        let tools = Arc::new(default_registry(events.clone(), Duration::from_secs(30)));
        let orchestrator = TurnOrchestrator::new(
            provider.clone(),
            tools,
            latency.clone(),
            ModelId::from("gpt-4o-mini"),
            64,
        );
        let text_to_speech = text_to_speech
            .unwrap_or_else(|| Arc::new(MockTextToSpeech::new(latency.clone())));
        let deps = TurnDependencies {
            interrupts: Arc::new(InterruptSignal::new(events.clone())),
            session_mutex: SessionMutex::new(lock.clone(), Duration::from_secs(10)),
            sessions: SessionRepository::new(store, Duration::from_secs(7200), 10),
            conversations: conversation_log.unwrap_or_else(|| conversations.clone()),
            prompts: Arc::new(TenantPromptBuilder::new(Arc::new(
                InMemoryTenantDirectory::new([test_tenant()]),
            ))),
            orchestrator: Arc::new(orchestrator),
            speech_to_text: Arc::new(MockSpeechToText::new(latency)),
            text_to_speech,
            events: events.clone(),
        };
        let (turn_events, _) = broadcast::channel(512);
        Self {
            deps: Arc::new(deps),
            provider,
            store: in_memory,
            lock,
            conversations,
            events,
            turn_events,
        }
    }

    fn process(&self, session_id: &str, message: &str) -> TurnProcess {
        TurnProcess::new(
            TurnRequest::text("acme", session_id, message),
            Arc::clone(&self.deps),
        )
    }

    async fn stored(&self, session_id: &str) -> SessionState {
        self.store
            .get("acme", session_id)
            .await
            .expect("store get")
            .expect("session should be stored")
    }
}

#[test]
fn state_machine_enforces_transition_table() {
    for from in TurnPhase::ALL {
        for to in TurnPhase::ALL {
            let machine = TurnStateMachine::new("S1", EventBus::new(8));
            machine.force_state(from);
            let result = machine.set_state(to);
            if from == to || from.can_transition_to(to) {
                assert!(result.is_ok(), "{from} -> {to} should be accepted");
                assert_eq!(machine.current(), to);
            } else {
                assert!(
                    matches!(
                        result,
                        Err(RuntimeError::IllegalTransition { from: f, to: t, .. }) if f == from && t == to
                    ),
                    "{from} -> {to} should be rejected"
                );
                assert_eq!(machine.current(), from, "rejected transition keeps phase");
            }
        }
    }
}

#[test]
fn state_machine_publishes_changes_and_ignores_self_transitions() {
    let events = EventBus::new(16);
    let mut receiver = events.subscribe();
    let machine = TurnStateMachine::new("S1", events);

    machine.set_state(TurnPhase::Listening).expect("idle -> listening");
    machine.set_state(TurnPhase::Listening).expect("self transition");
    machine.force_state(TurnPhase::Idle);

    assert_eq!(
        drain_agent_events(&mut receiver),
        vec![
            AgentEvent::StateChanged {
                session_id: "S1".to_owned(),
                from: TurnPhase::Idle,
                to: TurnPhase::Listening,
                forced: false,
            },
            AgentEvent::StateEntered {
                session_id: "S1".to_owned(),
                state: TurnPhase::Listening,
            },
            AgentEvent::StateChanged {
                session_id: "S1".to_owned(),
                from: TurnPhase::Listening,
                to: TurnPhase::Idle,
                forced: true,
            },
            AgentEvent::StateEntered {
                session_id: "S1".to_owned(),
                state: TurnPhase::Idle,
            },
        ]
    );
    assert_eq!(machine.previous(), Some(TurnPhase::Listening));
}

#[test]
fn interrupt_signal_is_idempotent_until_cleared() {
    let events = EventBus::new(16);
    let mut receiver = events.subscribe();
    let signal = InterruptSignal::new(events);
    let watch = signal.watch("S1");

    assert!(signal.signal("S1", "barge-in"));
    assert!(!signal.signal("S1", "again"));
    assert!(watch.is_interrupted());
    assert!(signal.is_interrupted("S1"));
    assert_eq!(signal.reason("S1").as_deref(), Some("barge-in"));
    assert_eq!(
        drain_agent_events(&mut receiver),
        vec![AgentEvent::Interrupted {
            session_id: "S1".to_owned(),
            reason: "barge-in".to_owned(),
        }]
    );

    assert!(signal.clear("S1"));
    assert!(!signal.clear("S1"));
    assert!(!signal.is_interrupted("S1"));
    assert!(watch.is_interrupted(), "an issued watch keeps its flag");
    assert!(!signal.watch("S1").is_interrupted());
}

#[test]
fn interrupt_retire_leaves_newer_turns_alone() {
    let signal = InterruptSignal::new(EventBus::new(8));
    let stale = signal.watch("S1");
    assert!(signal.signal("S1", "new-job"));
    assert!(signal.clear("S1"));
    let fresh = signal.watch("S1");
    assert!(!fresh.is_interrupted());

    signal.retire(&stale);
    assert!(signal.signal("S1", "barge-in"));
    assert!(fresh.is_interrupted());
    assert!(stale.is_interrupted());

    signal.retire(&fresh);
    assert!(!signal.is_interrupted("S1"));
}

#[test]
fn interrupt_clear_keeps_unset_flag_of_running_turn() {
    let signal = InterruptSignal::new(EventBus::new(8));
    let running = signal.watch("S1");

    assert!(!signal.clear("S1"), "nothing stale to clear");
    assert!(signal.signal("S1", "barge-in"));
    assert!(running.is_interrupted());
}

#[tokio::test(start_paused = true)]
async fn unwatched_interrupt_flags_are_swept_after_ttl() {
    let signal = InterruptSignal::with_stale_after(EventBus::new(8), Duration::from_secs(30));
    let running = signal.watch("live");
    assert!(signal.signal("live", "barge-in"));
    assert!(signal.signal("hung-up", "barge-in"));
    assert_eq!(signal.tracked_sessions(), 2);

    tokio::time::advance(Duration::from_secs(29)).await;
    assert!(signal.signal("other", "barge-in"));
    assert!(signal.is_interrupted("hung-up"), "not yet stale");

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(!signal.signal("live", "again"));
    assert!(!signal.is_interrupted("hung-up"));
    assert!(signal.is_interrupted("live"), "a watched flag is never swept");
    assert!(running.is_interrupted());
    assert_eq!(signal.tracked_sessions(), 2);

    signal.retire(&running);
    assert_eq!(signal.tracked_sessions(), 1);
}

#[tokio::test]
async fn session_mutex_rejects_concurrent_holder() {
    let lock = Arc::new(InMemorySessionLock::new());
    let mutex = SessionMutex::new(lock.clone(), Duration::from_secs(10));
    let (acquired_tx, acquired_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel::<()>();

    let holder = {
        let mutex = mutex.clone();
        tokio::spawn(async move {
            mutex
                .with_lock("S1", async move {
                    let _ = acquired_tx.send(());
                    let _ = release_rx.await;
                    Ok::<_, RuntimeError>("first")
                })
                .await
        })
    };
    acquired_rx.await.expect("holder should acquire");

    let busy = mutex
        .with_lock("S1", async { Ok::<_, RuntimeError>("second") })
        .await;
    assert!(matches!(
        busy,
        Err(RuntimeError::SessionBusy { ref session_id, retry_after })
            if session_id == "S1" && retry_after == Duration::from_secs(10)
    ));
    assert!(busy.expect_err("busy").is_retryable());

    let other = mutex
        .with_lock("S2", async { Ok::<_, RuntimeError>("other session") })
        .await
        .expect("different sessions do not contend");
    assert_eq!(other, "other session");

    release_tx.send(()).expect("holder is waiting");
    assert_eq!(holder.await.expect("join").expect("holder result"), "first");
    assert!(!lock.is_held(&lock_key("S1")).await);
}

#[tokio::test]
async fn session_mutex_releases_after_failed_body() {
    let lock = Arc::new(InMemorySessionLock::new());
    let mutex = SessionMutex::new(lock.clone(), Duration::from_secs(10));

    let failed = mutex
        .with_lock("S1", async {
            Err::<(), _>(RuntimeError::UnknownTenant {
                tenant_id: "ghost".to_owned(),
            })
        })
        .await;
    assert!(matches!(failed, Err(RuntimeError::UnknownTenant { .. })));
    assert!(!lock.is_held("lock:S1").await);
    mutex
        .with_lock("S1", async { Ok::<_, RuntimeError>(()) })
        .await
        .expect("lock should be free again");
}

#[test]
fn event_channel_numbers_chunks_and_resets_on_finalize() {
    let (sender, mut receiver) = broadcast::channel(32);
    let mut channel = EventChannel::new("S1", sender);

    channel.chunk("Hel");
    channel.chunk("lo");
    assert_eq!(channel.buffered_text(), "Hello");
    channel.complete(12);
    channel.chunk("again");
    channel.interrupted("barge-in");
    channel.chunk("fresh");

    assert_eq!(
        drain_turn_events(&mut receiver),
        vec![
            TurnEvent::Chunk {
                text: "Hel".to_owned(),
                index: 0
            },
            TurnEvent::Chunk {
                text: "lo".to_owned(),
                index: 1
            },
            TurnEvent::Complete {
                full_text: "Hello".to_owned(),
                duration_ms: 12
            },
            TurnEvent::Chunk {
                text: "again".to_owned(),
                index: 0
            },
            TurnEvent::Interrupted {
                reason: "barge-in".to_owned()
            },
            TurnEvent::Chunk {
                text: "fresh".to_owned(),
                index: 0
            },
        ]
    );
    assert_eq!(channel.buffered_text(), "fresh");
}

#[test]
fn event_channel_encodes_audio_as_base64() {
    let (sender, mut receiver) = broadcast::channel(4);
    let channel = EventChannel::new("S1", sender);
    channel.audio_chunk(&types::AudioSegment {
        index: 2,
        audio: b"hi".to_vec(),
        text: "hi".to_owned(),
        duration_ms: 84,
    });
    assert_eq!(
        receiver.try_recv().expect("audio event"),
        TurnEvent::AudioChunk {
            index: 2,
            audio: "aGk=".to_owned(),
            text: "hi".to_owned(),
            duration_ms: 84,
        }
    );
}

async fn assemble(
    items: Vec<Result<StreamItem, ProviderError>>,
) -> (Result<AssembledStream, RuntimeError>, Vec<TurnEvent>) {
    let (stream_tx, stream_rx) = mpsc::channel(items.len().max(1));
    for item in items {
        stream_tx.try_send(item).expect("buffer fits");
    }
    drop(stream_tx);
    let (sender, mut receiver) = broadcast::channel(64);
    let mut channel = EventChannel::new("S1", sender);
    let signal = InterruptSignal::new(EventBus::new(8));
    let watch = signal.watch("S1");
    let result = StreamAssembler::new()
        .drain(
            stream_rx,
            &mut channel,
            &watch,
            &LatencySimulator::disabled(),
        )
        .await;
    (result, drain_turn_events(&mut receiver))
}

#[tokio::test]
async fn assembler_joins_arguments_split_across_deltas() {
    let (result, events) = assemble(vec![
        text("Booking "),
        tool_delta(0, Some("call_7"), Some("book_tour"), Some("{\"customer_name\":\"Jane\",")),
        tool_delta(0, None, None, Some("\"tour_date\":\"2025-01-01\",")),
        tool_delta(0, None, None, Some("\"location\":\"HQ\"}")),
        finish("tool_calls"),
    ])
    .await;
    let assembled = result.expect("stream should assemble");

    assert_eq!(assembled.text, "Booking ");
    assert!(!assembled.interrupted);
    let call = assembled.tool_call.expect("tool call should be detected");
    assert_eq!(call.id, "call_7");
    assert_eq!(call.name, "book_tour");
    assert_eq!(
        call.arguments,
        json!({ "customer_name": "Jane", "tour_date": "2025-01-01", "location": "HQ" })
    );
    assert_eq!(
        events,
        vec![TurnEvent::Chunk {
            text: "Booking ".to_owned(),
            index: 0
        }]
    );
}

#[tokio::test]
async fn assembler_drops_tool_call_with_malformed_arguments() {
    let (result, _) = assemble(vec![
        tool_delta(0, Some("call_1"), Some("take_note"), Some("{\"content\":")),
        finish("tool_calls"),
    ])
    .await;
    let assembled = result.expect("malformed arguments do not fail the pass");
    assert!(assembled.tool_call.is_none());
}

#[tokio::test]
async fn assembler_defaults_empty_arguments_and_missing_id() {
    let (result, _) = assemble(vec![
        tool_delta(0, None, Some("switch_situation"), None),
        tool_delta(1, Some("call_2"), Some("take_note"), Some("{}")),
        finish("tool_calls"),
    ])
    .await;
    let call = result
        .expect("stream should assemble")
        .tool_call
        .expect("first call is honoured");
    assert_eq!(call.name, "switch_situation");
    assert_eq!(call.arguments, json!({}));
    assert!(call.id.starts_with("call_"));
}

#[tokio::test]
async fn assembler_stops_at_terminal_finish_reason() {
    let (result, events) = assemble(vec![
        text("done"),
        finish("stop"),
        text("ignored"),
    ])
    .await;
    assert_eq!(result.expect("assemble").text, "done");
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn assembler_reports_lost_connection() {
    let (result, _) = assemble(vec![
        text("partial"),
        Ok(StreamItem::ConnectionLost("socket closed".to_owned())),
    ])
    .await;
    assert!(matches!(result, Err(RuntimeError::ConnectionLost(message)) if message == "socket closed"));
}

#[tokio::test]
async fn assembler_hides_tool_call_when_interrupted() {
    let (stream_tx, stream_rx) = mpsc::channel(8);
    stream_tx
        .try_send(tool_delta(0, Some("call_1"), Some("take_note"), Some("{}")))
        .expect("send");
    let (sender, _receiver) = broadcast::channel(8);
    let mut channel = EventChannel::new("S1", sender);
    let signal = InterruptSignal::new(EventBus::new(8));
    let watch = signal.watch("S1");
    signal.signal("S1", "barge-in");

    let assembled = StreamAssembler::new()
        .drain(stream_rx, &mut channel, &watch, &LatencySimulator::disabled())
        .await
        .expect("interrupted pass still assembles");
    assert!(assembled.interrupted);
    assert!(assembled.tool_call.is_none());
    drop(stream_tx);
}

#[test]
fn switch_situation_rejects_unknown_target() {
    let (result, situation) =
        switch_situation("S1", Situation::Resident, &json!({ "newSituation": "pirate" }));
    assert_eq!(situation, Situation::Resident);
    assert_eq!(
        result,
        json!({
            "success": false,
            "message": "Unknown situation: \"pirate\". Valid values: introduction, resident, prospect."
        })
    );

    let (result, situation) = switch_situation("S1", Situation::Resident, &json!({}));
    assert_eq!(situation, Situation::Resident);
    assert_eq!(result["success"], json!(false));

    let (result, situation) =
        switch_situation("S1", Situation::Introduction, &json!({ "newSituation": "prospect" }));
    assert_eq!(situation, Situation::Prospect);
    assert_eq!(
        result,
        json!({
            "success": true,
            "situation": "prospect",
            "message": "Situation switched to \"prospect\"."
        })
    );
}

#[tokio::test]
async fn introduction_turn_switches_to_resident() {
    let harness = Harness::new(vec![
        ProviderStep::Stream(vec![
            tool_delta(0, Some("call_1"), Some("switch_situation"), Some("{\"newSituation\":")),
            tool_delta(0, None, None, Some("\"resident\"}")),
            finish("tool_calls"),
        ]),
        reply("Welcome back! How can I help?"),
    ]);
    let mut turn_events = harness.turn_events.subscribe();
    let mut agent_events = harness.events.subscribe();

    let process = harness.process("S1", "I live in unit 4B");
    let result = process
        .run(harness.turn_events.clone())
        .await
        .expect("turn should succeed");

    assert_eq!(result.situation, Situation::Resident);
    assert_eq!(result.tool_used.as_deref(), Some("switch_situation"));
    assert_eq!(result.api_calls, 2);
    assert_eq!(result.response, "Welcome back! How can I help?");
    assert!(!result.interrupted);
    assert!(result.audio_segments >= 1);
    assert_eq!(process.phase(), TurnPhase::Idle);

    let contexts = harness.provider.contexts();
    assert_eq!(contexts.len(), 2);
    let first_tools = contexts[0]
        .tools
        .iter()
        .map(|tool| tool.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(first_tools, ["switch_situation"]);
    assert!(contexts[1].tools.is_empty(), "second pass offers no tools");
    let tool_message = contexts[1]
        .messages
        .iter()
        .find(|message| message.role == MessageRole::Tool)
        .expect("tool result message");
    assert_eq!(tool_message.tool_call_id.as_deref(), Some("call_1"));
    let payload: Value =
        serde_json::from_str(tool_message.content.as_deref().expect("tool content"))
            .expect("tool result is JSON");
    assert_eq!(payload["success"], json!(true));
    assert_eq!(payload["situation"], json!("resident"));

    let events = drain_turn_events(&mut turn_events);
    assert_eq!(
        events[0],
        TurnEvent::ToolStart {
            name: "switch_situation".to_owned()
        }
    );
    assert!(matches!(&events[1], TurnEvent::ToolDone { name, .. } if name == "switch_situation"));
    assert!(events.iter().any(|event| matches!(
        event,
        TurnEvent::Complete { full_text, .. } if full_text == "Welcome back! How can I help?"
    )));
    assert!(
        events
            .iter()
            .any(|event| matches!(event, TurnEvent::AudioChunk { index: 0, .. }))
    );

    let stored = harness.stored("S1").await;
    assert_eq!(stored.situation, Situation::Resident);
    assert_eq!(
        stored.history,
        vec![
            HistoryEntry::user("I live in unit 4B"),
            HistoryEntry::assistant("Welcome back! How can I help?"),
        ]
    );

    let agent_events = drain_agent_events(&mut agent_events);
    assert!(agent_events.iter().any(|event| matches!(
        event,
        AgentEvent::SessionStarted { session_id, .. } if session_id == "S1"
    )));
    assert!(agent_events.iter().any(|event| matches!(
        event,
        AgentEvent::TurnProcessed { situation: Situation::Resident, interrupted: false, .. }
    )));
    assert!(agent_events.iter().any(|event| matches!(
        event,
        AgentEvent::ToolUsed { tool, .. } if tool == "switch_situation"
    )));
}

#[tokio::test]
async fn resident_turn_offers_full_catalog_and_runs_business_tool() {
    let harness = Harness::new(vec![
        ProviderStep::Stream(vec![
            text("Let me note that. "),
            tool_delta(
                0,
                Some("call_9"),
                Some("take_note"),
                Some("{\"content\":\"Leaking sink in 4B\"}"),
            ),
            finish("tool_calls"),
        ]),
        reply("I've logged the leak."),
    ]);
    let mut state = SessionState::new(Utc::now());
    state.situation = Situation::Resident;
    state.history.push(HistoryEntry::user("hi"));
    state.history.push(HistoryEntry::assistant("hello"));
    harness
        .store
        .put("acme", "S1", &state, Duration::from_secs(60))
        .await
        .expect("seed session");
    let mut agent_events = harness.events.subscribe();

    let result = harness
        .process("S1", "My sink is leaking")
        .run(harness.turn_events.clone())
        .await
        .expect("turn should succeed");

    assert_eq!(result.tool_used.as_deref(), Some("take_note"));
    assert_eq!(result.response, "I've logged the leak.");
    assert_eq!(result.situation, Situation::Resident);

    let contexts = harness.provider.contexts();
    let offered = contexts[0]
        .tools
        .iter()
        .map(|tool| tool.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(
        offered,
        ["book_tour", "take_note", "update_contact_info", "switch_situation"]
    );
    assert!(
        !Situation::Resident.allowed_tools().contains(&"book_tour"),
        "the catalog is not narrowed to the situation's suggested tools"
    );
    let roles = contexts[0]
        .messages
        .iter()
        .map(|message| message.role.clone())
        .collect::<Vec<_>>();
    assert_eq!(
        roles,
        [
            MessageRole::System,
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::User
        ]
    );
    let assistant_call = &contexts[1].messages[4];
    assert_eq!(assistant_call.content.as_deref(), Some("Let me note that. "));
    assert_eq!(assistant_call.tool_calls[0].name, "take_note");

    let agent_events = drain_agent_events(&mut agent_events);
    assert!(
        agent_events
            .iter()
            .any(|event| matches!(event, AgentEvent::NoteCreated { .. }))
    );
    assert!(
        !agent_events
            .iter()
            .any(|event| matches!(event, AgentEvent::SessionStarted { .. })),
        "existing history is not a new session"
    );
}

#[tokio::test]
async fn unknown_tool_fails_the_turn() {
    let harness = Harness::new(vec![ProviderStep::Stream(vec![
        tool_delta(0, Some("call_1"), Some("launch_rocket"), Some("{}")),
        finish("tool_calls"),
    ])]);
    let mut state = SessionState::new(Utc::now());
    state.situation = Situation::Prospect;
    harness
        .store
        .put("acme", "S1", &state, Duration::from_secs(60))
        .await
        .expect("seed session");
    let mut turn_events = harness.turn_events.subscribe();

    let process = harness.process("S1", "hello");
    let error = process
        .run(harness.turn_events.clone())
        .await
        .expect_err("unregistered tool should fail the turn");
    assert!(matches!(
        error,
        RuntimeError::Tool(types::ToolError::UnknownTool { ref tool }) if tool == "launch_rocket"
    ));
    assert_eq!(process.phase(), TurnPhase::Idle);
    assert!(!harness.lock.is_held("lock:S1").await);
    assert!(drain_turn_events(&mut turn_events).iter().any(|event| matches!(
        event,
        TurnEvent::Error { message } if message.contains("launch_rocket")
    )));
}

#[tokio::test]
async fn unknown_tenant_is_reported() {
    let harness = Harness::new(vec![reply("unused")]);
    let process = TurnProcess::new(
        TurnRequest::text("ghost", "S1", "hello"),
        Arc::clone(&harness.deps),
    );
    let error = process
        .run(harness.turn_events.clone())
        .await
        .expect_err("unknown tenant should fail");
    assert!(matches!(error, RuntimeError::UnknownTenant { ref tenant_id } if tenant_id == "ghost"));
    assert!(harness.provider.contexts().is_empty());
}

#[tokio::test]
async fn history_is_bounded_after_many_turns() {
    let steps = (0..6)
        .map(|turn| reply(&format!("answer {turn}")))
        .collect::<Vec<_>>();
    let harness = Harness::new(steps);

    for turn in 0..6 {
        harness
            .process("S1", &format!("message {turn}"))
            .run(harness.turn_events.clone())
            .await
            .expect("turn should succeed");
    }

    let stored = harness.stored("S1").await;
    assert_eq!(stored.history.len(), 10);
    assert_eq!(stored.history[0], HistoryEntry::user("message 1"));
    assert_eq!(stored.history[9], HistoryEntry::assistant("answer 5"));
    assert_eq!(stored.history[0].role, HistoryRole::User);
}

#[tokio::test]
async fn barge_in_stops_streaming_after_second_chunk() {
    let (stream_tx, stream_rx) = mpsc::channel(8);
    let harness = Harness::new(vec![ProviderStep::Live(stream_rx)]);
    let mut observer = harness.turn_events.subscribe();
    let interrupts = Arc::clone(&harness.deps.interrupts);

    let feeder = tokio::spawn(async move {
        for chunk in ["one ", "two "] {
            stream_tx.send(text(chunk)).await.expect("stream open");
        }
        loop {
            match observer.recv().await {
                Ok(TurnEvent::Chunk { index: 1, .. }) => break,
                Ok(_) => continue,
                Err(error) => panic!("turn events closed early: {error}"),
            }
        }
        assert!(interrupts.signal("S1", "barge-in"));
        for chunk in ["three ", "four ", "five"] {
            let _ = stream_tx.send(text(chunk)).await;
        }
        let _ = stream_tx.send(finish("stop")).await;
    });

    let mut turn_events = harness.turn_events.subscribe();
    let process = harness.process("S1", "tell me everything");
    let result = process
        .run(harness.turn_events.clone())
        .await
        .expect("interrupted turn still returns");
    feeder.await.expect("feeder should finish");

    assert!(result.interrupted);
    assert_eq!(result.response, "one two ");
    assert_eq!(result.audio_segments, 0);
    assert_eq!(result.api_calls, 1);

    let events = drain_turn_events(&mut turn_events);
    let chunks = events
        .iter()
        .filter(|event| matches!(event, TurnEvent::Chunk { .. }))
        .count();
    assert_eq!(chunks, 2);
    assert!(events.contains(&TurnEvent::Interrupted {
        reason: BARGE_IN_FIRST_PASS.to_owned()
    }));
    assert!(
        !events
            .iter()
            .any(|event| matches!(event, TurnEvent::Complete { .. }))
    );
    assert_eq!(process.phase(), TurnPhase::Idle);
    assert!(
        !harness.deps.interrupts.is_interrupted("S1"),
        "the turn retires its flag"
    );
}

#[tokio::test]
async fn concurrent_turns_for_one_session_fail_fast_while_locked() {
    let (stream_tx, stream_rx) = mpsc::channel(8);
    let harness = Harness::new(vec![ProviderStep::Live(stream_rx)]);
    let mut observer = harness.turn_events.subscribe();

    let holder = tokio::spawn({
        let deps = Arc::clone(&harness.deps);
        let sender = harness.turn_events.clone();
        async move {
            TurnProcess::new(TurnRequest::text("acme", "S1", "first"), deps)
                .run(sender)
                .await
        }
    });
    stream_tx.send(text("Working")).await.expect("stream open");
    loop {
        if let TurnEvent::Chunk { .. } = observer.recv().await.expect("turn events") {
            break;
        }
    }

    let mut contenders = tokio::task::JoinSet::new();
    for index in 0..4 {
        let deps = Arc::clone(&harness.deps);
        let sender = harness.turn_events.clone();
        contenders.spawn(async move {
            TurnProcess::new(TurnRequest::text("acme", "S1", format!("late {index}")), deps)
                .run(sender)
                .await
        });
    }
    while let Some(outcome) = contenders.join_next().await {
        let error = outcome.expect("join").expect_err("session is locked");
        assert!(matches!(error, RuntimeError::SessionBusy { ref session_id, .. } if session_id == "S1"));
    }

    stream_tx.send(finish("stop")).await.expect("stream open");
    let result = holder.await.expect("join").expect("holder completes");
    assert_eq!(result.response, "Working");
    assert!(!result.interrupted);

    let stored = harness.stored("S1").await;
    assert_eq!(
        stored.history,
        vec![HistoryEntry::user("first"), HistoryEntry::assistant("Working")]
    );
    assert!(!harness.lock.is_held("lock:S1").await);
}

#[tokio::test]
async fn stale_interrupt_is_cleared_before_turn() {
    let harness = Harness::new(vec![reply("fresh answer")]);
    harness.deps.interrupts.signal("S1", "left over");

    let result = harness
        .process("S1", "hello")
        .run(harness.turn_events.clone())
        .await
        .expect("turn should succeed");
    assert!(!result.interrupted);
    assert_eq!(result.response, "fresh answer");
}

#[tokio::test]
async fn audio_input_is_transcribed() {
    let harness = Harness::new(vec![reply("Sure.")]);
    let process = TurnProcess::new(
        TurnRequest {
            tenant_id: "acme".to_owned(),
            session_id: "S1".to_owned(),
            input: TurnInput::Audio(AudioInput::new("  book   a tour ".as_bytes())),
        },
        Arc::clone(&harness.deps),
    );

    let result = process
        .run(harness.turn_events.clone())
        .await
        .expect("turn should succeed");
    let transcript = result.transcript.expect("audio turns carry a transcript");
    assert_eq!(transcript.transcript, "book a tour");
    assert!((transcript.confidence - 0.78).abs() < 1e-9);
    assert_eq!(
        harness.stored("S1").await.history[0],
        HistoryEntry::user("book a tour")
    );
}

#[tokio::test]
async fn save_failure_does_not_fail_the_turn() {
    let mut store = MockSessionStoreContract::new();
    store.expect_get().returning(|_, _| {
        let mut state = SessionState::new(Utc::now());
        state.history.push(HistoryEntry::user("earlier"));
        Ok(Some(state))
    });
    store.expect_put().times(1).returning(|_, _, _, _| {
        Err(StoreError::Unavailable {
            message: "redis down".to_owned(),
        })
    });
    let harness = Harness::with_store(
        vec![reply("Still here.")],
        Arc::new(store),
        Arc::new(InMemorySessionStore::new()),
    );

    let result = harness
        .process("S1", "hello")
        .run(harness.turn_events.clone())
        .await
        .expect("persistence failure is logged, not returned");
    assert_eq!(result.response, "Still here.");
}

#[tokio::test]
async fn completed_turn_is_appended_to_conversation_log() {
    let harness = Harness::new(vec![reply("Happy to help.")]);

    harness
        .process("S1", "hello there")
        .run(harness.turn_events.clone())
        .await
        .expect("turn should succeed");

    let records = harness.conversations.for_tenant("acme").await;
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.session_id, "S1");
    assert_eq!(record.message, "hello there");
    assert_eq!(record.response, "Happy to help.");
    assert_eq!(record.tool_used, None);
    assert_eq!(record.situation, Situation::Introduction);
    assert!(!record.interrupted);
    assert!(harness.conversations.for_tenant("globex").await.is_empty());
}

#[tokio::test]
async fn conversation_log_failure_does_not_fail_the_turn() {
    let mut log = MockConversationLogContract::new();
    log.expect_append()
        .withf(|record| record.response == "Still answering.")
        .times(1)
        .returning(|_| {
            Err(StoreError::Unavailable {
                message: "audit sink down".to_owned(),
            })
        });
    let harness = Harness::assemble(
        vec![reply("Still answering.")],
        HarnessParts {
            conversation_log: Some(Arc::new(log)),
            ..HarnessParts::default()
        },
    );

    let result = harness
        .process("S1", "hello")
        .run(harness.turn_events.clone())
        .await
        .expect("audit failure is logged, not returned");
    assert_eq!(result.response, "Still answering.");
    assert_eq!(harness.stored("S1").await.history.len(), 2);
}

/// Emits the first two segments, then holds the rest until the gate opens.
struct GatedSpeech {
    gate: Arc<Notify>,
}

impl TextToSpeech for GatedSpeech {
    fn synthesize(&self, text: &str) -> SpeechStream {
        let (sender, receiver) = mpsc::channel(1);
        let segments = split_segments(text);
        let gate = Arc::clone(&self.gate);
        tokio::spawn(async move {
            for (index, segment) in segments.into_iter().enumerate() {
                if index == 2 {
                    gate.notified().await;
                }
                let item = AudioSegment {
                    index,
                    audio: segment.clone().into_bytes(),
                    text: segment,
                    duration_ms: 100,
                };
                if sender.send(Ok(item)).await.is_err() {
                    break;
                }
            }
        });
        receiver
    }
}

fn tool_only_latency(tool_ms: u64) -> LatencySimulator {
    LatencySimulator::new(LatencyConfig {
        enabled: true,
        stt: DelayRange::new(0, 0),
        token: DelayRange::new(0, 0),
        tool: DelayRange::new(tool_ms, tool_ms),
        jitter: DelayRange::new(0, 0),
        jitter_probability: 0.0,
    })
}

impl Harness {
    async fn seed(&self, session_id: &str, situation: Situation) {
        let mut state = SessionState::new(Utc::now());
        state.situation = situation;
        self.store
            .put("acme", session_id, &state, Duration::from_secs(60))
            .await
            .expect("seed session");
    }
}

#[tokio::test]
async fn barge_in_during_speech_stops_after_second_segment() {
    let gate = Arc::new(Notify::new());
    let harness = Harness::assemble(
        vec![reply("First part. Second part. Third part.")],
        HarnessParts {
            text_to_speech: Some(Arc::new(GatedSpeech {
                gate: Arc::clone(&gate),
            })),
            ..HarnessParts::default()
        },
    );
    let mut observer = harness.turn_events.subscribe();
    let interrupts = Arc::clone(&harness.deps.interrupts);
    let barge = tokio::spawn(async move {
        loop {
            match observer.recv().await {
                Ok(TurnEvent::AudioChunk { index: 1, .. }) => break,
                Ok(_) => continue,
                Err(error) => panic!("turn events closed early: {error}"),
            }
        }
        assert!(interrupts.signal("S1", "caller spoke"));
        gate.notify_one();
    });

    let mut turn_events = harness.turn_events.subscribe();
    let process = harness.process("S1", "tell me about the building");
    let result = process
        .run(harness.turn_events.clone())
        .await
        .expect("interrupted turn still returns");
    barge.await.expect("barge-in task should finish");

    assert!(result.interrupted);
    assert_eq!(result.audio_segments, 2);
    assert_eq!(result.api_calls, 1);
    assert_eq!(result.response, "First part. Second part. Third part.");

    let events = drain_turn_events(&mut turn_events);
    assert!(events.contains(&TurnEvent::Interrupted {
        reason: BARGE_IN_SPEECH.to_owned()
    }));
    assert!(
        !events
            .iter()
            .any(|event| matches!(event, TurnEvent::AudioChunk { index: 2, .. }))
    );
    assert_eq!(process.phase(), TurnPhase::Idle);

    assert_eq!(
        harness.stored("S1").await.history,
        vec![
            HistoryEntry::user("tell me about the building"),
            HistoryEntry::assistant("First part. Second part. Third part."),
        ]
    );
    let records = harness.conversations.for_tenant("acme").await;
    assert_eq!(records.len(), 1);
    assert!(records[0].interrupted);
}

#[tokio::test(start_paused = true)]
async fn barge_in_during_tool_skips_second_model_call() {
    let harness = Harness::assemble(
        vec![
            ProviderStep::Stream(vec![
                text("Booking that now. "),
                tool_delta(
                    0,
                    Some("call_3"),
                    Some("book_tour"),
                    Some(
                        "{\"customer_name\":\"Dana\",\"tour_date\":\"2026-11-02\",\"location\":\"Main St\"}",
                    ),
                ),
                finish("tool_calls"),
            ]),
            reply("never requested"),
        ],
        HarnessParts {
            latency: tool_only_latency(100),
            ..HarnessParts::default()
        },
    );
    harness.seed("S1", Situation::Prospect).await;
    let mut observer = harness.turn_events.subscribe();
    let interrupts = Arc::clone(&harness.deps.interrupts);
    let barge = tokio::spawn(async move {
        loop {
            match observer.recv().await {
                Ok(TurnEvent::ToolStart { .. }) => break,
                Ok(_) => continue,
                Err(error) => panic!("turn events closed early: {error}"),
            }
        }
        assert!(interrupts.signal("S1", "caller spoke"));
    });

    let mut turn_events = harness.turn_events.subscribe();
    let mut agent_events = harness.events.subscribe();
    let result = harness
        .process("S1", "Book me a tour on Main St")
        .run(harness.turn_events.clone())
        .await
        .expect("interrupted turn still returns");
    barge.await.expect("barge-in task should finish");

    assert!(result.interrupted);
    assert_eq!(result.tool_used.as_deref(), Some("book_tour"));
    assert_eq!(result.api_calls, 1);
    assert_eq!(result.audio_segments, 0);
    assert_eq!(result.response, "Booking that now. ");
    assert_eq!(harness.provider.contexts().len(), 1, "no second model call");

    let events = drain_turn_events(&mut turn_events);
    assert!(
        events
            .iter()
            .any(|event| matches!(event, TurnEvent::ToolDone { name, .. } if name == "book_tour"))
    );
    assert!(events.contains(&TurnEvent::Interrupted {
        reason: BARGE_IN_TOOL.to_owned()
    }));
    assert!(
        !events
            .iter()
            .any(|event| matches!(event, TurnEvent::Complete { .. }))
    );
    assert!(
        drain_agent_events(&mut agent_events)
            .iter()
            .any(|event| matches!(event, AgentEvent::TourBooked { .. })),
        "the tool still ran"
    );

    let stored = harness.stored("S1").await;
    assert_eq!(
        stored.history,
        vec![
            HistoryEntry::user("Book me a tour on Main St"),
            HistoryEntry::assistant("Booking that now. "),
        ]
    );
}

#[tokio::test]
async fn barge_in_during_second_pass_keeps_partial_answer() {
    let (stream_tx, stream_rx) = mpsc::channel(8);
    let harness = Harness::new(vec![
        ProviderStep::Stream(vec![
            tool_delta(
                0,
                Some("call_4"),
                Some("take_note"),
                Some("{\"content\":\"Wants a tour\"}"),
            ),
            finish("tool_calls"),
        ]),
        ProviderStep::Live(stream_rx),
    ]);
    harness.seed("S1", Situation::Resident).await;
    let mut observer = harness.turn_events.subscribe();
    let interrupts = Arc::clone(&harness.deps.interrupts);
    let feeder = tokio::spawn(async move {
        stream_tx.send(text("Your tour ")).await.expect("stream open");
        loop {
            match observer.recv().await {
                Ok(TurnEvent::Chunk { .. }) => break,
                Ok(_) => continue,
                Err(error) => panic!("turn events closed early: {error}"),
            }
        }
        assert!(interrupts.signal("S1", "caller spoke"));
        let _ = stream_tx.send(text("request is noted.")).await;
        let _ = stream_tx.send(finish("stop")).await;
    });

    let mut turn_events = harness.turn_events.subscribe();
    let result = harness
        .process("S1", "Please note I want a tour")
        .run(harness.turn_events.clone())
        .await
        .expect("interrupted turn still returns");
    feeder.await.expect("feeder should finish");

    assert!(result.interrupted);
    assert_eq!(result.response, "Your tour ");
    assert_eq!(result.tool_used.as_deref(), Some("take_note"));
    assert_eq!(result.api_calls, 2);
    assert_eq!(result.audio_segments, 0);

    let events = drain_turn_events(&mut turn_events);
    assert!(events.contains(&TurnEvent::Interrupted {
        reason: BARGE_IN_SECOND_PASS.to_owned()
    }));
    assert!(
        !events
            .iter()
            .any(|event| matches!(event, TurnEvent::Complete { .. }))
    );
    assert!(
        !events
            .iter()
            .any(|event| matches!(event, TurnEvent::AudioChunk { .. }))
    );

    assert_eq!(
        harness.stored("S1").await.history,
        vec![
            HistoryEntry::user("Please note I want a tour"),
            HistoryEntry::assistant("Your tour "),
        ]
    );
}

#[tokio::test]
async fn prompt_builder_layers_tenant_situation_and_history() {
    let builder = TenantPromptBuilder::new(Arc::new(InMemoryTenantDirectory::new([test_tenant()])));
    let mut state = SessionState::new(Utc::now());
    state.situation = Situation::Prospect;
    state.history.push(HistoryEntry::user("hi"));
    state.history.push(HistoryEntry::assistant("hello"));

    let prompt = builder
        .build("acme", &state, "any tours?")
        .await
        .expect("prompt should build");
    assert!(prompt.system_prompt.starts_with("You are the Acme Properties assistant."));
    assert!(prompt.system_prompt.contains("Current situation: prospect"));
    assert!(prompt.system_prompt.contains(Situation::Prospect.system_prompt()));
    assert!(prompt.system_prompt.contains("Company: Acme Properties"));
    assert_eq!(prompt.messages.len(), 3);
    assert_eq!(prompt.messages[2].content.as_deref(), Some("any tours?"));

    let error = builder
        .build("ghost", &state, "hi")
        .await
        .expect_err("unknown tenant");
    assert!(matches!(error, RuntimeError::UnknownTenant { .. }));
}

#[tokio::test]
async fn session_repository_creates_once() {
    let store = Arc::new(InMemorySessionStore::new());
    let repository = SessionRepository::new(store.clone(), Duration::from_secs(60), 10);

    let (state, created) = repository
        .load_or_create("acme", "S1")
        .await
        .expect("create");
    assert!(created);
    assert_eq!(state.situation, Situation::Introduction);
    assert_eq!(state.context.get("caller_type"), Some(&Value::Null));

    let (_, created) = repository
        .load_or_create("acme", "S1")
        .await
        .expect("load");
    assert!(!created);
    assert_eq!(store.len().await, 1);
}

#[test]
fn speech_segments_follow_punctuation() {
    assert_eq!(
        split_segments("Hello there. How are you? Fine, thanks!"),
        ["Hello there.", "How are you?", "Fine,", "thanks!"]
    );
    assert_eq!(
        split_segments("one two three four five six seven eight"),
        ["one two three four five six", "seven eight"]
    );
    assert!(split_segments("   ").is_empty());
    assert_eq!(estimate_duration_ms("one two three"), 250);
}

#[tokio::test]
async fn mock_speech_round_trip() {
    let tts = MockTextToSpeech::new(LatencySimulator::disabled());
    let mut stream = tts.synthesize("First part. Second part.");
    let mut segments = Vec::new();
    while let Some(segment) = stream.recv().await {
        segments.push(segment.expect("segment"));
    }
    assert_eq!(segments.len(), 2);
    assert_eq!(segments[1].index, 1);
    assert_eq!(segments[1].audio, b"[AUDIO:1] Second part.".to_vec());

    let stt = MockSpeechToText::new(LatencySimulator::disabled());
    let silent = stt
        .transcribe(&AudioInput::new(Vec::new()))
        .await
        .expect("transcribe");
    assert_eq!(silent.transcript, "");
    assert_eq!(silent.confidence, 0.0);
}

#[tokio::test(start_paused = true)]
async fn latency_simulator_sleeps_only_when_enabled() {
    let started = tokio::time::Instant::now();
    LatencySimulator::disabled().tool_delay().await;
    assert_eq!(started.elapsed(), Duration::ZERO);

    let enabled = LatencySimulator::new(LatencyConfig {
        enabled: true,
        tool: DelayRange::new(40, 40),
        ..LatencyConfig::default()
    });
    enabled.tool_delay().await;
    assert_eq!(started.elapsed(), Duration::from_millis(40));
}

