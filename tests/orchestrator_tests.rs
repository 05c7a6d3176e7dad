//! End-to-end loop behavior with mock collaborators.
//!
//! Time is paused so silence holds, safety timeouts, and backoff resumes run
//! through the tokio clock's auto-advance instead of real waiting.

use async_trait::async_trait;
use parking_lot::Mutex;
use parlance::audio::{
    CaptureBackend, CaptureStopper, EncodedUtterance, OpenCapture, SessionId, VolumeSample,
};
use parlance::commands::{
    CommandDispatcher, FixedLocator, LinkOpener, MemoryTaskStore, NoCalendar, NoWeather,
    OpenedLink, TaskStore,
};
use parlance::config::AssistantConfig;
use parlance::conversation::{
    AssistantEvent, Collaborators, ConversationMode, ConversationOrchestrator, OrchestratorHandle,
    Phase, Role, Transcript,
};
use parlance::services::{ChatApi, ChatContext, HistoryEntry, Transcriber};
use parlance::speech::NullPlayer;
use parlance::{ParlanceError, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::sync::Semaphore;

struct TestCapture {
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
    senders: Mutex<Vec<UnboundedSender<VolumeSample>>>,
}

impl TestCapture {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            opened: AtomicUsize::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
            senders: Mutex::new(Vec::new()),
        })
    }

    fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn send_sample(&self, level: f32) {
        let senders = self.senders.lock();
        let sender = senders.last().expect("no open capture");
        sender
            .send(VolumeSample {
                level,
                at: Instant::now(),
            })
            .expect("sample stream closed");
    }
}

struct TestStopper {
    session_id: SessionId,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl CaptureStopper for TestStopper {
    async fn stop(self: Box<Self>) -> Result<EncodedUtterance> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(EncodedUtterance {
            session_id: self.session_id,
            bytes: vec![1, 2, 3, 4],
            mime: "audio/wav",
        })
    }
}

#[async_trait]
impl CaptureBackend for TestCapture {
    async fn open(&self, session_id: SessionId) -> Result<OpenCapture> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = unbounded_channel();
        self.senders.lock().push(tx);
        Ok(OpenCapture {
            samples: rx,
            stopper: Box::new(TestStopper {
                session_id,
                closed: Arc::clone(&self.closed),
            }),
        })
    }
}

struct ScriptedTranscriber {
    results: Mutex<VecDeque<Result<String>>>,
}

impl ScriptedTranscriber {
    fn new(results: Vec<Result<String>>) -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(results.into_iter().collect()),
        })
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, _utterance: EncodedUtterance) -> Result<String> {
        self.results
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(ParlanceError::Service("transcriber script exhausted".into())))
    }
}

/// Chat double whose calls can be held in flight behind a semaphore
struct GatedChat {
    calls: Mutex<Vec<String>>,
    responses: Mutex<VecDeque<Result<String>>>,
    gate: Option<Arc<Semaphore>>,
}

impl GatedChat {
    fn new(responses: Vec<Result<String>>) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            responses: Mutex::new(responses.into_iter().collect()),
            gate: None,
        })
    }

    fn gated(responses: Vec<Result<String>>, gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            responses: Mutex::new(responses.into_iter().collect()),
            gate: Some(gate),
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ChatApi for GatedChat {
    async fn chat(
        &self,
        message: &str,
        _context: &ChatContext,
        _history: &[HistoryEntry],
    ) -> Result<String> {
        self.calls.lock().push(message.to_string());
        if let Some(gate) = &self.gate {
            let permit = gate.acquire().await;
            permit.expect("gate closed").forget();
        }
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(ParlanceError::Service("chat script exhausted".into())))
    }
}

struct NoopLinks;

#[async_trait]
impl LinkOpener for NoopLinks {
    async fn open(&self, _native: &str, _web: &str) -> Result<OpenedLink> {
        Ok(OpenedLink::Native)
    }
}

struct Harness {
    handle: OrchestratorHandle,
    capture: Arc<TestCapture>,
    chat: Arc<GatedChat>,
    transcript: Arc<Transcript>,
}

fn test_dispatcher(chat: Arc<GatedChat>, calendar_days: u32) -> Arc<CommandDispatcher> {
    Arc::new(CommandDispatcher::new(
        chat as Arc<dyn ChatApi>,
        Arc::new(NoCalendar),
        Arc::new(NoWeather),
        Arc::new(FixedLocator::new("here")),
        Arc::new(MemoryTaskStore::new()) as Arc<dyn TaskStore>,
        Arc::new(NoopLinks),
        calendar_days,
    ))
}

fn start(
    mode: ConversationMode,
    transcriber: Arc<ScriptedTranscriber>,
    chat: Arc<GatedChat>,
) -> Harness {
    let config = AssistantConfig::new("Nova", "http://unused").with_mode(mode);
    let capture = TestCapture::new();
    let transcript = Arc::new(Transcript::with_greeting(&config.assistant_name));
    let dispatcher = test_dispatcher(Arc::clone(&chat), config.calendar_days);

    let handle = ConversationOrchestrator::spawn_with_transcript(
        Arc::clone(&transcript),
        config,
        Collaborators {
            capture: Arc::clone(&capture) as Arc<dyn CaptureBackend>,
            transcriber,
            chat: Arc::clone(&chat) as Arc<dyn ChatApi>,
            dispatcher,
            player: Arc::new(NullPlayer),
        },
    );

    Harness {
        handle,
        capture,
        chat,
        transcript,
    }
}

async fn wait_for_phase(handle: &mut OrchestratorHandle, want: Phase) {
    tokio::time::timeout(Duration::from_secs(120), async {
        while let Some(event) = handle.next_event().await {
            if let AssistantEvent::PhaseChanged(phase) = event {
                if phase == want {
                    return;
                }
            }
        }
        panic!("event stream ended before reaching {:?}", want);
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {:?}", want));
}

fn last_assistant_message(transcript: &Transcript) -> Option<String> {
    transcript
        .all()
        .into_iter()
        .rev()
        .find(|m| m.role == Role::Assistant)
        .map(|m| m.content)
}

#[tokio::test(start_paused = true)]
async fn test_voice_turn_keeps_exactly_one_capture_handle() {
    let transcriber = ScriptedTranscriber::new(vec![Ok("hey nova hello there".to_string())]);
    let chat = GatedChat::new(vec![Ok("Hi! How can I help?".to_string())]);
    let mut h = start(ConversationMode::AlwaysOn, transcriber, chat);

    // AlwaysOn starts listening on its own
    wait_for_phase(&mut h.handle, Phase::Listening).await;
    assert_eq!(h.capture.opened(), 1);

    // Speech, then silence long enough for the endpoint to fire
    h.capture.send_sample(0.5);
    h.capture.send_sample(0.01);
    wait_for_phase(&mut h.handle, Phase::Transcribing).await;
    wait_for_phase(&mut h.handle, Phase::Speaking).await;

    // The finished turn re-listens immediately under AlwaysOn
    wait_for_phase(&mut h.handle, Phase::Listening).await;
    assert_eq!(h.capture.opened(), 2);
    assert_eq!(h.capture.closed(), 1);
    assert_eq!(h.capture.opened() - h.capture.closed(), 1);

    assert_eq!(
        last_assistant_message(&h.transcript).as_deref(),
        Some("Hi! How can I help?")
    );
}

#[tokio::test(start_paused = true)]
async fn test_wake_word_gates_the_chat_call() {
    let transcriber = ScriptedTranscriber::new(vec![
        Ok("turn on the lights".to_string()),
        Ok("Hey Nova, what's the weather".to_string()),
    ]);
    let chat = GatedChat::new(vec![Ok("Looks sunny.".to_string())]);
    let mut h = start(ConversationMode::AlwaysOn, transcriber, chat);

    wait_for_phase(&mut h.handle, Phase::Listening).await;

    // No wake word: discarded silently, no chat call, auto-resume after backoff
    h.handle.stop_listening().unwrap();
    wait_for_phase(&mut h.handle, Phase::Transcribing).await;
    wait_for_phase(&mut h.handle, Phase::Listening).await;
    assert!(h.chat.calls().is_empty());
    assert_eq!(h.capture.opened(), 2);

    // Wake word present: exactly one chat call with the full transcript
    h.handle.stop_listening().unwrap();
    wait_for_phase(&mut h.handle, Phase::Speaking).await;
    assert_eq!(
        h.chat.calls(),
        vec!["Hey Nova, what's the weather".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_empty_transcript_is_discarded_silently() {
    let transcriber = ScriptedTranscriber::new(vec![Ok("   ".to_string())]);
    let chat = GatedChat::new(vec![]);
    let mut h = start(ConversationMode::AlwaysOn, transcriber, chat);

    wait_for_phase(&mut h.handle, Phase::Listening).await;
    let messages_before = h.transcript.len();

    h.handle.stop_listening().unwrap();
    wait_for_phase(&mut h.handle, Phase::Listening).await;

    assert!(h.chat.calls().is_empty());
    assert_eq!(h.transcript.len(), messages_before);
}

#[tokio::test(start_paused = true)]
async fn test_stale_chat_reply_after_safety_timeout_is_dropped() {
    let gate = Arc::new(Semaphore::new(0));
    let transcriber = ScriptedTranscriber::new(vec![]);
    let chat = GatedChat::gated(
        vec![Ok("late reply".to_string()), Ok("fresh reply".to_string())],
        Arc::clone(&gate),
    );
    let mut h = start(ConversationMode::PushToTalk, transcriber, chat);

    h.handle.submit_text("hello").unwrap();
    wait_for_phase(&mut h.handle, Phase::Thinking).await;

    // The held chat call trips the 15 s safety timeout
    wait_for_phase(&mut h.handle, Phase::Idle).await;
    let timeout_message = last_assistant_message(&h.transcript).unwrap();
    assert!(timeout_message.contains("timed out"));
    let messages_after_timeout = h.transcript.len();

    // The abandoned call completes late; its reply must change nothing
    gate.add_permits(1);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.transcript.len(), messages_after_timeout);

    // A fresh turn still works
    gate.add_permits(1);
    h.handle.submit_text("again").unwrap();
    wait_for_phase(&mut h.handle, Phase::Speaking).await;
    assert_eq!(
        last_assistant_message(&h.transcript).as_deref(),
        Some("fresh reply")
    );
}

#[tokio::test(start_paused = true)]
async fn test_mode_toggle_mid_flight_governs_the_next_resume() {
    let gate = Arc::new(Semaphore::new(0));
    let transcriber = ScriptedTranscriber::new(vec![]);
    let chat = GatedChat::gated(vec![Ok("answer".to_string())], Arc::clone(&gate));
    let mut h = start(ConversationMode::PushToTalk, transcriber, chat);

    h.handle.submit_text("hi").unwrap();
    wait_for_phase(&mut h.handle, Phase::Thinking).await;

    // Turn began under PushToTalk; the toggle lands while the call is in flight
    h.handle.set_mode(ConversationMode::AlwaysOn).unwrap();
    gate.add_permits(1);

    wait_for_phase(&mut h.handle, Phase::Speaking).await;
    wait_for_phase(&mut h.handle, Phase::Listening).await;
    assert_eq!(h.capture.opened(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_push_to_talk_turn_ends_idle_without_resume() {
    let transcriber = ScriptedTranscriber::new(vec![Ok("hello".to_string())]);
    let chat = GatedChat::new(vec![Ok("hey".to_string())]);
    let mut h = start(ConversationMode::PushToTalk, transcriber, chat);

    h.handle.start_listening().unwrap();
    wait_for_phase(&mut h.handle, Phase::Listening).await;

    // Manual stop still processes the captured audio; no wake word needed
    h.handle.stop_listening().unwrap();
    wait_for_phase(&mut h.handle, Phase::Speaking).await;
    wait_for_phase(&mut h.handle, Phase::Idle).await;
    assert_eq!(h.chat.calls().len(), 1);

    // No auto-resume under PushToTalk
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.capture.opened(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_typed_input_releases_the_open_capture() {
    let transcriber = ScriptedTranscriber::new(vec![]);
    let chat = GatedChat::new(vec![Ok("typed answer".to_string())]);
    let mut h = start(ConversationMode::PushToTalk, transcriber, chat);

    h.handle.start_listening().unwrap();
    wait_for_phase(&mut h.handle, Phase::Listening).await;
    assert_eq!(h.capture.opened(), 1);

    // Typed input abandons the recording and goes straight to the chat call
    h.handle.submit_text("what's up").unwrap();
    wait_for_phase(&mut h.handle, Phase::Thinking).await;
    assert_eq!(h.capture.closed(), 1);

    wait_for_phase(&mut h.handle, Phase::Speaking).await;
    assert_eq!(h.chat.calls(), vec!["what's up".to_string()]);
    assert_eq!(
        last_assistant_message(&h.transcript).as_deref(),
        Some("typed answer")
    );
}

struct DeniedCapture {
    opened: AtomicUsize,
}

#[async_trait]
impl CaptureBackend for DeniedCapture {
    async fn open(&self, _session_id: SessionId) -> Result<OpenCapture> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Err(ParlanceError::PermissionDenied)
    }
}

#[tokio::test(start_paused = true)]
async fn test_permission_denial_terminates_without_resume() {
    let config = AssistantConfig::new("Nova", "http://unused").with_mode(ConversationMode::AlwaysOn);
    let capture = Arc::new(DeniedCapture {
        opened: AtomicUsize::new(0),
    });
    let transcript = Arc::new(Transcript::with_greeting(&config.assistant_name));
    let chat = GatedChat::new(vec![]);
    let dispatcher = test_dispatcher(Arc::clone(&chat), config.calendar_days);

    let mut handle = ConversationOrchestrator::spawn_with_transcript(
        Arc::clone(&transcript),
        config,
        Collaborators {
            capture: Arc::clone(&capture) as Arc<dyn CaptureBackend>,
            transcriber: ScriptedTranscriber::new(vec![]),
            chat: Arc::clone(&chat) as Arc<dyn ChatApi>,
            dispatcher,
            player: Arc::new(NullPlayer),
        },
    );

    // The denial surfaces as a user-visible system message
    let message = tokio::time::timeout(Duration::from_secs(120), async {
        loop {
            match handle.next_event().await {
                Some(AssistantEvent::MessageAdded(m)) if m.role == Role::System => return m,
                Some(_) => {}
                None => panic!("event stream ended before the denial message"),
            }
        }
    })
    .await
    .expect("no denial message");
    assert!(message.content.contains("denied"));

    // Fatal: no re-listen even well past the longest backoff
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(capture.opened.load(Ordering::SeqCst), 1);
    while let Ok(event) = handle.events.try_recv() {
        assert!(!matches!(
            event,
            AssistantEvent::PhaseChanged(Phase::Listening)
        ));
    }
}

#[tokio::test(start_paused = true)]
async fn test_speech_behind_an_armed_hold_keeps_listening() {
    let transcriber = ScriptedTranscriber::new(vec![Ok("hey nova still here".to_string())]);
    let chat = GatedChat::new(vec![Ok("hello again".to_string())]);
    let mut h = start(ConversationMode::AlwaysOn, transcriber, chat);

    wait_for_phase(&mut h.handle, Phase::Listening).await;

    // Silence arms the hold with speech queued right behind it
    h.capture.send_sample(0.01);
    h.capture.send_sample(0.6);
    tokio::time::sleep(Duration::from_secs(2)).await;

    while let Ok(event) = h.handle.events.try_recv() {
        assert!(!matches!(
            event,
            AssistantEvent::PhaseChanged(Phase::Transcribing)
        ));
    }
    assert_eq!(h.capture.closed(), 0);

    // A fresh full hold of silence still ends the utterance
    h.capture.send_sample(0.01);
    wait_for_phase(&mut h.handle, Phase::Transcribing).await;
}

#[tokio::test(start_paused = true)]
async fn test_chat_failure_surfaces_apology_and_resumes() {
    let transcriber = ScriptedTranscriber::new(vec![Ok("hey nova ping".to_string())]);
    let chat = GatedChat::new(vec![Err(ParlanceError::Transport("refused".into()))]);
    let mut h = start(ConversationMode::AlwaysOn, transcriber, chat);

    wait_for_phase(&mut h.handle, Phase::Listening).await;
    h.handle.stop_listening().unwrap();

    // Failure message lands, then the 3 s backoff brings listening back
    wait_for_phase(&mut h.handle, Phase::Idle).await;
    assert_eq!(
        last_assistant_message(&h.transcript).as_deref(),
        Some("Sorry, I'm having trouble connecting.")
    );
    wait_for_phase(&mut h.handle, Phase::Listening).await;
    assert_eq!(h.capture.opened(), 2);
}
