//! The turn-taking state machine
//!
//! One task drains a single event queue; user commands and internal
//! completions (endpoint, transcription, chat reply, dispatch, playback,
//! timers) share it. Every spawned continuation carries the turn id it was
//! created under, so a late completion from an abandoned turn is dropped by
//! the (turn, phase) guard instead of corrupting the current turn.
//!
//! Mode is a field of the loop, read at the moment of every scheduling
//! decision. Resume events are scheduled on every recoverable termination
//! and consult the live mode when they fire, so a mid-flight toggle affects
//! the next decision rather than the value captured when the turn began.

use crate::audio::{
    AudioCaptureSession, CaptureBackend, SilenceEndpointDetector, VolumeSample,
};
use crate::commands::CommandDispatcher;
use crate::config::AssistantConfig;
use crate::conversation::transcript::{Message, Role, Transcript};
use crate::conversation::turn::{ConversationMode, Phase, SafetyTimer, TurnId};
use crate::services::{ChatApi, ChatContext, Transcriber};
use crate::speech::{SpeechPlaybackController, SpeechPlayer, UtteranceId};
use crate::{ParlanceError, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

/// User-facing commands accepted by the loop
#[derive(Debug, Clone)]
pub enum AssistantCommand {
    StartListening,
    StopListening,
    /// Typed input; starts a turn directly at the chat call
    SubmitText(String),
    SetMode(ConversationMode),
    ClearHistory,
    Shutdown,
}

/// Notifications emitted toward the UI
#[derive(Debug, Clone)]
pub enum AssistantEvent {
    PhaseChanged(Phase),
    ModeChanged(ConversationMode),
    /// Live microphone level while listening
    Volume { level: f32 },
    MessageAdded(Message),
    HistoryCleared,
}

/// Everything on the loop's queue
enum LoopEvent {
    Command(AssistantCommand),
    Endpoint { turn: TurnId },
    Transcribed { turn: TurnId, result: Result<String> },
    ChatReplied { turn: TurnId, result: Result<String> },
    Dispatched { turn: TurnId, text: String },
    SpeechDone { utterance: UtteranceId },
    SafetyTimeout { turn: TurnId },
    Resume,
}

/// The external collaborators the loop is wired to
pub struct Collaborators {
    pub capture: Arc<dyn CaptureBackend>,
    pub transcriber: Arc<dyn Transcriber>,
    pub chat: Arc<dyn ChatApi>,
    pub dispatcher: Arc<CommandDispatcher>,
    pub player: Arc<dyn SpeechPlayer>,
}

/// Command sender and event stream for a running loop
pub struct OrchestratorHandle {
    commands: UnboundedSender<LoopEvent>,
    pub events: UnboundedReceiver<AssistantEvent>,
}

impl OrchestratorHandle {
    pub fn send(&self, command: AssistantCommand) -> Result<()> {
        self.commands
            .send(LoopEvent::Command(command))
            .map_err(|_| ParlanceError::Channel("Assistant loop is gone".into()))
    }

    pub fn start_listening(&self) -> Result<()> {
        self.send(AssistantCommand::StartListening)
    }

    pub fn stop_listening(&self) -> Result<()> {
        self.send(AssistantCommand::StopListening)
    }

    pub fn submit_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(AssistantCommand::SubmitText(text.into()))
    }

    pub fn set_mode(&self, mode: ConversationMode) -> Result<()> {
        self.send(AssistantCommand::SetMode(mode))
    }

    pub fn clear_history(&self) -> Result<()> {
        self.send(AssistantCommand::ClearHistory)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(AssistantCommand::Shutdown)
    }

    pub async fn next_event(&mut self) -> Option<AssistantEvent> {
        self.events.recv().await
    }
}

/// The state machine driving the whole loop
pub struct ConversationOrchestrator {
    config: AssistantConfig,
    context: ChatContext,
    mode: ConversationMode,
    phase: Phase,
    turn: TurnId,
    capture: AudioCaptureSession,
    transcriber: Arc<dyn Transcriber>,
    chat: Arc<dyn ChatApi>,
    dispatcher: Arc<CommandDispatcher>,
    playback: SpeechPlaybackController,
    transcript: Arc<Transcript>,
    safety_timer: Option<SafetyTimer>,
    current_utterance: Option<UtteranceId>,
    loop_tx: UnboundedSender<LoopEvent>,
    ui_tx: UnboundedSender<AssistantEvent>,
}

impl ConversationOrchestrator {
    /// Start the loop and return its handle
    pub fn spawn(config: AssistantConfig, collaborators: Collaborators) -> OrchestratorHandle {
        Self::spawn_with_transcript(
            Arc::new(Transcript::with_greeting(&config.assistant_name)),
            config,
            collaborators,
        )
    }

    /// Start the loop over an existing transcript
    pub fn spawn_with_transcript(
        transcript: Arc<Transcript>,
        config: AssistantConfig,
        collaborators: Collaborators,
    ) -> OrchestratorHandle {
        let (loop_tx, loop_rx) = unbounded_channel();
        let (ui_tx, ui_rx) = unbounded_channel();
        let (speech_tx, mut speech_rx) = unbounded_channel::<crate::speech::SpeechOutcome>();

        // Playback outcomes feed the main queue
        let forward_tx = loop_tx.clone();
        tokio::spawn(async move {
            while let Some(outcome) = speech_rx.recv().await {
                let _ = forward_tx.send(LoopEvent::SpeechDone {
                    utterance: outcome.utterance,
                });
            }
        });

        let orchestrator = Self {
            context: ChatContext::new(config.assistant_name.clone()),
            mode: config.mode,
            phase: Phase::Idle,
            turn: TurnId::first(),
            capture: AudioCaptureSession::new(collaborators.capture),
            transcriber: collaborators.transcriber,
            chat: collaborators.chat,
            dispatcher: collaborators.dispatcher,
            playback: SpeechPlaybackController::new(collaborators.player, speech_tx),
            transcript,
            safety_timer: None,
            current_utterance: None,
            loop_tx: loop_tx.clone(),
            ui_tx,
            config,
        };

        if orchestrator.mode == ConversationMode::AlwaysOn {
            let _ = loop_tx.send(LoopEvent::Resume);
        }

        tokio::spawn(orchestrator.run(loop_rx));

        OrchestratorHandle {
            commands: loop_tx,
            events: ui_rx,
        }
    }

    async fn run(mut self, mut events: UnboundedReceiver<LoopEvent>) {
        info!("Assistant loop started as {}", self.config.assistant_name);
        while let Some(event) = events.recv().await {
            if !self.advance(event).await {
                break;
            }
        }
        self.capture.release().await;
        self.playback.cancel();
        info!("Assistant loop stopped");
    }

    /// Single entry point; dispatches on (phase, event)
    async fn advance(&mut self, event: LoopEvent) -> bool {
        match event {
            LoopEvent::Command(command) => return self.handle_command(command).await,
            LoopEvent::Endpoint { turn } => {
                if turn == self.turn && self.phase == Phase::Listening {
                    self.finish_listening().await;
                }
            }
            LoopEvent::Transcribed { turn, result } => {
                if turn == self.turn && self.phase == Phase::Transcribing {
                    self.clear_safety_timer();
                    self.handle_transcription(result);
                }
            }
            LoopEvent::ChatReplied { turn, result } => {
                if turn == self.turn && self.phase == Phase::Thinking {
                    self.clear_safety_timer();
                    self.handle_reply(result);
                }
            }
            LoopEvent::Dispatched { turn, text } => {
                if turn == self.turn && self.phase == Phase::Dispatching {
                    self.start_speaking(text);
                }
            }
            LoopEvent::SpeechDone { utterance } => {
                if self.phase == Phase::Speaking && self.current_utterance == Some(utterance) {
                    self.current_utterance = None;
                    self.finish_turn().await;
                }
            }
            LoopEvent::SafetyTimeout { turn } => {
                if turn == self.turn && self.phase.is_network_waiting() {
                    warn!(
                        "Turn {} hit the safety timeout in {:?}",
                        turn.value(),
                        self.phase
                    );
                    self.safety_timer = None;
                    self.push_message(
                        Role::Assistant,
                        ParlanceError::NetworkTimeout(self.config.safety_timeout).user_message(),
                    );
                    self.terminate_turn(self.config.transcribe_backoff);
                }
            }
            LoopEvent::Resume => {
                if self.mode == ConversationMode::AlwaysOn && self.phase == Phase::Idle {
                    self.begin_listening().await;
                }
            }
        }
        true
    }

    async fn handle_command(&mut self, command: AssistantCommand) -> bool {
        match command {
            AssistantCommand::StartListening => match self.phase {
                Phase::Idle => self.begin_listening().await,
                Phase::Speaking => {
                    self.playback.cancel();
                    self.current_utterance = None;
                    self.begin_listening().await;
                }
                // Ignored while a request pipeline is in flight or already listening
                _ => debug!("StartListening ignored in {:?}", self.phase),
            },
            AssistantCommand::StopListening => {
                if self.phase == Phase::Listening {
                    self.finish_listening().await;
                }
            }
            AssistantCommand::SubmitText(text) => {
                let text = text.trim().to_string();
                if text.is_empty() {
                    return true;
                }
                match self.phase {
                    Phase::Transcribing | Phase::Thinking | Phase::Dispatching => {
                        debug!("SubmitText ignored in {:?}", self.phase);
                    }
                    _ => {
                        // Typed input abandons any listening or speaking in progress
                        self.capture.release().await;
                        self.playback.cancel();
                        self.current_utterance = None;
                        self.new_turn();
                        self.begin_thinking(text);
                    }
                }
            }
            AssistantCommand::SetMode(mode) => {
                if mode != self.mode {
                    info!("Mode changed to {:?}", mode);
                    self.mode = mode;
                    self.emit(AssistantEvent::ModeChanged(mode));
                    match mode {
                        ConversationMode::AlwaysOn if self.phase == Phase::Idle => {
                            self.begin_listening().await;
                        }
                        ConversationMode::PushToTalk if self.phase == Phase::Listening => {
                            // Manual stop; the captured audio is still processed
                            self.finish_listening().await;
                        }
                        _ => {}
                    }
                }
            }
            AssistantCommand::ClearHistory => {
                self.transcript.reset(&self.config.assistant_name);
                self.emit(AssistantEvent::HistoryCleared);
            }
            AssistantCommand::Shutdown => return false,
        }
        true
    }

    /// Open a fresh capture session and detector under a new turn
    async fn begin_listening(&mut self) {
        self.new_turn();
        match self.capture.start().await {
            Ok(started) => {
                self.set_phase(Phase::Listening);
                self.spawn_listen_task(self.turn, started.samples);
            }
            Err(e) if e.is_recoverable() => {
                warn!("Capture start failed: {}", e);
                self.terminate_turn(self.config.capture_backoff);
            }
            Err(e) => {
                error!("Capture unavailable: {}", e);
                self.push_message(Role::System, e.user_message());
                self.set_phase(Phase::Idle);
            }
        }
    }

    /// Drives the detector from the sample stream until it fires or the
    /// stream ends. Runs off-loop; the endpoint comes back through the queue.
    fn spawn_listen_task(&self, turn: TurnId, mut samples: UnboundedReceiver<VolumeSample>) {
        let mut detector = SilenceEndpointDetector::new(
            self.config.silence_threshold,
            self.config.silence_hold,
        );
        let loop_tx = self.loop_tx.clone();
        let ui_tx = self.ui_tx.clone();

        tokio::spawn(async move {
            loop {
                let deadline = detector.silence_deadline();
                tokio::select! {
                    sample = samples.recv() => match sample {
                        Some(sample) => {
                            let _ = ui_tx.send(AssistantEvent::Volume { level: sample.level });
                            detector.observe(sample.level, sample.at);
                        }
                        None => break,
                    },
                    _ = sleep_until_deadline(deadline) => {
                        // The sleep only completes when a deadline was armed
                        if let Some(at) = deadline {
                            // Samples already queued outrank the elapsed
                            // hold; a loud one that lost the select race
                            // cancels the endpoint.
                            while let Ok(sample) = samples.try_recv() {
                                let _ = ui_tx.send(AssistantEvent::Volume { level: sample.level });
                                detector.observe(sample.level, sample.at);
                            }
                            if detector.try_fire(at) {
                                let _ = loop_tx.send(LoopEvent::Endpoint { turn });
                                break;
                            }
                        }
                    }
                }
            }
        });
    }

    /// Stop capture and hand the utterance to the transcriber
    async fn finish_listening(&mut self) {
        match self.capture.stop().await {
            Ok(utterance) => {
                debug!(
                    "Turn {} captured {} bytes",
                    self.turn.value(),
                    utterance.len()
                );
                self.set_phase(Phase::Transcribing);
                self.arm_safety_timer();

                let transcriber = Arc::clone(&self.transcriber);
                let loop_tx = self.loop_tx.clone();
                let turn = self.turn;
                tokio::spawn(async move {
                    let result = transcriber.transcribe(utterance).await;
                    let _ = loop_tx.send(LoopEvent::Transcribed { turn, result });
                });
            }
            Err(e) => {
                warn!("Capture stop failed: {}", e);
                self.terminate_turn(self.config.capture_backoff);
            }
        }
    }

    fn handle_transcription(&mut self, result: Result<String>) {
        match result {
            Ok(text) => {
                let text = text.trim().to_string();
                if text.is_empty() {
                    debug!("Empty transcript; discarding turn {}", self.turn.value());
                    self.terminate_turn(self.config.discard_backoff);
                    return;
                }
                if self.mode == ConversationMode::AlwaysOn
                    && !heard_wake_word(&text, &self.config.assistant_name)
                {
                    debug!("No wake word in transcript; discarding");
                    self.terminate_turn(self.config.discard_backoff);
                    return;
                }
                self.begin_thinking(text);
            }
            Err(e) => {
                warn!("Transcription failed: {}", e);
                self.push_message(Role::Assistant, e.user_message());
                self.terminate_turn(self.config.transcribe_backoff);
            }
        }
    }

    /// Send the text to the chat service with the prior-turn context window
    fn begin_thinking(&mut self, text: String) {
        // The window covers prior turns only, taken before this message lands
        let history = self.transcript.recent(self.config.history_window);
        self.push_message(Role::User, text.clone());
        self.set_phase(Phase::Thinking);
        self.arm_safety_timer();

        let chat = Arc::clone(&self.chat);
        let context = self.context.clone();
        let loop_tx = self.loop_tx.clone();
        let turn = self.turn;
        tokio::spawn(async move {
            let result = chat.chat(&text, &context, &history).await;
            let _ = loop_tx.send(LoopEvent::ChatReplied { turn, result });
        });
    }

    fn handle_reply(&mut self, result: Result<String>) {
        match result {
            Ok(reply) => {
                self.set_phase(Phase::Dispatching);

                let dispatcher = Arc::clone(&self.dispatcher);
                let context = self.context.clone();
                let loop_tx = self.loop_tx.clone();
                let turn = self.turn;
                tokio::spawn(async move {
                    let text = dispatcher.dispatch(&reply, &context).await;
                    let _ = loop_tx.send(LoopEvent::Dispatched { turn, text });
                });
            }
            Err(e) => {
                warn!("Chat call failed: {}", e);
                self.push_message(Role::Assistant, e.user_message());
                self.terminate_turn(self.config.chat_backoff);
            }
        }
    }

    fn start_speaking(&mut self, text: String) {
        self.push_message(Role::Assistant, text.clone());
        self.set_phase(Phase::Speaking);
        self.current_utterance = Some(self.playback.speak(text));
    }

    /// After speaking, success and failure alike: re-listen or go idle
    async fn finish_turn(&mut self) {
        if self.mode == ConversationMode::AlwaysOn {
            self.begin_listening().await;
        } else {
            self.set_phase(Phase::Idle);
        }
    }

    /// Recoverable termination: go idle and schedule a resume. The resume is
    /// always scheduled; whether it acts is decided by the live mode when it
    /// fires.
    fn terminate_turn(&mut self, backoff: Duration) {
        self.clear_safety_timer();
        self.set_phase(Phase::Idle);
        self.schedule_resume(backoff);
    }

    fn schedule_resume(&self, after: Duration) {
        let loop_tx = self.loop_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = loop_tx.send(LoopEvent::Resume);
        });
    }

    fn new_turn(&mut self) {
        self.clear_safety_timer();
        self.turn = self.turn.successor();
    }

    fn arm_safety_timer(&mut self) {
        let timer = SafetyTimer::arm(
            self.turn,
            self.config.safety_timeout,
            self.loop_tx.clone(),
            |turn| LoopEvent::SafetyTimeout { turn },
        );
        self.safety_timer = Some(timer);
    }

    fn clear_safety_timer(&mut self) {
        if let Some(timer) = self.safety_timer.take() {
            timer.cancel();
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            debug!("Phase {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
            self.emit(AssistantEvent::PhaseChanged(phase));
        }
    }

    fn push_message(&self, role: Role, content: impl Into<String>) {
        let message = self.transcript.add(role, content);
        self.emit(AssistantEvent::MessageAdded(message));
    }

    fn emit(&self, event: AssistantEvent) {
        // UI receiver gone is not an error for the loop
        let _ = self.ui_tx.send(event);
    }
}

/// Case-insensitive substring match of the assistant's name
fn heard_wake_word(transcript: &str, assistant_name: &str) -> bool {
    transcript
        .to_lowercase()
        .contains(&assistant_name.to_lowercase())
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}
