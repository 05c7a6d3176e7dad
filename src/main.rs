//! Live wiring for the assistant loop.
//!
//! Reads commands from stdin while the loop runs: plain text is submitted as
//! a typed message, slash commands control listening, mode, and history.

use anyhow::{anyhow, Context};
use parlance::commands::{
    CommandDispatcher, FixedLocator, JsonTaskStore, NoCalendar, NoWeather, SystemLinkOpener,
    TaskStore,
};
use parlance::config::AssistantConfig;
use parlance::conversation::{
    AssistantEvent, Collaborators, ConversationOrchestrator, ConversationMode, Role,
};
use parlance::services::{ChatApi, HttpChat, HttpSynthesizer, HttpTranscriber};
use parlance::speech::{DiscardSink, SpeechPlayer, SynthesizedPlayer};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(not(feature = "audio-io"))]
struct NoMicrophone;

#[cfg(not(feature = "audio-io"))]
#[async_trait::async_trait]
impl parlance::audio::CaptureBackend for NoMicrophone {
    async fn open(
        &self,
        _session_id: parlance::audio::SessionId,
    ) -> parlance::Result<parlance::audio::OpenCapture> {
        Err(parlance::ParlanceError::CaptureStart(
            "Built without the audio-io feature".into(),
        ))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AssistantConfig::from_env();
    config.validate().map_err(|e| anyhow!(e))?;
    info!(
        "Starting {} against {}",
        config.assistant_name, config.backend_url
    );

    let chat = Arc::new(HttpChat::new(&config.backend_url, config.chat_timeout)?);
    if !chat.health().await {
        warn!("Backend at {} is not responding", config.backend_url);
    }

    let transcriber = Arc::new(HttpTranscriber::new(
        &config.backend_url,
        config.transcribe_timeout,
    )?);
    let synthesizer = Arc::new(HttpSynthesizer::new(
        &config.backend_url,
        config.speak_timeout,
    )?);
    let player: Arc<dyn SpeechPlayer> =
        Arc::new(SynthesizedPlayer::new(synthesizer, Arc::new(DiscardSink)));

    let tasks: Arc<dyn TaskStore> = Arc::new(
        JsonTaskStore::open("parlance_tasks.json").context("opening the task store")?,
    );
    let dispatcher = Arc::new(CommandDispatcher::new(
        Arc::clone(&chat) as Arc<dyn ChatApi>,
        Arc::new(NoCalendar),
        Arc::new(NoWeather),
        Arc::new(FixedLocator::new("here")),
        tasks,
        Arc::new(SystemLinkOpener),
        config.calendar_days,
    ));

    #[cfg(feature = "audio-io")]
    let capture: Arc<dyn parlance::audio::CaptureBackend> =
        Arc::new(parlance::audio::MicBackend::new(config.sample_interval));
    #[cfg(not(feature = "audio-io"))]
    let capture: Arc<dyn parlance::audio::CaptureBackend> = Arc::new(NoMicrophone);

    let mut handle = ConversationOrchestrator::spawn(
        config,
        Collaborators {
            capture,
            transcriber,
            chat,
            dispatcher,
            player,
        },
    );

    println!("Type a message, or: /listen /stop /on /ptt /clear /quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                match line {
                    "" => {}
                    "/listen" => handle.start_listening()?,
                    "/stop" => handle.stop_listening()?,
                    "/on" => handle.set_mode(ConversationMode::AlwaysOn)?,
                    "/ptt" => handle.set_mode(ConversationMode::PushToTalk)?,
                    "/clear" => handle.clear_history()?,
                    "/quit" => {
                        handle.shutdown()?;
                        break;
                    }
                    text => handle.submit_text(text)?,
                }
            }
            event = handle.next_event() => {
                let Some(event) = event else { break };
                match event {
                    AssistantEvent::MessageAdded(message) => {
                        let who = match message.role {
                            Role::User => "you",
                            Role::Assistant => "assistant",
                            Role::System => "system",
                        };
                        println!("[{}] {}", who, message.content);
                    }
                    AssistantEvent::PhaseChanged(phase) => info!("Phase: {:?}", phase),
                    AssistantEvent::ModeChanged(mode) => info!("Mode: {:?}", mode),
                    AssistantEvent::HistoryCleared => println!("(history cleared)"),
                    AssistantEvent::Volume { .. } => {}
                }
            }
        }
    }

    Ok(())
}
