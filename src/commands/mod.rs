//! Command dispatch
//!
//! Detects embedded `[CMD: ...]` tokens in a model reply, performs their
//! side effects, and rewrites the reply through follow-up chat calls carrying
//! the side-effect results. Dispatch never fails the turn: a failing command
//! leaves the working text as it was and processing moves on.

pub mod effects;
pub mod parser;
pub mod tasks;

pub use effects::{
    CalendarProvider, FixedLocator, LinkOpener, Locator, NoCalendar, NoWeather, OpenedLink,
    SystemLinkOpener, WeatherProvider,
};
pub use parser::{first_command_of, parse_commands, CommandInvocation, CommandKind};
pub use tasks::{JsonTaskStore, MemoryTaskStore, TaskRecord, TaskStore};

use crate::services::{ChatApi, ChatContext};
use crate::{ParlanceError, Result};
use std::sync::Arc;
use tracing::{debug, warn};

/// Executes embedded commands and round-trips their results to the model
pub struct CommandDispatcher {
    chat: Arc<dyn ChatApi>,
    calendar: Arc<dyn CalendarProvider>,
    weather: Arc<dyn WeatherProvider>,
    locator: Arc<dyn Locator>,
    tasks: Arc<dyn TaskStore>,
    links: Arc<dyn LinkOpener>,
    calendar_days: u32,
}

impl CommandDispatcher {
    pub fn new(
        chat: Arc<dyn ChatApi>,
        calendar: Arc<dyn CalendarProvider>,
        weather: Arc<dyn WeatherProvider>,
        locator: Arc<dyn Locator>,
        tasks: Arc<dyn TaskStore>,
        links: Arc<dyn LinkOpener>,
        calendar_days: u32,
    ) -> Self {
        Self {
            chat,
            calendar,
            weather,
            locator,
            tasks,
            links,
            calendar_days,
        }
    }

    /// Process one reply. Commands are evaluated in the fixed order
    /// Weather, AddTask, ListTasks, Spotify, LinkedIn, Calendar; each
    /// successful side effect triggers one follow-up chat call whose
    /// response replaces the working text, so later commands operate on the
    /// already-rewritten reply.
    pub async fn dispatch(&self, reply: &str, context: &ChatContext) -> String {
        let mut working = reply.to_string();

        for kind in CommandKind::DISPATCH_ORDER {
            let Some(invocation) = first_command_of(&working, kind) else {
                continue;
            };

            debug!("Dispatching command {:?}", kind);
            let summary = match self.execute(&invocation).await {
                Ok(summary) => summary,
                Err(e) => {
                    warn!("Command {:?} failed: {}", kind, e);
                    continue;
                }
            };

            let message = format!(
                "[SYSTEM_DATA] {}\n\nPlease summarize this for the user naturally.",
                summary
            );
            match self.chat.chat(&message, context, &[]).await {
                Ok(rewritten) => working = rewritten,
                Err(e) => {
                    warn!("Follow-up chat for {:?} failed: {}", kind, e);
                }
            }
        }

        working
    }

    async fn execute(&self, invocation: &CommandInvocation) -> Result<String> {
        match invocation.kind {
            CommandKind::Weather => {
                let location = required_argument(invocation)?;
                let location = if location.eq_ignore_ascii_case("here") {
                    self.locator.current_location().await?
                } else {
                    location
                };
                let report = self.weather.current(&location).await?;
                Ok(format!(
                    "Here is the current weather for {}: {}",
                    location, report
                ))
            }
            CommandKind::AddTask => {
                let text = required_argument(invocation)?;
                let record = self.tasks.add(&text)?;
                let count = self.tasks.list()?.len();
                Ok(format!(
                    "Added task #{} \"{}\". The user's todo list now has {} item(s).",
                    record.id, record.text, count
                ))
            }
            CommandKind::ListTasks => {
                let tasks = self.tasks.list()?;
                let listing = serde_json::to_string(&tasks)
                    .map_err(|e| ParlanceError::Command(e.to_string()))?;
                Ok(format!("Here is the user's todo list: {}", listing))
            }
            CommandKind::Spotify => {
                let query = required_argument(invocation)?;
                let (native, web) = effects::spotify_links(&query);
                let opened = self.links.open(&native, &web).await?;
                Ok(describe_opened("Spotify", &query, opened))
            }
            CommandKind::LinkedIn => {
                let query = required_argument(invocation)?;
                let (native, web) = effects::linkedin_links(&query);
                let opened = self.links.open(&native, &web).await?;
                Ok(describe_opened("LinkedIn", &query, opened))
            }
            CommandKind::Calendar => {
                let events = self.calendar.upcoming_events(self.calendar_days).await?;
                Ok(format!(
                    "Here are the user's calendar events for the next {} days: {}",
                    self.calendar_days, events
                ))
            }
        }
    }
}

fn required_argument(invocation: &CommandInvocation) -> Result<String> {
    invocation.argument.clone().ok_or_else(|| {
        ParlanceError::Command(format!(
            "{} requires an argument",
            invocation.kind.token()
        ))
    })
}

fn describe_opened(target: &str, query: &str, opened: OpenedLink) -> String {
    match opened {
        OpenedLink::Native => format!("Opened the {} app searching for \"{}\".", target, query),
        OpenedLink::WebFallback => format!(
            "Opened {} in the browser searching for \"{}\".",
            target, query
        ),
    }
}
