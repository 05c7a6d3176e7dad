//! Parsing of embedded command tokens in model replies
//!
//! Tokens have the shape `[CMD: TYPE]` or `[CMD: TYPE | ARGUMENT]` with
//! case-sensitive type names. Anything that does not match a known type is
//! left in the text untouched.

const CMD_OPEN: &str = "[CMD: ";

/// The side-effecting commands the model may emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Weather,
    AddTask,
    ListTasks,
    Spotify,
    LinkedIn,
    Calendar,
}

impl CommandKind {
    /// Fixed evaluation order for dispatch
    pub const DISPATCH_ORDER: [CommandKind; 6] = [
        CommandKind::Weather,
        CommandKind::AddTask,
        CommandKind::ListTasks,
        CommandKind::Spotify,
        CommandKind::LinkedIn,
        CommandKind::Calendar,
    ];

    /// Wire name of the command type
    pub fn token(&self) -> &'static str {
        match self {
            CommandKind::Weather => "WEATHER",
            CommandKind::AddTask => "ADD_TASK",
            CommandKind::ListTasks => "LIST_TASKS",
            CommandKind::Spotify => "SPOTIFY",
            CommandKind::LinkedIn => "LINKEDIN",
            CommandKind::Calendar => "CALENDAR",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "WEATHER" => Some(CommandKind::Weather),
            "ADD_TASK" => Some(CommandKind::AddTask),
            "LIST_TASKS" => Some(CommandKind::ListTasks),
            "SPOTIFY" => Some(CommandKind::Spotify),
            "LINKEDIN" => Some(CommandKind::LinkedIn),
            "CALENDAR" => Some(CommandKind::Calendar),
            _ => None,
        }
    }
}

/// One parsed command token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub kind: CommandKind,
    pub argument: Option<String>,
}

/// Extract every recognized command token, in text order
pub fn parse_commands(text: &str) -> Vec<CommandInvocation> {
    let mut found = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find(CMD_OPEN) {
        let body_start = start + CMD_OPEN.len();
        let Some(end) = rest[body_start..].find(']') else {
            break;
        };
        let body = &rest[body_start..body_start + end];

        if let Some(invocation) = parse_body(body) {
            found.push(invocation);
        }
        rest = &rest[body_start + end + 1..];
    }

    found
}

/// First recognized token of the given kind, if any
pub fn first_command_of(text: &str, kind: CommandKind) -> Option<CommandInvocation> {
    parse_commands(text).into_iter().find(|c| c.kind == kind)
}

fn parse_body(body: &str) -> Option<CommandInvocation> {
    match body.split_once(" | ") {
        Some((token, argument)) => {
            let kind = CommandKind::from_token(token)?;
            let argument = argument.trim();
            if argument.is_empty() {
                return None;
            }
            Some(CommandInvocation {
                kind,
                argument: Some(argument.to_string()),
            })
        }
        None => Some(CommandInvocation {
            kind: CommandKind::from_token(body)?,
            argument: None,
        }),
    }
}
