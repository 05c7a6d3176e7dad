//! The turn-taking conversation loop

pub mod orchestrator;
pub mod transcript;
pub mod turn;

pub use orchestrator::{
    AssistantCommand, AssistantEvent, Collaborators, ConversationOrchestrator, OrchestratorHandle,
};
pub use transcript::{Message, Role, Transcript};
pub use turn::{ConversationMode, Phase, SafetyTimer, TurnId};
