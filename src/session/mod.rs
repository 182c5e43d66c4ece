//! Conversation orchestration
//!
//! This module provides the `VoiceOrchestrator` state machine that manages:
//! - One capture session and one playback session, never active together
//! - The transcribe → converse → synthesize pipeline for each turn
//! - The in-memory conversation history
//! - Typed events for a UI layer

mod config;
mod context;
mod events;
mod orchestrator;

pub use config::OrchestratorConfig;
pub use context::{ConversationContext, ConversationTurn, Role, SessionIdentity};
pub use events::{SessionState, VoiceEvent};
pub use orchestrator::{AudioDevices, SessionSnapshot, VoiceOrchestrator};
