use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::playback::AudioRef;

/// Who a conversation belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub device_id: String,
    pub session_id: String,
    pub agent_identity: String,
}

impl SessionIdentity {
    /// New identity with a fresh session id
    pub fn new(device_id: impl Into<String>, agent_identity: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            session_id: format!("session-{}", uuid::Uuid::new_v4()),
            agent_identity: agent_identity.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One utterance in the conversation; never modified after it is appended
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_ref: Option<AudioRef>,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            audio_ref: None,
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>, audio_ref: Option<AudioRef>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            audio_ref,
            timestamp: Utc::now(),
        }
    }
}

/// In-memory conversation owned by one orchestrator
#[derive(Debug, Clone)]
pub struct ConversationContext {
    pub identity: SessionIdentity,
    history: Vec<ConversationTurn>,
}

impl ConversationContext {
    pub fn new(identity: SessionIdentity) -> Self {
        Self {
            identity,
            history: Vec::new(),
        }
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.history.push(turn);
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}
