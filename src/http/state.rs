use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::audio::PlatformProfile;
use crate::session::{SessionIdentity, VoiceOrchestrator};

/// Builds an orchestrator for a new session
pub type OrchestratorFactory =
    Arc<dyn Fn(SessionIdentity, PlatformProfile) -> Result<VoiceOrchestrator> + Send + Sync>;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Live conversations (session_id → orchestrator)
    pub sessions: Arc<RwLock<HashMap<String, VoiceOrchestrator>>>,

    /// Agent every new session talks to
    pub agent_identity: String,

    pub factory: OrchestratorFactory,
}

impl AppState {
    pub fn new(agent_identity: impl Into<String>, factory: OrchestratorFactory) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            agent_identity: agent_identity.into(),
            factory,
        }
    }

    pub async fn get(&self, session_id: &str) -> Option<VoiceOrchestrator> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Destroy every live session
    pub async fn shutdown(&self) {
        let sessions: Vec<_> = self.sessions.write().await.drain().map(|(_, o)| o).collect();
        for orchestrator in sessions {
            orchestrator.destroy().await;
        }
    }
}
