//! Persistence layer: a shared SQLite connection plus one repository per
//! entity family. Every repository is exposed as a trait so the
//! orchestrators depend on a contract rather than a concrete backend.

mod artifacts;
mod conversation;
mod database;
mod pulses;
mod sessions;
mod workflows;

pub use artifacts::{ArtifactRepository, SqliteArtifactRepository};
pub use conversation::{ConversationRepository, SqliteConversationRepository, TurnWithChildren};
pub use database::Database;
pub use pulses::{PreflightSetup, PreflightStatus, PulseRepository, SqlitePulseRepository};
pub use sessions::{SessionRepository, SqliteSessionRepository};
pub use workflows::{SqliteWorkflowRepository, WorkflowRepository};

use std::sync::Arc;

/// Convenience bundle of every repository, all backed by one `Database`
/// handle. Constructed once at startup and cloned freely (each field is an
/// `Arc`-like handle internally).
#[derive(Clone)]
pub struct Repositories {
    pub workflows: Arc<dyn WorkflowRepository>,
    pub sessions: Arc<dyn SessionRepository>,
    pub conversation: Arc<dyn ConversationRepository>,
    pub artifacts: Arc<dyn ArtifactRepository>,
    pub pulses: Arc<dyn PulseRepository>,
}

impl Repositories {
    pub fn new(db: Database) -> Self {
        Self {
            workflows: Arc::new(SqliteWorkflowRepository::new(db.clone())),
            sessions: Arc::new(SqliteSessionRepository::new(db.clone())),
            conversation: Arc::new(SqliteConversationRepository::new(db.clone())),
            artifacts: Arc::new(SqliteArtifactRepository::new(db.clone())),
            pulses: Arc::new(SqlitePulseRepository::new(db)),
        }
    }
}
