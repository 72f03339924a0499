pub mod manager;
pub mod record;

pub use manager::SessionManager;
pub use record::{ActionRecord, ArtifactRef, SessionSnapshot, SessionState, SessionSummary};
