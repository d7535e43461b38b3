//! Voice session management

pub mod manager;
pub mod voice_session;

pub use manager::{FeedOutcome, PipelineStats, SessionDefaults, SessionEvent, SessionManager};
pub use voice_session::{Capability, SessionFlags, SessionInfo, VoiceSession};
