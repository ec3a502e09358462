pub mod id;
pub mod lock;
pub mod model;

pub use id::{validate_session_id, InvalidSessionId};
pub use lock::SessionLockMap;
pub use model::{
    ClaudeState, MessageRole, SessionMetadata, SessionView, TmuxStatus, WindowDescriptor,
};
