mod platform;
mod reader;
pub mod session;

pub use session::PtySession;

#[derive(Debug, thiserror::Error)]
pub enum PtyError {
    #[error("PTY error: {0}")]
    Pty(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
