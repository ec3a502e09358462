pub mod cache;
pub mod discovery;
pub mod roots;
pub mod scanner;
pub mod watch;

pub use discovery::Discovery;
pub use roots::{ProjectRoots, RootEntry, RootsError};
