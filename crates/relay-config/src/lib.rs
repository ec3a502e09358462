pub mod daemon;
pub mod paths;

pub use daemon::DaemonConfig;
pub use paths::ConfigPaths;
