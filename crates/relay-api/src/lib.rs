pub mod auth;
pub mod bridge;
pub mod error;
pub mod rate_limit;
pub mod registry;
pub mod rest;
pub mod router;
pub mod state;
pub mod ws;

pub use router::build_router;
pub use state::AppState;
