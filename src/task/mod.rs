/// Client for the multi-agent task backend
pub mod channel;
pub mod client;
pub mod types;

pub use channel::{DEFAULT_RUN_TIMEOUT, RunChannel};
pub use client::TaskBackendClient;
pub use types::*;
