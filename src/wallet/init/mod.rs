pub mod coordinator;
pub mod progress_tracker;

pub use coordinator::WalletInitializationCoordinator;
pub use progress_tracker::{InitializationProgress, InitializationTracker};
