pub mod init;
pub mod key_provider;
pub mod keys;
pub mod provisioner;
pub mod strategies;
pub mod types;

pub use init::{InitializationProgress, WalletInitializationCoordinator};
pub use key_provider::{KeyProvider, NoKeys, SeedFileKeyProvider};
pub use keys::Keypair;
pub use provisioner::WalletProvisioner;
pub use strategies::{
	FaucetStrategy, KeyProviderStrategy, MockWalletStrategy, ProvisioningStrategy, StrategyOutcome,
};
pub use types::*;
