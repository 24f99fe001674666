/// Transaction builder for Payment and TrustSet transactions
pub mod builder;
pub mod executor;
pub mod router;
pub mod trustline;
pub mod types;

pub use builder::{LedgerTransactionBuilder, TransactionError};
pub use executor::{PaymentExecutor, SubmissionError, VerifiedDeposit};
pub use router::TransactionRouter;
pub use trustline::{DEFAULT_TRUST_LIMIT, TrustlineManager};
pub use types::*;
