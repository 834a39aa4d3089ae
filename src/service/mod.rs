//! 核心服务：链适配、签名、广播、确认跟踪

pub mod blockchain_client;
pub mod non_evm_signer;
pub mod signer;
pub mod transaction_builder;
pub mod transaction_monitor;

pub use blockchain_client::BlockchainClient;
pub use signer::{DeviceSigner, SoftwareSigner, TransactionSigner};
pub use transaction_builder::TransactionBuilder;
pub use transaction_monitor::{NewPendingTx, PendingTxTracker};
