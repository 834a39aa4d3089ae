//! 领域模型：链注册表、交易数据模型、确认状态机

pub mod chain;
pub mod transaction;

pub use chain::{ChainEntry, ChainFamily, ChainRegistry, SupportInfo, TokenContract, REGISTRY};
pub use transaction::{
    BroadcastResult, EvmFee, EvmUnsignedTx, NativeTransfer, NonEvmSignRequest,
    PendingTransaction, SignedTransaction, TokenIdentity, TransferIntent, TxStatus,
    UnsignedTransaction,
};
