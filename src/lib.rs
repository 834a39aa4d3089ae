//! VaultCore — 多链钱包的交易生命周期与设备桥核心
//!
//! 把转账意图变成链正确的未签名交易（四个互不兼容的链家族），
//! 交给两个签名后端之一（进程内软件签名器，或串口外接签名设备），
//! 广播到对应网络，并异步轮询确认直到终态。另有一条请求/响应桥
//! 让不受信任的嵌入页面在接触不到密钥材料的前提下请求签名。

pub mod bridge;
pub mod config;
pub mod domain;
pub mod error;
pub mod hardware;
pub mod infrastructure;
pub mod service;
pub mod utils;
pub mod wallet;

// 重新导出常用类型
pub use config::Config;
pub use error::{BridgeError, BroadcastError, BuildError, DeviceError, RpcError, SignError, TransferError};
pub use wallet::WalletCore;

// 统一模块导出
pub mod prelude {
    pub use crate::{
        config::Config,
        domain::{
            ChainFamily, ChainRegistry, PendingTransaction, SignedTransaction, TransferIntent,
            TxStatus, UnsignedTransaction,
        },
        error::{BroadcastError, BuildError, DeviceError, SignError, TransferError},
        service::{PendingTxTracker, SoftwareSigner, TransactionSigner},
        wallet::WalletCore,
    };
}
