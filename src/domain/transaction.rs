//! 交易数据模型
//!
//! 未签名交易按链家族封闭建模：家族标签唯一决定后续的
//! 签名器路径和广播端点，构建完成后不可变。

use chrono::{DateTime, Utc};
use ethers::types::{Bytes, U256};
use serde::{Deserialize, Serialize};

use super::chain::ChainFamily;

/// 转账意图（UI 层只读输入）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferIntent {
    /// 钱包链标识 (chain-0 .. chain-11)
    pub chain_id: String,
    pub from: String,
    pub to: String,
    /// 十进制金额字符串，链原生单位
    pub amount: String,
    /// 为空表示原生代币转账
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<TokenIdentity>,
}

impl TransferIntent {
    pub fn is_native_token(&self) -> bool {
        self.token.is_none()
    }
}

/// 代币身份
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenIdentity {
    pub symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u8>,
}

/// EVM 费用字段：二选一，不允许同时设置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EvmFee {
    /// EIP-1559 动态费用
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
    /// 传统 gas price
    Legacy { gas_price: U256 },
}

/// EVM 未签名交易
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvmUnsignedTx {
    pub chain_id: u64,
    pub to: String,
    pub value: U256,
    /// 合约调用数据（代币转账时为 transfer 编码）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Bytes>,
    pub nonce: u64,
    pub gas_limit: U256,
    pub fee: EvmFee,
}

/// 非 EVM 链的轻量转账参数（lamports/sun/satoshis 已按基础单位换算）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeTransfer {
    pub from: String,
    pub to: String,
    /// 原始十进制金额字符串
    pub amount: String,
    /// 基础单位整数值
    pub base_units: u64,
}

/// 未签名交易（按家族封闭）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "lowercase")]
pub enum UnsignedTransaction {
    Evm(EvmUnsignedTx),
    Solana(NativeTransfer),
    Tron(NativeTransfer),
    Bitcoin(NativeTransfer),
}

impl UnsignedTransaction {
    pub fn family(&self) -> ChainFamily {
        match self {
            UnsignedTransaction::Evm(_) => ChainFamily::Evm,
            UnsignedTransaction::Solana(_) => ChainFamily::Solana,
            UnsignedTransaction::Tron(_) => ChainFamily::Tron,
            UnsignedTransaction::Bitcoin(_) => ChainFamily::Bitcoin,
        }
    }

    pub fn evm_chain_id(&self) -> Option<u64> {
        match self {
            UnsignedTransaction::Evm(tx) => Some(tx.chain_id),
            _ => None,
        }
    }
}

/// 已签名交易：不透明载荷 + 选择广播端点所需的标签
///
/// 每笔未签名交易恰好产生一份，广播恰好消费一次。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub family: ChainFamily,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    /// 家族相关编码：EVM 为 0x-hex 原始交易，Solana 为 base58，
    /// TRON 为带签名的 JSON，Bitcoin 为原始 hex
    pub payload: String,
    /// 部分家族在签名时即可得出哈希
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
}

/// 非 EVM 签名请求（不经过链适配器构建，直接交给签名器）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NonEvmSignRequest {
    pub family: ChainFamily,
    pub from: String,
    pub to: String,
    pub amount: String,
    pub is_native_token: bool,
}

/// 广播结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastResult {
    pub tx_hash: String,
}

// ============ 确认跟踪状态 ============

/// 在途交易状态机：pending → confirming → {confirmed | failed}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    /// 已广播，尚未找到回执
    Pending,
    /// 已上链，确认数未达标
    Confirming,
    /// 确认数达标（终态）
    Confirmed,
    /// 链上执行失败或轮询耗尽（终态）
    Failed,
}

impl TxStatus {
    /// 是否为终态（触发延迟驱逐）
    pub fn is_final(&self) -> bool {
        matches!(self, TxStatus::Confirmed | TxStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Confirming => "confirming",
            TxStatus::Confirmed => "confirmed",
            TxStatus::Failed => "failed",
        }
    }

    /// 状态转换合法性
    pub fn can_transition_to(&self, target: &Self) -> bool {
        use TxStatus::*;
        match (self, target) {
            (Pending, Confirming) | (Pending, Confirmed) | (Pending, Failed) => true,
            (Confirming, Confirming) | (Confirming, Confirmed) | (Confirming, Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 跟踪器持有的在途交易条目
///
/// 唯一写入方是确认跟踪器；订阅方只拿克隆快照。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTransaction {
    pub id: String,
    pub tx_hash: String,
    /// 钱包链标识
    pub chain_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evm_chain_id: Option<u64>,
    pub token_symbol: String,
    pub amount: String,
    pub to_address: String,
    pub from_address: String,
    pub timestamp: DateTime<Utc>,
    pub status: TxStatus,
    pub current_confirmations: u64,
    pub required_confirmations: u64,
    /// 标记乐观确认：链没有可轮询端点时直接置为 confirmed，
    /// 这是尽力而为的假设而不是保证
    #[serde(default)]
    pub best_effort: bool,
}
