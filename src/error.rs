//! 统一错误定义
//!
//! 每个失败域一个独立的枚举，所有变体可被调用方匹配检查，
//! 不允许把具体失败折叠成裸字符串向上抛。

use thiserror::Error;

use crate::domain::ChainFamily;

/// JSON-RPC / HTTP 层错误
#[derive(Debug, Error)]
pub enum RpcError {
    /// 该链没有配置 RPC 端点
    #[error("no RPC endpoint for chain {0}")]
    NoEndpoint(u64),

    /// 底层 HTTP 传输失败
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// 节点返回了 JSON-RPC error 对象
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// 响应结构不符合预期（缺字段、非法十六进制等）
    #[error("malformed RPC response: {0}")]
    InvalidResponse(String),
}

/// 交易构建阶段错误
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("unknown chain: {0}")]
    UnknownChain(String),

    #[error("no RPC endpoint for chain {0}")]
    NoRpcEndpoint(u64),

    /// 代币转账缺少合约地址（注册表和调用方都没有提供）
    #[error("no token contract for {symbol} on {chain}")]
    TokenContractMissing { symbol: String, chain: String },

    #[error("gas estimation failed: {0}")]
    EstimationFailed(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("network failure: {0}")]
    Network(#[from] RpcError),
}

/// 广播阶段错误
#[derive(Debug, Error)]
pub enum BroadcastError {
    /// 该链家族不支持广播（Bitcoin 家族刻意返回此错误而不是静默跳过）
    #[error("broadcast not supported for {0} transactions")]
    UnsupportedChain(ChainFamily),

    /// 节点明确拒绝了这笔交易
    #[error("transaction rejected by network: {0}")]
    Rejected(String),

    /// EVM 广播需要数字链 ID
    #[error("EVM chain id required for broadcast")]
    MissingChainId,

    #[error("network failure: {0}")]
    Network(#[from] RpcError),
}

/// 签名阶段错误
///
/// WrongPin / DeviceUnreachable / Unsupported 必须保持可区分，
/// 调用方依赖这三者渲染不同的提示。
#[derive(Debug, Error)]
pub enum SignError {
    #[error("wrong PIN")]
    WrongPin,

    #[error("wallet is locked")]
    Locked,

    #[error("signing device unreachable: {0}")]
    DeviceUnreachable(String),

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("device timed out")]
    Timeout,

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("network failure during signing: {0}")]
    Network(#[from] RpcError),

    #[error("signing failed: {0}")]
    Signing(String),
}

/// 设备串口协议错误
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("not connected to device")]
    NotConnected,

    /// 命令在超时窗口内没有等到可解析的 JSON 行
    #[error("timeout waiting for device response")]
    Timeout,

    /// 连接握手失败（ping 未得到 pong）
    #[error("device handshake failed: {0}")]
    Handshake(String),

    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed device frame: {0}")]
    Frame(#[from] serde_json::Error),

    #[error("serial port error: {0}")]
    Port(String),
}

/// 端到端转账流程错误：每个阶段的失败保持独立可区分，
/// 调用方能渲染准确的提示而不是笼统的"出错了"
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("build failed: {0}")]
    Build(#[from] BuildError),

    #[error("signing failed: {0}")]
    Sign(#[from] SignError),

    #[error("broadcast failed: {0}")]
    Broadcast(#[from] BroadcastError),
}

/// Web3 请求桥错误
#[derive(Debug, Error)]
pub enum BridgeError {
    /// 所有候选通道都不可用，立即失败
    #[error("no bridge channel available")]
    NoChannel,

    #[error("request {0} timed out")]
    Timeout(u64),

    /// 对端返回的错误对象，保留 EIP-1193 错误码
    #[error("bridge error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// 等待响应时对端关闭
    #[error("bridge channel closed")]
    ChannelClosed,
}
