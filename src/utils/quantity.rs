//! JSON-RPC 十六进制数量编解码

use ethers::types::U256;

use crate::error::RpcError;

/// 解析 "0x..." 数量为 u64
pub fn parse_u64(hex: &str) -> Result<u64, RpcError> {
    u64::from_str_radix(hex.trim_start_matches("0x"), 16)
        .map_err(|e| RpcError::InvalidResponse(format!("bad quantity {}: {}", hex, e)))
}

/// 解析 "0x..." 数量为 U256
pub fn parse_u256(hex: &str) -> Result<U256, RpcError> {
    U256::from_str_radix(hex.trim_start_matches("0x"), 16)
        .map_err(|e| RpcError::InvalidResponse(format!("bad quantity {}: {}", hex, e)))
}

/// U256 编码为最短形式的 "0x..." 数量
pub fn to_hex<T: Into<U256>>(value: T) -> String {
    format!("{:#x}", value.into())
}
