//! 通用工具：金额换算、RPC 数量编解码

pub mod amount;
pub mod quantity;
