//! Web3 请求桥
//!
//! 嵌入页面（不受信任）与钱包之间的编号请求/响应通道。
//! 页面侧是关联桥（provider），钱包侧是请求处理器（handler）。

pub mod correlation;
pub mod handler;
pub mod provider;

pub use correlation::{BridgeChannel, BridgeRequest, BridgeResponse, ErrorObject};
pub use handler::DAppBridge;
pub use provider::{BridgeReply, CrossFrameBridge, ProviderBridge, ProviderEvent, ProviderState};
