//! 请求关联核心
//!
//! 自增 id + 待决表 + 有序通道回退。两个 provider 变体共用这一块；
//! 关联 id 在请求在途期间绝不复用（原子自增保证）。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::oneshot;

use crate::error::BridgeError;

/// 消息通道抽象：按固定优先级顺序尝试，全部不可用立即失败
pub trait BridgeChannel: Send + Sync {
    fn name(&self) -> &'static str;
    fn is_available(&self) -> bool;
    fn post_message(&self, payload: &str) -> Result<(), BridgeError>;
}

/// 钱包侧收到的请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeRequest {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// 响应消息（两个方向共用同一形状）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeResponse {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl BridgeResponse {
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: u64, code: i64, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(ErrorObject {
                code,
                message: message.into(),
            }),
        }
    }
}

/// EIP-1193 风格错误对象
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
}

pub(crate) struct PendingEntry {
    pub method: String,
    pub sender: oneshot::Sender<Result<Value, BridgeError>>,
}

/// 关联核心：待决表的唯一持有者
pub(crate) struct CorrelationCore {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingEntry>>,
    channels: Vec<Arc<dyn BridgeChannel>>,
}

impl CorrelationCore {
    pub fn new(channels: Vec<Arc<dyn BridgeChannel>>) -> Self {
        Self {
            next_id: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            channels,
        }
    }

    /// 分配新 id、登记待决项、把请求投递到第一个可用通道
    pub fn dispatch(
        &self,
        method: &str,
        params: Value,
    ) -> Result<(u64, oneshot::Receiver<Result<Value, BridgeError>>), BridgeError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (sender, receiver) = oneshot::channel();

        self.pending.lock().expect("bridge lock poisoned").insert(
            id,
            PendingEntry {
                method: method.to_string(),
                sender,
            },
        );

        let envelope = json!({
            "type": "VAULTKEY_REQUEST",
            "id": id,
            "method": method,
            "params": params,
        })
        .to_string();

        let channel = self.channels.iter().find(|c| c.is_available());
        match channel {
            Some(channel) => {
                if let Err(e) = channel.post_message(&envelope) {
                    self.take_pending(id);
                    return Err(e);
                }
                tracing::trace!(id, method, channel = channel.name(), "bridge request dispatched");
            }
            None => {
                self.take_pending(id);
                return Err(BridgeError::NoChannel);
            }
        }

        Ok((id, receiver))
    }

    /// 取走待决项；不在表里返回 None（未知/迟到响应据此被忽略）
    pub fn take_pending(&self, id: u64) -> Option<PendingEntry> {
        self.pending
            .lock()
            .expect("bridge lock poisoned")
            .remove(&id)
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.pending.lock().expect("bridge lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// 测试通道：记录投递的报文
    pub(crate) struct RecordingChannel {
        pub sent: StdMutex<Vec<String>>,
        pub available: bool,
    }

    impl RecordingChannel {
        pub fn new(available: bool) -> Arc<Self> {
            Arc::new(Self {
                sent: StdMutex::new(Vec::new()),
                available,
            })
        }
    }

    impl BridgeChannel for RecordingChannel {
        fn name(&self) -> &'static str {
            "recording"
        }
        fn is_available(&self) -> bool {
            self.available
        }
        fn post_message(&self, payload: &str) -> Result<(), BridgeError> {
            self.sent.lock().unwrap().push(payload.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_ids_increment_and_never_collide() {
        let channel = RecordingChannel::new(true);
        let core = CorrelationCore::new(vec![channel.clone()]);

        let (id1, _rx1) = core.dispatch("eth_chainId", json!([])).unwrap();
        let (id2, _rx2) = core.dispatch("eth_chainId", json!([])).unwrap();
        assert_ne!(id1, id2);
        assert_eq!(core.pending_len(), 2);
    }

    #[test]
    fn test_no_channel_fails_immediately() {
        let unavailable = RecordingChannel::new(false);
        let core = CorrelationCore::new(vec![unavailable]);

        let err = core.dispatch("eth_accounts", json!([])).unwrap_err();
        assert!(matches!(err, BridgeError::NoChannel));
        // 失败的请求不能留在待决表里
        assert_eq!(core.pending_len(), 0);
    }

    #[test]
    fn test_channel_preference_order() {
        let first = RecordingChannel::new(false);
        let second = RecordingChannel::new(true);
        let core = CorrelationCore::new(vec![first.clone(), second.clone()]);

        core.dispatch("net_version", json!([])).unwrap();
        assert!(first.sent.lock().unwrap().is_empty());
        assert_eq!(second.sent.lock().unwrap().len(), 1);

        let payload: Value =
            serde_json::from_str(&second.sent.lock().unwrap()[0]).unwrap();
        assert_eq!(payload["type"], "VAULTKEY_REQUEST");
        assert_eq!(payload["method"], "net_version");
    }
}
