//! 页面侧关联桥
//!
//! `ProviderBridge` 是同进程变体：60 秒超时即失败，成功响应
//! 附带方法相关的状态同步副作用。`CrossFrameBridge` 是跨源帧
//! 变体：5 秒超时后对四个众所周知的方法合成默认答案而不是报错
//! ——这个回退只允许存在于跨帧变体。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::bridge::correlation::{BridgeChannel, BridgeResponse, CorrelationCore};
use crate::error::BridgeError;

/// 同进程桥的默认超时
const PROVIDER_TIMEOUT_MS: u64 = 60_000;
/// 跨帧桥的默认超时（之后走合成默认答案）
const CROSS_FRAME_TIMEOUT_MS: u64 = 5_000;

/// 对外暴露的 provider 状态
#[derive(Debug, Clone)]
pub struct ProviderState {
    /// "0x1" 形式
    pub chain_id_hex: String,
    /// 十进制网络版本字符串
    pub network_version: String,
    pub selected_address: Option<String>,
}

impl ProviderState {
    fn new(chain_id: u64, account: Option<String>) -> Self {
        Self {
            chain_id_hex: format!("0x{:x}", chain_id),
            network_version: chain_id.to_string(),
            selected_address: account,
        }
    }
}

/// provider 事件：调用方依赖这些事件，不只是 resolve 的返回值
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    AccountsChanged(Vec<String>),
    ChainChanged(String),
}

// ============ 同进程变体 ============

pub struct ProviderBridge {
    core: CorrelationCore,
    state: Mutex<ProviderState>,
    events: broadcast::Sender<ProviderEvent>,
    timeout: Duration,
}

impl ProviderBridge {
    pub fn new(
        channels: Vec<Arc<dyn BridgeChannel>>,
        chain_id: u64,
        account: Option<String>,
    ) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            core: CorrelationCore::new(channels),
            state: Mutex::new(ProviderState::new(chain_id, account)),
            events,
            timeout: Duration::from_millis(PROVIDER_TIMEOUT_MS),
        }
    }

    /// 覆盖超时（测试用）
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn state(&self) -> ProviderState {
        self.state.lock().expect("provider lock poisoned").clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }

    /// 发出一个编号请求并等待对端响应
    ///
    /// 超时后若请求仍在待决表中则移除并以 Timeout 拒绝；
    /// 同进程变体绝不合成默认答案。
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, BridgeError> {
        let (id, receiver) = self.core.dispatch(method, params)?;

        tokio::select! {
            result = receiver => match result {
                Ok(outcome) => outcome,
                Err(_) => Err(BridgeError::ChannelClosed),
            },
            _ = tokio::time::sleep(self.timeout) => {
                self.core.take_pending(id);
                Err(BridgeError::Timeout(id))
            }
        }
    }

    /// 对端响应回调
    ///
    /// 未知 id 静默忽略。成功响应除了 resolve 之外还要执行
    /// 方法相关的状态同步：账户方法更新 selected_address 并发
    /// AccountsChanged；链方法更新链 id、重算十进制网络版本并发
    /// ChainChanged。
    pub fn handle_response(&self, response: BridgeResponse) {
        let Some(entry) = self.core.take_pending(response.id) else {
            tracing::debug!(id = response.id, "response for unknown request id ignored");
            return;
        };

        if let Some(error) = response.error {
            let _ = entry.sender.send(Err(BridgeError::Rpc {
                code: error.code,
                message: error.message,
            }));
            return;
        }

        let result = response.result.unwrap_or(Value::Null);
        self.apply_side_effects(&entry.method, &result);
        let _ = entry.sender.send(Ok(result));
    }

    fn apply_side_effects(&self, method: &str, result: &Value) {
        match method {
            "eth_requestAccounts" | "eth_accounts" => {
                let accounts: Vec<String> = result
                    .as_array()
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|v| v.as_str().map(|s| s.to_string()))
                            .collect()
                    })
                    .unwrap_or_default();
                if let Some(first) = accounts.first() {
                    self.state
                        .lock()
                        .expect("provider lock poisoned")
                        .selected_address = Some(first.clone());
                    let _ = self.events.send(ProviderEvent::AccountsChanged(accounts));
                }
            }
            "eth_chainId" | "wallet_switchEthereumChain" => {
                if let Some(hex) = result.as_str() {
                    let decimal = u64::from_str_radix(hex.trim_start_matches("0x"), 16)
                        .map(|v| v.to_string())
                        .unwrap_or_default();
                    {
                        let mut state = self.state.lock().expect("provider lock poisoned");
                        state.chain_id_hex = hex.to_string();
                        state.network_version = decimal;
                    }
                    let _ = self.events.send(ProviderEvent::ChainChanged(hex.to_string()));
                }
            }
            _ => {}
        }
    }
}

// ============ 跨帧变体 ============

/// 跨帧请求的回答：synthesized 标记这是超时合成的默认值，
/// 而不是对端的真实响应（尽力而为，不是保证）
#[derive(Debug, Clone)]
pub struct BridgeReply {
    pub value: Value,
    pub synthesized: bool,
}

pub struct CrossFrameBridge {
    core: CorrelationCore,
    state: Mutex<ProviderState>,
    timeout: Duration,
}

impl CrossFrameBridge {
    pub fn new(
        channels: Vec<Arc<dyn BridgeChannel>>,
        chain_id: u64,
        account: Option<String>,
    ) -> Self {
        Self {
            core: CorrelationCore::new(channels),
            state: Mutex::new(ProviderState::new(chain_id, account)),
            timeout: Duration::from_millis(CROSS_FRAME_TIMEOUT_MS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn state(&self) -> ProviderState {
        self.state.lock().expect("provider lock poisoned").clone()
    }

    /// 发出请求；超时后对四个众所周知的方法回退到合成默认答案
    pub async fn request(&self, method: &str, params: Value) -> Result<BridgeReply, BridgeError> {
        let (id, receiver) = self.core.dispatch(method, params)?;

        tokio::select! {
            result = receiver => match result {
                Ok(Ok(value)) => Ok(BridgeReply { value, synthesized: false }),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(BridgeError::ChannelClosed),
            },
            _ = tokio::time::sleep(self.timeout) => {
                self.core.take_pending(id);
                match self.default_answer(method) {
                    Some(value) => Ok(BridgeReply { value, synthesized: true }),
                    None => Err(BridgeError::Timeout(id)),
                }
            }
        }
    }

    /// 对端响应回调；跨帧变体没有状态同步副作用
    pub fn handle_response(&self, response: BridgeResponse) {
        let Some(entry) = self.core.take_pending(response.id) else {
            tracing::debug!(id = response.id, "response for unknown request id ignored");
            return;
        };
        let outcome = match response.error {
            Some(error) => Err(BridgeError::Rpc {
                code: error.code,
                message: error.message,
            }),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };
        let _ = entry.sender.send(outcome);
    }

    /// 仅这四个方法有合成默认答案，其余超时照常失败
    fn default_answer(&self, method: &str) -> Option<Value> {
        let state = self.state.lock().expect("provider lock poisoned");
        match method {
            "eth_requestAccounts" | "eth_accounts" => Some(match &state.selected_address {
                Some(address) => json!([address]),
                None => json!([]),
            }),
            "eth_chainId" => Some(json!(state.chain_id_hex)),
            "net_version" => Some(json!(state.network_version)),
            "wallet_switchEthereumChain" => Some(Value::Null),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;

    struct NullChannel;

    impl BridgeChannel for NullChannel {
        fn name(&self) -> &'static str {
            "null"
        }
        fn is_available(&self) -> bool {
            true
        }
        fn post_message(&self, _payload: &str) -> Result<(), BridgeError> {
            Ok(())
        }
    }

    fn provider() -> ProviderBridge {
        ProviderBridge::new(vec![Arc::new(NullChannel)], 1, None)
            .with_timeout(Duration::from_millis(200))
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_timeout_is_error_not_default() {
        let bridge = provider();
        let err = bridge.request("eth_chainId", json!([])).await.unwrap_err();
        // 同进程变体超时必须失败，不允许合成默认答案
        assert!(matches!(err, BridgeError::Timeout(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cross_frame_synthesizes_known_methods() {
        let bridge = CrossFrameBridge::new(
            vec![Arc::new(NullChannel)],
            56,
            Some("0xabc".to_string()),
        )
        .with_timeout(Duration::from_millis(100));

        let reply = bridge.request("eth_chainId", json!([])).await.unwrap();
        assert!(reply.synthesized);
        assert_eq!(reply.value, json!("0x38"));

        let reply = bridge.request("net_version", json!([])).await.unwrap();
        assert!(reply.synthesized);
        assert_eq!(reply.value, json!("56"));

        let reply = bridge.request("eth_accounts", json!([])).await.unwrap();
        assert!(reply.synthesized);
        assert_eq!(reply.value, json!(["0xabc"]));

        let reply = bridge
            .request("wallet_switchEthereumChain", json!([{"chainId": "0x1"}]))
            .await
            .unwrap();
        assert!(reply.synthesized);
        assert_eq!(reply.value, Value::Null);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cross_frame_other_methods_still_time_out() {
        let bridge = CrossFrameBridge::new(vec![Arc::new(NullChannel)], 1, None)
            .with_timeout(Duration::from_millis(100));
        let err = bridge.request("eth_getBalance", json!([])).await.unwrap_err();
        assert!(matches!(err, BridgeError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_side_effects_on_accounts_response() {
        let bridge = Arc::new(provider());
        let mut events = bridge.subscribe_events();

        let bridge_clone = Arc::clone(&bridge);
        let request = tokio::spawn(async move {
            bridge_clone.request("eth_accounts", json!([])).await
        });

        // 等待请求进入待决表后回放响应（id 从 1 开始）
        tokio::task::yield_now().await;
        bridge.handle_response(BridgeResponse::ok(1, json!(["0xdef", "0x123"])));

        let result = request.await.unwrap().unwrap();
        assert_eq!(result, json!(["0xdef", "0x123"]));
        assert_eq!(bridge.state().selected_address.as_deref(), Some("0xdef"));
        assert_eq!(
            events.recv().await.unwrap(),
            ProviderEvent::AccountsChanged(vec!["0xdef".to_string(), "0x123".to_string()])
        );
    }

    #[tokio::test]
    async fn test_chain_changed_side_effect() {
        let bridge = Arc::new(provider());
        let mut events = bridge.subscribe_events();

        let bridge_clone = Arc::clone(&bridge);
        let request = tokio::spawn(async move {
            bridge_clone
                .request("wallet_switchEthereumChain", json!([{"chainId": "0x89"}]))
                .await
        });

        tokio::task::yield_now().await;
        bridge.handle_response(BridgeResponse::ok(1, json!("0x89")));

        request.await.unwrap().unwrap();
        let state = bridge.state();
        assert_eq!(state.chain_id_hex, "0x89");
        assert_eq!(state.network_version, "137");
        assert_eq!(
            events.recv().await.unwrap(),
            ProviderEvent::ChainChanged("0x89".to_string())
        );
    }

    #[tokio::test]
    async fn test_unknown_id_ignored() {
        let bridge = provider();
        // 没有任何待决请求时回放响应：不 panic、不产生状态变化
        bridge.handle_response(BridgeResponse::ok(777, json!("0x1")));
        assert!(bridge.state().selected_address.is_none());
    }
}
