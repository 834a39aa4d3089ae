//! 钱包侧 dApp 请求处理器
//!
//! 把嵌入页面的请求路由到 RPC 代理或签名器。页面永远拿不到
//! 密钥材料，只拿到结果或带 EIP-1193 错误码的失败。

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use crate::bridge::correlation::{BridgeRequest, BridgeResponse};
use crate::domain::{EvmFee, EvmUnsignedTx};
use crate::error::SignError;
use crate::service::blockchain_client::BlockchainClient;
use crate::service::signer::TransactionSigner;
use crate::utils::quantity;

/// EIP-1193 错误码
const ERR_USER_REJECTED: i64 = 4001;
const ERR_UNSUPPORTED_METHOD: i64 = 4200;
const ERR_CHAIN_NOT_SUPPORTED: i64 = 4902;
const ERR_GENERIC: i64 = 4000;

struct DAppState {
    chain_id: u64,
    account: Option<String>,
}

pub struct DAppBridge {
    client: Arc<BlockchainClient>,
    signer: Arc<dyn TransactionSigner>,
    state: Mutex<DAppState>,
}

impl DAppBridge {
    pub fn new(
        client: Arc<BlockchainClient>,
        signer: Arc<dyn TransactionSigner>,
        chain_id: u64,
        account: Option<String>,
    ) -> Self {
        Self {
            client,
            signer,
            state: Mutex::new(DAppState { chain_id, account }),
        }
    }

    pub fn set_account(&self, account: Option<String>) {
        self.state.lock().expect("bridge lock poisoned").account = account;
    }

    pub fn set_chain_id(&self, chain_id: u64) {
        self.state.lock().expect("bridge lock poisoned").chain_id = chain_id;
    }

    fn chain_id(&self) -> u64 {
        self.state.lock().expect("bridge lock poisoned").chain_id
    }

    fn account(&self) -> Option<String> {
        self.state.lock().expect("bridge lock poisoned").account.clone()
    }

    /// 处理一条页面请求，总是返回一个响应（错误走 error 对象，不抛出）
    pub async fn handle_request(&self, request: BridgeRequest) -> BridgeResponse {
        let id = request.id;
        let params = request.params.clone();
        tracing::debug!(id, method = %request.method, "dapp request");

        match self.dispatch(&request.method, params).await {
            Ok(result) => BridgeResponse::ok(id, result),
            Err((code, message)) => BridgeResponse::err(id, code, message),
        }
    }

    async fn dispatch(&self, method: &str, params: Value) -> Result<Value, (i64, String)> {
        match method {
            "eth_requestAccounts" | "eth_accounts" => match self.account() {
                Some(account) => Ok(json!([account])),
                None => Err((ERR_USER_REJECTED, "User rejected request".to_string())),
            },

            "eth_chainId" => Ok(json!(format!("0x{:x}", self.chain_id()))),

            "net_version" => Ok(json!(self.chain_id().to_string())),

            "wallet_switchEthereumChain" => {
                let target = params
                    .get(0)
                    .and_then(|p| p.get("chainId"))
                    .and_then(|c| c.as_str())
                    .and_then(|hex| u64::from_str_radix(hex.trim_start_matches("0x"), 16).ok());
                match target {
                    Some(chain_id) if self.client.has_evm_endpoint(chain_id) => {
                        self.set_chain_id(chain_id);
                        Ok(Value::Null)
                    }
                    _ => Err((ERR_CHAIN_NOT_SUPPORTED, "Chain not supported".to_string())),
                }
            }

            "wallet_addEthereumChain" => {
                Err((ERR_UNSUPPORTED_METHOD, "Method not supported".to_string()))
            }

            "personal_sign" => {
                // params: [message, address]
                let message = string_param(&params, 0)?;
                self.sign_decoded_message(&message).await
            }

            "eth_sign" => {
                // params: [address, message]
                let message = string_param(&params, 1)?;
                self.sign_decoded_message(&message).await
            }

            "eth_signTypedData" | "eth_signTypedData_v3" | "eth_signTypedData_v4" => {
                if !self.signer.is_unlocked() {
                    return Err((ERR_GENERIC, "Wallet is locked".to_string()));
                }
                let payload = match params.get(1) {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => return Err((ERR_GENERIC, "missing typed data".to_string())),
                };
                self.signer
                    .sign_typed_data(&payload)
                    .await
                    .map(|sig| json!(sig))
                    .map_err(sign_error)
            }

            "eth_signTransaction" => {
                let tx = self.parse_transaction_params(&params).await?;
                self.signer
                    .sign_transaction(&tx, None)
                    .await
                    .map(|signed| json!(signed.payload))
                    .map_err(sign_error)
            }

            "eth_sendTransaction" => {
                let tx = self.parse_transaction_params(&params).await?;
                let signed = self
                    .signer
                    .sign_transaction(&tx, None)
                    .await
                    .map_err(sign_error)?;
                self.client
                    .raw_call(self.chain_id(), "eth_sendRawTransaction", json!([signed.payload]))
                    .await
                    .map_err(|e| (ERR_GENERIC, e.to_string()))
            }

            // 其余方法（含只读 eth_*）原样代理到当前链的 RPC
            _ => self
                .client
                .raw_call(self.chain_id(), method, params)
                .await
                .map_err(|e| (ERR_GENERIC, e.to_string())),
        }
    }

    async fn sign_decoded_message(&self, message: &str) -> Result<Value, (i64, String)> {
        if !self.signer.is_unlocked() {
            return Err((ERR_GENERIC, "Wallet is locked".to_string()));
        }
        // 0x-hex 消息先还原成 UTF-8 文本
        let decoded = if let Some(stripped) = message.strip_prefix("0x") {
            match hex::decode(stripped) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(_) => message.to_string(),
            }
        } else {
            message.to_string()
        };

        self.signer
            .sign_message(&decoded)
            .await
            .map(|sig| json!(sig))
            .map_err(sign_error)
    }

    /// 把页面提交的交易参数对象补全成可签名交易
    ///
    /// 缺 nonce 时查链，缺 gas 时估算，缺费用字段时查费用数据。
    async fn parse_transaction_params(
        &self,
        params: &Value,
    ) -> Result<EvmUnsignedTx, (i64, String)> {
        let tx = params
            .get(0)
            .and_then(|v| v.as_object())
            .ok_or((ERR_GENERIC, "missing transaction object".to_string()))?;
        let chain_id = self.chain_id();

        let to = tx
            .get("to")
            .and_then(|v| v.as_str())
            .ok_or((ERR_GENERIC, "missing to address".to_string()))?
            .to_string();
        let from = tx
            .get("from")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .or_else(|| self.account())
            .ok_or((ERR_GENERIC, "no account available".to_string()))?;

        let value = opt_quantity(tx.get("value")).unwrap_or_default();
        let data = tx
            .get("data")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty() && *s != "0x")
            .map(|s| s.to_string());

        let nonce = match tx.get("nonce").and_then(|v| v.as_str()) {
            Some(hex) => quantity::parse_u64(hex).map_err(|e| (ERR_GENERIC, e.to_string()))?,
            None => self
                .client
                .get_transaction_count(chain_id, &from)
                .await
                .map_err(|e| (ERR_GENERIC, e.to_string()))?,
        };

        let gas_limit = match opt_quantity(tx.get("gas").or_else(|| tx.get("gasLimit"))) {
            Some(gas) => gas,
            None => match &data {
                None => ethers::types::U256::from(21_000u64),
                Some(call_data) => self
                    .client
                    .estimate_gas(chain_id, &from, &to, call_data)
                    .await
                    .map_err(|e| (ERR_GENERIC, e.to_string()))?,
            },
        };

        let fee = match (
            opt_quantity(tx.get("maxFeePerGas")),
            opt_quantity(tx.get("maxPriorityFeePerGas")),
            opt_quantity(tx.get("gasPrice")),
        ) {
            (Some(max_fee), Some(priority), _) => EvmFee::Eip1559 {
                max_fee_per_gas: max_fee,
                max_priority_fee_per_gas: priority,
            },
            (_, _, Some(gas_price)) => EvmFee::Legacy { gas_price },
            _ => {
                let fee_data = self
                    .client
                    .get_fee_data(chain_id)
                    .await
                    .map_err(|e| (ERR_GENERIC, e.to_string()))?;
                match (fee_data.max_fee_per_gas, fee_data.max_priority_fee_per_gas) {
                    (Some(max_fee), Some(priority)) => EvmFee::Eip1559 {
                        max_fee_per_gas: max_fee,
                        max_priority_fee_per_gas: priority,
                    },
                    _ => EvmFee::Legacy {
                        gas_price: fee_data
                            .gas_price
                            .ok_or((ERR_GENERIC, "no fee data available".to_string()))?,
                    },
                }
            }
        };

        let data_bytes = match data {
            Some(d) => Some(
                hex::decode(d.trim_start_matches("0x"))
                    .map_err(|e| (ERR_GENERIC, format!("bad data hex: {}", e)))?
                    .into(),
            ),
            None => None,
        };

        Ok(EvmUnsignedTx {
            chain_id,
            to,
            value,
            data: data_bytes,
            nonce,
            gas_limit,
            fee,
        })
    }

    /// 当前链的浏览器注入状态（chainId 十六进制 + 账户）
    pub fn injection_state(&self) -> (String, Option<String>) {
        let state = self.state.lock().expect("bridge lock poisoned");
        (format!("0x{:x}", state.chain_id), state.account.clone())
    }
}

fn string_param(params: &Value, index: usize) -> Result<String, (i64, String)> {
    params
        .get(index)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or((ERR_GENERIC, format!("missing string param {}", index)))
}

fn opt_quantity(value: Option<&Value>) -> Option<ethers::types::U256> {
    value
        .and_then(|v| v.as_str())
        .and_then(|hex| quantity::parse_u256(hex).ok())
}

fn sign_error(error: SignError) -> (i64, String) {
    let code = match error {
        SignError::WrongPin | SignError::Locked => ERR_USER_REJECTED,
        SignError::Unsupported(_) => ERR_UNSUPPORTED_METHOD,
        _ => ERR_GENERIC,
    };
    (code, error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RpcConfig;
    use crate::service::signer::SoftwareSigner;
    use serde_json::json;

    const TEST_MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn bridge_with_account() -> DAppBridge {
        let client = Arc::new(BlockchainClient::new(RpcConfig::default()));
        let signer = Arc::new(
            SoftwareSigner::new(Arc::clone(&client), TEST_MNEMONIC, "1234").unwrap(),
        );
        DAppBridge::new(client, signer, 1, Some("0xabc".to_string()))
    }

    fn request(method: &str, params: Value) -> BridgeRequest {
        BridgeRequest {
            id: 1,
            method: method.to_string(),
            params,
        }
    }

    #[tokio::test]
    async fn test_accounts_with_account() {
        let bridge = bridge_with_account();
        let response = bridge.handle_request(request("eth_accounts", json!([]))).await;
        assert_eq!(response.result.unwrap(), json!(["0xabc"]));
    }

    #[tokio::test]
    async fn test_accounts_without_account_rejected() {
        let bridge = bridge_with_account();
        bridge.set_account(None);
        let response = bridge
            .handle_request(request("eth_requestAccounts", json!([])))
            .await;
        assert_eq!(response.error.unwrap().code, ERR_USER_REJECTED);
    }

    #[tokio::test]
    async fn test_chain_id_and_net_version() {
        let bridge = bridge_with_account();
        bridge.set_chain_id(137);

        let response = bridge.handle_request(request("eth_chainId", json!([]))).await;
        assert_eq!(response.result.unwrap(), json!("0x89"));

        let response = bridge.handle_request(request("net_version", json!([]))).await;
        assert_eq!(response.result.unwrap(), json!("137"));
    }

    #[tokio::test]
    async fn test_switch_to_known_chain() {
        let bridge = bridge_with_account();
        let response = bridge
            .handle_request(request(
                "wallet_switchEthereumChain",
                json!([{"chainId": "0x38"}]),
            ))
            .await;
        assert!(response.error.is_none());
        assert_eq!(response.result.unwrap(), Value::Null);
        assert_eq!(bridge.chain_id(), 56);
    }

    #[tokio::test]
    async fn test_switch_to_unknown_chain_is_4902() {
        let bridge = bridge_with_account();
        let response = bridge
            .handle_request(request(
                "wallet_switchEthereumChain",
                json!([{"chainId": "0xdeadbeef"}]),
            ))
            .await;
        assert_eq!(response.error.unwrap().code, ERR_CHAIN_NOT_SUPPORTED);
        assert_eq!(bridge.chain_id(), 1);
    }

    #[tokio::test]
    async fn test_add_chain_unsupported() {
        let bridge = bridge_with_account();
        let response = bridge
            .handle_request(request("wallet_addEthereumChain", json!([{}])))
            .await;
        assert_eq!(response.error.unwrap().code, ERR_UNSUPPORTED_METHOD);
    }

    #[tokio::test]
    async fn test_sign_while_locked_fails() {
        let bridge = bridge_with_account();
        let response = bridge
            .handle_request(request("personal_sign", json!(["hello", "0xabc"])))
            .await;
        let error = response.error.unwrap();
        assert!(error.message.contains("locked"));
    }

    #[tokio::test]
    async fn test_personal_sign_decodes_hex_message() {
        let bridge = bridge_with_account();
        bridge.signer.unlock("1234").await.unwrap();

        // "hello" 的 0x-hex 形式和明文必须得到同一个签名
        let hex_msg = format!("0x{}", hex::encode("hello"));
        let r1 = bridge
            .handle_request(request("personal_sign", json!([hex_msg, "0xabc"])))
            .await;
        let r2 = bridge
            .handle_request(request("personal_sign", json!(["hello", "0xabc"])))
            .await;
        assert_eq!(r1.result.unwrap(), r2.result.unwrap());
    }

    #[tokio::test]
    async fn test_injection_state() {
        let bridge = bridge_with_account();
        bridge.set_chain_id(42161);
        let (chain_hex, account) = bridge.injection_state();
        assert_eq!(chain_hex, "0xa4b1");
        assert_eq!(account.as_deref(), Some("0xabc"));
    }
}
