// 区块链客户端服务 - 生产级实现
// 原始 JSON-RPC 广播与查询，支持 EVM 链和非 EVM 链（Solana、TRON、Bitcoin 查询）

use std::time::Duration;

use ethers::types::U256;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::RpcConfig;
use crate::domain::chain::REGISTRY;
use crate::domain::{BroadcastResult, ChainFamily, SignedTransaction};
use crate::error::{BroadcastError, RpcError};
use crate::utils::quantity;

/// EVM 费用数据
///
/// EIP-1559 字段在网络报告 baseFeePerGas 时填充，否则只有 legacy gas price。
#[derive(Debug, Clone, Default)]
pub struct FeeData {
    pub gas_price: Option<U256>,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
}

/// EVM 交易回执（只保留确认跟踪需要的字段）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvmReceipt {
    pub tx_hash: String,
    pub block_number: Option<u64>,
    /// 1 = 成功, 0 = 链上执行失败
    pub status: Option<u64>,
}

/// Bitcoin UTXO（blockstream API 返回格式）
#[derive(Debug, Clone, Deserialize)]
pub struct BitcoinUtxo {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
}

/// EIP-1559 优先费下限：1 gwei
const MIN_PRIORITY_FEE_WEI: u64 = 1_000_000_000;

pub struct BlockchainClient {
    http_client: reqwest::Client,
    config: RpcConfig,
}

impl BlockchainClient {
    pub fn new(config: RpcConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http_client: client,
            config,
        }
    }

    /// 数字链 ID 对应的 RPC 端点：配置覆盖优先，其次内置表
    pub fn evm_endpoint(&self, chain_id: u64) -> Result<String, RpcError> {
        if let Some(url) = self.config.evm_endpoint_override(chain_id) {
            return Ok(url.to_string());
        }
        REGISTRY
            .rpc_endpoint(chain_id)
            .map(|s| s.to_string())
            .ok_or(RpcError::NoEndpoint(chain_id))
    }

    /// 该链是否有可轮询的端点
    pub fn has_evm_endpoint(&self, chain_id: u64) -> bool {
        self.evm_endpoint(chain_id).is_ok()
    }

    // ============ JSON-RPC 基础 ============

    /// 向指定端点发送一次 JSON-RPC 调用，检查 error 对象
    async fn rpc(&self, url: &str, method: &str, params: Value) -> Result<Value, RpcError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .http_client
            .post(url)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        let json: Value = response.json().await?;

        if let Some(error) = json.get("error") {
            let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(-1);
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("Unknown RPC error")
                .to_string();
            return Err(RpcError::Rpc { code, message });
        }

        json.get("result")
            .cloned()
            .ok_or_else(|| RpcError::InvalidResponse("missing result field".to_string()))
    }

    /// 对当前链任意转发一次 JSON-RPC 调用（dApp 桥的只读代理用）
    pub async fn raw_call(
        &self,
        chain_id: u64,
        method: &str,
        params: Value,
    ) -> Result<Value, RpcError> {
        let url = self.evm_endpoint(chain_id)?;
        self.rpc(&url, method, params).await
    }

    // ============ EVM 查询 ============

    /// 费用数据：gas price + 最新区块的 baseFeePerGas
    ///
    /// 网络支持 EIP-1559 时给出 max_fee = 2*base + priority（priority 下限 1 gwei）。
    pub async fn get_fee_data(&self, chain_id: u64) -> Result<FeeData, RpcError> {
        let url = self.evm_endpoint(chain_id)?;

        let gas_price_hex = self.rpc(&url, "eth_gasPrice", json!([])).await?;
        let gas_price = gas_price_hex
            .as_str()
            .map(quantity::parse_u256)
            .transpose()?;

        let block = self
            .rpc(&url, "eth_getBlockByNumber", json!(["latest", false]))
            .await?;
        let base_fee = block
            .get("baseFeePerGas")
            .and_then(|v| v.as_str())
            .map(quantity::parse_u256)
            .transpose()?;

        let mut fee_data = FeeData {
            gas_price,
            ..Default::default()
        };

        if let Some(base) = base_fee {
            let priority = U256::from(MIN_PRIORITY_FEE_WEI);
            fee_data.max_priority_fee_per_gas = Some(priority);
            fee_data.max_fee_per_gas = Some(base.saturating_mul(U256::from(2u64)) + priority);
        }

        Ok(fee_data)
    }

    /// 发送方下一个序号（nonce）
    pub async fn get_transaction_count(
        &self,
        chain_id: u64,
        address: &str,
    ) -> Result<u64, RpcError> {
        let url = self.evm_endpoint(chain_id)?;
        let result = self
            .rpc(&url, "eth_getTransactionCount", json!([address, "latest"]))
            .await?;
        let hex = result
            .as_str()
            .ok_or_else(|| RpcError::InvalidResponse("nonce is not a string".to_string()))?;
        quantity::parse_u64(hex)
    }

    /// 估算合约调用 gas
    pub async fn estimate_gas(
        &self,
        chain_id: u64,
        from: &str,
        to: &str,
        data: &str,
    ) -> Result<U256, RpcError> {
        let url = self.evm_endpoint(chain_id)?;
        let result = self
            .rpc(
                &url,
                "eth_estimateGas",
                json!([{ "from": from, "to": to, "data": data }]),
            )
            .await?;
        let hex = result
            .as_str()
            .ok_or_else(|| RpcError::InvalidResponse("gas estimate is not a string".to_string()))?;
        quantity::parse_u256(hex)
    }

    /// eth_call 只读调用，返回 0x-hex 结果
    pub async fn call(&self, chain_id: u64, to: &str, data: &str) -> Result<String, RpcError> {
        let url = self.evm_endpoint(chain_id)?;
        let result = self
            .rpc(&url, "eth_call", json!([{ "to": to, "data": data }, "latest"]))
            .await?;
        result
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| RpcError::InvalidResponse("call result is not a string".to_string()))
    }

    /// 当前区块高度
    pub async fn get_block_number(&self, chain_id: u64) -> Result<u64, RpcError> {
        let url = self.evm_endpoint(chain_id)?;
        let result = self.rpc(&url, "eth_blockNumber", json!([])).await?;
        let hex = result
            .as_str()
            .ok_or_else(|| RpcError::InvalidResponse("block number is not a string".to_string()))?;
        quantity::parse_u64(hex)
    }

    /// 查询交易回执；null 表示尚未打包
    pub async fn get_transaction_receipt(
        &self,
        chain_id: u64,
        tx_hash: &str,
    ) -> Result<Option<EvmReceipt>, RpcError> {
        let url = self.evm_endpoint(chain_id)?;
        let result = self
            .rpc(&url, "eth_getTransactionReceipt", json!([tx_hash]))
            .await?;

        if result.is_null() {
            return Ok(None);
        }

        let block_number = result
            .get("blockNumber")
            .and_then(|v| v.as_str())
            .map(quantity::parse_u64)
            .transpose()?;

        let status = result
            .get("status")
            .and_then(|v| v.as_str())
            .map(quantity::parse_u64)
            .transpose()?;

        Ok(Some(EvmReceipt {
            tx_hash: tx_hash.to_string(),
            block_number,
            status,
        }))
    }

    // ============ 广播 ============

    /// 广播已签名交易，按家族标签分发
    ///
    /// Bitcoin 家族明确返回 UnsupportedChain，调用方必须把这个结果
    /// 呈现给用户，而不是静默吞掉。
    pub async fn broadcast_transaction(
        &self,
        signed: &SignedTransaction,
    ) -> Result<BroadcastResult, BroadcastError> {
        match signed.family {
            ChainFamily::Evm => self.broadcast_evm(signed).await,
            ChainFamily::Solana => self.broadcast_solana(&signed.payload).await,
            ChainFamily::Tron => self.broadcast_tron(&signed.payload).await,
            ChainFamily::Bitcoin => Err(BroadcastError::UnsupportedChain(ChainFamily::Bitcoin)),
        }
    }

    async fn broadcast_evm(
        &self,
        signed: &SignedTransaction,
    ) -> Result<BroadcastResult, BroadcastError> {
        let chain_id = signed.chain_id.ok_or(BroadcastError::MissingChainId)?;
        let url = self.evm_endpoint(chain_id).map_err(BroadcastError::Network)?;

        match self
            .rpc(&url, "eth_sendRawTransaction", json!([signed.payload]))
            .await
        {
            Ok(result) => {
                let tx_hash = result.as_str().ok_or_else(|| {
                    BroadcastError::Network(RpcError::InvalidResponse(
                        "tx hash is not a string".to_string(),
                    ))
                })?;
                tracing::info!(tx_hash = %tx_hash, chain_id, "EVM transaction broadcast successful");
                Ok(BroadcastResult {
                    tx_hash: tx_hash.to_string(),
                })
            }
            // 节点返回的 JSON-RPC error 对象视为明确拒绝
            Err(RpcError::Rpc { message, .. }) => Err(BroadcastError::Rejected(message)),
            Err(e) => Err(BroadcastError::Network(e)),
        }
    }

    async fn broadcast_solana(&self, payload: &str) -> Result<BroadcastResult, BroadcastError> {
        let result = self
            .rpc(
                &self.config.solana_url,
                "sendTransaction",
                json!([payload, { "encoding": "base58" }]),
            )
            .await;

        match result {
            Ok(value) => {
                let signature = value.as_str().ok_or_else(|| {
                    BroadcastError::Network(RpcError::InvalidResponse(
                        "missing signature in Solana response".to_string(),
                    ))
                })?;
                tracing::info!(tx_hash = %signature, "Solana transaction broadcast successful");
                Ok(BroadcastResult {
                    tx_hash: signature.to_string(),
                })
            }
            Err(RpcError::Rpc { message, .. }) => Err(BroadcastError::Rejected(message)),
            Err(e) => Err(BroadcastError::Network(e)),
        }
    }

    /// TRON 的响应不是 JSON-RPC：成功看 result 标志，哈希在 txid
    async fn broadcast_tron(&self, payload: &str) -> Result<BroadcastResult, BroadcastError> {
        let url = format!("{}/wallet/broadcasttransaction", self.config.tron_url);

        let signed_tx: Value = serde_json::from_str(payload).map_err(|e| {
            BroadcastError::Network(RpcError::InvalidResponse(format!(
                "signed TRON payload is not JSON: {}",
                e
            )))
        })?;

        let response = self
            .http_client
            .post(&url)
            .json(&signed_tx)
            .send()
            .await
            .map_err(|e| BroadcastError::Network(e.into()))?;

        let data: Value = response
            .json()
            .await
            .map_err(|e| BroadcastError::Network(RpcError::from(e)))?;

        if data.get("result").and_then(|r| r.as_bool()) == Some(true) {
            let txid = data
                .get("txid")
                .and_then(|t| t.as_str())
                .or_else(|| signed_tx.get("txID").and_then(|t| t.as_str()))
                .unwrap_or_default()
                .to_string();
            tracing::info!(tx_hash = %txid, "TRON transaction broadcast successful");
            return Ok(BroadcastResult { tx_hash: txid });
        }

        let message = data
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Failed to broadcast TRON transaction")
            .to_string();
        Err(BroadcastError::Rejected(message))
    }

    // ============ 非 EVM 签名辅助查询 ============

    /// Solana 最新区块哈希（finalized）
    pub async fn get_solana_blockhash(&self) -> Result<String, RpcError> {
        let result = self
            .rpc(
                &self.config.solana_url,
                "getLatestBlockhash",
                json!([{ "commitment": "finalized" }]),
            )
            .await?;
        result
            .get("value")
            .and_then(|v| v.get("blockhash"))
            .and_then(|b| b.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| RpcError::InvalidResponse("missing blockhash".to_string()))
    }

    /// TRON 创建未签名转账（交易骨架由节点生成）
    pub async fn tron_create_transaction(
        &self,
        owner_address: &str,
        to_address: &str,
        amount_sun: u64,
    ) -> Result<Value, RpcError> {
        let url = format!("{}/wallet/createtransaction", self.config.tron_url);
        let response = self
            .http_client
            .post(&url)
            .json(&json!({
                "owner_address": owner_address,
                "to_address": to_address,
                "amount": amount_sun,
            }))
            .send()
            .await?;

        let data: Value = response.json().await?;
        if data.get("txID").and_then(|t| t.as_str()).is_none() {
            return Err(RpcError::InvalidResponse(format!(
                "TRON createtransaction failed: {}",
                data
            )));
        }
        Ok(data)
    }

    /// 地址的未花费输出列表
    pub async fn get_bitcoin_utxos(&self, address: &str) -> Result<Vec<BitcoinUtxo>, RpcError> {
        let url = format!("{}/address/{}/utxo", self.config.bitcoin_api_url, address);
        let response = self.http_client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(RpcError::InvalidResponse(format!(
                "UTXO query failed with status {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    /// 费率估计（sat/vB，6 块确认目标），查询失败回退 10
    pub async fn get_bitcoin_fee_rate(&self) -> u64 {
        let url = format!("{}/fee-estimates", self.config.bitcoin_api_url);
        let estimate = async {
            let response = self.http_client.get(&url).send().await.ok()?;
            let fees: Value = response.json().await.ok()?;
            fees.get("6").and_then(|v| v.as_f64())
        }
        .await;

        match estimate {
            Some(rate) => rate.ceil() as u64,
            None => 10,
        }
    }
}
