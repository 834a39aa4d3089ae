//! 统一交易构建器
//!
//! 把转账意图按链家族转换成可签名的未签名交易。
//! EVM 链需要网络往返（费用、nonce、gas 估算），其余家族纯本地换算。

use std::sync::Arc;

use ethers::types::{Address, U256};
use ethers::utils::{parse_ether, parse_units};

use crate::domain::chain::{ChainRegistry, REGISTRY};
use crate::domain::{
    ChainFamily, EvmFee, EvmUnsignedTx, NativeTransfer, SupportInfo, TransferIntent,
    UnsignedTransaction,
};
use crate::error::BuildError;
use crate::service::blockchain_client::BlockchainClient;
use crate::utils::amount::{self, LAMPORTS_PER_SOL, SATOSHIS_PER_BTC, SUN_PER_TRX};

/// 普通转账的固定 gas limit
const NATIVE_TRANSFER_GAS: u64 = 21_000;
/// 费用查询失败时的兜底 gas price：20 gwei
const FALLBACK_GAS_PRICE_WEI: u64 = 20_000_000_000;
/// ERC-20 transfer(address,uint256) 函数选择器
const ERC20_TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];
/// ERC-20 decimals() 函数选择器
const ERC20_DECIMALS_SELECTOR: &str = "0x313ce567";

pub struct TransactionBuilder {
    client: Arc<BlockchainClient>,
    registry: &'static ChainRegistry,
}

impl TransactionBuilder {
    pub fn new(client: Arc<BlockchainClient>) -> Self {
        Self {
            client,
            registry: &REGISTRY,
        }
    }

    /// 检查链是否受支持；未知链不进入任何后续流程
    pub fn is_supported(&self, chain_key: &str) -> SupportInfo {
        self.registry.is_supported(chain_key)
    }

    /// 构建未签名交易
    pub async fn build(&self, intent: &TransferIntent) -> Result<UnsignedTransaction, BuildError> {
        let entry = self
            .registry
            .get(&intent.chain_id)
            .ok_or_else(|| BuildError::UnknownChain(intent.chain_id.clone()))?;

        match entry.family {
            ChainFamily::Evm => {
                let chain_id = entry
                    .evm_chain_id
                    .ok_or_else(|| BuildError::UnknownChain(intent.chain_id.clone()))?;
                match &intent.token {
                    None => self.build_evm_native(intent, chain_id).await,
                    Some(token) => self.build_evm_token(intent, token, chain_id).await,
                }
            }
            ChainFamily::Solana => Ok(UnsignedTransaction::Solana(native_transfer(
                intent,
                LAMPORTS_PER_SOL,
            )?)),
            ChainFamily::Tron => Ok(UnsignedTransaction::Tron(native_transfer(
                intent,
                SUN_PER_TRX,
            )?)),
            ChainFamily::Bitcoin => Ok(UnsignedTransaction::Bitcoin(native_transfer(
                intent,
                SATOSHIS_PER_BTC,
            )?)),
        }
    }

    /// EVM 原生转账
    ///
    /// 固定 21000 gas；优先 EIP-1559 费用，网络不支持则回退
    /// legacy gas price，费用查询本身失败时兜底 20 gwei。
    async fn build_evm_native(
        &self,
        intent: &TransferIntent,
        chain_id: u64,
    ) -> Result<UnsignedTransaction, BuildError> {
        if !self.client.has_evm_endpoint(chain_id) {
            return Err(BuildError::NoRpcEndpoint(chain_id));
        }

        parse_address(&intent.to)?;
        let value: U256 = parse_ether(intent.amount.as_str())
            .map_err(|e| BuildError::InvalidAmount(format!("{}: {}", intent.amount, e)))?;

        let (fee_result, nonce) = tokio::join!(
            self.client.get_fee_data(chain_id),
            self.client.get_transaction_count(chain_id, &intent.from),
        );
        let nonce = nonce?;

        let fee = match fee_result {
            Ok(data) => fee_from_data(data),
            Err(e) => {
                tracing::warn!(error = %e, chain_id, "fee query failed, using fallback gas price");
                EvmFee::Legacy {
                    gas_price: U256::from(FALLBACK_GAS_PRICE_WEI),
                }
            }
        };

        Ok(UnsignedTransaction::Evm(EvmUnsignedTx {
            chain_id,
            to: intent.to.clone(),
            value,
            data: None,
            nonce,
            gas_limit: U256::from(NATIVE_TRANSFER_GAS),
            fee,
        }))
    }

    /// ERC-20 代币转账
    ///
    /// gas 估算结果按 estimate * 12 / 10 放大 20% 吸收估算误差。
    async fn build_evm_token(
        &self,
        intent: &TransferIntent,
        token: &crate::domain::TokenIdentity,
        chain_id: u64,
    ) -> Result<UnsignedTransaction, BuildError> {
        if !self.client.has_evm_endpoint(chain_id) {
            return Err(BuildError::NoRpcEndpoint(chain_id));
        }

        // 合约地址：调用方提供优先，否则查静态注册表
        let registry_entry = self.registry.token_contract(&token.symbol, &intent.chain_id);
        let contract_address = token
            .contract_address
            .clone()
            .or_else(|| registry_entry.map(|c| c.address.to_string()))
            .ok_or_else(|| BuildError::TokenContractMissing {
                symbol: token.symbol.clone(),
                chain: intent.chain_id.clone(),
            })?;

        // 小数位：意图 → 注册表 → 链上 decimals()
        let decimals = match token.decimals.or_else(|| registry_entry.map(|c| c.decimals)) {
            Some(d) => d,
            None => self.query_decimals(chain_id, &contract_address).await?,
        };

        let recipient = parse_address(&intent.to)?;
        let token_amount: U256 = parse_units(intent.amount.as_str(), decimals as u32)
            .map_err(|e| BuildError::InvalidAmount(format!("{}: {}", intent.amount, e)))?
            .into();

        let calldata = encode_erc20_transfer(recipient, token_amount);
        let calldata_hex = format!("0x{}", hex::encode(&calldata));

        let (fee_result, nonce) = tokio::join!(
            self.client.get_fee_data(chain_id),
            self.client.get_transaction_count(chain_id, &intent.from),
        );
        let nonce = nonce?;

        let estimate = self
            .client
            .estimate_gas(chain_id, &intent.from, &contract_address, &calldata_hex)
            .await
            .map_err(|e| BuildError::EstimationFailed(e.to_string()))?;
        let gas_limit = estimate * U256::from(12u64) / U256::from(10u64);

        let fee = match fee_result {
            Ok(fee_data) => fee_from_data(fee_data),
            Err(e) => {
                tracing::warn!(error = %e, chain_id, "fee query failed, using fallback gas price");
                EvmFee::Legacy {
                    gas_price: U256::from(FALLBACK_GAS_PRICE_WEI),
                }
            }
        };

        Ok(UnsignedTransaction::Evm(EvmUnsignedTx {
            chain_id,
            to: contract_address,
            value: U256::zero(),
            data: Some(calldata.into()),
            nonce,
            gas_limit,
            fee,
        }))
    }

    /// 链上查询代币小数位
    async fn query_decimals(&self, chain_id: u64, contract: &str) -> Result<u8, BuildError> {
        let result = self
            .client
            .call(chain_id, contract, ERC20_DECIMALS_SELECTOR)
            .await?;
        let value = crate::utils::quantity::parse_u256(&result)
            .map_err(|e| BuildError::EstimationFailed(format!("bad decimals() result: {}", e)))?;
        Ok(value.low_u32() as u8)
    }
}

/// EIP-1559 两个字段齐备才用动态费用，否则 legacy
fn fee_from_data(data: crate::service::blockchain_client::FeeData) -> EvmFee {
    match (data.max_fee_per_gas, data.max_priority_fee_per_gas) {
        (Some(max_fee), Some(priority)) => EvmFee::Eip1559 {
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: priority,
        },
        _ => EvmFee::Legacy {
            gas_price: data
                .gas_price
                .unwrap_or_else(|| U256::from(FALLBACK_GAS_PRICE_WEI)),
        },
    }
}

fn native_transfer(intent: &TransferIntent, decimals: u32) -> Result<NativeTransfer, BuildError> {
    Ok(NativeTransfer {
        from: intent.from.clone(),
        to: intent.to.clone(),
        amount: intent.amount.clone(),
        base_units: amount::to_base_units(&intent.amount, decimals)?,
    })
}

fn parse_address(address: &str) -> Result<Address, BuildError> {
    address
        .parse::<Address>()
        .map_err(|e| BuildError::InvalidAddress(format!("{}: {}", address, e)))
}

/// 手工编码 transfer(to, amount)：选择器 + 两个 32 字节右对齐参数
fn encode_erc20_transfer(to: Address, token_amount: U256) -> Vec<u8> {
    let mut calldata = Vec::with_capacity(4 + 32 + 32);
    calldata.extend_from_slice(&ERC20_TRANSFER_SELECTOR);
    calldata.extend_from_slice(&[0u8; 12]);
    calldata.extend_from_slice(to.as_bytes());
    let mut amount_be = [0u8; 32];
    token_amount.to_big_endian(&mut amount_be);
    calldata.extend_from_slice(&amount_be);
    calldata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RpcConfig;
    use crate::domain::TokenIdentity;
    use httpmock::prelude::*;

    fn builder_for(server: &MockServer) -> TransactionBuilder {
        let mut config = RpcConfig::default();
        config.set_evm_endpoint(1, server.base_url());
        TransactionBuilder::new(Arc::new(BlockchainClient::new(config)))
    }

    fn offline_builder() -> TransactionBuilder {
        TransactionBuilder::new(Arc::new(BlockchainClient::new(RpcConfig::default())))
    }

    fn intent(chain: &str, amount: &str, token: Option<TokenIdentity>) -> TransferIntent {
        TransferIntent {
            chain_id: chain.to_string(),
            from: "0x742d35cc6634c0532925a3b844bc9e7595f0beb6".to_string(),
            to: "0x1234567890123456789012345678901234567890".to_string(),
            amount: amount.to_string(),
            token,
        }
    }

    async fn mock_evm_basics(server: &MockServer, base_fee: bool) {
        server
            .mock_async(|when, then| {
                when.method(POST).json_body_partial(r#"{"method": "eth_gasPrice"}"#);
                then.status(200).json_body(
                    serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": "0x4a817c800"}),
                );
            })
            .await;
        let block = if base_fee {
            serde_json::json!({"baseFeePerGas": "0x3b9aca00", "number": "0x1"})
        } else {
            serde_json::json!({"number": "0x1"})
        };
        server
            .mock_async(|when, then| {
                when.method(POST).json_body_partial(r#"{"method": "eth_getBlockByNumber"}"#);
                then.status(200)
                    .json_body(serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": block}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .json_body_partial(r#"{"method": "eth_getTransactionCount"}"#);
                then.status(200)
                    .json_body(serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": "0x7"}));
            })
            .await;
    }

    #[tokio::test]
    async fn test_build_unknown_chain() {
        let builder = offline_builder();
        let err = builder.build(&intent("chain-99", "1.0", None)).await.unwrap_err();
        assert!(matches!(err, BuildError::UnknownChain(_)));
    }

    #[tokio::test]
    async fn test_build_solana_no_network_roundtrip() {
        // 非 EVM 构建不需要任何 RPC 端点
        let builder = offline_builder();
        let tx = builder.build(&intent("chain-11", "0.000000001", None)).await.unwrap();
        match tx {
            UnsignedTransaction::Solana(t) => assert_eq!(t.base_units, 1),
            other => panic!("expected Solana, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_build_bitcoin_satoshi_conversion() {
        let builder = offline_builder();
        let tx = builder.build(&intent("chain-1", "1.23456789", None)).await.unwrap();
        match tx {
            UnsignedTransaction::Bitcoin(t) => assert_eq!(t.base_units, 123_456_789),
            other => panic!("expected Bitcoin, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_build_tron_sun_conversion() {
        let builder = offline_builder();
        let tx = builder.build(&intent("chain-8", "2.5", None)).await.unwrap();
        match tx {
            UnsignedTransaction::Tron(t) => assert_eq!(t.base_units, 2_500_000),
            other => panic!("expected Tron, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_build_evm_native_eip1559() {
        let server = MockServer::start_async().await;
        mock_evm_basics(&server, true).await;

        let builder = builder_for(&server);
        let tx = builder.build(&intent("chain-0", "1.5", None)).await.unwrap();
        match tx {
            UnsignedTransaction::Evm(t) => {
                assert_eq!(t.gas_limit, U256::from(21_000u64));
                assert_eq!(t.nonce, 7);
                assert_eq!(t.value, parse_ether("1.5").unwrap());
                assert!(t.data.is_none());
                match t.fee {
                    EvmFee::Eip1559 { max_fee_per_gas, max_priority_fee_per_gas } => {
                        // 2 * 1 gwei base + 1 gwei priority
                        assert_eq!(max_priority_fee_per_gas, U256::from(1_000_000_000u64));
                        assert_eq!(max_fee_per_gas, U256::from(3_000_000_000u64));
                    }
                    other => panic!("expected Eip1559, got {:?}", other),
                }
            }
            other => panic!("expected Evm, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_build_evm_native_legacy_fallback() {
        let server = MockServer::start_async().await;
        mock_evm_basics(&server, false).await;

        let builder = builder_for(&server);
        let tx = builder.build(&intent("chain-0", "0.1", None)).await.unwrap();
        match tx {
            UnsignedTransaction::Evm(t) => match t.fee {
                EvmFee::Legacy { gas_price } => {
                    assert_eq!(gas_price, U256::from(20_000_000_000u64))
                }
                other => panic!("expected Legacy, got {:?}", other),
            },
            other => panic!("expected Evm, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_build_token_gas_padding() {
        let server = MockServer::start_async().await;
        mock_evm_basics(&server, true).await;
        server
            .mock_async(|when, then| {
                when.method(POST).json_body_partial(r#"{"method": "eth_estimateGas"}"#);
                then.status(200)
                    .json_body(serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": "0xc350"}));
            })
            .await;

        let builder = builder_for(&server);
        let token = TokenIdentity {
            symbol: "USDT".to_string(),
            contract_address: None,
            decimals: None,
        };
        let tx = builder.build(&intent("chain-0", "25.5", Some(token))).await.unwrap();
        match tx {
            UnsignedTransaction::Evm(t) => {
                // estimate 50000 * 12 / 10 = 60000
                assert_eq!(t.gas_limit, U256::from(60_000u64));
                assert_eq!(t.value, U256::zero());
                // USDT 注册表 decimals = 6: 25.5 -> 25500000
                let data = t.data.unwrap();
                let encoded = hex::encode(&data);
                assert!(encoded.starts_with("a9059cbb"));
                assert!(encoded.contains("1234567890123456789012345678901234567890"));
                assert!(encoded.ends_with(&format!("{:064x}", 25_500_000u64)));
                // 注册表解析出了 USDT 主网合约
                assert_eq!(t.to.to_lowercase(), "0xdac17f958d2ee523a2206206994597c13d831ec7");
            }
            other => panic!("expected Evm, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_build_token_missing_contract() {
        let server = MockServer::start_async().await;
        let builder = builder_for(&server);
        let token = TokenIdentity {
            symbol: "NOPE".to_string(),
            contract_address: None,
            decimals: None,
        };
        let err = builder.build(&intent("chain-0", "1", Some(token))).await.unwrap_err();
        assert!(matches!(err, BuildError::TokenContractMissing { .. }));
    }

    #[test]
    fn test_encode_erc20_transfer_layout() {
        let to: Address = "0x1234567890123456789012345678901234567890".parse().unwrap();
        let calldata = encode_erc20_transfer(to, U256::from(1000u64));
        // 选择器 4 + 地址参数 32 + 金额参数 32
        assert_eq!(calldata.len(), 4 + 32 + 32);
        assert_eq!(&calldata[..4], &ERC20_TRANSFER_SELECTOR);
        // 地址右对齐：12 字节零填充
        assert_eq!(&calldata[4..16], &[0u8; 12]);
        assert_eq!(&calldata[16..36], to.as_bytes());
        assert_eq!(U256::from_big_endian(&calldata[36..68]), U256::from(1000u64));
    }
}
