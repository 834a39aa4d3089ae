//! 组合根
//!
//! 显式构造并装配所有服务（可注入，不用环境单例），对 UI 层
//! 暴露 构建 → 签名 → 广播 → 跟踪 的完整表面。

use std::sync::Arc;

use crate::config::Config;
use crate::domain::chain::REGISTRY;
use crate::domain::{
    BroadcastResult, ChainFamily, NativeTransfer, NonEvmSignRequest, SignedTransaction,
    SupportInfo, TransferIntent, UnsignedTransaction,
};
use crate::error::{BroadcastError, BuildError, SignError, TransferError};
use crate::service::blockchain_client::BlockchainClient;
use crate::service::signer::{SoftwareSigner, TransactionSigner};
use crate::service::transaction_builder::TransactionBuilder;
use crate::service::transaction_monitor::{NewPendingTx, PendingTxTracker};

pub struct WalletCore {
    client: Arc<BlockchainClient>,
    builder: TransactionBuilder,
    tracker: PendingTxTracker,
    signer: Arc<dyn TransactionSigner>,
}

impl WalletCore {
    /// 用调用方选择的签名后端装配（软件或设备，同一时刻一个）
    pub fn new(config: &Config, signer: Arc<dyn TransactionSigner>) -> Self {
        let client = Arc::new(BlockchainClient::new(config.rpc.clone()));
        let builder = TransactionBuilder::new(Arc::clone(&client));
        let tracker = PendingTxTracker::new(Arc::clone(&client), config.tracker.clone());
        Self {
            client,
            builder,
            tracker,
            signer,
        }
    }

    /// 软件签名后端的便捷装配
    pub fn with_software_signer(
        config: &Config,
        mnemonic: &str,
        pin: &str,
    ) -> anyhow::Result<Self> {
        let client = Arc::new(BlockchainClient::new(config.rpc.clone()));
        let signer = Arc::new(SoftwareSigner::new(Arc::clone(&client), mnemonic, pin)?);
        Ok(Self::new(config, signer))
    }

    pub fn client(&self) -> &Arc<BlockchainClient> {
        &self.client
    }

    pub fn tracker(&self) -> &PendingTxTracker {
        &self.tracker
    }

    pub fn signer(&self) -> &Arc<dyn TransactionSigner> {
        &self.signer
    }

    pub fn is_supported(&self, chain_key: &str) -> SupportInfo {
        self.builder.is_supported(chain_key)
    }

    pub async fn build_transaction(
        &self,
        intent: &TransferIntent,
    ) -> Result<UnsignedTransaction, BuildError> {
        self.builder.build(intent).await
    }

    /// 按家族标签分发到正确的签名路径
    pub async fn sign_transaction(
        &self,
        tx: &UnsignedTransaction,
        pin: &str,
    ) -> Result<SignedTransaction, SignError> {
        match tx {
            UnsignedTransaction::Evm(evm_tx) => {
                self.signer.sign_transaction(evm_tx, Some(pin)).await
            }
            UnsignedTransaction::Solana(t) => {
                self.sign_non_evm_transaction(&non_evm_request(ChainFamily::Solana, t), pin)
                    .await
            }
            UnsignedTransaction::Tron(t) => {
                self.sign_non_evm_transaction(&non_evm_request(ChainFamily::Tron, t), pin)
                    .await
            }
            UnsignedTransaction::Bitcoin(t) => {
                self.sign_non_evm_transaction(&non_evm_request(ChainFamily::Bitcoin, t), pin)
                    .await
            }
        }
    }

    pub async fn sign_non_evm_transaction(
        &self,
        request: &NonEvmSignRequest,
        pin: &str,
    ) -> Result<SignedTransaction, SignError> {
        self.signer.sign_non_evm(request, Some(pin)).await
    }

    pub async fn broadcast_transaction(
        &self,
        signed: &SignedTransaction,
    ) -> Result<BroadcastResult, BroadcastError> {
        self.client.broadcast_transaction(signed).await
    }

    /// 端到端转账：构建 → 签名 → 广播 → 注册确认跟踪
    ///
    /// 每个阶段的失败保持各自的类型，调用方可以区分渲染。
    pub async fn send_transfer(
        &self,
        intent: &TransferIntent,
        pin: &str,
    ) -> Result<String, TransferError> {
        let support = self.is_supported(&intent.chain_id);
        if !support.supported {
            return Err(TransferError::Build(BuildError::UnknownChain(
                intent.chain_id.clone(),
            )));
        }

        let unsigned = self.build_transaction(intent).await?;
        let signed = self.sign_transaction(&unsigned, pin).await?;
        let result = self.broadcast_transaction(&signed).await?;

        let token_symbol = intent
            .token
            .as_ref()
            .map(|t| t.symbol.clone())
            .unwrap_or_else(|| REGISTRY.symbol(&intent.chain_id).to_string());

        self.tracker.add_transaction(NewPendingTx {
            id: result.tx_hash.clone(),
            tx_hash: result.tx_hash.clone(),
            chain_id: intent.chain_id.clone(),
            evm_chain_id: support.evm_chain_id,
            token_symbol,
            amount: intent.amount.clone(),
            to_address: intent.to.clone(),
            from_address: intent.from.clone(),
        });

        tracing::info!(tx_hash = %result.tx_hash, chain = %intent.chain_id, "transfer submitted");
        Ok(result.tx_hash)
    }
}

fn non_evm_request(family: ChainFamily, transfer: &NativeTransfer) -> NonEvmSignRequest {
    NonEvmSignRequest {
        family,
        from: transfer.from.clone(),
        to: transfer.to.clone(),
        amount: transfer.amount.clone(),
        is_native_token: true,
    }
}
