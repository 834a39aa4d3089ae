//! 签名器抽象
//!
//! 同一时刻恰好一个后端生效：软件签名器（进程内助记词）或
//! 设备签名器（串口外设）。WrongPin / DeviceUnreachable /
//! Unsupported 三类失败保持可区分。

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ethers::signers::{coins_bip39::English, MnemonicBuilder, Signer as EthersSigner};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::transaction::eip712::{Eip712, TypedData};
use ethers::types::{Address, Eip1559TransactionRequest, TransactionRequest, U256};
use ethers::utils::keccak256;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::domain::{
    ChainFamily, EvmFee, EvmUnsignedTx, NonEvmSignRequest, SignedTransaction,
};
use crate::error::{DeviceError, SignError};
use crate::hardware::serial::PicoSerial;
use crate::service::blockchain_client::BlockchainClient;
use crate::service::non_evm_signer;

/// EVM 派生路径
pub const ETH_DERIVATION_PATH: &str = "m/44'/60'/0'/0/0";

/// 签名器能力
///
/// `pin` 为 Some 时逐次校验授权；为 None 时要求会话已解锁。
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    fn is_unlocked(&self) -> bool;

    async fn unlock(&self, pin: &str) -> Result<(), SignError>;

    async fn lock(&self);

    async fn sign_transaction(
        &self,
        tx: &EvmUnsignedTx,
        pin: Option<&str>,
    ) -> Result<SignedTransaction, SignError>;

    /// 非 EVM 家族不经过链适配器构建，直接拿轻量参数束签名
    async fn sign_non_evm(
        &self,
        request: &NonEvmSignRequest,
        pin: Option<&str>,
    ) -> Result<SignedTransaction, SignError>;

    /// EIP-191 个人消息签名（dApp 桥路径，要求会话已解锁）
    async fn sign_message(&self, message: &str) -> Result<String, SignError>;

    /// EIP-712 类型化数据签名，payload 是类型化数据的 JSON
    async fn sign_typed_data(&self, payload: &str) -> Result<String, SignError>;
}

// ============ 软件签名器 ============

pub struct SoftwareSigner {
    client: Arc<BlockchainClient>,
    mnemonic: String,
    pin_hash: [u8; 32],
    unlocked: Mutex<bool>,
}

impl SoftwareSigner {
    pub fn new(
        client: Arc<BlockchainClient>,
        mnemonic: &str,
        pin: &str,
    ) -> Result<Self, SignError> {
        bip39::Mnemonic::parse(mnemonic)
            .map_err(|e| SignError::Signing(format!("invalid mnemonic: {}", e)))?;
        Ok(Self {
            client,
            mnemonic: mnemonic.to_string(),
            pin_hash: hash_pin(pin),
            unlocked: Mutex::new(false),
        })
    }

    fn verify_pin(&self, pin: &str) -> Result<(), SignError> {
        if hash_pin(pin) == self.pin_hash {
            Ok(())
        } else {
            Err(SignError::WrongPin)
        }
    }

    /// pin 提供则校验，否则要求会话已解锁
    fn authorize(&self, pin: Option<&str>) -> Result<(), SignError> {
        match pin {
            Some(pin) => self.verify_pin(pin),
            None if self.is_unlocked() => Ok(()),
            None => Err(SignError::Locked),
        }
    }

    fn evm_wallet(
        &self,
        chain_id: u64,
    ) -> Result<ethers::signers::Wallet<k256::ecdsa::SigningKey>, SignError> {
        let wallet = MnemonicBuilder::<English>::default()
            .phrase(self.mnemonic.as_str())
            .derivation_path(ETH_DERIVATION_PATH)
            .map_err(|e| SignError::Signing(e.to_string()))?
            .build()
            .map_err(|e| SignError::Signing(e.to_string()))?;
        Ok(wallet.with_chain_id(chain_id))
    }

    /// 钱包的 EVM 地址
    pub fn evm_address(&self) -> Result<String, SignError> {
        let wallet = self.evm_wallet(1)?;
        Ok(format!("{:?}", wallet.address()))
    }
}

#[async_trait]
impl TransactionSigner for SoftwareSigner {
    fn is_unlocked(&self) -> bool {
        *self.unlocked.lock().expect("signer lock poisoned")
    }

    async fn unlock(&self, pin: &str) -> Result<(), SignError> {
        self.verify_pin(pin)?;
        *self.unlocked.lock().expect("signer lock poisoned") = true;
        Ok(())
    }

    async fn lock(&self) {
        *self.unlocked.lock().expect("signer lock poisoned") = false;
    }

    async fn sign_transaction(
        &self,
        tx: &EvmUnsignedTx,
        pin: Option<&str>,
    ) -> Result<SignedTransaction, SignError> {
        self.authorize(pin)?;

        let to_address: Address = tx
            .to
            .parse()
            .map_err(|e| SignError::Signing(format!("bad recipient: {}", e)))?;

        let typed: TypedTransaction = match &tx.fee {
            EvmFee::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => Eip1559TransactionRequest {
                to: Some(to_address.into()),
                value: Some(tx.value),
                data: tx.data.clone(),
                nonce: Some(U256::from(tx.nonce)),
                gas: Some(tx.gas_limit),
                max_fee_per_gas: Some(*max_fee_per_gas),
                max_priority_fee_per_gas: Some(*max_priority_fee_per_gas),
                chain_id: Some(tx.chain_id.into()),
                ..Default::default()
            }
            .into(),
            EvmFee::Legacy { gas_price } => TransactionRequest {
                to: Some(to_address.into()),
                value: Some(tx.value),
                data: tx.data.clone(),
                nonce: Some(U256::from(tx.nonce)),
                gas: Some(tx.gas_limit),
                gas_price: Some(*gas_price),
                chain_id: Some(tx.chain_id.into()),
                ..Default::default()
            }
            .into(),
        };

        let wallet = self.evm_wallet(tx.chain_id)?;
        let signature = wallet
            .sign_transaction(&typed)
            .await
            .map_err(|e| SignError::Signing(e.to_string()))?;
        let raw = typed.rlp_signed(&signature);

        Ok(SignedTransaction {
            family: ChainFamily::Evm,
            chain_id: Some(tx.chain_id),
            payload: format!("0x{}", hex::encode(raw.as_ref())),
            tx_hash: Some(format!("0x{}", hex::encode(keccak256(raw.as_ref())))),
        })
    }

    async fn sign_non_evm(
        &self,
        request: &NonEvmSignRequest,
        pin: Option<&str>,
    ) -> Result<SignedTransaction, SignError> {
        self.authorize(pin)?;

        match request.family {
            ChainFamily::Solana => {
                non_evm_signer::sign_solana(&self.mnemonic, request, &self.client).await
            }
            ChainFamily::Tron => {
                non_evm_signer::sign_tron(&self.mnemonic, request, &self.client).await
            }
            ChainFamily::Bitcoin => {
                non_evm_signer::sign_bitcoin(&self.mnemonic, request, &self.client).await
            }
            ChainFamily::Evm => Err(SignError::Unsupported(
                "EVM transactions go through sign_transaction",
            )),
        }
    }

    async fn sign_message(&self, message: &str) -> Result<String, SignError> {
        if !self.is_unlocked() {
            return Err(SignError::Locked);
        }
        let wallet = self.evm_wallet(1)?;
        let signature = wallet
            .sign_message(message.as_bytes())
            .await
            .map_err(|e| SignError::Signing(e.to_string()))?;
        Ok(format!("0x{}", signature))
    }

    async fn sign_typed_data(&self, payload: &str) -> Result<String, SignError> {
        if !self.is_unlocked() {
            return Err(SignError::Locked);
        }
        let typed: TypedData = serde_json::from_str(payload)
            .map_err(|e| SignError::Signing(format!("bad typed data: {}", e)))?;
        let wallet = self.evm_wallet(1)?;
        let signature = wallet
            .sign_typed_data(&typed)
            .await
            .map_err(|e| SignError::Signing(e.to_string()))?;
        Ok(format!("0x{}", signature))
    }
}

fn hash_pin(pin: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(pin.as_bytes());
    hasher.update(b"vaultcore-pin");
    hasher.finalize().into()
}

// ============ 设备签名器 ============

pub struct DeviceSigner<S: AsyncRead + AsyncWrite + Send + 'static> {
    serial: tokio::sync::Mutex<PicoSerial<S>>,
    /// 解锁成功后缓存的会话 PIN，设备每条 sign 命令都要带
    session_pin: Mutex<Option<String>>,
}

impl<S: AsyncRead + AsyncWrite + Send + 'static> DeviceSigner<S> {
    pub fn new(serial: PicoSerial<S>) -> Self {
        Self {
            serial: tokio::sync::Mutex::new(serial),
            session_pin: Mutex::new(None),
        }
    }

    fn session_pin(&self) -> Option<String> {
        self.session_pin.lock().expect("signer lock poisoned").clone()
    }

    /// 设备响应里的失败翻译成可区分的签名错误
    fn map_response_error(error: String, locked_out: Option<bool>) -> SignError {
        if locked_out == Some(true) || error.to_lowercase().contains("pin") {
            SignError::WrongPin
        } else {
            SignError::Signing(error)
        }
    }

    async fn device_sign(&self, message: &str, pin: &str) -> Result<String, SignError> {
        let mut serial = self.serial.lock().await;
        let response = serial.sign(message, pin).await.map_err(SignError::from)?;

        if let Some(error) = response.error {
            return Err(Self::map_response_error(error, response.locked_out));
        }
        response
            .signature
            .ok_or_else(|| SignError::Signing("device returned no signature".to_string()))
    }
}

#[async_trait]
impl<S: AsyncRead + AsyncWrite + Send + 'static> TransactionSigner for DeviceSigner<S> {
    fn is_unlocked(&self) -> bool {
        self.session_pin().is_some()
    }

    async fn unlock(&self, pin: &str) -> Result<(), SignError> {
        let mut serial = self.serial.lock().await;
        let response = serial.unlock(pin).await.map_err(SignError::from)?;

        if let Some(error) = response.error {
            return Err(Self::map_response_error(error, response.locked_out));
        }
        if response.unlocked == Some(false) {
            return Err(SignError::WrongPin);
        }

        *self.session_pin.lock().expect("signer lock poisoned") = Some(pin.to_string());
        Ok(())
    }

    async fn lock(&self) {
        *self.session_pin.lock().expect("signer lock poisoned") = None;
        let mut serial = self.serial.lock().await;
        if let Err(e) = serial.lock().await {
            tracing::debug!(error = %e, "device lock command failed");
        }
    }

    async fn sign_transaction(
        &self,
        tx: &EvmUnsignedTx,
        pin: Option<&str>,
    ) -> Result<SignedTransaction, SignError> {
        let pin = match pin.map(|p| p.to_string()).or_else(|| self.session_pin()) {
            Some(pin) => pin,
            None => return Err(SignError::Locked),
        };

        // 交易字段作为 JSON 消息交给设备固件签名
        let message = serde_json::to_string(tx)
            .map_err(|e| SignError::Signing(e.to_string()))?;
        let payload = self.device_sign(&message, &pin).await?;

        Ok(SignedTransaction {
            family: ChainFamily::Evm,
            chain_id: Some(tx.chain_id),
            payload,
            tx_hash: None,
        })
    }

    /// 设备固件只会签 EVM 载荷；这里的不支持必须与 WrongPin、
    /// DeviceUnreachable 区分开呈现
    async fn sign_non_evm(
        &self,
        _request: &NonEvmSignRequest,
        _pin: Option<&str>,
    ) -> Result<SignedTransaction, SignError> {
        Err(SignError::Unsupported(
            "non-EVM signing requires the software signer",
        ))
    }

    async fn sign_message(&self, message: &str) -> Result<String, SignError> {
        let pin = self.session_pin().ok_or(SignError::Locked)?;
        self.device_sign(message, &pin).await
    }

    async fn sign_typed_data(&self, payload: &str) -> Result<String, SignError> {
        let pin = self.session_pin().ok_or(SignError::Locked)?;
        let typed: TypedData = serde_json::from_str(payload)
            .map_err(|e| SignError::Signing(format!("bad typed data: {}", e)))?;
        // 设备只签 32 字节摘要
        let digest = typed
            .encode_eip712()
            .map_err(|e| SignError::Signing(e.to_string()))?;
        self.device_sign(&format!("0x{}", hex::encode(digest)), &pin).await
    }
}

impl From<DeviceError> for SignError {
    fn from(error: DeviceError) -> Self {
        match error {
            DeviceError::Timeout => SignError::Timeout,
            other => SignError::DeviceUnreachable(other.to_string()),
        }
    }
}
