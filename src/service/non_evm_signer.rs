//! 非 EVM 链软件签名
//!
//! Solana 转账消息逐字节构造后 ed25519 签名；TRON 由节点生成
//! 交易骨架、本地对 txID 做可恢复 ECDSA；Bitcoin 从 UTXO 组装
//! P2WPKH segwit v0 交易并逐输入签名。

use std::str::FromStr;

use bitcoin::hashes::Hash;
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{
    absolute::LockTime, transaction::Version, Amount, Network, OutPoint, ScriptBuf, Sequence,
    Transaction, TxIn, TxOut, Txid, Witness,
};
use ed25519_dalek::Signer as _;
use ethers::signers::{coins_bip39::English, MnemonicBuilder};
use ethers::utils::keccak256;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::domain::{ChainFamily, NonEvmSignRequest, SignedTransaction};
use crate::error::SignError;
use crate::service::blockchain_client::BlockchainClient;
use crate::utils::amount::{self, LAMPORTS_PER_SOL, SATOSHIS_PER_BTC, SUN_PER_TRX};

/// 各链派生路径
pub const SOLANA_DERIVATION_PATH: &str = "m/44'/501'/0'/0'";
pub const TRON_DERIVATION_PATH: &str = "m/44'/195'/0'/0/0";
pub const BITCOIN_DERIVATION_PATH: &str = "m/84'/0'/0'/0/0";

/// 找零低于此阈值并入手续费
const DUST_THRESHOLD_SAT: u64 = 546;

// ============ Solana ============

/// Solana 密钥：种子前 32 字节直接作为 ed25519 私钥
fn solana_keypair(mnemonic: &str) -> Result<ed25519_dalek::SigningKey, SignError> {
    let parsed = bip39::Mnemonic::parse(mnemonic)
        .map_err(|e| SignError::Signing(format!("invalid mnemonic: {}", e)))?;
    let seed = parsed.to_seed("");
    let mut key_bytes = [0u8; 32];
    key_bytes.copy_from_slice(&seed[..32]);
    Ok(ed25519_dalek::SigningKey::from_bytes(&key_bytes))
}

/// 助记词对应的 Solana 地址（base58 公钥）
pub fn derive_solana_address(mnemonic: &str) -> Result<String, SignError> {
    let key = solana_keypair(mnemonic)?;
    Ok(bs58::encode(key.verifying_key().to_bytes()).into_string())
}

/// System Program 转账消息：1 个签名、3 个账户、instruction index 2、
/// 8 字节小端 lamports
fn build_transfer_message(
    from: &[u8; 32],
    to: &[u8; 32],
    blockhash: &[u8; 32],
    lamports: u64,
) -> Vec<u8> {
    let system_program = [0u8; 32];

    let mut instruction_data = [0u8; 12];
    instruction_data[0] = 2; // transfer
    instruction_data[4..12].copy_from_slice(&lamports.to_le_bytes());

    let mut message = Vec::with_capacity(3 + 1 + 96 + 32 + 1 + 5 + 12);
    // header: 需要的签名数 1，只读已签名 0，只读未签名 1
    message.extend_from_slice(&[1, 0, 1]);
    message.push(3); // 账户数
    message.extend_from_slice(from);
    message.extend_from_slice(to);
    message.extend_from_slice(&system_program);
    message.extend_from_slice(blockhash);
    message.push(1); // instruction 数
    message.push(2); // program id 索引 (system program)
    message.push(2); // 账户索引数
    message.extend_from_slice(&[0, 1]); // from, to
    message.push(12); // data 长度
    message.extend_from_slice(&instruction_data);
    message
}

pub async fn sign_solana(
    mnemonic: &str,
    request: &NonEvmSignRequest,
    client: &BlockchainClient,
) -> Result<SignedTransaction, SignError> {
    let key = solana_keypair(mnemonic)?;
    let derived = bs58::encode(key.verifying_key().to_bytes()).into_string();
    if request.from != derived {
        return Err(SignError::Signing(
            "sender address does not match derived key".to_string(),
        ));
    }

    let lamports = amount::to_base_units(&request.amount, LAMPORTS_PER_SOL)
        .map_err(|e| SignError::Signing(e.to_string()))?;

    let blockhash = client.get_solana_blockhash().await?;
    let blockhash_bytes = decode_pubkey(&blockhash, "blockhash")?;
    let from_bytes = key.verifying_key().to_bytes();
    let to_bytes = decode_pubkey(&request.to, "recipient")?;

    let message = build_transfer_message(&from_bytes, &to_bytes, &blockhash_bytes, lamports);
    let signature = key.sign(&message);

    let mut signed = Vec::with_capacity(1 + 64 + message.len());
    signed.push(1); // 签名数
    signed.extend_from_slice(&signature.to_bytes());
    signed.extend_from_slice(&message);

    Ok(SignedTransaction {
        family: ChainFamily::Solana,
        chain_id: None,
        payload: bs58::encode(&signed).into_string(),
        tx_hash: Some(bs58::encode(signature.to_bytes()).into_string()),
    })
}

fn decode_pubkey(encoded: &str, what: &str) -> Result<[u8; 32], SignError> {
    let bytes = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| SignError::Signing(format!("bad {} encoding: {}", what, e)))?;
    bytes
        .try_into()
        .map_err(|_| SignError::Signing(format!("{} is not 32 bytes", what)))
}

// ============ TRON ============

/// 助记词对应的 TRON 地址：0x41 + keccak(公钥)[12..]，base58check 编码
pub fn derive_tron_address(mnemonic: &str) -> Result<String, SignError> {
    let wallet = derive_secp_wallet(mnemonic, TRON_DERIVATION_PATH)?;
    let uncompressed = wallet.signer().verifying_key().to_encoded_point(false);
    let pubkey_hash = keccak256(&uncompressed.as_bytes()[1..]);

    let mut payload = [0u8; 21];
    payload[0] = 0x41;
    payload[1..].copy_from_slice(&pubkey_hash[12..]);
    Ok(base58check(&payload))
}

pub async fn sign_tron(
    mnemonic: &str,
    request: &NonEvmSignRequest,
    client: &BlockchainClient,
) -> Result<SignedTransaction, SignError> {
    let derived = derive_tron_address(mnemonic)?;
    if request.from != derived {
        return Err(SignError::Signing(
            "sender address does not match derived key".to_string(),
        ));
    }

    let sun = amount::to_base_units(&request.amount, SUN_PER_TRX)
        .map_err(|e| SignError::Signing(e.to_string()))?;

    let mut unsigned = client
        .tron_create_transaction(&request.from, &request.to, sun)
        .await?;
    let tx_id = unsigned
        .get("txID")
        .and_then(|t| t.as_str())
        .ok_or_else(|| SignError::Signing("TRON transaction missing txID".to_string()))?
        .to_string();

    let digest = hex::decode(&tx_id)
        .map_err(|e| SignError::Signing(format!("bad txID hex: {}", e)))?;

    let wallet = derive_secp_wallet(mnemonic, TRON_DERIVATION_PATH)?;
    let (signature, recovery_id) = wallet
        .signer()
        .sign_prehash_recoverable(&digest)
        .map_err(|e| SignError::Signing(e.to_string()))?;

    let mut sig_hex = hex::encode(signature.to_bytes());
    sig_hex.push_str(if recovery_id.to_byte() == 0 { "00" } else { "01" });

    unsigned["signature"] = json!([sig_hex]);

    Ok(SignedTransaction {
        family: ChainFamily::Tron,
        chain_id: None,
        payload: unsigned.to_string(),
        tx_hash: Some(tx_id),
    })
}

fn base58check(payload: &[u8]) -> String {
    let first = Sha256::digest(payload);
    let second = Sha256::digest(first);
    let mut with_checksum = payload.to_vec();
    with_checksum.extend_from_slice(&second[..4]);
    bs58::encode(with_checksum).into_string()
}

// ============ Bitcoin ============

/// 助记词对应的 Bitcoin P2WPKH 地址（bc1...）
pub fn derive_bitcoin_address(mnemonic: &str) -> Result<String, SignError> {
    let (_, public_key) = bitcoin_keys(mnemonic)?;
    let address = bitcoin::Address::p2wpkh(&public_key, Network::Bitcoin)
        .map_err(|e| SignError::Signing(format!("address derivation failed: {}", e)))?;
    Ok(address.to_string())
}

fn bitcoin_keys(
    mnemonic: &str,
) -> Result<(bitcoin::secp256k1::SecretKey, bitcoin::PublicKey), SignError> {
    let wallet = derive_secp_wallet(mnemonic, BITCOIN_DERIVATION_PATH)?;
    let secret_bytes = wallet.signer().to_bytes();
    let secret_key = bitcoin::secp256k1::SecretKey::from_slice(&secret_bytes)
        .map_err(|e| SignError::Signing(e.to_string()))?;
    let secp = bitcoin::secp256k1::Secp256k1::new();
    let public_key = bitcoin::PublicKey::new(secret_key.public_key(&secp));
    Ok((secret_key, public_key))
}

pub async fn sign_bitcoin(
    mnemonic: &str,
    request: &NonEvmSignRequest,
    client: &BlockchainClient,
) -> Result<SignedTransaction, SignError> {
    let (secret_key, public_key) = bitcoin_keys(mnemonic)?;
    let own_address = bitcoin::Address::p2wpkh(&public_key, Network::Bitcoin)
        .map_err(|e| SignError::Signing(e.to_string()))?;
    if request.from != own_address.to_string() {
        return Err(SignError::Signing(
            "sender address does not match derived key".to_string(),
        ));
    }

    let satoshis = amount::to_base_units(&request.amount, SATOSHIS_PER_BTC)
        .map_err(|e| SignError::Signing(e.to_string()))?;

    let utxos = client.get_bitcoin_utxos(&request.from).await?;
    if utxos.is_empty() {
        return Err(SignError::InsufficientFunds("no UTXOs available".to_string()));
    }

    let fee_rate = client.get_bitcoin_fee_rate().await;
    let estimated_size = 110 + utxos.len() as u64 * 68;
    let fee = fee_rate * estimated_size;

    // 贪心选择输入直到覆盖金额 + 手续费
    let mut total_input: u64 = 0;
    let mut selected = Vec::new();
    for utxo in &utxos {
        selected.push(utxo);
        total_input += utxo.value;
        if total_input >= satoshis + fee {
            break;
        }
    }
    if total_input < satoshis + fee {
        return Err(SignError::InsufficientFunds(format!(
            "need {} sat, available {} sat",
            satoshis + fee,
            total_input
        )));
    }

    let recipient = bitcoin::Address::from_str(&request.to)
        .map_err(|e| SignError::Signing(format!("bad recipient address: {}", e)))?
        .require_network(Network::Bitcoin)
        .map_err(|e| SignError::Signing(format!("recipient network mismatch: {}", e)))?;

    let own_script = own_address.script_pubkey();

    let input: Vec<TxIn> = selected
        .iter()
        .map(|utxo| {
            Ok(TxIn {
                previous_output: OutPoint {
                    txid: Txid::from_str(&utxo.txid)
                        .map_err(|e| SignError::Signing(format!("bad utxo txid: {}", e)))?,
                    vout: utxo.vout,
                },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            })
        })
        .collect::<Result<_, SignError>>()?;

    let mut output = vec![TxOut {
        value: Amount::from_sat(satoshis),
        script_pubkey: recipient.script_pubkey(),
    }];
    let change = total_input - satoshis - fee;
    if change > DUST_THRESHOLD_SAT {
        output.push(TxOut {
            value: Amount::from_sat(change),
            script_pubkey: own_script.clone(),
        });
    }

    let mut tx = Transaction {
        version: Version::ONE,
        lock_time: LockTime::ZERO,
        input,
        output,
    };

    let secp = bitcoin::secp256k1::Secp256k1::new();
    for (i, utxo) in selected.iter().enumerate() {
        let sighash = {
            let mut cache = SighashCache::new(&tx);
            cache
                .p2wpkh_signature_hash(
                    i,
                    &own_script,
                    Amount::from_sat(utxo.value),
                    EcdsaSighashType::All,
                )
                .map_err(|e| SignError::Signing(format!("sighash failed: {}", e)))?
        };
        let message = bitcoin::secp256k1::Message::from_digest(sighash.to_byte_array());
        let signature = secp.sign_ecdsa(&message, &secret_key);

        let mut sig_bytes = signature.serialize_der().to_vec();
        sig_bytes.push(EcdsaSighashType::All.to_u32() as u8);

        tx.input[i].witness = Witness::from_slice(&[sig_bytes, public_key.to_bytes()]);
    }

    Ok(SignedTransaction {
        family: ChainFamily::Bitcoin,
        chain_id: None,
        payload: bitcoin::consensus::encode::serialize_hex(&tx),
        tx_hash: Some(tx.txid().to_string()),
    })
}

// ============ 公共派生辅助 ============

fn derive_secp_wallet(
    mnemonic: &str,
    path: &str,
) -> Result<ethers::signers::Wallet<k256::ecdsa::SigningKey>, SignError> {
    MnemonicBuilder::<English>::default()
        .phrase(mnemonic)
        .derivation_path(path)
        .map_err(|e| SignError::Signing(format!("bad derivation path: {}", e)))?
        .build()
        .map_err(|e| SignError::Signing(format!("key derivation failed: {}", e)))
}
