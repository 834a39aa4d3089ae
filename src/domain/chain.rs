//! 多链配置模块
//!
//! 定义钱包支持的所有链及其家族归属、RPC 端点、
//! 确认数要求和 ERC-20 代币合约注册表。

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// 链家族
///
/// 家族标签唯一决定交易构建、签名和广播走哪条代码路径。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    /// EVM 系列 (Ethereum, BSC, Polygon, Avalanche, Arbitrum)
    Evm,
    /// Solana 系列 (ed25519)
    Solana,
    /// TRON 系列
    Tron,
    /// Bitcoin 系列 (含 XRP/DOGE/LTC/BCH 的回退归属)
    Bitcoin,
}

impl fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChainFamily::Evm => "evm",
            ChainFamily::Solana => "solana",
            ChainFamily::Tron => "tron",
            ChainFamily::Bitcoin => "bitcoin",
        };
        write!(f, "{}", s)
    }
}

/// 单条链配置
#[derive(Debug, Clone, Serialize)]
pub struct ChainEntry {
    /// 钱包内部链标识 (chain-0 .. chain-11)
    pub key: &'static str,
    /// 链家族
    pub family: ChainFamily,
    /// EVM 数字链 ID；非 EVM 链为 None
    pub evm_chain_id: Option<u64>,
    /// 原生代币符号
    pub symbol: &'static str,
}

/// 代币合约信息
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TokenContract {
    pub address: &'static str,
    pub decimals: u8,
}

/// 链支持性检查结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportInfo {
    pub supported: bool,
    pub family: Option<ChainFamily>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evm_chain_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// 链配置注册表
pub struct ChainRegistry {
    entries: HashMap<&'static str, ChainEntry>,
    rpc_endpoints: HashMap<u64, &'static str>,
    required_confirmations: HashMap<u64, u64>,
    token_contracts: HashMap<(&'static str, &'static str), TokenContract>,
}

/// 缺省确认数（没有表项的链）
pub const DEFAULT_REQUIRED_CONFIRMATIONS: u64 = 12;

/// Solana 主网 RPC
pub const SOLANA_RPC_URL: &str = "https://api.mainnet-beta.solana.com";
/// TRON 主网 API
pub const TRON_API_URL: &str = "https://api.trongrid.io";
/// Bitcoin 区块浏览器 API (blockstream)
pub const BITCOIN_API_URL: &str = "https://blockstream.info/api";

impl ChainRegistry {
    /// 创建预配置的注册表
    pub fn new() -> Self {
        let mut registry = Self {
            entries: HashMap::new(),
            rpc_endpoints: HashMap::new(),
            required_confirmations: HashMap::new(),
            token_contracts: HashMap::new(),
        };
        registry.register_default_chains();
        registry.register_rpc_endpoints();
        registry.register_confirmations();
        registry.register_token_contracts();
        registry
    }

    fn register_default_chains(&mut self) {
        use ChainFamily::*;

        let chains = [
            ChainEntry { key: "chain-0", family: Evm, evm_chain_id: Some(1), symbol: "ETH" },
            ChainEntry { key: "chain-1", family: Bitcoin, evm_chain_id: None, symbol: "BTC" },
            ChainEntry { key: "chain-2", family: Evm, evm_chain_id: Some(56), symbol: "BNB" },
            ChainEntry { key: "chain-3", family: Evm, evm_chain_id: Some(137), symbol: "MATIC" },
            ChainEntry { key: "chain-4", family: Evm, evm_chain_id: Some(43114), symbol: "AVAX" },
            ChainEntry { key: "chain-5", family: Evm, evm_chain_id: Some(42161), symbol: "ARB" },
            // XRP/DOGE/LTC/BCH 没有独立实现，归入 bitcoin 家族兜底
            ChainEntry { key: "chain-6", family: Bitcoin, evm_chain_id: None, symbol: "XRP" },
            ChainEntry { key: "chain-7", family: Bitcoin, evm_chain_id: None, symbol: "DOGE" },
            ChainEntry { key: "chain-8", family: Tron, evm_chain_id: None, symbol: "TRX" },
            ChainEntry { key: "chain-9", family: Bitcoin, evm_chain_id: None, symbol: "LTC" },
            ChainEntry { key: "chain-10", family: Bitcoin, evm_chain_id: None, symbol: "BCH" },
            ChainEntry { key: "chain-11", family: Solana, evm_chain_id: None, symbol: "SOL" },
        ];
        for entry in chains {
            self.entries.insert(entry.key, entry);
        }
    }

    fn register_rpc_endpoints(&mut self) {
        self.rpc_endpoints.insert(1, "https://eth.llamarpc.com");
        self.rpc_endpoints.insert(56, "https://bsc-dataseed.binance.org");
        self.rpc_endpoints.insert(137, "https://polygon-rpc.com");
        self.rpc_endpoints.insert(43114, "https://api.avax.network/ext/bc/C/rpc");
        self.rpc_endpoints.insert(42161, "https://arb1.arbitrum.io/rpc");
        self.rpc_endpoints.insert(10, "https://mainnet.optimism.io");
    }

    fn register_confirmations(&mut self) {
        // Polygon 的最终性不稳定，要求显著更高的确认数
        self.required_confirmations.insert(1, 12);
        self.required_confirmations.insert(56, 15);
        self.required_confirmations.insert(137, 128);
        self.required_confirmations.insert(43114, 12);
        self.required_confirmations.insert(42161, 12);
    }

    fn register_token_contracts(&mut self) {
        let contracts: [(&str, &str, &str, u8); 22] = [
            ("USDT", "chain-0", "0xdAC17F958D2ee523a2206206994597C13D831ec7", 6),
            ("USDT", "chain-2", "0x55d398326f99059fF775485246999027B3197955", 18),
            ("USDT", "chain-3", "0xc2132D05D31c914a87C6611C10748AEb04B58e8F", 6),
            ("USDT", "chain-5", "0xFd086bC7CD5C481DCC9C85ebE478A1C0b69FCbb9", 6),
            ("USDC", "chain-0", "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", 6),
            ("USDC", "chain-2", "0x8AC76a51cc950d9822D68b83fE1Ad97B32Cd580d", 18),
            ("USDC", "chain-3", "0x3c499c542cef5e3811e1192ce70d8cc03d5c3359", 6),
            ("USDC", "chain-5", "0xaf88d065e77c8cC2239327C5EDb3A432268e5831", 6),
            ("WBTC", "chain-0", "0x2260FAC5E5542a773Aa44fBCfeDf7C193bc2C599", 8),
            ("LINK", "chain-0", "0x514910771AF9Ca656af840dff83E8264EcF986CA", 18),
            ("LINK", "chain-2", "0xF8A0BF9cF54Bb92F17374d9e9A321E6a111a51bD", 18),
            ("UNI", "chain-0", "0x1f9840a85d5aF5bf1D1762F925BDADdC4201F984", 18),
            ("SHIB", "chain-0", "0x95aD61b0a150d79219dCF64E1E6Cc01f0B64C4cE", 18),
            ("STETH", "chain-0", "0xae7ab96520DE3A18E5e111B5EaAb095312D7fE84", 18),
            ("AAVE", "chain-0", "0x7Fc66500c84A76Ad7e9c93437bFc5Ac33E2DDaE9", 18),
            ("MKR", "chain-0", "0x9f8F72aA9304c8B593d555F12eF6589cC3A579A2", 18),
            ("GRT", "chain-0", "0xc944E90C64B2c07662A292be6244BDf05Cda44a7", 18),
            ("DAI", "chain-0", "0x6B175474E89094C44Da98b954EedeAC495271d0F", 18),
            ("DAI", "chain-2", "0x1AF3F329e8BE154074D8769D1FFa4eE058B1DBc3", 18),
            ("USDT", "chain-4", "0x9702230A8Ea53601f5cD2dc00fDBc13d4dF4A8c7", 6),
            ("USDC", "chain-4", "0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E", 6),
            ("LINK", "chain-5", "0xf97f4df75117a78c1A5a0DBb814Af92458539FB4", 18),
        ];
        for (symbol, chain, address, decimals) in contracts {
            self.token_contracts
                .insert((symbol, chain), TokenContract { address, decimals });
        }
    }

    /// 通过钱包链标识获取配置
    pub fn get(&self, chain_key: &str) -> Option<&ChainEntry> {
        self.entries.get(chain_key)
    }

    /// 该链的原生代币符号，未知链回退到 ETH
    pub fn symbol(&self, chain_key: &str) -> &'static str {
        self.entries.get(chain_key).map(|e| e.symbol).unwrap_or("ETH")
    }

    /// EVM 数字链 ID 对应的缺省 RPC 端点
    pub fn rpc_endpoint(&self, evm_chain_id: u64) -> Option<&'static str> {
        self.rpc_endpoints.get(&evm_chain_id).copied()
    }

    /// 该链要求的确认数，没有表项的链使用缺省值 12
    pub fn required_confirmations(&self, evm_chain_id: u64) -> u64 {
        self.required_confirmations
            .get(&evm_chain_id)
            .copied()
            .unwrap_or(DEFAULT_REQUIRED_CONFIRMATIONS)
    }

    /// 按符号 + 链查代币合约
    pub fn token_contract(&self, symbol: &str, chain_key: &str) -> Option<TokenContract> {
        let symbol_upper = symbol.to_uppercase();
        self.entries.get(chain_key)?;
        self.token_contracts
            .iter()
            .find(|((s, c), _)| *s == symbol_upper && *c == chain_key)
            .map(|(_, contract)| *contract)
    }

    /// 检查链是否受支持
    ///
    /// 未知链返回 `{supported: false, reason: "Unknown chain"}`，
    /// 调用方据此拒绝后续 build/sign/broadcast。
    pub fn is_supported(&self, chain_key: &str) -> SupportInfo {
        match self.entries.get(chain_key) {
            None => SupportInfo {
                supported: false,
                family: None,
                evm_chain_id: None,
                reason: Some("Unknown chain".to_string()),
            },
            Some(entry) => SupportInfo {
                supported: true,
                family: Some(entry.family),
                evm_chain_id: entry.evm_chain_id,
                reason: None,
            },
        }
    }

    /// 列出所有支持的链
    pub fn list_all(&self) -> Vec<&ChainEntry> {
        self.entries.values().collect()
    }
}

impl Default for ChainRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// 进程级共享注册表（纯静态数据，构造一次即可）
pub static REGISTRY: Lazy<ChainRegistry> = Lazy::new(ChainRegistry::new);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_lookup() {
        let registry = ChainRegistry::new();

        let eth = registry.get("chain-0").unwrap();
        assert_eq!(eth.family, ChainFamily::Evm);
        assert_eq!(eth.evm_chain_id, Some(1));

        let sol = registry.get("chain-11").unwrap();
        assert_eq!(sol.family, ChainFamily::Solana);
        assert_eq!(sol.evm_chain_id, None);

        let trx = registry.get("chain-8").unwrap();
        assert_eq!(trx.family, ChainFamily::Tron);
    }

    #[test]
    fn test_unknown_chain_not_supported() {
        let registry = ChainRegistry::new();
        let info = registry.is_supported("unknown-chain-id");
        assert!(!info.supported);
        assert_eq!(info.reason.as_deref(), Some("Unknown chain"));
        assert!(info.family.is_none());
    }

    #[test]
    fn test_supported_chain_info() {
        let registry = ChainRegistry::new();
        let info = registry.is_supported("chain-2");
        assert!(info.supported);
        assert_eq!(info.family, Some(ChainFamily::Evm));
        assert_eq!(info.evm_chain_id, Some(56));
    }

    #[test]
    fn test_required_confirmations() {
        let registry = ChainRegistry::new();
        assert_eq!(registry.required_confirmations(1), 12);
        assert_eq!(registry.required_confirmations(56), 15);
        assert_eq!(registry.required_confirmations(137), 128);
        // 无表项的链走缺省
        assert_eq!(registry.required_confirmations(10), 12);
        assert_eq!(registry.required_confirmations(99999), 12);
    }

    #[test]
    fn test_token_contract_lookup() {
        let registry = ChainRegistry::new();

        let usdt = registry.token_contract("usdt", "chain-0").unwrap();
        assert_eq!(usdt.decimals, 6);
        assert!(usdt.address.starts_with("0x"));

        // BSC 上的 USDT 是 18 位小数
        let usdt_bsc = registry.token_contract("USDT", "chain-2").unwrap();
        assert_eq!(usdt_bsc.decimals, 18);

        assert!(registry.token_contract("USDT", "chain-11").is_none());
        assert!(registry.token_contract("NOPE", "chain-0").is_none());
    }

    #[test]
    fn test_rpc_endpoint_table() {
        let registry = ChainRegistry::new();
        assert!(registry.rpc_endpoint(1).is_some());
        assert!(registry.rpc_endpoint(42161).is_some());
        assert!(registry.rpc_endpoint(777).is_none());
    }
}
