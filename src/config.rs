//! 配置管理模块
//! 支持从环境变量和配置文件加载配置

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::chain::{BITCOIN_API_URL, SOLANA_RPC_URL, TRON_API_URL};

/// 应用配置结构体
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 区块链 RPC 配置
///
/// `evm_endpoints` 覆盖内置端点表（TOML 的表键是字符串，
/// 因此按十进制链 ID 字符串存储）；非 EVM 端点各有缺省值。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default)]
    pub evm_endpoints: HashMap<String, String>,
    pub solana_url: String,
    pub tron_url: String,
    pub bitcoin_api_url: String,
    /// 单次 RPC 请求超时（秒）
    pub request_timeout_secs: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            evm_endpoints: HashMap::new(),
            solana_url: SOLANA_RPC_URL.to_string(),
            tron_url: TRON_API_URL.to_string(),
            bitcoin_api_url: BITCOIN_API_URL.to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl RpcConfig {
    /// 查数字链 ID 的端点覆盖项
    pub fn evm_endpoint_override(&self, chain_id: u64) -> Option<&str> {
        self.evm_endpoints.get(&chain_id.to_string()).map(|s| s.as_str())
    }

    /// 设置端点覆盖项（测试和注入场景）
    pub fn set_evm_endpoint(&mut self, chain_id: u64, url: impl Into<String>) {
        self.evm_endpoints.insert(chain_id.to_string(), url.into());
    }
}

/// 签名设备串口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// 串口路径，例如 /dev/ttyACM0
    #[serde(default)]
    pub port: Option<String>,
    pub baud_rate: u32,
    /// 连接后等待链路稳定的时间
    pub settle_delay_ms: u64,
    /// 单条命令的响应超时
    pub command_timeout_ms: u64,
    /// 响应缓冲区轮询间隔
    pub poll_interval_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 115_200,
            settle_delay_ms: 500,
            command_timeout_ms: 5_000,
            poll_interval_ms: 50,
        }
    }
}

/// 确认跟踪器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// 轮询间隔
    pub poll_interval_ms: u64,
    /// 连续找不到回执的轮询上限，超过即判失败
    pub max_poll_attempts: u32,
    /// confirmed 终态后的驱逐延迟
    pub confirmed_evict_ms: u64,
    /// failed 终态后的驱逐延迟
    pub failed_evict_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 3_000,
            max_poll_attempts: 60,
            confirmed_evict_ms: 5_000,
            failed_evict_ms: 10_000,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// "json" 或 "text"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "vaultcore=debug,info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl Config {
    /// 从配置文件 + 环境变量加载
    ///
    /// 加载顺序：.env → 缺省值 → TOML 文件 → 环境变量覆盖。
    pub fn from_env_and_file(path: Option<&str>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(p) if Path::new(p).exists() => {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config file: {}", p))?;
                toml::from_str(&raw)
                    .with_context(|| format!("Failed to parse config file: {}", p))?
            }
            _ => Config::default(),
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("SOLANA_RPC_URL") {
            self.rpc.solana_url = url;
        }
        if let Ok(url) = std::env::var("TRON_API_URL") {
            self.rpc.tron_url = url;
        }
        if let Ok(url) = std::env::var("BITCOIN_API_URL") {
            self.rpc.bitcoin_api_url = url;
        }
        if let Ok(port) = std::env::var("DEVICE_SERIAL_PORT") {
            self.device.port = Some(port);
        }
        if let Ok(level) = std::env::var("VAULTCORE_LOG_LEVEL") {
            self.logging.level = level;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.device.baud_rate, 115_200);
        assert_eq!(config.device.command_timeout_ms, 5_000);
        assert_eq!(config.tracker.poll_interval_ms, 3_000);
        assert_eq!(config.tracker.max_poll_attempts, 60);
        assert_eq!(config.rpc.solana_url, SOLANA_RPC_URL);
    }

    #[test]
    fn test_load_from_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[rpc]
solana_url = "http://localhost:8899"
tron_url = "http://localhost:9090"
bitcoin_api_url = "http://localhost:3000"
request_timeout_secs = 5

[rpc.evm_endpoints]
1 = "http://localhost:8545"

[device]
baud_rate = 9600
settle_delay_ms = 100
command_timeout_ms = 1000
poll_interval_ms = 10
"#
        )
        .unwrap();

        let config = Config::from_env_and_file(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(config.rpc.solana_url, "http://localhost:8899");
        assert_eq!(config.rpc.evm_endpoint_override(1).unwrap(), "http://localhost:8545");
        assert_eq!(config.device.baud_rate, 9600);
        // 未出现的段落保持缺省
        assert_eq!(config.tracker.max_poll_attempts, 60);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = Config::from_env_and_file(Some("/nonexistent/vaultcore.toml")).unwrap();
        assert_eq!(config.device.command_timeout_ms, 5_000);
    }
}
