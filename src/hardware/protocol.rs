//! 设备线协议
//!
//! 单行 JSON：命令带 action 和动作相关字段，响应是一个
//! 封闭的可选字段集合。不认识的字段忽略，解析不出的行丢弃。

use serde::{Deserialize, Serialize};

/// 发往设备的命令
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceCommand {
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DeviceCommand {
    fn action(action: &str) -> Self {
        Self {
            action: action.to_string(),
            pin: None,
            seed: None,
            message: None,
        }
    }

    pub fn ping() -> Self {
        Self::action("ping")
    }

    pub fn status() -> Self {
        Self::action("status")
    }

    pub fn setup(pin: &str, seed: &str) -> Self {
        Self {
            pin: Some(pin.to_string()),
            seed: Some(seed.to_string()),
            ..Self::action("setup")
        }
    }

    pub fn unlock(pin: &str) -> Self {
        Self {
            pin: Some(pin.to_string()),
            ..Self::action("unlock")
        }
    }

    pub fn lock() -> Self {
        Self::action("lock")
    }

    pub fn sign(message: &str, pin: &str) -> Self {
        Self {
            message: Some(message.to_string()),
            pin: Some(pin.to_string()),
            ..Self::action("sign")
        }
    }

    pub fn get_seed(pin: &str) -> Self {
        Self {
            pin: Some(pin.to_string()),
            ..Self::action("get_seed")
        }
    }

    pub fn reset(pin: &str) -> Self {
        Self {
            pin: Some(pin.to_string()),
            ..Self::action("reset")
        }
    }
}

/// 设备响应（所有字段可选，按动作取用）
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeviceResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_wallet: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unlocked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_out: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lockout_remaining: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pong: Option<bool>,
}

impl DeviceResponse {
    pub fn is_success(&self) -> bool {
        self.success == Some(true) && self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_serializes_without_empty_fields() {
        let json = serde_json::to_string(&DeviceCommand::ping()).unwrap();
        assert_eq!(json, r#"{"action":"ping"}"#);

        let json = serde_json::to_string(&DeviceCommand::unlock("1234")).unwrap();
        assert_eq!(json, r#"{"action":"unlock","pin":"1234"}"#);
    }

    #[test]
    fn test_sign_command_fields() {
        let cmd = DeviceCommand::sign("deadbeef", "1234");
        assert_eq!(cmd.action, "sign");
        assert_eq!(cmd.message.as_deref(), Some("deadbeef"));
        assert_eq!(cmd.pin.as_deref(), Some("1234"));
        assert!(cmd.seed.is_none());
    }

    #[test]
    fn test_response_ignores_unknown_fields() {
        let resp: DeviceResponse =
            serde_json::from_str(r#"{"pong": true, "firmware": "2.1"}"#).unwrap();
        assert_eq!(resp.pong, Some(true));
    }

    #[test]
    fn test_response_error_not_success() {
        let resp: DeviceResponse =
            serde_json::from_str(r#"{"success": true, "error": "locked out"}"#).unwrap();
        assert!(!resp.is_success());
    }
}
