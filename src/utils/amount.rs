//! 金额换算
//!
//! 十进制金额字符串到链基础单位的精确换算，资金路径禁止浮点。

use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::error::BuildError;

/// Solana: 1 SOL = 1e9 lamports
pub const LAMPORTS_PER_SOL: u32 = 9;
/// TRON: 1 TRX = 1e6 sun
pub const SUN_PER_TRX: u32 = 6;
/// Bitcoin: 1 BTC = 1e8 satoshis
pub const SATOSHIS_PER_BTC: u32 = 8;

/// `floor(amount * 10^decimals)`，精确到整数基础单位
///
/// 超出小数位的尾数直接截断（与下取整语义一致），不四舍五入。
pub fn to_base_units(amount: &str, decimals: u32) -> Result<u64, BuildError> {
    let parsed = Decimal::from_str(amount.trim())
        .map_err(|e| BuildError::InvalidAmount(format!("{}: {}", amount, e)))?;

    if parsed.is_sign_negative() {
        return Err(BuildError::InvalidAmount(format!(
            "negative amount: {}",
            amount
        )));
    }

    let unit = Decimal::from(10u64.pow(decimals));
    let scaled = parsed
        .checked_mul(unit)
        .ok_or_else(|| BuildError::InvalidAmount(format!("amount overflow: {}", amount)))?;

    scaled
        .floor()
        .to_u64()
        .ok_or_else(|| BuildError::InvalidAmount(format!("amount out of range: {}", amount)))
}
