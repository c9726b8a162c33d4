use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use web3::types::U256;

pub const ETH_DECIMALS: u32 = 18;

#[derive(Debug, Clone)]
pub struct ConversionError {
    pub msg: String,
}

impl ConversionError {
    pub fn from(msg: String) -> Self {
        Self { msg }
    }
}

impl Display for ConversionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Error during conversion: {}", self.msg)
    }
}

impl Error for ConversionError {}

/// Converts an on-chain integer amount into a decimal with `decimals` places (18 when `None`).
pub fn u256_to_rust_dec(amount: U256, decimals: Option<u32>) -> Result<Decimal, ConversionError> {
    let decimals = decimals.unwrap_or(ETH_DECIMALS);
    if decimals > 28 {
        return Err(ConversionError::from(format!(
            "Too many decimals: {}",
            decimals
        )));
    }
    if amount > U256::from(u128::MAX) {
        return Err(ConversionError::from(format!(
            "Amount too big to convert: {}",
            amount
        )));
    }
    let amount = amount.as_u128();
    let amount = i128::try_from(amount)
        .map_err(|_| ConversionError::from(format!("Amount too big to convert: {}", amount)))?;
    let dec = Decimal::try_from_i128_with_scale(amount, decimals)
        .map_err(|err| ConversionError::from(format!("Amount out of range: {}", err)))?;
    Ok(dec.normalize())
}

pub fn rust_dec_to_u256(dec_amount: Decimal, decimals: Option<u32>) -> Result<U256, ConversionError> {
    let decimals = decimals.unwrap_or(ETH_DECIMALS);
    if decimals > ETH_DECIMALS {
        return Err(ConversionError::from(format!(
            "Too many decimals: {}",
            decimals
        )));
    }
    if dec_amount.is_sign_negative() {
        return Err(ConversionError::from(format!(
            "Negative amount cannot be converted: {}",
            dec_amount
        )));
    }
    let whole = dec_amount.trunc();
    let fract = dec_amount - whole;
    let whole = whole
        .to_u128()
        .ok_or_else(|| ConversionError::from(format!("Invalid amount: {}", dec_amount)))?;
    let fract_scaled = fract
        .checked_mul(Decimal::from(10u64.pow(decimals)))
        .ok_or_else(|| ConversionError::from(format!("Invalid amount: {}", dec_amount)))?;
    if fract_scaled.fract() != Decimal::ZERO {
        return Err(ConversionError::from(format!(
            "Amount {} has more than {} decimal places",
            dec_amount, decimals
        )));
    }
    let fract_scaled = fract_scaled
        .to_u128()
        .ok_or_else(|| ConversionError::from(format!("Invalid amount: {}", dec_amount)))?;
    let base = U256::exp10(decimals as usize);
    Ok(U256::from(whole) * base + U256::from(fract_scaled))
}

/// Parses a display amount ("1.5", " 0 ") into a decimal.
pub fn parse_decimal(amount: &str) -> Result<Decimal, ConversionError> {
    let trimmed = amount.trim();
    if trimmed.is_empty() {
        return Ok(Decimal::ZERO);
    }
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|_| ConversionError::from(format!("Invalid decimal amount: {}", amount)))
}

pub fn wei_str_to_eth(wei: &str) -> Result<Decimal, ConversionError> {
    let wei = U256::from_dec_str(wei.trim())
        .map_err(|_| ConversionError::from(format!("Invalid wei amount: {}", wei)))?;
    u256_to_rust_dec(wei, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u256_to_rust_dec() {
        let one_eth = U256::exp10(18);
        assert_eq!(u256_to_rust_dec(one_eth, None).unwrap().to_string(), "1");
        let amount = U256::from(1_500_000_000_000_000_000u128);
        assert_eq!(u256_to_rust_dec(amount, None).unwrap().to_string(), "1.5");
        assert_eq!(u256_to_rust_dec(U256::from(1), None).unwrap().to_string(), "0.000000000000000001");
        assert!(u256_to_rust_dec(U256::MAX, None).is_err());
    }

    #[test]
    fn test_rust_dec_to_u256() {
        let dec = Decimal::from_str("1.5").unwrap();
        assert_eq!(
            rust_dec_to_u256(dec, None).unwrap(),
            U256::from(1_500_000_000_000_000_000u128)
        );
        let dec = Decimal::from_str("-1").unwrap();
        assert!(rust_dec_to_u256(dec, None).is_err());
        let dec = Decimal::from_str("0.0000000000000000001").unwrap();
        assert!(rust_dec_to_u256(dec, None).is_err());
    }

    #[test]
    fn test_wei_str_to_eth() {
        assert_eq!(wei_str_to_eth("2000000000000000000").unwrap().to_string(), "2");
        assert!(wei_str_to_eth("abc").is_err());
    }

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal("").unwrap(), Decimal::ZERO);
        assert_eq!(parse_decimal(" 1.25 ").unwrap().to_string(), "1.25");
        assert!(parse_decimal("one").is_err());
    }
}
