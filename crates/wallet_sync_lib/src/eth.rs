use crate::error::SyncError;
use secp256k1::{PublicKey, SecretKey};
use sha3::Digest;
use sha3::Keccak256;
use std::str::FromStr;
use web3::types::Address;

pub fn get_eth_addr_from_secret(secret_key: &SecretKey) -> Address {
    Address::from_slice(
        &Keccak256::digest(
            &PublicKey::from_secret_key(&secp256k1::Secp256k1::new(), secret_key)
                .serialize_uncompressed()[1..65],
        )
        .as_slice()[12..],
    )
}

/// Lower-cased `0x` form used as the storage key for an address.
pub fn address_key(address: &Address) -> String {
    format!("{:#x}", address)
}

pub fn parse_address(input: &str) -> Result<Address, SyncError> {
    let trimmed = input.trim();
    let hex_part = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| {
            SyncError::InvalidInput(format!("Address must start with 0x: {}", input))
        })?;
    if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(SyncError::InvalidInput(format!(
            "Address must be 20 bytes of hex: {}",
            input
        )));
    }
    Ok(Address::from_str(hex_part)?)
}

pub fn parse_private_key(input: &str) -> Result<SecretKey, SyncError> {
    let trimmed = input.trim();
    let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if hex_part.len() != 64 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(SyncError::InvalidInput(
            "Private key must be 32 bytes of hex".to_string(),
        ));
    }
    SecretKey::from_str(hex_part)
        .map_err(|_| SyncError::InvalidInput("Private key is not a valid secp256k1 key".to_string()))
}

pub fn validate_block_range(from_block: u64, to_block: u64) -> Result<(), SyncError> {
    if from_block > to_block {
        return Err(SyncError::InvalidInput(format!(
            "Invalid block range: {} > {}",
            from_block, to_block
        )));
    }
    Ok(())
}
