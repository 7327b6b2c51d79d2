use rust_decimal::Decimal;

use crate::error::ChainError;

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// ERC-20 transfer(address,uint256) selector
pub const TRANSFER_SELECTOR: &str = "0xa9059cbb";

/// Parse a 0x-prefixed hex quantity (block number, log value) into u64
pub fn parse_hex_u64(raw: &str) -> Result<u64, ChainError> {
    let trimmed = raw.trim_start_matches("0x");
    u64::from_str_radix(trimmed, 16)
        .map_err(|_| ChainError::Decode(format!("invalid hex quantity: {}", raw)))
}

/// Parse a 0x-prefixed 256-bit hex value. Values beyond u128 are rejected;
/// no real token supply comes close.
pub fn parse_hex_value(raw: &str) -> Result<u128, ChainError> {
    let trimmed = raw.trim_start_matches("0x").trim_start_matches('0');
    if trimmed.is_empty() {
        return Ok(0);
    }
    if trimmed.len() > 32 {
        return Err(ChainError::Decode(format!("value out of range: {}", raw)));
    }
    u128::from_str_radix(trimmed, 16)
        .map_err(|_| ChainError::Decode(format!("invalid hex value: {}", raw)))
}

/// Normalize a raw integer token value by the token's decimal precision
pub fn normalize_amount(raw: u128, decimals: u32) -> Result<Decimal, ChainError> {
    if raw > i128::MAX as u128 {
        return Err(ChainError::Decode(format!("value out of range: {}", raw)));
    }
    Decimal::try_from_i128_with_scale(raw as i128, decimals)
        .map_err(|e| ChainError::Decode(format!("value not representable: {}", e)))
}

/// Extract the 20-byte address from a 32-byte log topic
pub fn address_from_topic(topic: &str) -> Result<String, ChainError> {
    let trimmed = topic.trim_start_matches("0x");
    if trimmed.len() != 64 || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ChainError::Decode(format!("invalid address topic: {}", topic)));
    }
    Ok(format!("0x{}", &trimmed[24..].to_lowercase()))
}

/// Pad a 20-byte address into its 32-byte topic form (for log filtering)
pub fn topic_for_address(address: &str) -> Result<String, ChainError> {
    let trimmed = address.trim_start_matches("0x");
    if trimmed.len() != 40 || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ChainError::Decode(format!("invalid address: {}", address)));
    }
    Ok(format!("0x{:0>64}", trimmed.to_lowercase()))
}

/// Decode transfer(address,uint256) calldata into (recipient, raw value)
///
/// Returns None for any other method; malformed transfer calldata is an
/// error so callers can log it rather than silently skip.
pub fn decode_transfer_calldata(input: &str) -> Result<Option<(String, u128)>, ChainError> {
    if !input.starts_with(TRANSFER_SELECTOR) {
        return Ok(None);
    }
    if !input.is_ascii() {
        return Err(ChainError::Decode("non-ascii calldata".to_string()));
    }
    // 0x + 8 selector chars + 64 (padded recipient) + 64 (value)
    if input.len() < 10 + 64 + 1 {
        return Err(ChainError::Decode(format!(
            "truncated transfer calldata: {}",
            input
        )));
    }
    let recipient = format!("0x{}", &input[34..74].to_lowercase());
    if !recipient[2..].chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ChainError::Decode(format!(
            "invalid recipient in calldata: {}",
            input
        )));
    }
    let value = parse_hex_value(&input[74..])?;
    Ok(Some((recipient, value)))
}
