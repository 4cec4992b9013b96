use ethers::types::{H256, U256};

/// Decimals of the oracle's payment token
pub const TOKEN_DECIMALS: u32 = 18;

pub fn format_token_amount(amount: U256, decimals: u32) -> String {
    ethers::utils::format_units(amount, decimals).unwrap_or_else(|_| amount.to_string())
}

/// `0x1234…abcd` rendering of a hash for log lines
pub fn short_hash(hash: &H256) -> String {
    let full = hex::encode(hash.as_bytes());
    format!("0x{}…{}", &full[..4], &full[full.len() - 4..])
}
