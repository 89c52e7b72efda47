//! Thin read-only capability for on-chain lookups. This is an interface
//! only: the production implementation (an RPC client against an EVM node)
//! is a collaborator, and the crate ships a scripted [`MockChainAdapter`]
//! as its primary test double.

pub mod mock;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

pub use mock::MockChainAdapter;

/// keccak256("Transfer(address,address,uint256)"), the standard ERC-20
/// Transfer event topic0.
pub const TRANSFER_EVENT_TOPIC0: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

#[derive(Debug, Error)]
pub enum ChainAdapterError {
    #[error("transaction not found: {0}")]
    NotFound(String),

    #[error("upstream RPC error: {0}")]
    Rpc(String),
}

#[derive(Debug, Clone)]
pub struct Log {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
}

#[derive(Debug, Clone)]
pub struct Receipt {
    pub success: bool,
    pub block_number: i64,
    pub from: String,
    pub logs: Vec<Log>,
}

/// A decoded ERC-20 `Transfer(from, to, value)` event.
#[derive(Debug, Clone)]
pub struct TransferEvent {
    pub token_address: String,
    pub from: String,
    pub to: String,
    pub value: u128,
}

impl Log {
    /// Decodes this log as an ERC-20 Transfer event if its topic0 matches
    /// and the indexed `from`/`to` topics and non-indexed `value` data are
    /// well-formed 32-byte words, per §4.7.
    pub fn decode_transfer(&self) -> Option<TransferEvent> {
        if self.topics.len() != 3 || self.topics[0] != TRANSFER_EVENT_TOPIC0 {
            return None;
        }
        let from = topic_to_address(&self.topics[1])?;
        let to = topic_to_address(&self.topics[2])?;
        let value = decode_u256_hex(&self.data)?;
        Some(TransferEvent {
            token_address: self.address.to_lowercase(),
            from,
            to,
            value,
        })
    }
}

/// A 32-byte topic encodes an address in its low 20 bytes, left-padded with
/// zeros.
fn topic_to_address(topic: &str) -> Option<String> {
    let hex = topic.trim_start_matches("0x");
    if hex.len() != 64 {
        return None;
    }
    Some(format!("0x{}", &hex[24..]))
}

fn decode_u256_hex(data: &str) -> Option<u128> {
    let hex = data.trim_start_matches("0x");
    let trimmed = hex.trim_start_matches('0');
    if trimmed.is_empty() {
        return Some(0);
    }
    u128::from_str_radix(trimmed, 16).ok()
}

/// Scales a raw on-chain integer value down by a token's decimals into a
/// human-readable `Decimal`, the conversion the Verifier compares against
/// `expected_amount` with no epsilon.
pub fn scale_by_decimals(raw: u128, decimals: u8) -> Decimal {
    let mantissa = Decimal::from(raw);
    let divisor = Decimal::from(10u128.pow(decimals as u32));
    mantissa / divisor
}

#[async_trait]
pub trait ChainAdapter: Send + Sync {
    async fn get_receipt(&self, tx_hash: &str) -> Result<Receipt, ChainAdapterError>;

    /// Number of decimals the given ERC-20 contract reports.
    async fn token_decimals(&self, token_address: &str) -> Result<u8, ChainAdapterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_transfer_event_from_log() {
        let log = Log {
            address: "0x036cbd53842c5426634e7929541ec2318f3dcf7e".to_string(),
            topics: vec![
                TRANSFER_EVENT_TOPIC0.to_string(),
                format!(
                    "0x000000000000000000000000{}",
                    "1111111111111111111111111111111111111111"
                ),
                format!(
                    "0x000000000000000000000000{}",
                    "2222222222222222222222222222222222222222"
                ),
            ],
            data: "0x00000000000000000000000000000000000000000000000000000005f5e100"
                .to_string(),
        };

        let transfer = log.decode_transfer().expect("should decode");
        assert_eq!(transfer.from, "0x1111111111111111111111111111111111111111");
        assert_eq!(transfer.to, "0x2222222222222222222222222222222222222222");
        assert_eq!(transfer.value, 100_000_000);
    }

    #[test]
    fn rejects_log_with_wrong_topic0() {
        let log = Log {
            address: "0xabc".to_string(),
            topics: vec!["0xdeadbeef".to_string(), "0x0".to_string(), "0x0".to_string()],
            data: "0x0".to_string(),
        };
        assert!(log.decode_transfer().is_none());
    }

    #[test]
    fn scales_raw_value_by_decimals() {
        let value = scale_by_decimals(100_000_000, 6);
        assert_eq!(value, Decimal::new(100, 0));
    }
}
