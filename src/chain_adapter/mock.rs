use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ChainAdapter, ChainAdapterError, Receipt};

/// Scripted test double for the chain adapter, in place of `wiremock`-style
/// scripted HTTP fixtures since this collaborator is a Rust trait, not an
/// HTTP client.
#[derive(Default)]
pub struct MockChainAdapter {
    receipts: Mutex<HashMap<String, Receipt>>,
    decimals: Mutex<HashMap<String, u8>>,
}

impl MockChainAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_receipt(&self, tx_hash: &str, receipt: Receipt) {
        self.receipts
            .lock()
            .unwrap()
            .insert(tx_hash.to_lowercase(), receipt);
    }

    pub fn script_decimals(&self, token_address: &str, decimals: u8) {
        self.decimals
            .lock()
            .unwrap()
            .insert(token_address.to_lowercase(), decimals);
    }
}

#[async_trait]
impl ChainAdapter for MockChainAdapter {
    async fn get_receipt(&self, tx_hash: &str) -> Result<Receipt, ChainAdapterError> {
        self.receipts
            .lock()
            .unwrap()
            .get(&tx_hash.to_lowercase())
            .cloned()
            .ok_or_else(|| ChainAdapterError::NotFound(tx_hash.to_string()))
    }

    async fn token_decimals(&self, token_address: &str) -> Result<u8, ChainAdapterError> {
        self.decimals
            .lock()
            .unwrap()
            .get(&token_address.to_lowercase())
            .copied()
            .ok_or_else(|| ChainAdapterError::Rpc(format!("no decimals scripted for {token_address}")))
    }
}
