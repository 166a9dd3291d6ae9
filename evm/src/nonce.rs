//! Pending-aware nonce management for the gas-payer account.
//!
//! Unlike alloy's default cached nonce manager, which seeds from the `latest` transaction
//! count, this one seeds from `.pending()` so a relayer restart with transactions still in
//! the mempool does not immediately produce "nonce too low" errors.

use alloy_network::Network;
use alloy_primitives::Address;
use alloy_provider::Provider;
use alloy_provider::fillers::NonceManager;
use alloy_transport::TransportResult;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

const NONCE_UNSET: u64 = u64::MAX;

/// Caches one nonce per signer address, seeded from a pending-inclusive RPC query.
#[derive(Clone, Debug, Default)]
pub struct PendingNonceManager {
    nonces: Arc<DashMap<Address, Arc<Mutex<u64>>>>,
}

#[cfg_attr(target_family = "wasm", async_trait::async_trait(?Send))]
#[cfg_attr(not(target_family = "wasm"), async_trait::async_trait)]
impl NonceManager for PendingNonceManager {
    async fn get_next_nonce<P, N>(&self, provider: &P, address: Address) -> TransportResult<u64>
    where
        P: Provider<N>,
        N: Network,
    {
        let slot = {
            let entry = self.nonces.entry(address).or_insert_with(|| Arc::new(Mutex::new(NONCE_UNSET)));
            Arc::clone(entry.value())
        };

        let mut nonce = slot.lock().await;
        let new_nonce = if *nonce == NONCE_UNSET {
            provider.get_transaction_count(address).pending().await?
        } else {
            *nonce + 1
        };
        *nonce = new_nonce;
        Ok(new_nonce)
    }
}

impl PendingNonceManager {
    /// Forces the next call for `address` to re-query the chain rather than trust the
    /// cached value. Call this after any failed submission or receipt fetch, since the
    /// transaction's actual fate (landed or not) is uncertain.
    pub async fn reset_nonce(&self, address: Address) {
        if let Some(slot) = self.nonces.get(&address) {
            let mut nonce = slot.lock().await;
            *nonce = NONCE_UNSET;
        }
    }
}
