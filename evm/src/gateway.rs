//! The escrow contract's chain gateway: read-only oracle views plus transaction submission.
//!
//! Adapted from the facilitator's `Eip155ChainProvider` — same filler stack, same
//! pending-aware nonce manager, same nonce-reset-on-failure discipline — generalized from
//! ERC-3009 `transferWithAuthorization` settlement to the escrow's `executeETHTransfer` /
//! `executeERC20Transfer` entry points.

use crate::contracts::IEscrow;
use crate::error::SubmissionError;
use crate::nonce::PendingNonceManager;
use alloy_network::{Ethereum, EthereumWallet, NetworkWallet};
use alloy_primitives::{Address, B256, U256};
use alloy_provider::fillers::{BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller, WalletFiller};
use alloy_provider::{Identity, Provider, ProviderBuilder, RootProvider};
use alloy_rpc_types_eth::TransactionReceipt;
use alloy_signer_local::PrivateKeySigner;
use relayer_core::error::ChainOracleError;
use relayer_core::validator::ChainOracle;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

type InnerFiller = JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller<PendingNonceManager>, ChainIdFiller>>>;
type InnerProvider = FillProvider<JoinFill<JoinFill<Identity, InnerFiller>, WalletFiller<EthereumWallet>>, RootProvider>;

/// Runtime knobs for the gateway, independent of which network it talks to.
#[derive(Debug, Clone, Copy)]
pub struct GatewayConfig {
    /// Whether the chain prices gas via EIP-1559 (`true`) or legacy `gasPrice` (`false`).
    pub eip1559: bool,
    /// Block confirmations to require before treating a submission as settled.
    pub confirmations: u64,
    /// How long to wait for a receipt before giving up and resetting the nonce.
    pub receipt_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            eip1559: true,
            confirmations: 1,
            receipt_timeout_secs: 60,
        }
    }
}

/// Talks to the configured escrow contract: serves [`ChainOracle`] reads to the validator and
/// submits signed transfers as transactions.
#[derive(Debug)]
pub struct ChainGateway {
    contract_address: Address,
    inner: InnerProvider,
    nonce_manager: PendingNonceManager,
    signer_addresses: Arc<Vec<Address>>,
    signer_cursor: Arc<AtomicUsize>,
    config: GatewayConfig,
}

impl ChainGateway {
    /// Connects to `rpc_url` and prepares to sign with `signer_key_hex`.
    ///
    /// `signer_key_hex` must decode to a 32-byte, non-zero private key. A malformed key
    /// falls back to a freshly generated development key with a loud warning — this
    /// fallback exists so a misconfigured local/dev run fails safe rather than refusing to
    /// start, but is never appropriate in production, where the operator must set a valid key.
    pub async fn connect(
        rpc_url: &str,
        signer_key_hex: &str,
        contract_address: &str,
        config: GatewayConfig,
    ) -> Result<Self, SubmissionError> {
        let signer = load_or_generate_signer(signer_key_hex);
        let signer_address = signer.address();
        let wallet = EthereumWallet::from(signer);
        let signer_addresses = Arc::new(NetworkWallet::<Ethereum>::signer_addresses(&wallet).collect::<Vec<_>>());

        let nonce_manager = PendingNonceManager::default();
        let filler = JoinFill::new(
            GasFiller,
            JoinFill::new(BlobGasFiller::default(), JoinFill::new(NonceFiller::new(nonce_manager.clone()), ChainIdFiller::default())),
        );

        let url: url::Url = rpc_url.parse().map_err(|e: url::ParseError| SubmissionError::Custom(e.to_string()))?;
        let inner: InnerProvider = ProviderBuilder::default().filler(filler).wallet(wallet).connect_http(url);

        let contract_address =
            Address::from_str(contract_address).map_err(|e| SubmissionError::Custom(format!("invalid contract address: {e}")))?;

        #[cfg(feature = "telemetry")]
        tracing::info!(%signer_address, %contract_address, "chain gateway connected");
        let _ = signer_address;

        Ok(Self {
            contract_address,
            inner,
            nonce_manager,
            signer_addresses,
            signer_cursor: Arc::new(AtomicUsize::new(0)),
            config,
        })
    }

    fn next_signer(&self) -> Address {
        debug_assert!(!self.signer_addresses.is_empty());
        if self.signer_addresses.len() == 1 {
            self.signer_addresses[0]
        } else {
            let idx = self.signer_cursor.fetch_add(1, Ordering::Relaxed) % self.signer_addresses.len();
            self.signer_addresses[idx]
        }
    }

    fn contract(&self) -> IEscrow::IEscrowInstance<&InnerProvider> {
        IEscrow::new(self.contract_address, &self.inner)
    }

    /// Submits a signed native-currency transfer and awaits its receipt.
    pub async fn execute_eth_transfer(
        &self,
        from: Address,
        to: Address,
        amount: U256,
        nonce: B256,
        deadline: U256,
        signature: &[u8],
    ) -> Result<TransactionReceipt, SubmissionError> {
        let from_addr = self.next_signer();
        let contract = self.contract();
        let call = contract
            .executeETHTransfer(from, to, amount, nonce, deadline, signature.to_vec().into())
            .from(from_addr);
        self.send_and_await(call.calldata().clone(), from_addr).await
    }

    /// Submits a signed ERC-20 transfer and awaits its receipt.
    pub async fn execute_erc20_transfer(
        &self,
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
        nonce: B256,
        deadline: U256,
        signature: &[u8],
    ) -> Result<TransactionReceipt, SubmissionError> {
        let from_addr = self.next_signer();
        let contract = self.contract();
        let call = contract
            .executeERC20Transfer(token, from, to, amount, nonce, deadline, signature.to_vec().into())
            .from(from_addr);
        self.send_and_await(call.calldata().clone(), from_addr).await
    }

    async fn send_and_await(&self, calldata: alloy_primitives::Bytes, from: Address) -> Result<TransactionReceipt, SubmissionError> {
        use alloy_network::TransactionBuilder;
        use alloy_rpc_types_eth::TransactionRequest;

        let mut txr = TransactionRequest::default().with_to(self.contract_address).with_from(from).with_input(calldata);

        if !self.config.eip1559 {
            let gas_price = self.inner.get_gas_price().await?;
            txr.set_gas_price(gas_price);
        }

        let pending = match self.inner.send_transaction(txr).await {
            Ok(pending) => pending,
            Err(err) => {
                self.nonce_manager.reset_nonce(from).await;
                return Err(SubmissionError::Transport(err));
            }
        };

        let timeout = std::time::Duration::from_secs(self.config.receipt_timeout_secs);
        let watcher = pending.with_required_confirmations(self.config.confirmations).with_timeout(Some(timeout));

        match watcher.get_receipt().await {
            Ok(receipt) if receipt.status() => Ok(receipt),
            Ok(receipt) => Err(SubmissionError::Reverted(format!("{:#x}", receipt.transaction_hash))),
            Err(err) => {
                self.nonce_manager.reset_nonce(from).await;
                Err(SubmissionError::PendingTransaction(err))
            }
        }
    }
}

#[async_trait::async_trait]
impl ChainOracle for ChainGateway {
    async fn nonce_used(&self, nonce: &str) -> Result<bool, ChainOracleError> {
        let nonce = parse_b256(nonce).map_err(ChainOracleError)?;
        self.contract().usedNonces(nonce).call().await.map_err(|e| ChainOracleError(e.to_string()))
    }

    async fn locked_funds_eth(&self, address: &str) -> Result<U256, ChainOracleError> {
        let owner = Address::from_str(address).map_err(|e| ChainOracleError(e.to_string()))?;
        self.contract().lockedFundsETH(owner).call().await.map_err(|e| ChainOracleError(e.to_string()))
    }

    async fn locked_funds_erc20(&self, token: &str, address: &str) -> Result<U256, ChainOracleError> {
        let token = Address::from_str(token).map_err(|e| ChainOracleError(e.to_string()))?;
        let owner = Address::from_str(address).map_err(|e| ChainOracleError(e.to_string()))?;
        self.contract().lockedFundsERC20(token, owner).call().await.map_err(|e| ChainOracleError(e.to_string()))
    }

    async fn withdraw_timestamp(&self, address: &str) -> Result<i64, ChainOracleError> {
        let owner = Address::from_str(address).map_err(|e| ChainOracleError(e.to_string()))?;
        let ts = self.contract().withdrawTimestamps(owner).call().await.map_err(|e| ChainOracleError(e.to_string()))?;
        Ok(ts.try_into().unwrap_or(i64::MAX))
    }

    async fn chain_id(&self) -> Result<u64, ChainOracleError> {
        self.inner.get_chain_id().await.map_err(|e| ChainOracleError(e.to_string()))
    }
}

fn parse_b256(s: &str) -> Result<B256, String> {
    let trimmed = s.strip_prefix("0x").unwrap_or(s);
    let bytes = alloy_primitives::hex::decode(trimmed).map_err(|e| e.to_string())?;
    if bytes.len() == 32 {
        Ok(B256::from_slice(&bytes))
    } else {
        Ok(alloy_primitives::keccak256(&bytes))
    }
}

/// Validates a hex-encoded 32-byte private key; on failure, generates a random development
/// key and logs a warning rather than panicking, so a misconfigured local run still boots.
fn load_or_generate_signer(key_hex: &str) -> PrivateKeySigner {
    let trimmed = key_hex.strip_prefix("0x").unwrap_or(key_hex);
    let valid = alloy_primitives::hex::decode(trimmed)
        .ok()
        .filter(|bytes| bytes.len() == 32 && bytes.iter().any(|b| *b != 0));

    match valid.and_then(|bytes| PrivateKeySigner::from_slice(&bytes).ok()) {
        Some(signer) => signer,
        None => {
            #[cfg(feature = "telemetry")]
            tracing::warn!("gas-payer private key is missing or malformed; using a randomly generated development key");
            PrivateKeySigner::random()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_key_falls_back_to_random() {
        let a = load_or_generate_signer("not-hex");
        let b = load_or_generate_signer("not-hex");
        assert_ne!(a.address(), b.address());
    }

    #[test]
    fn zero_key_falls_back_to_random() {
        let zero = format!("0x{}", "00".repeat(32));
        let signer = load_or_generate_signer(&zero);
        assert_ne!(signer.address(), Address::ZERO);
    }

    #[test]
    fn valid_key_round_trips() {
        let key = PrivateKeySigner::random();
        let hex = alloy_primitives::hex::encode(key.to_bytes());
        let loaded = load_or_generate_signer(&hex);
        assert_eq!(loaded.address(), key.address());
    }
}
