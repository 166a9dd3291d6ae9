//! EIP-712 signature recovery and oracle-backed transfer validation.
//!
//! Mirrors the `assert_*` decomposition used by EIP-3009 facilitation: each check is an
//! independent async function, run concurrently where possible, and the results are folded
//! into a [`Verdict`] rather than short-circuiting on the first failure, so callers can report
//! every violation at once.

use crate::domain::SignedTransfer;
use crate::error::{ChainOracleError, ValidationError};
use alloy_primitives::{Address, U256, address, keccak256};
use alloy_sol_types::{Eip712Domain, SolStruct, eip712_domain, sol};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds a withdrawal-initiated sender is still allowed to transfer.
pub const GRACE_PERIOD_SECONDS: i64 = 300;

sol! {
    #[derive(Debug)]
    struct ETHTransfer {
        address from;
        address to;
        uint256 amount;
        bytes32 nonce;
        uint256 deadline;
    }

    #[derive(Debug)]
    struct ERC20Transfer {
        address token;
        address from;
        address to;
        uint256 amount;
        bytes32 nonce;
        uint256 deadline;
    }
}

/// Per-check outcome plus overall validity. A transfer is valid iff every flag holds.
#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    /// Overall validity: the conjunction of all flags below.
    pub is_valid: bool,
    /// EIP-712 signature recovers to `from`.
    pub signature_valid: bool,
    /// `deadline` has not yet passed.
    pub deadline_valid: bool,
    /// Nonce unused in both the store and on-chain.
    pub nonce_unused: bool,
    /// Sender's locked balance covers the amount.
    pub sender_has_funds: bool,
    /// Sender is not in an active lockout (or is within the grace window).
    pub grace_period_active: bool,
    /// Amount parses to a positive smallest-unit quantity.
    pub amount_valid: bool,
    /// Every distinct failure reason, for reporting.
    pub errors: Vec<String>,
    /// Whether the failure (if any) is a transient infrastructure error.
    pub retryable: bool,
}

impl Verdict {
    fn fail(&mut self, reason: impl Into<String>) {
        self.is_valid = false;
        self.errors.push(reason.into());
    }
}

/// The read-only view the validator needs from the chain. Implemented by `relayer-evm`'s
/// chain gateway; kept as a trait here so the validator stays chain-client-agnostic and
/// trivially mockable in tests.
#[async_trait::async_trait]
pub trait ChainOracle: Send + Sync {
    /// Returns `true` if `nonce` has already been consumed on-chain.
    async fn nonce_used(&self, nonce: &str) -> Result<bool, ChainOracleError>;

    /// Locked native balance for `address`.
    async fn locked_funds_eth(&self, address: &str) -> Result<U256, ChainOracleError>;

    /// Locked ERC-20 balance for `(token, address)`.
    async fn locked_funds_erc20(&self, token: &str, address: &str) -> Result<U256, ChainOracleError>;

    /// Unix-seconds timestamp at which `address` initiated a withdrawal, or 0 if none.
    async fn withdraw_timestamp(&self, address: &str) -> Result<i64, ChainOracleError>;

    /// The chain id the oracle is currently connected to, if discoverable.
    async fn chain_id(&self) -> Result<u64, ChainOracleError>;
}

/// Anything that can answer "has this nonce already been persisted by someone else".
#[async_trait::async_trait]
pub trait NonceStore: Send + Sync {
    /// `true` if a row other than `exclude_id` already has this nonce.
    async fn nonce_taken(&self, nonce: &str, exclude_id: Option<i64>) -> Result<bool, ChainOracleError>;
}

/// Validates candidate transfers against cryptographic and on-chain rules.
#[derive(Debug, Clone)]
pub struct Validator {
    /// Domain name used in the EIP-712 domain separator.
    pub domain_name: String,
    /// Domain version used in the EIP-712 domain separator.
    pub domain_version: String,
    /// Used when the oracle's chain-id discovery fails.
    pub fallback_chain_id: u64,
}

impl Validator {
    /// Creates a validator for the `"AION"` / `"1"` EIP-712 domain.
    #[must_use]
    pub fn new(fallback_chain_id: u64) -> Self {
        Self {
            domain_name: "AION".to_owned(),
            domain_version: "1".to_owned(),
            fallback_chain_id,
        }
    }

    #[cfg_attr(feature = "telemetry", tracing::instrument(skip(self, oracle)))]
    async fn chain_id(&self, oracle: &dyn ChainOracle) -> u64 {
        match oracle.chain_id().await {
            Ok(id) => id,
            Err(err) => {
                #[cfg(feature = "telemetry")]
                tracing::warn!(error = %err, fallback = self.fallback_chain_id, "chain id discovery failed, using fallback");
                let _ = err;
                self.fallback_chain_id
            }
        }
    }

    fn domain(&self, chain_id: u64, verifying_contract: Address) -> Eip712Domain {
        eip712_domain! {
            name: self.domain_name.clone(),
            version: self.domain_version.clone(),
            chain_id: chain_id,
            verifying_contract: verifying_contract,
        }
    }

    fn recover_signer(
        &self,
        transfer: &SignedTransfer,
        chain_id: u64,
    ) -> Result<Address, String> {
        let contract = Address::from_str(&transfer.contract_address)
            .map_err(|e| format!("invalid contractAddress: {e}"))?;
        let from = Address::from_str(&transfer.from).map_err(|e| format!("invalid from: {e}"))?;
        let to = Address::from_str(&transfer.to).map_err(|e| format!("invalid to: {e}"))?;
        let amount = parse_amount(&transfer.amount).ok_or("amount does not parse")?;
        let nonce = parse_nonce(&transfer.nonce).ok_or("nonce is not 32 bytes of hex")?;
        let deadline = U256::from(transfer.deadline.max(0) as u64);
        let domain = self.domain(chain_id, contract);

        let signing_hash = if let Some(token) = &transfer.token_address {
            let token = Address::from_str(token).map_err(|e| format!("invalid tokenAddress: {e}"))?;
            let typed = ERC20Transfer {
                token,
                from,
                to,
                amount,
                nonce,
                deadline,
            };
            typed.eip712_signing_hash(&domain)
        } else {
            let typed = ETHTransfer {
                from,
                to,
                amount,
                nonce,
                deadline,
            };
            typed.eip712_signing_hash(&domain)
        };

        let signature =
            decode_hex_signature(&transfer.signature).map_err(|e| format!("malformed signature: {e}"))?;

        signature
            .recover_address_from_prehash(&signing_hash)
            .map_err(|e| format!("signature recovery failed: {e}"))
    }

    /// Runs every check and returns a [`Verdict`]. `exclude_id` should be the transfer's own
    /// id when re-validating an already-persisted row, so its own nonce does not register as
    /// "already used" against itself.
    #[cfg_attr(feature = "telemetry", tracing::instrument(skip(self, transfer, oracle, nonce_store), fields(nonce = %transfer.nonce)))]
    pub async fn validate(
        &self,
        transfer: &SignedTransfer,
        oracle: &dyn ChainOracle,
        nonce_store: &dyn NonceStore,
        exclude_id: Option<i64>,
    ) -> Verdict {
        let mut verdict = Verdict {
            is_valid: true,
            ..Verdict::default()
        };

        let amount = parse_amount(&transfer.amount);
        verdict.amount_valid = matches!(amount, Some(v) if v > U256::ZERO);
        if !verdict.amount_valid {
            verdict.fail("amount must be a positive quantity");
        }

        let now = now_unix();
        verdict.deadline_valid = transfer.deadline >= now;
        if !verdict.deadline_valid {
            verdict.fail("deadline expired");
        }

        let chain_id = self.chain_id(oracle).await;
        match self.recover_signer(transfer, chain_id) {
            Ok(signer) => {
                verdict.signature_valid = signer.to_checksum(None).eq_ignore_ascii_case(&transfer.from);
                if !verdict.signature_valid {
                    verdict.fail("recovered signer does not match from");
                }
            }
            Err(reason) => {
                verdict.signature_valid = false;
                verdict.fail(format!("invalid signature: {reason}"));
            }
        }

        let (db_hit, chain_hit, funds, withdraw_ts) = tokio::join!(
            nonce_store.nonce_taken(&transfer.nonce, exclude_id),
            oracle.nonce_used(&transfer.nonce),
            async {
                match &transfer.token_address {
                    Some(token) => oracle.locked_funds_erc20(token, &transfer.from).await,
                    None => oracle.locked_funds_eth(&transfer.from).await,
                }
            },
            oracle.withdraw_timestamp(&transfer.from),
        );

        let mut retryable_oracle_failure = false;
        let nonce_used_onchain = match chain_hit {
            Ok(used) => used,
            Err(err) => {
                retryable_oracle_failure = true;
                verdict.fail(format!("failed to check on-chain nonce: {err}"));
                false
            }
        };
        let nonce_used_in_store = match db_hit {
            Ok(used) => used,
            Err(err) => {
                retryable_oracle_failure = true;
                verdict.fail(format!("failed to check stored nonce: {err}"));
                false
            }
        };
        verdict.nonce_unused = !nonce_used_onchain && !nonce_used_in_store;
        if nonce_used_onchain {
            verdict.fail("nonce already used on-chain");
        } else if nonce_used_in_store {
            verdict.fail("nonce already used");
        }

        match (funds, amount) {
            (Ok(locked), Some(amount)) => {
                verdict.sender_has_funds = locked >= amount;
                if !verdict.sender_has_funds {
                    verdict.fail("insufficient locked balance");
                }
            }
            (Err(err), _) => {
                retryable_oracle_failure = true;
                verdict.fail(format!("failed to check locked balance: {err}"));
            }
            (_, None) => {}
        }

        match withdraw_ts {
            Ok(0) => verdict.grace_period_active = true,
            Ok(ts) => {
                verdict.grace_period_active = now <= ts + GRACE_PERIOD_SECONDS;
                if !verdict.grace_period_active {
                    verdict.fail("sender is in withdrawal lockout period");
                }
            }
            Err(err) => {
                retryable_oracle_failure = true;
                verdict.fail(format!("failed to check withdrawal lockout: {err}"));
            }
        }

        verdict.retryable =
            retryable_oracle_failure && !verdict.errors.iter().any(|e| is_permanent_reason(e));
        verdict
    }
}

fn is_permanent_reason(reason: &str) -> bool {
    reason.contains("deadline expired")
        || reason.contains("already used")
        || reason.contains("invalid signature")
        || reason.contains("recovered signer")
        || reason.contains("lockout period")
        || reason.contains("must be a positive quantity")
}

/// Classifies a [`Verdict`]'s overall failure, when invalid, as a [`ValidationError`].
#[must_use]
pub fn verdict_to_error(verdict: &Verdict) -> Option<ValidationError> {
    if verdict.is_valid {
        return None;
    }
    let message = verdict.errors.join("; ");
    let mut err = ValidationError::new(primary_reason(verdict)).with_message(message);
    if verdict.retryable {
        err = err.retryable();
    }
    Some(err)
}

fn primary_reason(verdict: &Verdict) -> &'static str {
    if !verdict.deadline_valid {
        "deadline_expired"
    } else if !verdict.nonce_unused {
        "nonce_used"
    } else if !verdict.signature_valid {
        "signature_invalid"
    } else if !verdict.grace_period_active {
        "lockout_active"
    } else if !verdict.sender_has_funds {
        "insufficient_funds"
    } else if !verdict.amount_valid {
        "amount_invalid"
    } else {
        "oracle_unavailable"
    }
}

fn parse_amount(amount: &str) -> Option<U256> {
    let decimal = rust_decimal::Decimal::from_str(amount).ok()?;
    if decimal.is_sign_negative() {
        return None;
    }
    let scaled = decimal.round_dp(0);
    U256::from_str(&scaled.to_string()).ok()
}

fn parse_nonce(nonce: &str) -> Option<alloy_primitives::FixedBytes<32>> {
    let trimmed = nonce.strip_prefix("0x").unwrap_or(nonce);
    let bytes = alloy_primitives::hex::decode(trimmed).ok()?;
    if bytes.len() > 32 {
        return None;
    }
    let hash = keccak256(&bytes);
    Some(if bytes.len() == 32 {
        alloy_primitives::FixedBytes::<32>::from_slice(&bytes)
    } else {
        hash
    })
}

fn decode_hex_signature(sig: &str) -> Result<alloy_primitives::Signature, String> {
    let trimmed = sig.strip_prefix("0x").unwrap_or(sig);
    let bytes = alloy_primitives::hex::decode(trimmed).map_err(|e| e.to_string())?;
    alloy_primitives::Signature::from_raw(&bytes).map_err(|e| e.to_string())
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[allow(unused)]
const ZERO_ADDRESS: Address = address!("0000000000000000000000000000000000000000");

#[cfg(test)]
mod tests {
    use super::*;

    struct MockOracle {
        chain_id: u64,
        nonce_used: bool,
        locked: U256,
        withdraw_ts: i64,
    }

    #[async_trait::async_trait]
    impl ChainOracle for MockOracle {
        async fn nonce_used(&self, _nonce: &str) -> Result<bool, ChainOracleError> {
            Ok(self.nonce_used)
        }
        async fn locked_funds_eth(&self, _address: &str) -> Result<U256, ChainOracleError> {
            Ok(self.locked)
        }
        async fn locked_funds_erc20(&self, _token: &str, _address: &str) -> Result<U256, ChainOracleError> {
            Ok(self.locked)
        }
        async fn withdraw_timestamp(&self, _address: &str) -> Result<i64, ChainOracleError> {
            Ok(self.withdraw_ts)
        }
        async fn chain_id(&self) -> Result<u64, ChainOracleError> {
            Ok(self.chain_id)
        }
    }

    struct MockNonceStore(bool);

    #[async_trait::async_trait]
    impl NonceStore for MockNonceStore {
        async fn nonce_taken(&self, _nonce: &str, _exclude_id: Option<i64>) -> Result<bool, ChainOracleError> {
            Ok(self.0)
        }
    }

    fn sample_transfer() -> SignedTransfer {
        SignedTransfer {
            id: None,
            nonce: "0x01".repeat(1),
            from: "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".into(),
            to: "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb".into(),
            amount: "1.0".into(),
            deadline: now_unix() + 300,
            signature: "0xdead".into(),
            contract_address: "0xcccccccccccccccccccccccccccccccccccccccc"[..42].into(),
            token_address: None,
            status: crate::domain::TransferStatus::Received,
            tx_hash: None,
            block_number: None,
            retry_count: 0,
            error_message: None,
            created_at: chrono::Utc::now(),
            validated_at: None,
            submitted_at: None,
            confirmed_at: None,
        }
    }

    #[tokio::test]
    async fn rejects_expired_deadline() {
        let validator = Validator::new(31337);
        let oracle = MockOracle {
            chain_id: 31337,
            nonce_used: false,
            locked: U256::from(10u64),
            withdraw_ts: 0,
        };
        let mut transfer = sample_transfer();
        transfer.deadline = now_unix() - 10;
        let verdict = validator
            .validate(&transfer, &oracle, &MockNonceStore(false), None)
            .await;
        assert!(!verdict.is_valid);
        assert!(!verdict.deadline_valid);
    }

    #[tokio::test]
    async fn rejects_zero_amount() {
        let validator = Validator::new(31337);
        let oracle = MockOracle {
            chain_id: 31337,
            nonce_used: false,
            locked: U256::from(10u64),
            withdraw_ts: 0,
        };
        let mut transfer = sample_transfer();
        transfer.amount = "0".into();
        let verdict = validator
            .validate(&transfer, &oracle, &MockNonceStore(false), None)
            .await;
        assert!(!verdict.amount_valid);
    }

    #[tokio::test]
    async fn grace_period_boundary() {
        let validator = Validator::new(31337);
        let transfer = sample_transfer();
        let oracle = MockOracle {
            chain_id: 31337,
            nonce_used: false,
            locked: U256::from(10u64),
            withdraw_ts: now_unix() - GRACE_PERIOD_SECONDS,
        };
        let verdict = validator
            .validate(&transfer, &oracle, &MockNonceStore(false), None)
            .await;
        assert!(verdict.grace_period_active);

        let oracle_expired = MockOracle {
            withdraw_ts: now_unix() - GRACE_PERIOD_SECONDS - 1,
            ..oracle
        };
        let verdict = validator
            .validate(&transfer, &oracle_expired, &MockNonceStore(false), None)
            .await;
        assert!(!verdict.grace_period_active);
    }
}
