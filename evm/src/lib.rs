#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Chain gateway for the escrow contract.
//!
//! Wraps an `alloy` provider with the gas/nonce/chain-id filler stack and a pending-aware
//! nonce manager, exposes the escrow's view functions as a [`relayer_core::validator::ChainOracle`]
//! implementation, and submits `executeETHTransfer` / `executeERC20Transfer` transactions with
//! nonce-reset-on-failure and receipt-timeout handling.
//!
//! # Feature Flags
//!
//! - `telemetry` - `#[tracing]` spans and warnings for connection and signer issues

pub mod contracts;
pub mod error;
pub mod gateway;
pub mod nonce;

pub use contracts::IEscrow;
pub use error::SubmissionError;
pub use gateway::{ChainGateway, GatewayConfig};
