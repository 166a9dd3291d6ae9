#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core domain types for the transfer relayer.
//!
//! This crate is blockchain-agnostic: it defines the [`SignedTransfer`](domain::SignedTransfer)
//! data model, the transfer status state machine, the EIP-712 signature recovery logic, and
//! the [`ChainOracle`](validator::ChainOracle) trait through which the validator queries
//! on-chain state. Chain-specific wiring (RPC provider, contract bindings, transaction
//! submission) lives in `relayer-evm`.
//!
//! # Modules
//!
//! - [`domain`] - transfer and event data model, status state machine
//! - [`validator`] - signature recovery and oracle-backed validation
//! - [`config`] - layered TOML + environment configuration
//! - [`error`] - shared error taxonomy
//!
//! # Feature Flags
//!
//! - `telemetry` - enables `#[tracing::instrument]` spans in the validator

pub mod config;
pub mod domain;
pub mod error;
pub mod validator;

pub use domain::{SignedTransfer, TransferEvent, TransferStatus};
pub use error::{RelayerError, ValidationError};
pub use validator::{ChainOracle, Validator, Verdict};
