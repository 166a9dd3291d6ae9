#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Off-chain relayer binary.
//!
//! Wires together the transfer store, chain gateway, event bus, validator, and executor
//! behind the ingress HTTP API. See [`config`] for the configuration file format.

pub mod config;
