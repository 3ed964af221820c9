//! Ledger EVM Signer Core Library
//!
//! This crate provides the device-independent core of a hardware-wallet
//! signer for Ethereum: account discovery, transaction and personal-message
//! signing, and a JSON-RPC front end that plugs into a provider chain.
//!
//! # Overview
//!
//! Private keys never leave the device. The core only ever asks it for two
//! things: the extended public key at a base derivation path, and a signature
//! over a payload at a full derivation path. Everything else happens offline:
//!
//! - **Account discovery**: non-hardened BIP32 public derivation below the
//!   base path lists accounts and maps an address back to its path
//! - **Transactions**: EIP-155 legacy and EIP-1559 transactions, with the
//!   chain id the device signed for checked against the configured network
//! - **Personal messages**: `r || s || v` signatures with a canonical `v`
//! - **Exclusive access**: at most one device session at a time, always
//!   closed again
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  JSON-RPC (SubproviderAdapter)               │
//! ├─────────────────────────────────────────────────────────────┤
//! │                  SigningOrchestrator                         │
//! ├──────────────┬──────────────┬──────────────┬────────────────┤
//! │  Key Search  │ Transaction  │  Signature   │   Derivation   │
//! │   (hdkey)    │   Payloads   │   Parsing    │     Paths      │
//! ├──────────────┴──────────────┴──────────────┴────────────────┤
//! │           ConnectionGuard  ──▶  DeviceClient                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! Implement [`DeviceClient`] for your transport, then:
//!
//! ```ignore
//! use ledger_evm_signer_core::{SigningOrchestrator, SubproviderConfig, TxParams};
//!
//! let signer = SigningOrchestrator::new(SubproviderConfig::new(1), || open_device())?;
//!
//! let accounts = signer.accounts(5)?;
//! let raw = signer.sign_transaction(&TxParams {
//!     from: Some(accounts[0].to_hex()),
//!     to: Some("0x3535353535353535353535353535353535353535".into()),
//!     nonce: Some("0x0".into()),
//!     gas: Some("0x5208".into()),
//!     gas_price: Some("0x4a817c800".into()),
//!     ..TxParams::default()
//! })?;
//! ```
//!
//! ## Derivation paths
//!
//! ```rust
//! use ledger_evm_signer_core::derivation::{full_path, DEFAULT_BASE_DERIVATION_PATH};
//!
//! assert_eq!(full_path(DEFAULT_BASE_DERIVATION_PATH, Some(2)), "m/44'/60'/0'/2");
//! ```
//!
//! # Concurrency
//!
//! All device operations block. A [`SigningOrchestrator`] may be shared
//! between threads; its [`ConnectionGuard`] lets one session through at a
//! time. Nothing here imposes a timeout, since a device may wait on the user
//! indefinitely.
//!
//! # Logging
//!
//! The crate emits [`tracing`] events and installs no subscriber.

// Modules
pub mod address;
pub mod config;
pub mod derivation;
pub mod device;
pub mod error;
pub mod hdkey;
pub mod rpc;
pub mod signature;
pub mod signer;
pub mod subprovider;
pub mod transaction;

// Re-exports for convenience
pub use address::Address;
pub use config::{AccountFetchingConfig, SubproviderConfig};
pub use derivation::DerivationPath;
pub use device::{
    AddressResponse, ConnectionGuard, ConnectionSession, DeviceClient, DeviceClientFactory,
    MessageSignatureResponse, TxSignatureResponse,
};
pub use error::{Error, Result};
pub use hdkey::{DerivedKeyInfo, ExtendedPublicKey};
pub use rpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use signature::Signature;
pub use signer::SigningOrchestrator;
pub use subprovider::{InterceptedMethod, NextInterceptor, SubproviderAdapter};
pub use transaction::{
    AccessListEntry, Eip1559Transaction, LegacyTransaction, Transaction, TxParams,
};

// Dev-dependencies used only by integration tests
#[cfg(test)]
use bip39 as _;
#[cfg(test)]
use tracing_subscriber as _;

// Re-export commonly used alloy types
pub use alloy_primitives::{B256, U256};
