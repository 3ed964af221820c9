//! Error types for the hardware-wallet signing core.
//!
//! This module provides a single error type [`enum@Error`] covering every way a
//! call into the core can fail. All of them are terminal to the single call;
//! none of them poison the signer, so the next request starts from a clean state.
//!
//! # Error Categories
//!
//! - **Input errors**: missing or malformed `from` address, message data,
//!   transaction fields. Detected before any device interaction.
//! - **Resolution errors**: no derived account within the search limit matches.
//! - **Protocol-integrity errors**: the device signed for a different chain id.
//! - **Concurrency-misuse errors**: a second device session was requested while
//!   one is still open.
//! - **Unsupported-capability errors**: typed-data signing.
//! - **Transport errors**: anything raised by the device client, passed through
//!   unchanged after the session is torn down.
//!
//! # Example
//!
//! ```
//! use ledger_evm_signer_core::Error;
//!
//! let err = Error::AddressNotFound("0xabc".to_string());
//! assert_eq!(err.code(), "ADDRESS_NOT_FOUND");
//! assert!(!err.is_input_error());
//! ```

use core::result::Result as CoreResult;
use hex::FromHexError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// The main error type for the signing core.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // Input Errors
    // =========================================================================
    /// The `from` field of a transaction is absent or not an account address.
    #[error("`from` address is missing or invalid")]
    FromAddressMissingOrInvalid,

    /// The message payload of a personal-sign request is absent or not hex.
    #[error("data is missing or not hex for personal message signing")]
    DataMissingForSignPersonalMessage,

    /// An address argument is not a syntactically valid account address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The transaction parameters are malformed.
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    /// A JSON-RPC request carried params in an unexpected shape.
    #[error("invalid params for {method}: {reason}")]
    InvalidParams {
        /// The JSON-RPC method name.
        method: String,
        /// What was wrong with the params.
        reason: String,
    },

    // =========================================================================
    // Key Derivation Errors
    // =========================================================================
    /// No derived account within the search limit matches the address.
    #[error("address not found: {0}")]
    AddressNotFound(String),

    /// A derivation path string could not be parsed.
    #[error("invalid derivation path `{0}`")]
    InvalidDerivationPath(String),

    /// Public derivation was requested for a hardened index.
    #[error("cannot derive hardened index {0:#x} from a public key")]
    HardenedDerivation(u32),

    /// The child key at the given index is undefined (BIP32 `I_L >= n` or
    /// point at infinity).
    #[error("child key at index {0} is invalid")]
    InvalidChildKey(u32),

    /// The public key is invalid or malformed.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    // =========================================================================
    // Signing Errors
    // =========================================================================
    /// The device signed for a chain id other than the configured network.
    ///
    /// Older firmware ignores the chain id injected into the signing payload
    /// and returns a signature for the default network.
    #[error(
        "device signed for chain id {signed_chain_id:?}, expected {expected_chain_id}; \
         the device firmware is too old"
    )]
    TooOldLedgerFirmware {
        /// The chain id recovered from the returned `v`, if any.
        signed_chain_id: Option<u64>,
        /// The configured network id.
        expected_chain_id: u64,
    },

    /// The signature returned by the device is malformed.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// The requested signing method is not available on this device class.
    #[error("method not supported: {0}")]
    MethodNotSupported(String),

    // =========================================================================
    // Connection Errors
    // =========================================================================
    /// A device session was requested while another one is still open.
    #[error("multiple open device connections are disallowed")]
    MultipleOpenConnectionsDisallowed,

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// The device client failed to communicate with the device.
    #[error("device transport error: {0}")]
    Transport(String),

    /// The device was disconnected mid-request.
    #[error("device disconnected")]
    DeviceDisconnected,

    /// The user rejected the request on the device.
    #[error("request rejected on device")]
    UserRejected,

    // =========================================================================
    // Configuration and Serialization Errors
    // =========================================================================
    /// The configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to parse hex data.
    #[error("hex decoding failed: {0}")]
    HexDecodeFailed(String),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    JsonError(String),

    /// The next interceptor in the chain answered with an error.
    #[error("upstream request {method} failed: {message}")]
    Upstream {
        /// The JSON-RPC method that was forwarded.
        method: String,
        /// The error message returned upstream.
        message: String,
    },
}

impl Error {
    /// Returns the stable machine-readable code for this error.
    ///
    /// The codes are what JSON-RPC clients match on, so they never change
    /// with the human-readable message.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::FromAddressMissingOrInvalid => "FROM_ADDRESS_MISSING_OR_INVALID",
            Self::DataMissingForSignPersonalMessage => "DATA_MISSING_FOR_SIGN_PERSONAL_MESSAGE",
            Self::InvalidAddress(_) => "INVALID_ADDRESS",
            Self::InvalidTransaction(_) => "INVALID_TRANSACTION",
            Self::InvalidParams { .. } => "INVALID_PARAMS",
            Self::AddressNotFound(_) => "ADDRESS_NOT_FOUND",
            Self::InvalidDerivationPath(_) => "INVALID_DERIVATION_PATH",
            Self::HardenedDerivation(_) => "HARDENED_DERIVATION",
            Self::InvalidChildKey(_) => "INVALID_CHILD_KEY",
            Self::InvalidPublicKey(_) => "INVALID_PUBLIC_KEY",
            Self::TooOldLedgerFirmware { .. } => "TOO_OLD_LEDGER_FIRMWARE",
            Self::InvalidSignature(_) => "INVALID_SIGNATURE",
            Self::MethodNotSupported(_) => "METHOD_NOT_SUPPORTED",
            Self::MultipleOpenConnectionsDisallowed => "MULTIPLE_OPEN_CONNECTIONS_DISALLOWED",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::DeviceDisconnected => "DEVICE_DISCONNECTED",
            Self::UserRejected => "USER_REJECTED",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::HexDecodeFailed(_) => "HEX_DECODE_FAILED",
            Self::JsonError(_) => "JSON_ERROR",
            Self::Upstream { .. } => "UPSTREAM_ERROR",
        }
    }

    /// Returns `true` if the error was caused by the caller's input and was
    /// detected before any device interaction.
    #[must_use]
    pub const fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::FromAddressMissingOrInvalid
                | Self::DataMissingForSignPersonalMessage
                | Self::InvalidAddress(_)
                | Self::InvalidTransaction(_)
                | Self::InvalidParams { .. }
                | Self::HexDecodeFailed(_)
        )
    }

}

impl From<FromHexError> for Error {
    fn from(err: FromHexError) -> Self {
        Error::HexDecodeFailed(err.to_string())
    }
}

impl From<SerdeJsonError> for Error {
    fn from(err: SerdeJsonError) -> Self {
        Error::JsonError(err.to_string())
    }
}

/// A specialized [`Result`] type for signing-core operations.
pub type Result<T> = CoreResult<T, Error>;
