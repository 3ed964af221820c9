//! Ethereum account addresses derived from secp256k1 public keys.
//!
//! The derivation follows the standard Ethereum address computation:
//!
//! 1. Take the uncompressed public key (65 bytes: `0x04 || x || y`)
//! 2. Remove the `0x04` prefix to get 64 bytes (`x || y`)
//! 3. Compute the Keccak-256 hash of the 64 bytes
//! 4. Take the last 20 bytes of the hash as the address
//!
//! Addresses travel through JSON-RPC as hex strings, so this module also owns
//! the syntactic validation applied to caller-supplied addresses: 40 hex
//! digits, optionally `0x`-prefixed, and, when mixed case is used, a valid
//! EIP-55 checksum.
//!
//! # Example
//!
//! ```
//! use ledger_evm_signer_core::Address;
//!
//! assert!(Address::is_valid("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"));
//! assert!(!Address::is_valid("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beae"));
//! ```

use std::fmt;

use alloy_primitives::{Address as AlloyAddress, keccak256};
use k256::PublicKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;

use crate::error::{Error, Result};

/// An Ethereum account address (20 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(AlloyAddress);

impl Address {
    /// The length of an Ethereum address in bytes.
    pub const BYTE_LEN: usize = 20;

    /// Creates a new address from a 20-byte array.
    #[must_use]
    pub const fn new(bytes: [u8; Self::BYTE_LEN]) -> Self {
        Self(AlloyAddress::new(bytes))
    }

    /// Returns the zero address (`0x0000...0000`).
    #[must_use]
    pub const fn zero() -> Self {
        Self(AlloyAddress::ZERO)
    }

    /// Derives the account address of a secp256k1 public key.
    #[must_use]
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let encoded = public_key.to_encoded_point(false);
        let hash = keccak256(&encoded.as_bytes()[1..]);

        let mut address_bytes = [0u8; Self::BYTE_LEN];
        address_bytes.copy_from_slice(&hash[12..]);
        Self::new(address_bytes)
    }

    /// Returns `true` if `candidate` is a syntactically valid address.
    ///
    /// The string must hold exactly 40 hex digits, optionally prefixed with
    /// `0x`. All-lowercase and all-uppercase strings are accepted as is;
    /// mixed-case strings must carry a valid EIP-55 checksum.
    #[must_use]
    pub fn is_valid(candidate: &str) -> bool {
        let digits = candidate.strip_prefix("0x").unwrap_or(candidate);
        if digits.len() != 40 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return false;
        }

        let has_lower = digits.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = digits.chars().any(|c| c.is_ascii_uppercase());
        if !(has_lower && has_upper) {
            return true;
        }

        Self::from_hex(digits)
            .is_ok_and(|addr| addr.to_checksum_hex().trim_start_matches("0x") == digits)
    }

    /// Parses a caller-supplied address, applying [`Address::is_valid`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] if validation fails.
    pub fn parse(candidate: &str) -> Result<Self> {
        if !Self::is_valid(candidate) {
            return Err(Error::InvalidAddress(candidate.to_string()));
        }
        Self::from_hex(candidate)
    }

    /// Returns the [`Address`] as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; Self::BYTE_LEN] {
        self.0.as_ref()
    }

    /// Returns the EIP-55 checksummed hex string with `0x` prefix.
    #[must_use]
    pub fn to_checksum_hex(&self) -> String {
        self.0.to_checksum(None)
    }

    /// Returns the lowercase hex string with `0x` prefix.
    ///
    /// This is the form accounts are reported in over JSON-RPC.
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.as_bytes()))
    }

    /// Parses an [`Address`] from a hex string without checksum validation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HexDecodeFailed`] if the hex string is invalid, or
    /// [`Error::InvalidAddress`] if the decoded bytes are not 20 bytes.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
        let bytes = hex::decode(hex_str)?;

        let address_bytes: [u8; Self::BYTE_LEN] = bytes.as_slice().try_into().map_err(|_| {
            Error::InvalidAddress(format!(
                "expected {} bytes, got {}",
                Self::BYTE_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self::new(address_bytes))
    }

    /// Compares this address against a hex string, ignoring case.
    #[must_use]
    pub fn matches_hex(&self, other: &str) -> bool {
        let other = other.strip_prefix("0x").unwrap_or(other);
        hex::encode(self.as_bytes()).eq_ignore_ascii_case(other)
    }

    /// Returns the inner [`alloy_primitives::Address`].
    #[must_use]
    pub const fn inner(&self) -> AlloyAddress {
        self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_checksum_hex())
    }
}
