//! Device client contract.
//!
//! The core never talks USB or HID itself. A platform layer implements
//! [`DeviceClient`] on top of its transport and hands the core a
//! [`DeviceClientFactory`] that opens a fresh client per session. Every open
//! client is owned by a [`ConnectionGuard`], which makes sure at most one is
//! alive at a time and that each one is closed again.
//!
//! Paths passed to the client are full paths from the seed root
//! (`m/44'/60'/0'/3`). Payloads are hex without a `0x` prefix, as the device
//! application expects them.

pub mod connection;

pub use connection::{ConnectionGuard, ConnectionSession};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hdkey::ExtendedPublicKey;
use crate::signature::Signature;

/// The result of a `getAddress` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressResponse {
    /// The account address at the requested path, as the device renders it.
    pub address: String,
    /// The SEC1 public key, hex encoded.
    pub public_key: String,
    /// The BIP32 chain code, hex encoded. Present when it was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_code: Option<String>,
}

impl AddressResponse {
    /// Builds the extended public key from the returned key and chain code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPublicKey`] if the chain code is missing or
    /// either part is malformed.
    pub fn extended_public_key(&self) -> Result<ExtendedPublicKey> {
        let chain_code = self
            .chain_code
            .as_deref()
            .ok_or_else(|| Error::InvalidPublicKey("device returned no chain code".to_string()))?;
        ExtendedPublicKey::from_hex(&self.public_key, chain_code)
    }
}

/// A transaction signature, every part hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSignatureResponse {
    /// The R component.
    pub r: String,
    /// The S component.
    pub s: String,
    /// The recovery value, EIP-155 encoded for legacy transactions.
    pub v: String,
}

impl TxSignatureResponse {
    /// Parses the response into a [`Signature`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSignature`] if any part is malformed.
    pub fn to_signature(&self) -> Result<Signature> {
        Signature::from_device_hex(&self.r, &self.s, &self.v)
    }
}

/// A personal message signature with hex `r`/`s` and a numeric `v`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSignatureResponse {
    /// The R component.
    pub r: String,
    /// The S component.
    pub s: String,
    /// The recovery value, normally `27` or `28`.
    pub v: u64,
}

impl MessageSignatureResponse {
    /// Parses the response into a [`Signature`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSignature`] if `r` or `s` is malformed.
    pub fn to_signature(&self) -> Result<Signature> {
        Signature::from_device_parts(&self.r, &self.s, self.v)
    }
}

/// An open connection to a signing device.
///
/// Every call blocks until the device answers, which may include waiting for
/// the user to confirm on the device screen. No timeout is applied.
pub trait DeviceClient: Send {
    /// Returns the address and public key at `path`.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the device cannot be reached or the user
    /// rejects the request.
    fn get_address(
        &mut self,
        path: &str,
        ask_for_on_device_confirmation: bool,
        want_chain_code: bool,
    ) -> Result<AddressResponse>;

    /// Signs the unsigned transaction payload `raw_tx_hex` with the key at
    /// `path`.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the device cannot be reached or the user
    /// rejects the request.
    fn sign_transaction(&mut self, path: &str, raw_tx_hex: &str) -> Result<TxSignatureResponse>;

    /// Signs `message_hex` as a personal message with the key at `path`. The
    /// device applies the message prefix and hashes on its own.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the device cannot be reached or the user
    /// rejects the request.
    fn sign_personal_message(
        &mut self,
        path: &str,
        message_hex: &str,
    ) -> Result<MessageSignatureResponse>;

    /// Tears down the transport. Must tolerate being called more than once.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the teardown itself fails.
    fn close(&mut self) -> Result<()>;
}

/// Opens device clients on demand.
pub trait DeviceClientFactory: Send + Sync {
    /// Opens a new client.
    ///
    /// # Errors
    ///
    /// Returns a transport error if no device can be opened.
    fn open(&self) -> Result<Box<dyn DeviceClient>>;
}

impl<F> DeviceClientFactory for F
where
    F: Fn() -> Result<Box<dyn DeviceClient>> + Send + Sync,
{
    fn open(&self) -> Result<Box<dyn DeviceClient>> {
        self()
    }
}
