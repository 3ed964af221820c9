//! Account discovery and signing against a hardware device.
//!
//! [`SigningOrchestrator`] ties the pieces together. Each operation makes at
//! most two device round trips, each in its own session:
//!
//! 1. Fetch the extended public key at the base path and resolve the signing
//!    account offline.
//! 2. Ask the device to sign.
//!
//! Sessions are closed before any result or error is handed back, including
//! the chain-id mismatch raised after a transaction signature comes back.

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::address::Address;
use crate::config::{AccountFetchingConfig, SubproviderConfig, validate_base_path};
use crate::derivation::full_path;
use crate::device::{ConnectionGuard, DeviceClientFactory};
use crate::error::{Error, Result};
use crate::hdkey::{DerivedKeyInfo, derive_range, find_by_address};
use crate::transaction::{Transaction, TxParams};

/// Signs transactions and messages with keys held on a hardware device.
#[derive(Debug)]
pub struct SigningOrchestrator {
    network_id: u64,
    base_derivation_path: RwLock<String>,
    account_fetching: AccountFetchingConfig,
    connection: ConnectionGuard,
}

impl SigningOrchestrator {
    /// Creates an orchestrator that opens device clients with `factory`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` does not validate.
    pub fn new(config: SubproviderConfig, factory: impl DeviceClientFactory + 'static) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            network_id: config.network_id,
            base_derivation_path: RwLock::new(config.base_derivation_path),
            account_fetching: config.account_fetching,
            connection: ConnectionGuard::new(factory),
        })
    }

    /// Returns the configured chain id.
    #[must_use]
    pub const fn network_id(&self) -> u64 {
        self.network_id
    }

    /// Returns the current base derivation path.
    #[must_use]
    pub fn path(&self) -> String {
        self.base_derivation_path.read().clone()
    }

    /// Replaces the base derivation path. Operations already in flight keep
    /// the path they started with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `path` is not a derivation path.
    pub fn set_path(&self, path: &str) -> Result<()> {
        validate_base_path(path)?;
        *self.base_derivation_path.write() = path.to_string();
        info!(path, "base derivation path changed");
        Ok(())
    }

    /// Returns the account fetching options.
    #[must_use]
    pub const fn account_fetching(&self) -> &AccountFetchingConfig {
        &self.account_fetching
    }

    /// Returns the connection guard serializing access to the device.
    #[must_use]
    pub const fn connection(&self) -> &ConnectionGuard {
        &self.connection
    }

    /// Lists the first `count` accounts below the base path, in index order.
    ///
    /// Makes a single device round trip regardless of `count`.
    ///
    /// # Errors
    ///
    /// Any device error, or a derivation failure.
    pub fn accounts(&self, count: u32) -> Result<Vec<Address>> {
        Ok(self
            .derived_accounts(count)?
            .into_iter()
            .map(|key| key.address)
            .collect())
    }

    /// Like [`accounts`](Self::accounts) but keeps the derivation details.
    ///
    /// # Errors
    ///
    /// Any device error, or a derivation failure.
    pub fn derived_accounts(&self, count: u32) -> Result<Vec<DerivedKeyInfo>> {
        let root = self.initial_derived_key_info()?;
        let keys = derive_range(&root, count)?;
        debug!(count, base = %root.base_derivation_path, "derived accounts");
        Ok(keys)
    }

    /// Signs a transaction and returns it serialized as `0x` hex.
    ///
    /// # Errors
    ///
    /// - [`Error::FromAddressMissingOrInvalid`] if `from` is absent or not an
    ///   address
    /// - Any [`Transaction::from_params`] error
    /// - [`Error::AddressNotFound`] if `from` is not derived within the
    ///   search limit
    /// - [`Error::TooOldLedgerFirmware`] if the device signed for another
    ///   chain
    /// - Any device error, passed through once the session is closed
    pub fn sign_transaction(&self, params: &TxParams) -> Result<String> {
        let from = params
            .from
            .as_deref()
            .filter(|from| Address::is_valid(from))
            .ok_or(Error::FromAddressMissingOrInvalid)?;

        let tx = Transaction::from_params(params, self.network_id)?;
        let key = self.resolve(from)?;

        let payload = hex::encode(tx.signing_payload());
        let response = self
            .connection
            .with_session(|client| client.sign_transaction(&key.derivation_path, &payload))?;
        let signature = response.to_signature()?;

        if let Transaction::Legacy(_) = tx {
            let signed_chain_id = signature.signed_chain_id();
            if signed_chain_id != Some(self.network_id) {
                warn!(
                    ?signed_chain_id,
                    expected = self.network_id,
                    "device signed for a different chain"
                );
                return Err(Error::TooOldLedgerFirmware {
                    signed_chain_id,
                    expected_chain_id: self.network_id,
                });
            }
        }

        let signed = tx.signed_rlp(&signature)?;
        info!(path = %key.derivation_path, chain_id = self.network_id, "signed transaction");
        Ok(format!("0x{}", hex::encode(signed)))
    }

    /// Signs `data` as a personal message and returns `0x || r || s || v`.
    ///
    /// `data` is `0x`-prefixed hex. The device applies the message prefix
    /// and hashes on its own.
    ///
    /// # Errors
    ///
    /// - [`Error::DataMissingForSignPersonalMessage`] if `data` is not
    ///   `0x`-prefixed hex. `"0x"` is the empty message.
    /// - [`Error::InvalidAddress`] if `address` is not an address
    /// - [`Error::AddressNotFound`] if `address` is not derived within the
    ///   search limit
    /// - Any device error, passed through once the session is closed
    pub fn sign_personal_message(&self, data: &str, address: &str) -> Result<String> {
        let message = data
            .strip_prefix("0x")
            .filter(|digits| digits.bytes().all(|b| b.is_ascii_hexdigit()))
            .ok_or(Error::DataMissingForSignPersonalMessage)?;
        Address::parse(address)?;

        let key = self.resolve(address)?;
        let response = self
            .connection
            .with_session(|client| client.sign_personal_message(&key.derivation_path, message))?;

        let rsv = response.to_signature()?.to_rsv_hex()?;
        info!(path = %key.derivation_path, "signed personal message");
        Ok(rsv)
    }

    /// Typed-data signing is not available on this device class.
    ///
    /// # Errors
    ///
    /// Always returns [`Error::MethodNotSupported`].
    pub fn sign_typed_data(&self, _address: &str, _typed_data: &Value) -> Result<String> {
        Err(Error::MethodNotSupported("eth_signTypedData".to_string()))
    }

    /// Fetches the extended public key at the base path.
    fn initial_derived_key_info(&self) -> Result<DerivedKeyInfo> {
        let base = self.path();
        let root_path = full_path(&base, None);
        let confirm = self.account_fetching.should_ask_for_on_device_confirmation;

        let response = self
            .connection
            .with_session(|client| client.get_address(&root_path, confirm, true))?;
        let root = DerivedKeyInfo::root(&base, response.extended_public_key()?);

        debug!(path = %root.derivation_path, address = %root.address, "fetched master key");
        Ok(root)
    }

    /// Resolves `address` to the key that controls it.
    fn resolve(&self, address: &str) -> Result<DerivedKeyInfo> {
        let root = self.initial_derived_key_info()?;
        find_by_address(&root, address, self.account_fetching.address_search_limit)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::device::DeviceClient;

    const FROM: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    /// An orchestrator whose factory never yields a device, counting attempts.
    fn unreachable_device() -> (SigningOrchestrator, Arc<AtomicUsize>) {
        let opens = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&opens);
        let signer = SigningOrchestrator::new(
            SubproviderConfig::new(1),
            move || -> Result<Box<dyn DeviceClient>> {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::DeviceDisconnected)
            },
        )
        .unwrap();
        (signer, opens)
    }

    #[test]
    fn missing_or_invalid_from_fails_before_device() {
        let (signer, opens) = unreachable_device();

        let missing = TxParams::default();
        assert!(matches!(
            signer.sign_transaction(&missing),
            Err(Error::FromAddressMissingOrInvalid)
        ));

        let invalid = TxParams {
            from: Some("0x1234".to_string()),
            ..TxParams::default()
        };
        assert!(matches!(
            signer.sign_transaction(&invalid),
            Err(Error::FromAddressMissingOrInvalid)
        ));

        assert_eq!(opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn malformed_tx_fails_before_device() {
        let (signer, opens) = unreachable_device();
        let params = TxParams {
            from: Some(FROM.to_string()),
            to: Some("0xnope".to_string()),
            ..TxParams::default()
        };

        assert!(matches!(
            signer.sign_transaction(&params),
            Err(Error::InvalidAddress(_))
        ));
        assert_eq!(opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn personal_message_input_errors() {
        let (signer, opens) = unreachable_device();

        for data in ["", "deadbeef", "0xzz", "0x12g4"] {
            assert!(
                matches!(
                    signer.sign_personal_message(data, FROM),
                    Err(Error::DataMissingForSignPersonalMessage)
                ),
                "{data:?} should be rejected"
            );
        }
        assert!(matches!(
            signer.sign_personal_message("0xdeadbeef", "0x1234"),
            Err(Error::InvalidAddress(_))
        ));
        assert_eq!(opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn device_errors_pass_through() {
        let (signer, opens) = unreachable_device();
        assert!(matches!(signer.accounts(3), Err(Error::DeviceDisconnected)));
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert!(!signer.connection().is_open());
    }

    #[test]
    fn typed_data_is_not_supported() {
        let (signer, _) = unreachable_device();
        assert!(matches!(
            signer.sign_typed_data(FROM, &serde_json::json!({})),
            Err(Error::MethodNotSupported(_))
        ));
    }

    #[test]
    fn set_path_validates() {
        let (signer, _) = unreachable_device();
        assert_eq!(signer.path(), "44'/60'/0'");

        signer.set_path("44'/60'/1'").unwrap();
        assert_eq!(signer.path(), "44'/60'/1'");

        assert!(matches!(
            signer.set_path("not/a/path"),
            Err(Error::InvalidConfig(_))
        ));
        assert_eq!(signer.path(), "44'/60'/1'");
    }

    #[test]
    fn new_rejects_invalid_config() {
        let mut config = SubproviderConfig::new(1);
        config.account_fetching.address_search_limit = 0;
        let result = SigningOrchestrator::new(config, || -> Result<Box<dyn DeviceClient>> {
            Err(Error::DeviceDisconnected)
        });
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
