//! Signer configuration.
//!
//! Configuration is read from JSON in the camelCase shape wallet providers
//! use:
//!
//! ```
//! use ledger_evm_signer_core::SubproviderConfig;
//!
//! let config = SubproviderConfig::from_json(
//!     r#"{
//!         "networkId": 1,
//!         "accountFetchingConfigs": { "addressSearchLimit": 50 }
//!     }"#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.base_derivation_path, "44'/60'/0'");
//! assert_eq!(config.account_fetching.address_search_limit, 50);
//! assert_eq!(config.account_fetching.num_addresses_to_return, 10);
//! ```

use serde::{Deserialize, Serialize};

use crate::derivation::{DEFAULT_BASE_DERIVATION_PATH, DerivationPath};
use crate::error::{Error, Result};

/// Default upper bound on the index scanned when resolving an address.
pub const DEFAULT_ADDRESS_SEARCH_LIMIT: u32 = 1000;

/// Default number of accounts reported by `eth_accounts`.
pub const DEFAULT_NUM_ADDRESSES_TO_RETURN: u32 = 10;

/// How accounts are fetched from the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccountFetchingConfig {
    /// Highest child index (exclusive) scanned when resolving an address.
    pub address_search_limit: u32,
    /// Number of accounts listed by `eth_accounts`.
    pub num_addresses_to_return: u32,
    /// Forwarded to the device when fetching the master key.
    pub should_ask_for_on_device_confirmation: bool,
}

impl Default for AccountFetchingConfig {
    fn default() -> Self {
        Self {
            address_search_limit: DEFAULT_ADDRESS_SEARCH_LIMIT,
            num_addresses_to_return: DEFAULT_NUM_ADDRESSES_TO_RETURN,
            should_ask_for_on_device_confirmation: false,
        }
    }
}

/// Top-level signer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubproviderConfig {
    /// The chain id transactions are signed for and validated against.
    pub network_id: u64,
    /// Root of all derived paths, without the `m/` marker.
    #[serde(default = "default_base_derivation_path")]
    pub base_derivation_path: String,
    /// Account fetching options.
    #[serde(default, rename = "accountFetchingConfigs")]
    pub account_fetching: AccountFetchingConfig,
}

fn default_base_derivation_path() -> String {
    DEFAULT_BASE_DERIVATION_PATH.to_string()
}

impl SubproviderConfig {
    /// Creates a configuration for `network_id` with every other option at
    /// its default.
    #[must_use]
    pub fn new(network_id: u64) -> Self {
        Self {
            network_id,
            base_derivation_path: default_base_derivation_path(),
            account_fetching: AccountFetchingConfig::default(),
        }
    }

    /// Parses and validates a JSON configuration.
    ///
    /// # Errors
    ///
    /// [`Error::JsonError`] on malformed JSON, or any [`validate`](Self::validate)
    /// failure.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for values the signer cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the base path does not parse or a
    /// limit is zero.
    pub fn validate(&self) -> Result<()> {
        validate_base_path(&self.base_derivation_path)?;

        if self.account_fetching.address_search_limit == 0 {
            return Err(Error::InvalidConfig(
                "addressSearchLimit must be positive".to_string(),
            ));
        }
        if self.account_fetching.num_addresses_to_return == 0 {
            return Err(Error::InvalidConfig(
                "numAddressesToReturn must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Checks that `path` is a usable base path.
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`] if it does not parse or is empty.
pub fn validate_base_path(path: &str) -> Result<()> {
    let parsed: DerivationPath = path
        .parse()
        .map_err(|e| Error::InvalidConfig(format!("baseDerivationPath: {e}")))?;
    if parsed.depth() == 0 {
        return Err(Error::InvalidConfig(
            "baseDerivationPath must not be empty".to_string(),
        ));
    }
    Ok(())
}
