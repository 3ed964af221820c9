//! Ethereum transaction types and device signing payloads.
//!
//! Callers describe a transaction with JSON-RPC [`TxParams`] (hex strings, the
//! shape `eth_sendTransaction` carries). These are validated, stripped of
//! `from` and normalized into a [`Transaction`]:
//!
//! - **Legacy (EIP-155)** when `gasPrice` is used. The device payload is
//!   `rlp([nonce, gasPrice, gasLimit, to, value, data, chainId, 0, 0])`: the
//!   chain id sits in the slot that later holds `v`, which is how firmware
//!   without native chain-id support learns which network to sign for.
//! - **EIP-1559 (type 2)** when `maxFeePerGas`/`maxPriorityFeePerGas` are used.
//!   The payload is the typed envelope `0x02 || rlp([chainId, nonce, ...])`.
//!
//! # Signing Flow
//!
//! 1. Build a [`Transaction`] with [`Transaction::from_params`]
//! 2. Send [`Transaction::signing_payload`] to the device
//! 3. Assemble the result with [`Transaction::signed_rlp`]
//!
//! # Example
//!
//! ```
//! use ledger_evm_signer_core::{Address, LegacyTransaction, Transaction, U256};
//!
//! let tx = Transaction::Legacy(LegacyTransaction {
//!     chain_id: 1,
//!     nonce: 9,
//!     gas_price: U256::from(20_000_000_000u64),
//!     gas_limit: 21000,
//!     to: Some(Address::new([0x35; 20])),
//!     value: U256::from(1_000_000_000_000_000_000u128),
//!     data: vec![],
//! });
//!
//! let payload = tx.signing_payload();
//! assert_eq!(payload[0], 0xec);
//! ```

use alloy_primitives::{B256, U256, keccak256};
use alloy_rlp::{Encodable, RlpEncodable};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::address::Address;
use crate::error::{Error, Result};
use crate::signature::Signature;

/// An access list entry for EIP-2930/EIP-1559 transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, RlpEncodable)]
#[serde(rename_all = "camelCase")]
pub struct AccessListEntry {
    /// The address being accessed.
    pub address: alloy_primitives::Address,

    /// The storage keys being accessed at this address.
    pub storage_keys: Vec<B256>,
}

/// Transaction parameters as they arrive over JSON-RPC.
///
/// Every numeric field is a `0x`-prefixed hex quantity. Fields left out are
/// either populated upstream (`nonce`, `gas`, `gasPrice`) or default to zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxParams {
    /// The sending account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    /// The recipient, absent for contract creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,

    /// The sender nonce.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// The gas limit.
    #[serde(default, alias = "gasLimit", skip_serializing_if = "Option::is_none")]
    pub gas: Option<String>,

    /// The gas price of a legacy transaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<String>,

    /// The maximum total fee per gas of a fee-market transaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<String>,

    /// The maximum priority fee per gas of a fee-market transaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<String>,

    /// The value to transfer in wei.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// The transaction input data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,

    /// The envelope type, as a number or a hex quantity.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub tx_type: Option<Value>,

    /// The access list of a fee-market transaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_list: Option<Vec<AccessListEntry>>,

    /// The chain id, if the caller states one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<String>,
}

impl TxParams {
    /// Checks that every present field is well formed.
    ///
    /// `from` is not checked here; the signer reports it separately with
    /// [`Error::FromAddressMissingOrInvalid`].
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidAddress`] if `to` is not an address
    /// - [`Error::InvalidTransaction`] if a quantity or `data` is not hex
    pub fn validate(&self) -> Result<()> {
        if let Some(to) = &self.to
            && !Address::is_valid(to)
        {
            return Err(Error::InvalidAddress(to.clone()));
        }

        let quantities = [
            ("nonce", &self.nonce),
            ("gas", &self.gas),
            ("gasPrice", &self.gas_price),
            ("maxFeePerGas", &self.max_fee_per_gas),
            ("maxPriorityFeePerGas", &self.max_priority_fee_per_gas),
            ("value", &self.value),
            ("chainId", &self.chain_id),
        ];
        for (field, value) in quantities {
            if let Some(value) = value {
                parse_quantity(field, value)?;
            }
        }

        if let Some(data) = &self.data {
            parse_data(data)?;
        }

        self.envelope_type().map(|_| ())
    }

    /// Returns `true` if the parameters describe a fee-market transaction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransaction`] for an unsupported `type`.
    pub fn is_fee_market(&self) -> Result<bool> {
        self.envelope_type()
            .map(|ty| ty == Some(Eip1559Transaction::TX_TYPE) || self.has_fee_market_fields())
    }

    fn has_fee_market_fields(&self) -> bool {
        self.max_fee_per_gas.is_some() || self.max_priority_fee_per_gas.is_some()
    }

    fn envelope_type(&self) -> Result<Option<u8>> {
        let ty = match &self.tx_type {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => u64::try_from(parse_quantity("type", s)?).ok(),
            Some(other) => {
                return Err(Error::InvalidTransaction(format!("invalid type {other}")));
            }
        };
        match ty {
            Some(0) => Ok(Some(0)),
            Some(2) => Ok(Some(Eip1559Transaction::TX_TYPE)),
            _ => Err(Error::InvalidTransaction(format!(
                "unsupported transaction type {:?}",
                self.tx_type
            ))),
        }
    }
}

/// An EIP-155 legacy transaction.
///
/// [EIP-155]: https://eips.ethereum.org/EIPS/eip-155
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    /// The chain ID for replay protection.
    pub chain_id: u64,

    /// The transaction nonce.
    pub nonce: u64,

    /// The gas price in wei.
    pub gas_price: U256,

    /// The gas limit.
    pub gas_limit: u64,

    /// The recipient address, or `None` for contract creation.
    pub to: Option<Address>,

    /// The value to transfer in wei.
    pub value: U256,

    /// The transaction input data.
    pub data: Vec<u8>,
}

impl LegacyTransaction {
    /// Returns the payload the device signs:
    /// `rlp([nonce, gasPrice, gasLimit, to, value, data, chainId, 0, 0])`.
    #[must_use]
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        encode_rlp_list(&mut buf, |buf| {
            self.encode_fields(buf);
            self.chain_id.encode(buf);
            0u8.encode(buf);
            0u8.encode(buf);
        });

        buf
    }

    /// Encodes the signed transaction `rlp([..., v, r, s])`.
    ///
    /// `v` is taken verbatim from the signature: for EIP-155 it already
    /// carries the chain id.
    #[must_use]
    pub fn signed_rlp(&self, signature: &Signature) -> Vec<u8> {
        let mut buf = Vec::new();

        encode_rlp_list(&mut buf, |buf| {
            self.encode_fields(buf);
            signature.v().encode(buf);
            encode_bytes32(signature.r(), buf);
            encode_bytes32(signature.s(), buf);
        });

        buf
    }

    fn encode_fields(&self, buf: &mut Vec<u8>) {
        self.nonce.encode(buf);
        encode_u256(&self.gas_price, buf);
        self.gas_limit.encode(buf);
        encode_optional_address(self.to.as_ref(), buf);
        encode_u256(&self.value, buf);
        self.data.as_slice().encode(buf);
    }
}

/// An EIP-1559 (Type 2) transaction.
///
/// [EIP-1559]: https://eips.ethereum.org/EIPS/eip-1559
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eip1559Transaction {
    /// The chain ID.
    pub chain_id: u64,

    /// The transaction nonce.
    pub nonce: u64,

    /// The maximum priority fee per gas (tip).
    pub max_priority_fee_per_gas: U256,

    /// The maximum total fee per gas.
    pub max_fee_per_gas: U256,

    /// The gas limit.
    pub gas_limit: u64,

    /// The recipient address, or `None` for contract creation.
    pub to: Option<Address>,

    /// The value to transfer in wei.
    pub value: U256,

    /// The transaction input data.
    pub data: Vec<u8>,

    /// The access list.
    pub access_list: Vec<AccessListEntry>,
}

impl Eip1559Transaction {
    /// The transaction type identifier for EIP-1559.
    pub const TX_TYPE: u8 = 0x02;

    /// Returns the payload the device signs:
    /// `0x02 || rlp([chainId, nonce, maxPriorityFeePerGas, maxFeePerGas,
    ///   gasLimit, to, value, data, accessList])`.
    #[must_use]
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(256);
        buf.push(Self::TX_TYPE);

        encode_rlp_list(&mut buf, |buf| {
            self.encode_fields(buf);
        });

        buf
    }

    /// Encodes the signed typed envelope with the signature's y-parity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSignature`] if `v` is not a y-parity.
    pub fn signed_rlp(&self, signature: &Signature) -> Result<Vec<u8>> {
        let y_parity = signature.y_parity()?;
        let mut buf = Vec::with_capacity(256);
        buf.push(Self::TX_TYPE);

        encode_rlp_list(&mut buf, |buf| {
            self.encode_fields(buf);
            y_parity.encode(buf);
            encode_bytes32(signature.r(), buf);
            encode_bytes32(signature.s(), buf);
        });

        Ok(buf)
    }

    fn encode_fields(&self, buf: &mut Vec<u8>) {
        self.chain_id.encode(buf);
        self.nonce.encode(buf);
        encode_u256(&self.max_priority_fee_per_gas, buf);
        encode_u256(&self.max_fee_per_gas, buf);
        self.gas_limit.encode(buf);
        encode_optional_address(self.to.as_ref(), buf);
        encode_u256(&self.value, buf);
        self.data.as_slice().encode(buf);
        self.access_list.encode(buf);
    }
}

/// Encodes an RLP list using a closure to write elements.
fn encode_rlp_list<F>(out: &mut Vec<u8>, f: F)
where
    F: FnOnce(&mut Vec<u8>),
{
    let mut content = Vec::new();
    f(&mut content);

    let header = alloy_rlp::Header {
        list: true,
        payload_length: content.len(),
    };
    header.encode(out);
    out.extend_from_slice(&content);
}

/// Encodes a U256 as RLP (strips leading zeros).
fn encode_u256(value: &U256, out: &mut Vec<u8>) {
    encode_bytes32(&value.to_be_bytes::<32>(), out);
}

/// Encodes an optional address; `None` is the empty string.
fn encode_optional_address(addr: Option<&Address>, out: &mut Vec<u8>) {
    match addr {
        Some(a) => a.inner().encode(out),
        None => out.push(alloy_rlp::EMPTY_STRING_CODE),
    }
}

/// Encodes a 32-byte big-endian integer, stripping leading zeros.
fn encode_bytes32(bytes: &[u8; 32], out: &mut Vec<u8>) {
    match bytes.iter().position(|&b| b != 0) {
        Some(start) => bytes[start..].encode(out),
        None => out.push(alloy_rlp::EMPTY_STRING_CODE),
    }
}

/// A unified transaction type supporting multiple formats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transaction {
    /// EIP-155 legacy transaction.
    Legacy(LegacyTransaction),
    /// EIP-1559 (Type 2) transaction.
    Eip1559(Eip1559Transaction),
}

impl Transaction {
    /// Normalizes JSON-RPC parameters into an unsigned transaction for
    /// `chain_id`. `from` is dropped: the device identifies the signer by
    /// derivation path, not by address.
    ///
    /// # Errors
    ///
    /// - Any [`TxParams::validate`] failure
    /// - [`Error::InvalidTransaction`] if `gasPrice` is mixed with fee-market
    ///   fields, the stated `chainId` disagrees with `chain_id`, or a
    ///   quantity overflows its field
    pub fn from_params(params: &TxParams, chain_id: u64) -> Result<Self> {
        params.validate()?;

        if let Some(stated) = &params.chain_id {
            let stated = parse_u64_quantity("chainId", stated)?;
            if stated != chain_id {
                return Err(Error::InvalidTransaction(format!(
                    "chainId {stated} does not match network id {chain_id}"
                )));
            }
        }

        let nonce = optional_u64(params.nonce.as_deref(), "nonce")?;
        let gas_limit = optional_u64(params.gas.as_deref(), "gas")?;
        let to = params.to.as_deref().map(Address::from_hex).transpose()?;
        let value = optional_u256(params.value.as_deref(), "value")?;
        let data = params.data.as_deref().map(parse_data).transpose()?.unwrap_or_default();

        if params.is_fee_market()? {
            if params.gas_price.is_some() {
                return Err(Error::InvalidTransaction(
                    "gasPrice cannot be combined with fee-market fields".to_string(),
                ));
            }
            return Ok(Self::Eip1559(Eip1559Transaction {
                chain_id,
                nonce,
                max_priority_fee_per_gas: optional_u256(
                    params.max_priority_fee_per_gas.as_deref(),
                    "maxPriorityFeePerGas",
                )?,
                max_fee_per_gas: optional_u256(params.max_fee_per_gas.as_deref(), "maxFeePerGas")?,
                gas_limit,
                to,
                value,
                data,
                access_list: params.access_list.clone().unwrap_or_default(),
            }));
        }

        if params.access_list.as_ref().is_some_and(|list| !list.is_empty()) {
            return Err(Error::InvalidTransaction(
                "access lists require a fee-market transaction".to_string(),
            ));
        }

        Ok(Self::Legacy(LegacyTransaction {
            chain_id,
            nonce,
            gas_price: optional_u256(params.gas_price.as_deref(), "gasPrice")?,
            gas_limit,
            to,
            value,
            data,
        }))
    }

    /// Returns the payload the device signs.
    #[must_use]
    pub fn signing_payload(&self) -> Vec<u8> {
        match self {
            Self::Legacy(tx) => tx.signing_payload(),
            Self::Eip1559(tx) => tx.signing_payload(),
        }
    }

    /// Returns the hash the device's signature commits to.
    #[must_use]
    pub fn signing_hash(&self) -> B256 {
        keccak256(self.signing_payload())
    }

    /// Creates the signed transaction bytes from a device signature.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSignature`] if a typed transaction receives a
    /// `v` that is not a y-parity.
    pub fn signed_rlp(&self, signature: &Signature) -> Result<Vec<u8>> {
        match self {
            Self::Legacy(tx) => Ok(tx.signed_rlp(signature)),
            Self::Eip1559(tx) => tx.signed_rlp(signature),
        }
    }
}

/// Parses a `0x`-prefixed hex quantity. `0x` alone is zero.
///
/// # Errors
///
/// Returns [`Error::InvalidTransaction`] naming `field` on malformed input.
pub fn parse_quantity(field: &str, value: &str) -> Result<U256> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| Error::InvalidTransaction(format!("{field} must be a 0x-prefixed hex quantity, got `{value}`")))?;
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 16)
        .map_err(|e| Error::InvalidTransaction(format!("{field} `{value}`: {e}")))
}

fn parse_u64_quantity(field: &str, value: &str) -> Result<u64> {
    parse_quantity(field, value)?
        .try_into()
        .map_err(|_| Error::InvalidTransaction(format!("{field} `{value}` does not fit in 64 bits")))
}

fn optional_u64(value: Option<&str>, field: &str) -> Result<u64> {
    value.map_or(Ok(0), |v| parse_u64_quantity(field, v))
}

fn optional_u256(value: Option<&str>, field: &str) -> Result<U256> {
    value.map_or(Ok(U256::ZERO), |v| parse_quantity(field, v))
}

/// Decodes hex input data, accepting an optional `0x` prefix.
fn parse_data(data: &str) -> Result<Vec<u8>> {
    let digits = data.strip_prefix("0x").unwrap_or(data);
    hex::decode(digits).map_err(|e| Error::InvalidTransaction(format!("data is not hex: {e}")))
}
