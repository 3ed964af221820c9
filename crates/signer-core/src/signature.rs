//! ECDSA signatures as returned by the signing device.
//!
//! The device hands back `r`, `s` and `v` separately. `r` and `s` are 32-byte
//! scalars. `v` depends on what was signed:
//!
//! - **Legacy transactions**: the EIP-155 value `chain_id * 2 + 35 + parity`,
//!   from which the chain id the device actually signed for is recovered.
//! - **Typed transactions**: the bare y-parity (`0`/`1`).
//! - **Personal messages**: `27 + parity`.
//!
//! # Wire Format
//!
//! Message signatures are rendered as `0x || r (64 hex) || s (64 hex) || v (2 hex)`
//! where `v` is the canonical recovery value (`0` or `1`).
//!
//! # Example
//!
//! ```
//! use ledger_evm_signer_core::Signature;
//!
//! let sig = Signature::new([1u8; 32], [2u8; 32], 37);
//! assert_eq!(sig.signed_chain_id(), Some(1));
//! ```

use crate::error::{Error, Result};

/// Offset added to `2 * chain_id` in an EIP-155 `v`.
pub const EIP155_V_OFFSET: u64 = 35;

/// The lowest `v` a device returns for a personal message signature.
pub const LOWEST_VALID_MESSAGE_V: u64 = 27;

/// An ECDSA signature over secp256k1 with the device's raw recovery value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    /// The R component of the signature (32 bytes).
    r: [u8; 32],

    /// The S component of the signature (32 bytes).
    s: [u8; 32],

    /// The raw recovery value, exactly as the device returned it.
    v: u64,
}

impl Signature {
    /// Creates a new signature from raw components.
    #[must_use]
    pub const fn new(r: [u8; 32], s: [u8; 32], v: u64) -> Self {
        Self { r, s, v }
    }

    /// Parses a transaction signature from the hex strings the device returns.
    ///
    /// All three parts may carry a `0x` prefix. `r` and `s` shorter than 32
    /// bytes are left-padded with zeros.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSignature`] if a part is not hex, `r`/`s` exceed
    /// 32 bytes, or `v` does not fit in 64 bits.
    pub fn from_device_hex(r: &str, s: &str, v: &str) -> Result<Self> {
        let v_digits = v.strip_prefix("0x").unwrap_or(v);
        let v = if v_digits.is_empty() {
            0
        } else {
            u64::from_str_radix(v_digits, 16)
                .map_err(|e| Error::InvalidSignature(format!("invalid v `{v}`: {e}")))?
        };
        Ok(Self::new(parse_scalar(r)?, parse_scalar(s)?, v))
    }

    /// Parses a message signature: hex `r`/`s` and a numeric `v`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSignature`] if `r` or `s` is malformed.
    pub fn from_device_parts(r: &str, s: &str, v: u64) -> Result<Self> {
        Ok(Self::new(parse_scalar(r)?, parse_scalar(s)?, v))
    }

    /// Returns the R component of the signature.
    #[must_use]
    pub const fn r(&self) -> &[u8; 32] {
        &self.r
    }

    /// Returns the S component of the signature.
    #[must_use]
    pub const fn s(&self) -> &[u8; 32] {
        &self.s
    }

    /// Returns the raw recovery value.
    #[must_use]
    pub const fn v(&self) -> u64 {
        self.v
    }

    /// Returns the chain id encoded in an EIP-155 `v`:
    /// `floor((v - 35) / 2)`.
    ///
    /// `None` when `v` is below 35, i.e. the device returned a pre-EIP-155
    /// signature that carries no chain id at all.
    #[must_use]
    pub const fn signed_chain_id(&self) -> Option<u64> {
        match self.v.checked_sub(EIP155_V_OFFSET) {
            Some(offset) => Some(offset / 2),
            None => None,
        }
    }

    /// Returns the y-parity for a typed transaction envelope.
    ///
    /// Accepts bare parity (`0`/`1`) and the `27`/`28` form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSignature`] for any other `v`.
    pub fn y_parity(&self) -> Result<u8> {
        match self.v {
            0 | 27 => Ok(0),
            1 | 28 => Ok(1),
            v => Err(Error::InvalidSignature(format!(
                "expected y-parity, device returned v = {v}"
            ))),
        }
    }

    /// Returns the canonical recovery value of a message signature:
    /// `v - 27`, or `v` itself when the device already returned `0`/`1`.
    #[must_use]
    pub const fn message_recovery_id(&self) -> u64 {
        match self.v.checked_sub(LOWEST_VALID_MESSAGE_V) {
            Some(recovery_id) => recovery_id,
            None => self.v,
        }
    }

    /// Renders a message signature as `0x || r || s || v`.
    ///
    /// `v` is the [`message_recovery_id`](Self::message_recovery_id) as a
    /// lowercase hex byte, zero-padded to two digits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSignature`] if the recovery value does not fit
    /// in one byte.
    pub fn to_rsv_hex(&self) -> Result<String> {
        let recovery_id = u8::try_from(self.message_recovery_id()).map_err(|_| {
            Error::InvalidSignature(format!("recovery value {} exceeds one byte", self.v))
        })?;
        Ok(format!(
            "0x{}{}{recovery_id:02x}",
            hex::encode(self.r),
            hex::encode(self.s)
        ))
    }
}

/// Parses a hex scalar of at most 32 bytes, left-padding it to 32.
fn parse_scalar(hex_str: &str) -> Result<[u8; 32]> {
    let digits = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    let padded;
    let digits = if digits.len() % 2 == 1 {
        padded = format!("0{digits}");
        padded.as_str()
    } else {
        digits
    };

    let bytes = hex::decode(digits)
        .map_err(|e| Error::InvalidSignature(format!("invalid scalar `{hex_str}`: {e}")))?;
    if bytes.len() > 32 {
        return Err(Error::InvalidSignature(format!(
            "scalar is {} bytes, expected at most 32",
            bytes.len()
        )));
    }

    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(out)
}
