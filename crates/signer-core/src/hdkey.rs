//! Offline account discovery from an extended public key.
//!
//! The device is asked once for the public key and chain code at the base
//! path. Everything below that is non-hardened BIP32 public derivation, so any
//! number of accounts can be listed or searched without touching the device
//! again.
//!
//! # Derivation
//!
//! For a parent `(K, c)` and index `i < 2^31`:
//!
//! ```text
//! I        = HMAC-SHA512(key = c, data = serP(K) || ser32(i))
//! K_child  = I_L·G + K
//! c_child  = I_R
//! ```
//!
//! The child is undefined when `I_L >= n` or `K_child` is the point at
//! infinity; both surface as [`Error::InvalidChildKey`].

use std::fmt;

use hmac::{Hmac, Mac};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{AffinePoint, NonZeroScalar, ProjectivePoint, PublicKey};
use sha2::Sha512;
use tracing::debug;

use crate::address::Address;
use crate::derivation::{HARDENED_OFFSET, full_path};
use crate::error::{Error, Result};

type HmacSha512 = Hmac<Sha512>;

/// A public key paired with a chain code.
#[derive(Clone, PartialEq, Eq)]
pub struct ExtendedPublicKey {
    public_key: PublicKey,
    chain_code: [u8; 32],
}

impl fmt::Debug for ExtendedPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtendedPublicKey")
            .field("public_key", &hex::encode(self.public_key_bytes()))
            .field("chain_code", &hex::encode(self.chain_code))
            .finish()
    }
}

impl ExtendedPublicKey {
    /// Creates an extended public key from its parts.
    #[must_use]
    pub const fn new(public_key: PublicKey, chain_code: [u8; 32]) -> Self {
        Self {
            public_key,
            chain_code,
        }
    }

    /// Builds an extended public key from the hex strings a device returns.
    ///
    /// `public_key` may be compressed or uncompressed SEC1; both inputs may
    /// carry a `0x` prefix.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPublicKey`] if either part is malformed.
    pub fn from_hex(public_key: &str, chain_code: &str) -> Result<Self> {
        let key_bytes = hex::decode(public_key.strip_prefix("0x").unwrap_or(public_key))?;
        let public_key = PublicKey::from_sec1_bytes(&key_bytes)
            .map_err(|e| Error::InvalidPublicKey(e.to_string()))?;

        let code_bytes = hex::decode(chain_code.strip_prefix("0x").unwrap_or(chain_code))?;
        let chain_code: [u8; 32] = code_bytes.as_slice().try_into().map_err(|_| {
            Error::InvalidPublicKey(format!("chain code must be 32 bytes, got {}", code_bytes.len()))
        })?;

        Ok(Self::new(public_key, chain_code))
    }

    /// Returns the public key.
    #[must_use]
    pub const fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Returns the compressed SEC1 encoding of the public key.
    #[must_use]
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.public_key.to_encoded_point(true).as_bytes().to_vec()
    }

    /// Returns the chain code.
    #[must_use]
    pub const fn chain_code(&self) -> &[u8; 32] {
        &self.chain_code
    }

    /// Returns the account address of this key.
    #[must_use]
    pub fn address(&self) -> Address {
        Address::from_public_key(&self.public_key)
    }

    /// Derives the non-hardened child at `index`.
    ///
    /// # Errors
    ///
    /// - [`Error::HardenedDerivation`] if `index` is hardened
    /// - [`Error::InvalidChildKey`] if the child is undefined at `index`
    pub fn derive_child(&self, index: u32) -> Result<Self> {
        if index >= HARDENED_OFFSET {
            return Err(Error::HardenedDerivation(index));
        }

        let mut mac = HmacSha512::new_from_slice(&self.chain_code)
            .map_err(|_| Error::InvalidChildKey(index))?;
        mac.update(self.public_key.to_encoded_point(true).as_bytes());
        mac.update(&index.to_be_bytes());
        let i = mac.finalize().into_bytes();
        let (i_left, i_right) = i.split_at(32);

        let tweak = NonZeroScalar::try_from(i_left).map_err(|_| Error::InvalidChildKey(index))?;
        let point = ProjectivePoint::GENERATOR * *tweak + self.public_key.to_projective();
        let public_key = PublicKey::from_affine(AffinePoint::from(point))
            .map_err(|_| Error::InvalidChildKey(index))?;

        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(i_right);

        Ok(Self::new(public_key, chain_code))
    }
}

/// A key derived during account discovery.
///
/// Immutable once created and recomputed per session; nothing here is
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedKeyInfo {
    /// The account address.
    pub address: Address,
    /// The full path from the seed root, e.g. `m/44'/60'/0'/3`.
    pub derivation_path: String,
    /// The configured base path, e.g. `44'/60'/0'`.
    pub base_derivation_path: String,
    /// The extended public key at `derivation_path`.
    pub extended_public_key: ExtendedPublicKey,
}

impl DerivedKeyInfo {
    /// Creates the root entry for a base path from the key the device returned.
    #[must_use]
    pub fn root(base_derivation_path: &str, extended_public_key: ExtendedPublicKey) -> Self {
        Self {
            address: extended_public_key.address(),
            derivation_path: full_path(base_derivation_path, None),
            base_derivation_path: base_derivation_path.to_string(),
            extended_public_key,
        }
    }
}

/// Derives the child of `root` at `index`.
///
/// # Errors
///
/// Propagates [`ExtendedPublicKey::derive_child`] failures.
pub fn child_key(root: &DerivedKeyInfo, index: u32) -> Result<DerivedKeyInfo> {
    let extended_public_key = root.extended_public_key.derive_child(index)?;
    Ok(DerivedKeyInfo {
        address: extended_public_key.address(),
        derivation_path: full_path(&root.base_derivation_path, Some(index)),
        base_derivation_path: root.base_derivation_path.clone(),
        extended_public_key,
    })
}

/// Derives the children of `root` at indices `0..count`, in order.
///
/// # Errors
///
/// Propagates the first [`child_key`] failure.
pub fn derive_range(root: &DerivedKeyInfo, count: u32) -> Result<Vec<DerivedKeyInfo>> {
    (0..count).map(|index| child_key(root, index)).collect()
}

/// Finds the lowest index below `search_limit` whose address equals `target`,
/// ignoring case.
///
/// # Errors
///
/// - [`Error::AddressNotFound`] if no index in `0..search_limit` matches
/// - Propagates [`child_key`] failures
pub fn find_by_address(
    root: &DerivedKeyInfo,
    target: &str,
    search_limit: u32,
) -> Result<DerivedKeyInfo> {
    let candidates = (0..search_limit).map(|index| child_key(root, index));
    if let Some(found) = first_match(candidates, target)? {
        debug!(path = %found.derivation_path, "resolved address");
        return Ok(found);
    }

    debug!(search_limit, address = target, "address not derived within search limit");
    Err(Error::AddressNotFound(target.to_string()))
}

/// Returns the first candidate whose address matches `target`, in iteration
/// order. Candidates after the match are never derived.
fn first_match<I>(candidates: I, target: &str) -> Result<Option<DerivedKeyInfo>>
where
    I: IntoIterator<Item = Result<DerivedKeyInfo>>,
{
    for candidate in candidates {
        let candidate = candidate?;
        if candidate.address.matches_hex(target) {
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}
