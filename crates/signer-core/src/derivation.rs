//! Derivation path arithmetic.
//!
//! Paths are handled as strings in the `44'/60'/0'` form because that is what
//! the device client contract accepts. The base path is configured without the
//! `m/` root marker; [`full_path`] adds it back.
//!
//! ```
//! use ledger_evm_signer_core::derivation::full_path;
//!
//! assert_eq!(full_path("44'/60'/0'", None), "m/44'/60'/0'");
//! assert_eq!(full_path("44'/60'/0'", Some(3)), "m/44'/60'/0'/3");
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// The default base path for Ethereum accounts.
pub const DEFAULT_BASE_DERIVATION_PATH: &str = "44'/60'/0'";

/// Indices at or above this value are hardened.
pub const HARDENED_OFFSET: u32 = 0x8000_0000;

/// Returns the full path from the seed root for `base`, optionally extended
/// with a child `index`.
///
/// `None` designates the base path itself (the root of account discovery).
#[must_use]
pub fn full_path(base: &str, index: Option<u32>) -> String {
    let base = base.trim_start_matches("m/").trim_matches('/');
    match index {
        Some(index) => format!("m/{base}/{index}"),
        None => format!("m/{base}"),
    }
}

/// A parsed BIP32 derivation path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DerivationPath(Vec<u32>);

impl DerivationPath {
    /// Returns the path components, hardened ones offset by [`HARDENED_OFFSET`].
    #[must_use]
    pub fn components(&self) -> &[u32] {
        &self.0
    }

    /// Returns the depth of the path.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.0.len()
    }
}

impl FromStr for DerivationPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let body = trimmed
            .strip_prefix("m/")
            .or_else(|| (trimmed == "m").then_some(""))
            .unwrap_or(trimmed);

        if body.is_empty() {
            return Ok(Self(Vec::new()));
        }

        body.split('/')
            .map(|segment| parse_component(segment).ok_or_else(|| Error::InvalidDerivationPath(s.to_string())))
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m")?;
        for component in &self.0 {
            if *component >= HARDENED_OFFSET {
                write!(f, "/{}'", component - HARDENED_OFFSET)?;
            } else {
                write!(f, "/{component}")?;
            }
        }
        Ok(())
    }
}

/// Parses one path segment, accepting `'`, `h` and `H` as hardened markers.
fn parse_component(segment: &str) -> Option<u32> {
    let (digits, hardened) = match segment.strip_suffix(['\'', 'h', 'H']) {
        Some(digits) => (digits, true),
        None => (segment, false),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let index: u32 = digits.parse().ok()?;
    if index >= HARDENED_OFFSET {
        return None;
    }
    Some(if hardened { index + HARDENED_OFFSET } else { index })
}
