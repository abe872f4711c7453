//! Canonical signing strings.
//!
//! The canonical string is `TAG + key + nonce + params...` with no
//! separators. Field order and the exact string form of every value are a
//! wire contract with the server's verifier; [`CanonicalScheme`] selects
//! the rules by `apiVersion`.
//!
//! | Command   | Fields after `TAG + key + nonce`                              |
//! |-----------|---------------------------------------------------------------|
//! | AUTH      | none                                                          |
//! | PING      | none                                                          |
//! | TRANSFER  | accountNumber, beneficiary, currency, amount, narrative       |
//! | STATEMENT | accountNumber                                                 |
//!
//! Numbers: the nonce is a plain base-10 integer; amounts use
//! [`format_amount`] (normalized decimal, no exponent).

use rust_decimal::Decimal;

use super::CommandParams;
use crate::error::ClientError;

/// Canonicalization rules, keyed by envelope `apiVersion`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalScheme {
    /// `apiVersion: 2`, the only version the server speaks today.
    V2,
}

impl CanonicalScheme {
    /// The scheme used when the configuration does not override it.
    pub const CURRENT: Self = Self::V2;

    /// Selects the scheme for an envelope `apiVersion`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::UnsupportedApiVersion`] for unknown versions.
    pub fn for_api_version(version: u32) -> Result<Self, ClientError> {
        match version {
            2 => Ok(Self::V2),
            other => Err(ClientError::UnsupportedApiVersion(other)),
        }
    }

    /// Returns the `apiVersion` this scheme belongs to.
    #[must_use]
    pub const fn api_version(self) -> u32 {
        match self {
            Self::V2 => 2,
        }
    }

    /// Produces the exact bytes that get signed for a command.
    #[must_use]
    pub fn canonicalize(self, public_key: &str, nonce: u64, params: &CommandParams) -> Vec<u8> {
        match self {
            Self::V2 => canonicalize_v2(public_key, nonce, params).into_bytes(),
        }
    }
}

fn canonicalize_v2(public_key: &str, nonce: u64, params: &CommandParams) -> String {
    let mut out = String::with_capacity(160);
    out.push_str(params.kind().tag());
    out.push_str(public_key);
    out.push_str(&nonce.to_string());
    match params {
        CommandParams::Auth | CommandParams::Ping => {}
        CommandParams::Transfer(p) => {
            out.push_str(&p.account_number);
            out.push_str(&p.beneficiary);
            out.push_str(&p.currency);
            out.push_str(&format_amount(&p.amount));
            out.push_str(&p.narrative);
        }
        CommandParams::Statement(p) => out.push_str(&p.account_number),
    }
    out
}

/// Renders an amount the way it appears in the canonical string.
///
/// Trailing fractional zeros and a dangling decimal point are dropped, so
/// `1.00 → "1"`, `1.50 → "1.5"`, `100 → "100"`, `0.010 → "0.01"`. Negative
/// zero renders as `"0"`.
#[must_use]
pub fn format_amount(amount: &Decimal) -> String {
    let normalized = amount.normalize();
    if normalized.is_zero() {
        return "0".to_string();
    }
    normalized.to_string()
}
