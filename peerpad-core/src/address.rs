//! Session PINs and transport addresses derived from them.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Prefix that namespaces session addresses away from arbitrary transport addresses.
pub const ADDRESS_PREFIX: &str = "peerpad-";

/// Number of digits in a session PIN.
pub const SESSION_CODE_LEN: usize = 6;

/// Transport-level address. Opaque to the core apart from host derivation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    pub fn new(value: impl Into<String>) -> Self {
        Address(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Six-digit session PIN. Generated by the host, typed in by the guest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionCode(String);

/// Input was not exactly six ASCII digits.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("session code must be exactly 6 digits")]
pub struct InvalidSessionCode;

impl SessionCode {
    /// Generate a fresh PIN in 100000..=999999 (no leading zero, so it reads as a number).
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let n: u32 = rng.gen_range(100_000..=999_999);
        SessionCode(n.to_string())
    }

    /// Accept exactly six ASCII digits; no trimming, no other characters.
    pub fn parse(s: &str) -> Result<Self, InvalidSessionCode> {
        if s.len() == SESSION_CODE_LEN && s.bytes().all(|b| b.is_ascii_digit()) {
            Ok(SessionCode(s.to_string()))
        } else {
            Err(InvalidSessionCode)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the host's transport address from its PIN. Pure and injective over valid PINs.
pub fn derive_host_address(code: &SessionCode) -> Address {
    Address(format!("{}{}", ADDRESS_PREFIX, code.as_str()))
}
