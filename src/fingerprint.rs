// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Content fingerprinting.
//!
//! A record's identity for reconciliation purposes is the blake3 digest of
//! its canonical binary encoding. Two records are the same record iff their
//! encodings are byte-identical, so the digest can stand in for full
//! content comparison on both sides of a run.

use core::fmt;

use serde::Serialize;

/// A 32-byte content digest used as a temp-set key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub const LEN: usize = 32;

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex form, used for display and diagnostics.
    pub fn to_hex(&self) -> String {
        hex_string(&self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..16])
    }
}

/// Serializes a record to its canonical binary encoding.
///
/// Equality of these bytes defines record equality everywhere in the crate.
pub fn canonical_bytes<R: Serialize>(record: &R) -> Result<Vec<u8>, bincode::error::EncodeError> {
    bincode::serde::encode_to_vec(record, bincode::config::standard())
}

/// Computes the fingerprint of a record's canonical encoding.
///
/// Pure and deterministic: structurally identical records fingerprint
/// identically regardless of call order.
pub fn fingerprint_of<R: Serialize>(record: &R) -> Result<Fingerprint, bincode::error::EncodeError> {
    let encoded = canonical_bytes(record)?;
    Ok(Fingerprint(*blake3::hash(&encoded).as_bytes()))
}

pub(crate) fn hex_string(bytes: &[u8]) -> String {
    use core::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}
