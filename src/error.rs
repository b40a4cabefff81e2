use thiserror::Error;
use std::io;

use crate::fingerprint::Fingerprint;

/// Failures raised by a [`TempSet`](crate::tempset::TempSet) backend.
///
/// `KeyAlreadyExists` and `KeyNotFound` are logical signals with a fixed
/// meaning in the reconciliation protocol; everything else is an
/// infrastructure failure of the backend itself.
#[derive(Error, Debug)]
pub enum SetError {
    #[error("key already exists: {0}")]
    KeyAlreadyExists(Fingerprint),
    #[error("key not found: {0}")]
    KeyNotFound(Fingerprint),
    #[error("set is not open")]
    NotOpen,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("backend error: {0}")]
    Backend(String),
}

/// Failures raised while pulling records from a checkpoint source.
///
/// End of stream is not an error; sources signal it with `Ok(None)`.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("invalid magic bytes in archive header")]
    InvalidMagic,
    #[error("unsupported archive version: {0}")]
    UnsupportedVersion(u32),
    #[error("checksum mismatch: expected {expected}, found {found}")]
    ChecksumMismatch { expected: u64, found: u64 },
    #[error("archive truncated inside an entry")]
    Truncated,
    #[error("decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("source failure: {0}")]
    Other(String),
}

/// Infrastructure failures of a verification run.
///
/// A provably inconsistent state is NOT represented here. The verifier
/// reports it as a [`Verdict`](crate::verifier::Verdict) so callers can
/// never confuse "the run could not finish" with "the data is wrong".
#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("failed to encode record: {0}")]
    Encoding(#[from] bincode::error::EncodeError),
    #[error("temp set failure: {0}")]
    Set(#[from] SetError),
    #[error("checkpoint source failure: {0}")]
    Source(#[from] SourceError),
}
