// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! State verification engine.
//!
//! Reconciles locally accumulated records against the authoritative
//! checkpoint stream in two phases: every local record's fingerprint is
//! added to a [`TempSet`], then each checkpoint record is normalized,
//! fingerprinted, and removed. A remove that misses proves the local store
//! has a record the checkpoint does not know (or vice versa a divergent
//! encoding); keys left over after the stream ends prove local records the
//! checkpoint never produced. Either way the run concludes with a
//! [`Verdict::Corrupted`] and a stored [`StateCorruption`] diagnosis.
//!
//! Infrastructure failures (encoding, backend, source I/O) abort the run
//! with an error and leave no diagnosis. The two outcomes are distinct
//! types; a caller cannot mistake one for the other.
//!
//! One engine instance serves exactly one run. Use a fresh instance per
//! run.

use serde::Serialize;
use thiserror::Error;

use crate::error::{SetError, VerifyError};
use crate::fingerprint::{canonical_bytes, fingerprint_of, hex_string, Fingerprint};
use crate::source::CheckpointSource;
use crate::tempset::TempSet;
use crate::transform::{Normalized, Transform};

/// Default cap on leftover keys included in a diagnosis.
pub const LEFTOVER_SAMPLE_LIMIT: usize = 8;

/// Outcome of a completed verification run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Consistent,
    Corrupted,
}

impl Verdict {
    pub fn is_consistent(&self) -> bool {
        matches!(self, Verdict::Consistent)
    }
}

/// Evidence explaining a corrupted verdict.
///
/// Produced at most once per engine instance and retained until the engine
/// is dropped, including across `close`. Encodings are hex of the
/// canonical record bytes.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum StateCorruption {
    /// A checkpoint record had no matching local record.
    #[error(
        "checkpoint record {fingerprint} not found in locally added records \
         (record = {original}, normalized = {normalized})"
    )]
    MissingLocal {
        original: String,
        normalized: String,
        fingerprint: Fingerprint,
    },

    /// Local records were never matched by any checkpoint record.
    #[error(
        "{remaining} locally added records never appeared in the checkpoint \
         stream (sample: {sample:?})"
    )]
    UnmatchedLocal {
        remaining: u64,
        sample: Vec<Fingerprint>,
    },
}

/// Verifies that records provided via [`add`](StateVerifier::add) are
/// exactly the records of the checkpoint stream, under the configured
/// normalization.
///
/// Callers must always `open` before adding and `close` when done; a drop
/// guard closes the set best-effort if they do not.
pub struct StateVerifier<R, S: TempSet> {
    set: S,
    transform: Option<Transform<R>>,
    leftover_sample: usize,
    corruption: Option<StateCorruption>,
    closed: bool,
}

impl<R: Serialize, S: TempSet> StateVerifier<R, S> {
    pub fn new(set: S) -> Self {
        Self {
            set,
            transform: None,
            leftover_sample: LEFTOVER_SAMPLE_LIMIT,
            corruption: None,
            closed: false,
        }
    }

    /// Sets the normalization applied to every checkpoint record before
    /// fingerprinting. The local producer must apply the same projection
    /// before `add`, or every record will spuriously mismatch.
    pub fn with_transform(mut self, transform: impl Fn(&R) -> Normalized<R> + Send + 'static) -> Self {
        self.transform = Some(Box::new(transform));
        self
    }

    pub fn with_leftover_sample(mut self, limit: usize) -> Self {
        self.leftover_sample = limit;
        self
    }

    pub fn open(&mut self) -> Result<(), VerifyError> {
        self.set.open().map_err(VerifyError::Set)
    }

    /// Registers one locally accumulated record (already normalized by the
    /// producer).
    ///
    /// Propagates encoding failures and `KeyAlreadyExists`; the latter
    /// means two distinct local records normalized to one fingerprint and
    /// the run cannot produce a meaningful verdict.
    pub fn add(&mut self, record: &R) -> Result<(), VerifyError> {
        let key = fingerprint_of(record)?;
        self.set.add(key).map_err(VerifyError::Set)
    }

    /// Streams the checkpoint and reconciles it against the added records.
    ///
    /// Returns `Ok(Verdict::Corrupted)` as soon as the first checkpoint
    /// record misses, without draining the rest of the stream; the
    /// diagnosis is then available from [`state_error`](Self::state_error).
    /// Infrastructure failures return `Err` and store no diagnosis.
    pub fn verify<C>(&mut self, source: &mut C) -> Result<Verdict, VerifyError>
    where
        C: CheckpointSource<Record = R>,
    {
        while let Some(record) = source.next_record().map_err(VerifyError::Source)? {
            let normalized_owned;
            let normalized: &R = match &self.transform {
                Some(transform) => match transform(&record) {
                    Normalized::Ignore => continue,
                    Normalized::Keep(normalized) => {
                        normalized_owned = normalized;
                        &normalized_owned
                    }
                },
                None => &record,
            };

            let key = fingerprint_of(normalized)?;
            match self.set.remove(&key) {
                Ok(()) => {}
                Err(SetError::KeyNotFound(_)) => {
                    // Encoding errors are dropped here; the corruption
                    // evidence has priority over a pretty diagnosis.
                    let original = canonical_bytes(&record)
                        .map(|bytes| hex_string(&bytes))
                        .unwrap_or_default();
                    let normalized = canonical_bytes(normalized)
                        .map(|bytes| hex_string(&bytes))
                        .unwrap_or_default();

                    self.corruption = Some(StateCorruption::MissingLocal {
                        original,
                        normalized,
                        fingerprint: key,
                    });
                    return Ok(Verdict::Corrupted);
                }
                Err(err) => return Err(VerifyError::Set(err)),
            }
        }

        let remaining = self.set.len().map_err(VerifyError::Set)?;
        if remaining > 0 {
            let sample = self
                .set
                .sample(self.leftover_sample)
                .map_err(VerifyError::Set)?;
            self.corruption = Some(StateCorruption::UnmatchedLocal { remaining, sample });
            return Ok(Verdict::Corrupted);
        }

        Ok(Verdict::Consistent)
    }

    /// The stored diagnosis, if the run concluded `Corrupted`. Remains
    /// available after `close`.
    pub fn state_error(&self) -> Option<&StateCorruption> {
        self.corruption.as_ref()
    }

    /// Releases the temp set's storage. Safe to call after a failed open
    /// or verify; calling twice is a no-op.
    pub fn close(&mut self) -> Result<(), VerifyError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.set.close().map_err(VerifyError::Set)
    }
}

impl<R, S: TempSet> Drop for StateVerifier<R, S> {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.set.close();
        }
    }
}
