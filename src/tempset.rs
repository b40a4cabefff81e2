//! Temporary presence set for pending-to-match fingerprints.
//!
//! The reconciliation engine stores every locally accumulated fingerprint
//! in a [`TempSet`], then drains it while streaming the checkpoint. The
//! trait is the engine's only storage dependency, so a disk- or
//! remote-backed set can be substituted when the state outgrows memory.
//!
//! Methods are always called in this order:
//! - `open`
//! - multiple `add`
//! - multiple `remove`
//! - `len` / `is_empty` / `sample`
//! - `close`
//!
//! Add and remove calls are never interleaved, so backends may batch the
//! write phase separately from the delete phase. Implementations do not
//! need to be thread-safe; the calling protocol guarantees exclusive
//! sequential access for the duration of a run.

use rustc_hash::FxHashSet;

use crate::error::SetError;
use crate::fingerprint::Fingerprint;

pub trait TempSet {
    /// Allocates internal storage. Must not be called twice without an
    /// intervening `close`.
    fn open(&mut self) -> Result<(), SetError>;

    /// Inserts `key`. Fails with [`SetError::KeyAlreadyExists`] if the key
    /// is already present; two local records collapsing to one fingerprint
    /// is a data-model violation, fatal to the run.
    fn add(&mut self, key: Fingerprint) -> Result<(), SetError>;

    /// Deletes `key`. Fails with [`SetError::KeyNotFound`] if absent; that
    /// is the expected signal for a checkpoint record with no local
    /// counterpart.
    fn remove(&mut self, key: &Fingerprint) -> Result<(), SetError>;

    /// Number of keys still held.
    fn len(&mut self) -> Result<u64, SetError>;

    fn is_empty(&mut self) -> Result<bool, SetError> {
        Ok(self.len()? == 0)
    }

    /// Returns up to `limit` of the remaining keys, in no particular
    /// order. Used only for diagnostics after the remove phase.
    fn sample(&mut self, limit: usize) -> Result<Vec<Fingerprint>, SetError>;

    /// Releases all storage. Closing a set that was never opened (or is
    /// already closed) succeeds; any other operation afterwards fails with
    /// [`SetError::NotOpen`].
    fn close(&mut self) -> Result<(), SetError>;
}

/// In-memory reference implementation.
///
/// All operations are O(1) expected time. The whole key set lives in one
/// hash set, so this is a correctness baseline only; it is unsuitable for
/// state larger than available memory.
#[derive(Debug, Default)]
pub struct MemoryTempSet {
    keys: Option<FxHashSet<Fingerprint>>,
}

impl MemoryTempSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn keys_mut(&mut self) -> Result<&mut FxHashSet<Fingerprint>, SetError> {
        self.keys.as_mut().ok_or(SetError::NotOpen)
    }
}

impl TempSet for MemoryTempSet {
    fn open(&mut self) -> Result<(), SetError> {
        self.keys = Some(FxHashSet::default());
        Ok(())
    }

    fn add(&mut self, key: Fingerprint) -> Result<(), SetError> {
        let keys = self.keys_mut()?;
        if !keys.insert(key) {
            return Err(SetError::KeyAlreadyExists(key));
        }
        Ok(())
    }

    fn remove(&mut self, key: &Fingerprint) -> Result<(), SetError> {
        let keys = self.keys_mut()?;
        if !keys.remove(key) {
            return Err(SetError::KeyNotFound(*key));
        }
        Ok(())
    }

    fn len(&mut self) -> Result<u64, SetError> {
        let keys = self.keys.as_ref().ok_or(SetError::NotOpen)?;
        Ok(keys.len() as u64)
    }

    fn sample(&mut self, limit: usize) -> Result<Vec<Fingerprint>, SetError> {
        let keys = self.keys.as_ref().ok_or(SetError::NotOpen)?;
        Ok(keys.iter().take(limit).copied().collect())
    }

    fn close(&mut self) -> Result<(), SetError> {
        self.keys = None;
        Ok(())
    }
}
