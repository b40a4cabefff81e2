//! Record normalization.
//!
//! Callers canonicalize records before fingerprinting, and may exclude
//! record kinds (or locally-empty shapes) from verification entirely. The
//! same projection must be applied on both sides of a run: the local
//! producer normalizes before `add`, and the engine applies the transform
//! to every checkpoint record it pulls. A projection that differs between
//! the two sides makes every record spuriously mismatch.

/// Outcome of normalizing one record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Normalized<R> {
    /// Verify this canonical form.
    Keep(R),
    /// Exclude the record from verification entirely.
    Ignore,
}

impl<R> Normalized<R> {
    pub fn is_ignore(&self) -> bool {
        matches!(self, Normalized::Ignore)
    }
}

/// A caller-supplied normalization. Must be a pure, deterministic
/// projection: identical inputs always yield identical outcomes.
pub type Transform<R> = Box<dyn Fn(&R) -> Normalized<R> + Send>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_ignore() {
        assert!(Normalized::<u32>::Ignore.is_ignore());
        assert!(!Normalized::Keep(5u32).is_ignore());
    }
}
