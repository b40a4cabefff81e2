// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! attesta: reconciles locally accumulated state against trusted
//! checkpoint archives to detect silent corruption of the local copy.

pub mod archive;
pub mod error;
pub mod fingerprint;
pub mod record;
pub mod runner;
pub mod source;
pub mod tempset;
pub mod transform;
pub mod verifier;

pub use error::{SetError, SourceError, VerifyError};
pub use fingerprint::{fingerprint_of, Fingerprint};
pub use tempset::{MemoryTempSet, TempSet};
pub use transform::Normalized;
pub use verifier::{StateCorruption, StateVerifier, Verdict};
