// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Verification run orchestration.
//!
//! The engine itself is a pure library; this module supplies the policy
//! around it: runs happen only at checkpoint-aligned sequences, at most
//! one run is active against a backing store at a time, the checkpoint
//! publisher gets a settle delay before the stream is opened, and a
//! corrupted verdict comes back as a typed outcome for the caller's own
//! alerting and shutdown policy. Nothing here ever terminates the
//! process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::VerifyError;
use crate::record::{normalize_record, AccountRecord, Signer, StateRecord};
use crate::source::CheckpointSource;
use crate::tempset::TempSet;
use crate::transform::Normalized;
use crate::verifier::{StateCorruption, StateVerifier, Verdict, LEFTOVER_SAMPLE_LIMIT};

/// Checkpoints are published every 64 sequences; sequence n is
/// checkpoint-aligned when n + 1 is a multiple of the interval.
pub const CHECKPOINT_INTERVAL: u64 = 64;

pub fn is_checkpoint(sequence: u64) -> bool {
    (sequence + 1) % CHECKPOINT_INTERVAL == 0
}

/// Guards a backing store against concurrent verification runs.
///
/// Acquire returns an RAII token; the slot frees when the token drops,
/// including on a panicking unwind. There is no waiting: a busy guard
/// means this run is skipped, not queued.
#[derive(Debug, Default)]
pub struct RunGuard {
    running: AtomicBool,
}

impl RunGuard {
    pub const fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
        }
    }

    pub fn try_acquire(&self) -> Option<RunToken<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunToken { guard: self })
    }
}

pub struct RunToken<'a> {
    guard: &'a RunGuard,
}

impl Drop for RunToken<'_> {
    fn drop(&mut self) {
        self.guard.running.store(false, Ordering::Release);
    }
}

#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// Grace period before opening the checkpoint stream, so the archive
    /// writer can finish publishing.
    pub settle_delay: Duration,
    /// Cap on leftover keys included in an `UnmatchedLocal` diagnosis.
    pub leftover_sample: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(20),
            leftover_sample: LEFTOVER_SAMPLE_LIMIT,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyRunning,
    NotCheckpoint,
}

/// What a verification attempt amounted to.
///
/// `Corrupted` is a verdict, not an error: the caller decides whether to
/// halt ingestion, alert, or persist the diagnosis.
#[derive(Debug)]
pub enum RunOutcome {
    Skipped(SkipReason),
    Consistent,
    Corrupted(StateCorruption),
}

/// One row of the locally materialized signer table, ordered by account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignerRow {
    pub account: String,
    pub signer: String,
    pub weight: u32,
}

fn apply_row(account: &mut AccountRecord, row: SignerRow) {
    if row.signer == row.account {
        // The master key is stored as a row signing for its own account.
        account.master_weight = row.weight;
    } else {
        account.signers.push(Signer {
            key: row.signer,
            weight: row.weight,
        });
    }
}

/// Folds signer rows into one [`AccountRecord`] per account.
///
/// Rows must arrive grouped by account (the row reader orders by account
/// ascending); each group's master-key row sets the master weight and the
/// remaining rows become signers.
pub fn fold_signer_rows<I>(rows: I) -> Vec<AccountRecord>
where
    I: IntoIterator<Item = SignerRow>,
{
    let mut accounts = Vec::new();
    let mut current: Option<AccountRecord> = None;

    for row in rows {
        match current.as_mut() {
            Some(account) if account.account_id == row.account => apply_row(account, row),
            _ => {
                if let Some(done) = current.take() {
                    accounts.push(done);
                }
                let mut account = AccountRecord {
                    account_id: row.account.clone(),
                    master_weight: 0,
                    signers: Vec::new(),
                };
                apply_row(&mut account, row);
                current = Some(account);
            }
        }
    }

    if let Some(done) = current {
        accounts.push(done);
    }
    accounts
}

/// Runs one full verification pass at `checkpoint` against `source`.
///
/// Local records are normalized with [`normalize_record`] before being
/// added, the same projection the engine applies to the stream. The temp
/// set is always closed before this returns, even when the run aborts.
// TODO: swap the caller-supplied set for a disk-backed implementation
// once account state outgrows memory.
pub fn run_verification<S, C, I>(
    config: &RunnerConfig,
    guard: &RunGuard,
    set: S,
    local_records: I,
    source: &mut C,
    checkpoint: u64,
) -> Result<RunOutcome, VerifyError>
where
    S: TempSet,
    C: CheckpointSource<Record = StateRecord>,
    I: IntoIterator<Item = StateRecord>,
{
    let Some(_token) = guard.try_acquire() else {
        tracing::warn!("state verification already running, skipping");
        return Ok(RunOutcome::Skipped(SkipReason::AlreadyRunning));
    };

    if !is_checkpoint(checkpoint) {
        tracing::info!(
            "sequence {} is not checkpoint-aligned, skipping verification",
            checkpoint
        );
        return Ok(RunOutcome::Skipped(SkipReason::NotCheckpoint));
    }

    tracing::info!("starting state verification at checkpoint {}", checkpoint);
    if !config.settle_delay.is_zero() {
        std::thread::sleep(config.settle_delay);
    }
    let started = Instant::now();

    let mut verifier = StateVerifier::new(set)
        .with_transform(normalize_record)
        .with_leftover_sample(config.leftover_sample);
    verifier.open()?;

    let result = add_local_records(&mut verifier, local_records)
        .and_then(|added| {
            tracing::debug!("added {} local records", added);
            verifier.verify(source)
        });

    // Release backend storage before surfacing whatever happened.
    let close_result = verifier.close();
    let verdict = result?;
    close_result?;

    match verdict {
        Verdict::Consistent => {
            tracing::info!(
                "state verification finished in {:.2}s: consistent",
                started.elapsed().as_secs_f64()
            );
            Ok(RunOutcome::Consistent)
        }
        Verdict::Corrupted => {
            let corruption = verifier
                .state_error()
                .cloned()
                .expect("corrupted verdict always stores a diagnosis");
            tracing::error!(
                "state verification failed at checkpoint {}: {}",
                checkpoint,
                corruption
            );
            Ok(RunOutcome::Corrupted(corruption))
        }
    }
}

fn add_local_records<S, I>(
    verifier: &mut StateVerifier<StateRecord, S>,
    local_records: I,
) -> Result<u64, VerifyError>
where
    S: TempSet,
    I: IntoIterator<Item = StateRecord>,
{
    let mut added = 0u64;
    for record in local_records {
        match normalize_record(&record) {
            Normalized::Keep(normalized) => {
                verifier.add(&normalized)?;
                added += 1;
            }
            Normalized::Ignore => continue,
        }
    }
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::OfferRecord;
    use crate::source::VecSource;
    use crate::tempset::MemoryTempSet;

    fn account(id: &str, master: u32, signers: &[(&str, u32)]) -> StateRecord {
        StateRecord::Account(AccountRecord {
            account_id: id.to_string(),
            master_weight: master,
            signers: signers
                .iter()
                .map(|(key, weight)| Signer {
                    key: key.to_string(),
                    weight: *weight,
                })
                .collect(),
        })
    }

    fn test_config() -> RunnerConfig {
        RunnerConfig {
            settle_delay: Duration::ZERO,
            ..RunnerConfig::default()
        }
    }

    #[test]
    fn test_is_checkpoint() {
        assert!(is_checkpoint(63));
        assert!(is_checkpoint(127));
        assert!(!is_checkpoint(0));
        assert!(!is_checkpoint(64));
        assert!(!is_checkpoint(100));
    }

    #[test]
    fn test_run_guard_exclusive() {
        let guard = RunGuard::new();
        let token = guard.try_acquire().unwrap();
        assert!(guard.try_acquire().is_none());
        drop(token);
        assert!(guard.try_acquire().is_some());
    }

    #[test]
    fn test_fold_signer_rows() {
        let rows = vec![
            SignerRow {
                account: "acct-1".into(),
                signer: "acct-1".into(),
                weight: 1,
            },
            SignerRow {
                account: "acct-1".into(),
                signer: "key-x".into(),
                weight: 2,
            },
            SignerRow {
                account: "acct-2".into(),
                signer: "key-y".into(),
                weight: 3,
            },
        ];

        let accounts = fold_signer_rows(rows);
        assert_eq!(accounts.len(), 2);

        assert_eq!(accounts[0].account_id, "acct-1");
        assert_eq!(accounts[0].master_weight, 1);
        assert_eq!(
            accounts[0].signers,
            vec![Signer {
                key: "key-x".into(),
                weight: 2
            }]
        );

        // No master-key row for acct-2.
        assert_eq!(accounts[1].account_id, "acct-2");
        assert_eq!(accounts[1].master_weight, 0);
        assert_eq!(accounts[1].signers.len(), 1);
    }

    #[test]
    fn test_fold_empty_rows() {
        assert!(fold_signer_rows(Vec::new()).is_empty());
    }

    #[test]
    fn test_run_consistent() {
        let guard = RunGuard::new();
        let local = vec![
            account("acct-1", 1, &[("key-b", 2), ("key-a", 1)]),
            account("acct-2", 1, &[]),
        ];
        // Stream carries scrambled signer order plus an ignored offer.
        let mut source = VecSource::new(vec![
            account("acct-2", 1, &[]),
            StateRecord::Offer(OfferRecord {
                offer_id: 1,
                seller_id: "acct-1".into(),
                selling: "native".into(),
                buying: "USD:issuer-1".into(),
                amount: 10,
                price_n: 1,
                price_d: 1,
            }),
            account("acct-1", 1, &[("key-a", 1), ("key-b", 2)]),
        ]);

        let outcome = run_verification(
            &test_config(),
            &guard,
            MemoryTempSet::new(),
            local,
            &mut source,
            63,
        )
        .unwrap();
        assert!(matches!(outcome, RunOutcome::Consistent));
    }

    #[test]
    fn test_run_detects_corruption() {
        let guard = RunGuard::new();
        let local = vec![account("acct-1", 1, &[])];
        let mut source = VecSource::new(vec![account("acct-2", 1, &[])]);

        let outcome = run_verification(
            &test_config(),
            &guard,
            MemoryTempSet::new(),
            local,
            &mut source,
            63,
        )
        .unwrap();
        assert!(matches!(
            outcome,
            RunOutcome::Corrupted(StateCorruption::MissingLocal { .. })
        ));
    }

    #[test]
    fn test_run_skips_when_busy() {
        let guard = RunGuard::new();
        let _token = guard.try_acquire().unwrap();

        let mut source = VecSource::new(Vec::new());
        let outcome = run_verification(
            &test_config(),
            &guard,
            MemoryTempSet::new(),
            Vec::new(),
            &mut source,
            63,
        )
        .unwrap();
        assert!(matches!(
            outcome,
            RunOutcome::Skipped(SkipReason::AlreadyRunning)
        ));
    }

    #[test]
    fn test_run_skips_unaligned_sequence() {
        let guard = RunGuard::new();
        let mut source = VecSource::new(Vec::new());
        let outcome = run_verification(
            &test_config(),
            &guard,
            MemoryTempSet::new(),
            Vec::new(),
            &mut source,
            64,
        )
        .unwrap();
        assert!(matches!(
            outcome,
            RunOutcome::Skipped(SkipReason::NotCheckpoint)
        ));
    }

    #[test]
    fn test_guard_frees_after_run() {
        let guard = RunGuard::new();
        let mut source = VecSource::new(Vec::new());
        let _ = run_verification(
            &test_config(),
            &guard,
            MemoryTempSet::new(),
            Vec::new(),
            &mut source,
            63,
        )
        .unwrap();
        assert!(guard.try_acquire().is_some());
    }
}
