// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Canonical state records.
//!
//! One `StateRecord` is one unit of application state as it appears in a
//! checkpoint. The local store only materializes account signing state, so
//! the production normalization projects checkpoint records down to that
//! shape before fingerprinting; everything else is excluded from
//! verification.
//!
//! The verification engine itself is generic over any serde-serializable
//! record type. This module is the concrete model the runner and the
//! verifier binary operate on.

use serde::{Deserialize, Serialize};

use crate::transform::Normalized;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateRecord {
    Account(AccountRecord),
    Offer(OfferRecord),
    Trustline(TrustlineRecord),
}

impl StateRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            StateRecord::Account(_) => "Account",
            StateRecord::Offer(_) => "Offer",
            StateRecord::Trustline(_) => "Trustline",
        }
    }
}

/// Account signing state: the master key weight plus additional signers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub account_id: String,
    pub master_weight: u32,
    pub signers: Vec<Signer>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signer {
    pub key: String,
    pub weight: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferRecord {
    pub offer_id: u64,
    pub seller_id: String,
    pub selling: String,
    pub buying: String,
    pub amount: i64,
    pub price_n: i32,
    pub price_d: i32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustlineRecord {
    pub account_id: String,
    pub asset: String,
    pub balance: i64,
    pub limit: i64,
}

/// Production normalization for [`StateRecord`] streams.
///
/// Accounts with zero master weight and no signers are never materialized
/// locally, so they are excluded rather than compared. Signers are sorted
/// by key; checkpoint order of signers inside an account is not canonical.
// TODO: fold offers into verification once the offers table is ingested.
pub fn normalize_record(record: &StateRecord) -> Normalized<StateRecord> {
    match record {
        StateRecord::Account(account) => {
            if account.master_weight == 0 && account.signers.is_empty() {
                return Normalized::Ignore;
            }

            let mut signers = account.signers.clone();
            signers.sort_by(|a, b| a.key.cmp(&b.key));

            Normalized::Keep(StateRecord::Account(AccountRecord {
                account_id: account.account_id.clone(),
                master_weight: account.master_weight,
                signers,
            }))
        }
        StateRecord::Offer(_) | StateRecord::Trustline(_) => Normalized::Ignore,
    }
}
