// 🔍 Deduplication Engine - Identity keys, paste consolidation, duplicate detection
//
// Three pieces share one identity key:
// 1. Key Normalizer: date (space separated) | item | quantity | |total| | buyer | location
// 2. Batch Consolidator: merges identical lines of one paste (partial fills)
// 3. Duplicate Detector: flags consolidated rows that are already stored on a job

use crate::entities::{Direction, Job, TransactionRecord};
use crate::matching::JobMatcher;
use crate::parser::{TransactionCandidate, MAX_QUANTITY};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

// ============================================================================
// KEY NORMALIZER
// ============================================================================

/// Storage backends disagree on `T` vs space between date and time
pub fn normalize_date(date: &str) -> String {
    date.replacen('T', " ", 1)
}

/// Canonical identity key of a transaction.
///
/// The absolute total makes a cost recorded as `-300` and as `300` collide.
pub fn transaction_key(
    date: &str,
    item_name: &str,
    quantity: u64,
    total_price: f64,
    buyer: &str,
    location: &str,
) -> String {
    [
        normalize_date(date),
        item_name.to_string(),
        quantity.to_string(),
        total_price.abs().to_string(),
        buyer.to_string(),
        location.to_string(),
    ]
    .join("|")
}

/// SHA-256 of a key, stored next to persisted records as a lookup column
pub fn key_hash(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Anything that can be compared by ledger identity
pub trait LedgerKey {
    fn ledger_key(&self) -> String;
}

impl LedgerKey for TransactionCandidate {
    fn ledger_key(&self) -> String {
        transaction_key(
            &self.date,
            &self.item_name,
            self.quantity,
            self.total_price,
            &self.buyer,
            &self.location,
        )
    }
}

impl LedgerKey for TransactionRecord {
    fn ledger_key(&self) -> String {
        transaction_key(
            &self.date,
            &self.item_name,
            self.quantity,
            self.total_price,
            &self.buyer,
            &self.location,
        )
    }
}

// ============================================================================
// BATCH CONSOLIDATOR
// ============================================================================

/// Merges identical candidates of one paste into a single row.
///
/// Prices are taken as magnitudes on intake: the batch direction, not the
/// amount sign, says whether a row is a cost or a sale.
#[derive(Debug, Default)]
pub struct BatchConsolidator {
    /// Keyed by identity; keys start with the date so iteration is chronological
    entries: BTreeMap<String, TransactionCandidate>,
}

impl BatchConsolidator {
    pub fn new() -> Self {
        BatchConsolidator {
            entries: BTreeMap::new(),
        }
    }

    /// Add one candidate, merging it into an identical entry if there is one
    pub fn add(&mut self, mut candidate: TransactionCandidate) {
        candidate.unit_price = candidate.unit_price.abs();
        candidate.total_price = candidate.total_price.abs();

        let mut key = candidate.ledger_key();

        // Merging changes quantity and total, hence the key. Keep merging while
        // the new key collides so keys stay unique.
        while let Some(mut existing) = self.entries.remove(&key) {
            let merged = existing
                .quantity
                .checked_add(candidate.quantity)
                .filter(|quantity| *quantity <= MAX_QUANTITY);
            let Some(quantity) = merged else {
                debug!(
                    item = %candidate.item_name,
                    quantity = candidate.quantity,
                    "Dropping line, merged quantity does not fit"
                );
                self.entries.insert(key, existing);
                return;
            };
            existing.quantity = quantity;
            existing.total_price += candidate.total_price;
            candidate = existing;
            key = candidate.ledger_key();
        }

        self.entries.insert(key, candidate);
    }

    pub fn extend<I>(&mut self, candidates: I)
    where
        I: IntoIterator<Item = TransactionCandidate>,
    {
        for candidate in candidates {
            self.add(candidate);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_candidates(self) -> Vec<TransactionCandidate> {
        self.entries.into_values().collect()
    }
}

/// Consolidate a parsed paste in one call
pub fn consolidate<I>(candidates: I) -> Vec<TransactionCandidate>
where
    I: IntoIterator<Item = TransactionCandidate>,
{
    let mut consolidator = BatchConsolidator::new();
    consolidator.extend(candidates);
    consolidator.into_candidates()
}

// ============================================================================
// DUPLICATE DETECTOR
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DuplicateReport {
    pub duplicates_found: usize,
    /// Jobs whose stored transactions were compared against
    pub relevant_jobs: BTreeSet<String>,
}

/// Cross-references candidates against stored transactions of the jobs they
/// were tentatively assigned to.
pub struct DuplicateDetector<'a> {
    jobs: &'a [Job],
    direction: Direction,
}

impl<'a> DuplicateDetector<'a> {
    pub fn new(jobs: &'a [Job], direction: Direction) -> Self {
        DuplicateDetector { jobs, direction }
    }

    /// Keys of stored transactions, restricted to the given jobs
    pub fn existing_keys(&self, relevant_jobs: &BTreeSet<String>) -> HashSet<String> {
        self.jobs
            .iter()
            .filter(|job| relevant_jobs.contains(&job.id))
            .flat_map(|job| job.transactions(self.direction))
            .map(|tx| tx.ledger_key())
            .collect()
    }

    /// Mark duplicates in place and clear their assignment.
    ///
    /// Non-duplicates without an assignment get one from `matcher`. A cleared
    /// duplicate is never handed back to the matcher.
    pub fn detect(
        &self,
        candidates: &mut [TransactionCandidate],
        matcher: &JobMatcher<'_>,
    ) -> DuplicateReport {
        let relevant_jobs: BTreeSet<String> = candidates
            .iter()
            .filter_map(|candidate| candidate.assigned_job_id.clone())
            .collect();

        let existing = self.existing_keys(&relevant_jobs);
        let mut duplicates_found = 0;

        for candidate in candidates.iter_mut() {
            candidate.is_duplicate = existing.contains(&candidate.ledger_key());

            if candidate.is_duplicate {
                debug!(
                    item = %candidate.item_name,
                    date = %candidate.date,
                    "Candidate already stored, excluding from submission"
                );
                duplicates_found += 1;
                candidate.assigned_job_id = None;
            } else if candidate.assigned_job_id.is_none() {
                candidate.assigned_job_id = matcher.find_match_id(&candidate.item_name);
            }
        }

        DuplicateReport {
            duplicates_found,
            relevant_jobs,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
