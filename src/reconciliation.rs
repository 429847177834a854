// ⚖️ Reconciliation Engine - Pasted ledger → reviewed batch
//
// Pipeline:
//   raw text → parse → key → consolidate → match → duplicate check → BatchPreview
//
// The preview is what a user confirms. Only non-duplicate, assigned rows ever
// reach the submission payload.

use crate::deduplication::{consolidate, DuplicateDetector};
use crate::entities::{Direction, Job, NewTransaction};
use crate::error::PreviewError;
use crate::matching::JobMatcher;
use crate::parser::{parse_paste_with_report, TransactionCandidate};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

// ============================================================================
// PREVIEW TYPES
// ============================================================================

/// One reviewable row of a batch. After consolidation every group holds a
/// single candidate, so the totals mirror it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionGroup {
    pub item_name: String,
    pub transactions: Vec<TransactionCandidate>,
    pub total_quantity: u64,
    pub total_value: f64,
}

impl TransactionGroup {
    pub fn from_candidate(candidate: TransactionCandidate) -> Self {
        TransactionGroup {
            item_name: candidate.item_name.clone(),
            total_quantity: candidate.quantity,
            total_value: candidate.total_price,
            transactions: vec![candidate],
        }
    }

    pub fn is_duplicate(&self) -> bool {
        !self.transactions.is_empty() && self.transactions.iter().all(|tx| tx.is_duplicate)
    }

    pub fn assigned_job_id(&self) -> Option<&str> {
        self.transactions
            .iter()
            .find_map(|tx| tx.assigned_job_id.as_deref())
    }
}

/// Transactions to create on one job
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAssignment {
    pub job_id: String,
    pub transactions: Vec<NewTransaction>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPreview {
    pub direction: Direction,
    pub groups: Vec<TransactionGroup>,
    pub duplicates_found: usize,
    /// 1-based line numbers the parser could not read
    pub skipped_lines: Vec<usize>,
    /// Jobs a group may be manually assigned to
    pub eligible_job_ids: Vec<String>,
    pub prepared_at: DateTime<Utc>,
}

impl BatchPreview {
    /// True iff at least one non-duplicate candidate has a job
    pub fn can_submit(&self) -> bool {
        self.groups
            .iter()
            .flat_map(|group| &group.transactions)
            .any(TransactionCandidate::is_submittable)
    }

    pub fn unassigned_count(&self) -> usize {
        self.groups
            .iter()
            .flat_map(|group| &group.transactions)
            .filter(|tx| !tx.is_duplicate && tx.assigned_job_id.is_none())
            .count()
    }

    pub fn candidate_count(&self) -> usize {
        self.groups.iter().map(|group| group.transactions.len()).sum()
    }

    /// Manually assign a group to a job.
    ///
    /// Groups flagged as already stored stay unassigned.
    pub fn assign_job(&mut self, group_index: usize, job_id: &str) -> Result<(), PreviewError> {
        if !self.eligible_job_ids.iter().any(|id| id == job_id) {
            return Err(PreviewError::IneligibleJob(job_id.to_string()));
        }

        let group = self
            .groups
            .get_mut(group_index)
            .ok_or(PreviewError::GroupOutOfRange(group_index))?;

        if group.is_duplicate() {
            return Err(PreviewError::DuplicateGroup(group_index));
        }

        for tx in group.transactions.iter_mut().filter(|tx| !tx.is_duplicate) {
            tx.assigned_job_id = Some(job_id.to_string());
        }
        Ok(())
    }

    /// Submission payload grouped by job, in first-appearance order
    pub fn assignments(&self) -> Vec<JobAssignment> {
        let mut assignments: Vec<JobAssignment> = Vec::new();

        for tx in self.groups.iter().flat_map(|group| &group.transactions) {
            if !tx.is_submittable() {
                continue;
            }
            let Some(job_id) = tx.assigned_job_id.as_deref() else {
                continue;
            };

            match assignments.iter_mut().find(|a| a.job_id == job_id) {
                Some(existing) => existing.transactions.push(tx.to_new_transaction()),
                None => assignments.push(JobAssignment {
                    job_id: job_id.to_string(),
                    transactions: vec![tx.to_new_transaction()],
                }),
            }
        }

        assignments
    }

    pub fn summary(&self) -> String {
        format!(
            "{} {} rows: {} duplicates, {} unassigned, {} skipped lines",
            self.candidate_count(),
            self.direction,
            self.duplicates_found,
            self.unassigned_count(),
            self.skipped_lines.len()
        )
    }
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine;

impl ReconciliationEngine {
    pub fn new() -> Self {
        ReconciliationEngine
    }

    /// Run the whole paste pipeline against the current job collection
    pub fn process_paste(&self, text: &str, direction: Direction, jobs: &[Job]) -> BatchPreview {
        let parsed = parse_paste_with_report(text);
        let mut candidates = consolidate(parsed.candidates);

        let matcher = JobMatcher::new(jobs, direction);
        for candidate in candidates.iter_mut() {
            candidate.assigned_job_id = matcher.find_match_id(&candidate.item_name);
        }

        let report = DuplicateDetector::new(jobs, direction).detect(&mut candidates, &matcher);

        let preview = BatchPreview {
            direction,
            groups: candidates
                .into_iter()
                .map(TransactionGroup::from_candidate)
                .collect(),
            duplicates_found: report.duplicates_found,
            skipped_lines: parsed.skipped_lines,
            eligible_job_ids: matcher
                .eligible_jobs()
                .iter()
                .map(|job| job.id.clone())
                .collect(),
            prepared_at: Utc::now(),
        };

        info!("Prepared paste batch: {}", preview.summary());
        preview
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
