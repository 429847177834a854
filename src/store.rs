// 📦 Job Store - Cached job collection over a repository
//
// - The collection lives in an `Arc<Vec<Job>>` that is replaced on every
//   change, so pointer identity tracks content (portfolio memo relies on it).
// - Mutations mark a pending notification; subscribers fire once per debounce
//   window when the owner polls.
// - Scalar job edits are optimistic and rolled back if the repository fails.
// - Unknown jobs are rejected before the repository is called.

use crate::db::Repository;
use crate::entities::{
    BillItem, BillKind, Direction, Job, JobPatch, JobStatus, NewBillItem, NewJob,
    NewTransaction, TransactionPatch, TransactionRecord,
};
use crate::error::{StoreError, StoreResult};
use crate::lifecycle::status_change_patch;
use crate::metrics::{PortfolioMetrics, PortfolioTotals};
use crate::reconciliation::{BatchPreview, ReconciliationEngine};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub const DEFAULT_NOTIFY_DEBOUNCE: Duration = Duration::from_millis(10);

// ============================================================================
// OPTIMISTIC UPDATE
// ============================================================================

/// Apply a local change, run the remote call, restore the snapshot on failure.
pub fn optimistic<S, Snap, T>(
    state: &mut S,
    snapshot: impl FnOnce(&S) -> Snap,
    apply: impl FnOnce(&mut S),
    remote: impl FnOnce() -> anyhow::Result<T>,
    restore: impl FnOnce(&mut S, Snap),
) -> anyhow::Result<T> {
    let saved = snapshot(state);
    apply(state);
    match remote() {
        Ok(value) => Ok(value),
        Err(err) => {
            restore(state, saved);
            Err(err)
        }
    }
}

// ============================================================================
// DEBOUNCER
// ============================================================================

/// Pending-notification token. Each touch pushes the deadline out.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Debouncer {
            window,
            deadline: None,
        }
    }

    pub fn touch(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Clears the token and returns true once the window has passed
    pub fn take_if_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn take(&mut self) -> bool {
        self.deadline.take().is_some()
    }
}

// ============================================================================
// JOB STORE
// ============================================================================

pub type Subscriber = Box<dyn FnMut(&Arc<Vec<Job>>) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub struct JobStore<R: Repository> {
    repo: R,
    jobs: Arc<Vec<Job>>,
    loaded_statuses: BTreeSet<JobStatus>,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_subscription: u64,
    debouncer: Debouncer,
    portfolio: PortfolioMetrics,
}

impl<R: Repository> JobStore<R> {
    pub fn new(repo: R) -> Self {
        Self::with_debounce(repo, DEFAULT_NOTIFY_DEBOUNCE)
    }

    pub fn with_debounce(repo: R, window: Duration) -> Self {
        JobStore {
            repo,
            jobs: Arc::new(Vec::new()),
            loaded_statuses: BTreeSet::new(),
            subscribers: Vec::new(),
            next_subscription: 0,
            debouncer: Debouncer::new(window),
            portfolio: PortfolioMetrics::new(),
        }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn jobs(&self) -> &Arc<Vec<Job>> {
        &self.jobs
    }

    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|job| job.id == id)
    }

    fn require_job(&self, id: &str) -> StoreResult<&Job> {
        self.job(id)
            .ok_or_else(|| StoreError::JobNotFound(id.to_string()))
    }

    pub fn is_status_loaded(&self, status: JobStatus) -> bool {
        self.loaded_statuses.contains(&status)
    }

    // ------------------------------------------------------------------------
    // Subscribers
    // ------------------------------------------------------------------------

    pub fn subscribe<F>(&mut self, subscriber: F) -> SubscriptionId
    where
        F: FnMut(&Arc<Vec<Job>>) + Send + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push((id, Box::new(subscriber)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sub_id, _)| *sub_id != id);
        self.subscribers.len() != before
    }

    /// Mark the collection as changed; subscribers fire on a later poll
    pub fn notify(&mut self) {
        self.debouncer.touch(Instant::now());
    }

    pub fn has_pending_notification(&self) -> bool {
        self.debouncer.is_pending()
    }

    pub fn poll_notifications(&mut self) -> bool {
        self.poll_at(Instant::now())
    }

    /// Fire subscribers if the debounce window has elapsed at `now`
    pub fn poll_at(&mut self, now: Instant) -> bool {
        if self.debouncer.take_if_due(now) {
            self.fire();
            true
        } else {
            false
        }
    }

    /// Fire a pending notification immediately
    pub fn flush(&mut self) -> bool {
        if self.debouncer.take() {
            self.fire();
            true
        } else {
            false
        }
    }

    fn fire(&mut self) {
        let jobs = Arc::clone(&self.jobs);
        for (_, subscriber) in self.subscribers.iter_mut() {
            subscriber(&jobs);
        }
    }

    fn replace_jobs(&mut self, modify: impl FnOnce(&mut Vec<Job>)) {
        let mut next = (*self.jobs).clone();
        modify(&mut next);
        self.jobs = Arc::new(next);
        self.notify();
    }

    fn modify_job(&mut self, id: &str, modify: impl FnOnce(&mut Job)) {
        self.replace_jobs(|jobs| {
            if let Some(job) = jobs.iter_mut().find(|job| job.id == id) {
                modify(job);
            }
        });
    }

    // ------------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------------

    /// Load all jobs, or only the given statuses merged into the cache.
    /// Statuses already loaded are not fetched again.
    pub fn load_jobs(&mut self, statuses: Option<&[JobStatus]>) -> StoreResult<usize> {
        match statuses {
            None => {
                let jobs = self.repo.load_jobs(None)?;
                let count = jobs.len();
                self.jobs = Arc::new(jobs);
                self.loaded_statuses = JobStatus::ALL.iter().copied().collect();
                self.notify();
                info!(count, "Loaded all jobs");
                Ok(count)
            }
            Some(statuses) => {
                let missing: Vec<JobStatus> = statuses
                    .iter()
                    .copied()
                    .filter(|status| !self.loaded_statuses.contains(status))
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect();
                if missing.is_empty() {
                    return Ok(0);
                }

                let fetched = self.repo.load_jobs(Some(missing.as_slice()))?;
                let count = fetched.len();
                self.replace_jobs(|jobs| {
                    for job in fetched {
                        match jobs.iter_mut().find(|existing| existing.id == job.id) {
                            Some(existing) => *existing = job,
                            None => jobs.push(job),
                        }
                    }
                });
                self.loaded_statuses.extend(missing.iter().copied());
                info!(count, statuses = ?missing, "Loaded jobs by status");
                Ok(count)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------------

    pub fn create_job(&mut self, new_job: &NewJob) -> StoreResult<Job> {
        let job = self.repo.create_job(new_job)?;
        let created = job.clone();
        self.replace_jobs(|jobs| jobs.push(job));
        info!(job_id = %created.id, item = %created.output_item, "Created job");
        Ok(created)
    }

    /// Optimistic scalar update; the cache is restored if the repository fails
    pub fn update_job(&mut self, id: &str, patch: &JobPatch) -> StoreResult<Job> {
        self.require_job(id)?;

        let repo = &self.repo;
        let result = optimistic(
            &mut self.jobs,
            Arc::clone,
            |jobs| {
                let mut next = (**jobs).clone();
                if let Some(job) = next.iter_mut().find(|job| job.id == id) {
                    job.apply(patch);
                }
                *jobs = Arc::new(next);
            },
            || repo.update_job(id, patch),
            |jobs, saved| *jobs = saved,
        );

        match result {
            Ok(updated) => {
                let scalars = updated.clone();
                self.modify_job(id, |job| {
                    let collections = (
                        std::mem::take(&mut job.bill_of_materials),
                        std::mem::take(&mut job.consumed_materials),
                        std::mem::take(&mut job.expenditures),
                        std::mem::take(&mut job.income),
                    );
                    *job = scalars;
                    job.bill_of_materials = collections.0;
                    job.consumed_materials = collections.1;
                    job.expenditures = collections.2;
                    job.income = collections.3;
                });
                self.require_job(id).cloned()
            }
            Err(err) => {
                warn!(job_id = id, error = %err, "Job update failed, rolled back");
                Err(StoreError::Persistence(err))
            }
        }
    }

    /// Move a job to another status, stamping its lifecycle timestamp
    pub fn set_status(&mut self, id: &str, status: JobStatus, now: DateTime<Utc>) -> StoreResult<Job> {
        self.update_job(id, &status_change_patch(status, now))
    }

    pub fn delete_job(&mut self, id: &str) -> StoreResult<()> {
        self.require_job(id)?;
        self.repo.delete_job(id)?;
        self.replace_jobs(|jobs| jobs.retain(|job| job.id != id));
        info!(job_id = id, "Deleted job");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------------

    pub fn create_transaction(
        &mut self,
        job_id: &str,
        direction: Direction,
        transaction: &NewTransaction,
    ) -> StoreResult<TransactionRecord> {
        self.require_job(job_id)?;
        let record = self.repo.create_transaction(job_id, direction, transaction)?;
        let stored = record.clone();
        self.modify_job(job_id, |job| job.transactions_mut(direction).push(record));
        Ok(stored)
    }

    pub fn create_transactions(
        &mut self,
        job_id: &str,
        direction: Direction,
        transactions: &[NewTransaction],
    ) -> StoreResult<Vec<TransactionRecord>> {
        self.require_job(job_id)?;
        if transactions.is_empty() {
            return Ok(Vec::new());
        }
        let records = self.repo.create_transactions(job_id, direction, transactions)?;
        let stored = records.clone();
        self.modify_job(job_id, |job| job.transactions_mut(direction).extend(records));
        Ok(stored)
    }

    pub fn update_transaction(
        &mut self,
        job_id: &str,
        transaction_id: &str,
        patch: &TransactionPatch,
    ) -> StoreResult<TransactionRecord> {
        let direction = self
            .require_job(job_id)?
            .find_transaction(transaction_id)
            .ok_or_else(|| StoreError::TransactionNotFound(transaction_id.to_string()))?;

        let record = self.repo.update_transaction(transaction_id, patch)?;
        let stored = record.clone();
        self.modify_job(job_id, |job| {
            if let Some(tx) = job
                .transactions_mut(direction)
                .iter_mut()
                .find(|tx| tx.id == transaction_id)
            {
                *tx = record;
            }
        });
        Ok(stored)
    }

    pub fn delete_transaction(&mut self, job_id: &str, transaction_id: &str) -> StoreResult<()> {
        let direction = self
            .require_job(job_id)?
            .find_transaction(transaction_id)
            .ok_or_else(|| StoreError::TransactionNotFound(transaction_id.to_string()))?;

        self.repo.delete_transaction(transaction_id)?;
        self.modify_job(job_id, |job| {
            job.transactions_mut(direction)
                .retain(|tx| tx.id != transaction_id)
        });
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Bill items
    // ------------------------------------------------------------------------

    /// Replace every bill item of one kind on a job. On failure both the
    /// cache and the repository keep the old lines.
    pub fn replace_bill_items(
        &mut self,
        job_id: &str,
        kind: BillKind,
        items: &[NewBillItem],
    ) -> StoreResult<Vec<BillItem>> {
        self.require_job(job_id)?;
        let created = match self.repo.replace_bill_items(job_id, kind, items) {
            Ok(created) => created,
            Err(err) => {
                warn!(job_id, kind = kind.as_str(), error = %err, "Bill item replacement failed");
                return Err(StoreError::Persistence(err));
            }
        };
        let stored = created.clone();
        self.modify_job(job_id, |job| *job.bill_items_mut(kind) = created);
        info!(job_id, kind = kind.as_str(), count = stored.len(), "Replaced bill items");
        Ok(stored)
    }

    // ------------------------------------------------------------------------
    // Paste pipeline
    // ------------------------------------------------------------------------

    pub fn preview_paste(&self, text: &str, direction: Direction) -> BatchPreview {
        ReconciliationEngine::new().process_paste(text, direction, &self.jobs)
    }

    /// Store every assignment of a reviewed batch. Returns the number of
    /// transactions created.
    ///
    /// Each job's transactions are stored all or nothing. Jobs stored before
    /// a failing one stay stored; the error is then `PartialSubmit` carrying
    /// how many transactions made it.
    pub fn submit_batch(&mut self, preview: &BatchPreview) -> StoreResult<usize> {
        let assignments = preview.assignments();
        for assignment in &assignments {
            self.require_job(&assignment.job_id)?;
        }

        let mut created = 0;
        for assignment in &assignments {
            match self.create_transactions(&assignment.job_id, preview.direction, &assignment.transactions) {
                Ok(records) => created += records.len(),
                Err(err) if created == 0 => return Err(err),
                Err(err) => {
                    warn!(
                        job_id = %assignment.job_id,
                        created,
                        error = %err,
                        "Batch submission stopped part way"
                    );
                    return Err(StoreError::PartialSubmit {
                        created,
                        source: Box::new(err),
                    });
                }
            }
        }

        info!(
            direction = %preview.direction,
            jobs = assignments.len(),
            created,
            "Submitted batch"
        );
        Ok(created)
    }

    // ------------------------------------------------------------------------
    // Metrics
    // ------------------------------------------------------------------------

    pub fn portfolio_totals(&mut self) -> PortfolioTotals {
        self.portfolio.totals(&self.jobs)
    }

    pub fn portfolio_computations(&self) -> usize {
        self.portfolio.computations()
    }
}

// ============================================================================
// TESTS
// ============================================================================
