// 🔐 Authentication guard for repositories
//
// `Authenticated` wraps any repository and asks its authenticator before
// every delegated call. How a session is obtained is up to the authenticator.

use crate::db::{KeyValueStore, Repository};
use crate::entities::{
    BillItem, BillKind, Direction, Job, JobPatch, JobStatus, NewBillItem, NewJob,
    NewTransaction, TransactionPatch, TransactionRecord,
};
use anyhow::{Context, Result};

pub trait Authenticator {
    /// Succeeds when a valid session exists (establishing one if needed)
    fn ensure_authenticated(&self) -> Result<()>;
}

/// Local storage needs no session
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalSession;

impl Authenticator for LocalSession {
    fn ensure_authenticated(&self) -> Result<()> {
        Ok(())
    }
}

pub struct Authenticated<R, A> {
    inner: R,
    authenticator: A,
}

impl<R, A: Authenticator> Authenticated<R, A> {
    pub fn new(inner: R, authenticator: A) -> Self {
        Authenticated {
            inner,
            authenticator,
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    fn guard(&self) -> Result<()> {
        self.authenticator
            .ensure_authenticated()
            .context("Not authenticated")
    }
}

impl<R: Repository, A: Authenticator> Repository for Authenticated<R, A> {
    fn load_jobs(&self, statuses: Option<&[JobStatus]>) -> Result<Vec<Job>> {
        self.guard()?;
        self.inner.load_jobs(statuses)
    }

    fn get_job(&self, id: &str) -> Result<Option<Job>> {
        self.guard()?;
        self.inner.get_job(id)
    }

    fn create_job(&self, job: &NewJob) -> Result<Job> {
        self.guard()?;
        self.inner.create_job(job)
    }

    fn update_job(&self, id: &str, patch: &JobPatch) -> Result<Job> {
        self.guard()?;
        self.inner.update_job(id, patch)
    }

    fn delete_job(&self, id: &str) -> Result<()> {
        self.guard()?;
        self.inner.delete_job(id)
    }

    fn create_transaction(
        &self,
        job_id: &str,
        direction: Direction,
        transaction: &NewTransaction,
    ) -> Result<TransactionRecord> {
        self.guard()?;
        self.inner.create_transaction(job_id, direction, transaction)
    }

    fn create_transactions(
        &self,
        job_id: &str,
        direction: Direction,
        transactions: &[NewTransaction],
    ) -> Result<Vec<TransactionRecord>> {
        self.guard()?;
        self.inner.create_transactions(job_id, direction, transactions)
    }

    fn update_transaction(&self, id: &str, patch: &TransactionPatch) -> Result<TransactionRecord> {
        self.guard()?;
        self.inner.update_transaction(id, patch)
    }

    fn delete_transaction(&self, id: &str) -> Result<()> {
        self.guard()?;
        self.inner.delete_transaction(id)
    }

    fn create_bill_items(
        &self,
        job_id: &str,
        kind: BillKind,
        items: &[NewBillItem],
    ) -> Result<Vec<BillItem>> {
        self.guard()?;
        self.inner.create_bill_items(job_id, kind, items)
    }

    fn delete_bill_items(&self, job_id: &str, kind: BillKind) -> Result<()> {
        self.guard()?;
        self.inner.delete_bill_items(job_id, kind)
    }

    fn replace_bill_items(
        &self,
        job_id: &str,
        kind: BillKind,
        items: &[NewBillItem],
    ) -> Result<Vec<BillItem>> {
        self.guard()?;
        self.inner.replace_bill_items(job_id, kind, items)
    }
}

impl<R: KeyValueStore, A: Authenticator> KeyValueStore for Authenticated<R, A> {
    fn get_value(&self, key: &str) -> Result<Option<String>> {
        self.guard()?;
        self.inner.get_value(key)
    }

    fn set_value(&self, key: &str, value: &str) -> Result<()> {
        self.guard()?;
        self.inner.set_value(key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteRepository;
    use anyhow::anyhow;
    use std::cell::Cell;

    struct CountingAuthenticator {
        calls: Cell<usize>,
        allow: bool,
    }

    impl CountingAuthenticator {
        fn new(allow: bool) -> Self {
            CountingAuthenticator {
                calls: Cell::new(0),
                allow,
            }
        }
    }

    impl Authenticator for CountingAuthenticator {
        fn ensure_authenticated(&self) -> Result<()> {
            self.calls.set(self.calls.get() + 1);
            if self.allow {
                Ok(())
            } else {
                Err(anyhow!("session expired"))
            }
        }
    }

    #[test]
    fn test_every_call_is_guarded() {
        let repo = Authenticated::new(
            SqliteRepository::open_in_memory().unwrap(),
            CountingAuthenticator::new(true),
        );

        let job = repo.create_job(&NewJob::new("Rifter", 1, JobStatus::Running)).unwrap();
        repo.load_jobs(None).unwrap();
        repo.set_value("sales_tax", "2").unwrap();

        assert_eq!(repo.authenticator.calls.get(), 3);
        assert!(repo.inner().get_job(&job.id).unwrap().is_some());
        // Direct access to the inner repository bypasses the guard
        assert_eq!(repo.authenticator.calls.get(), 3);
    }

    #[test]
    fn test_rejected_session_blocks_delegation() {
        let repo = Authenticated::new(
            SqliteRepository::open_in_memory().unwrap(),
            CountingAuthenticator::new(false),
        );

        let err = repo
            .create_job(&NewJob::new("Rifter", 1, JobStatus::Running))
            .unwrap_err();
        assert!(format!("{:#}", err).contains("session expired"));
        assert!(repo.inner().load_jobs(None).unwrap().is_empty());
    }

    #[test]
    fn test_local_session_always_passes() {
        let repo = Authenticated::new(SqliteRepository::open_in_memory().unwrap(), LocalSession);
        assert!(repo.get_value("missing").unwrap().is_none());
    }
}
