// 🗄️ Persistence - Repository trait + SQLite implementation
//
// Tables:
//   jobs          scalar job fields
//   transactions  both ledgers, `direction` column, idempotency hash index
//   bill_items    BOM and consumed materials, `kind` column
//   settings      key/value (sales tax)
//
// Child rows cascade when their job is deleted.

use crate::deduplication::{key_hash, transaction_key};
use crate::entities::{
    BillItem, BillKind, Direction, Job, JobPatch, JobStatus, NewBillItem, NewJob,
    NewTransaction, TransactionPatch, TransactionRecord,
};
use anyhow::{anyhow, Context, Result};
use chrono::{SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

// ============================================================================
// TRAITS
// ============================================================================

/// Remote job storage consumed by the store
pub trait Repository {
    /// All jobs with their collections, optionally restricted to some statuses
    fn load_jobs(&self, statuses: Option<&[JobStatus]>) -> Result<Vec<Job>>;
    fn get_job(&self, id: &str) -> Result<Option<Job>>;
    fn create_job(&self, job: &NewJob) -> Result<Job>;
    fn update_job(&self, id: &str, patch: &JobPatch) -> Result<Job>;
    fn delete_job(&self, id: &str) -> Result<()>;

    fn create_transaction(
        &self,
        job_id: &str,
        direction: Direction,
        transaction: &NewTransaction,
    ) -> Result<TransactionRecord>;

    fn create_transactions(
        &self,
        job_id: &str,
        direction: Direction,
        transactions: &[NewTransaction],
    ) -> Result<Vec<TransactionRecord>> {
        transactions
            .iter()
            .map(|tx| self.create_transaction(job_id, direction, tx))
            .collect()
    }

    fn update_transaction(&self, id: &str, patch: &TransactionPatch) -> Result<TransactionRecord>;
    fn delete_transaction(&self, id: &str) -> Result<()>;

    fn create_bill_items(
        &self,
        job_id: &str,
        kind: BillKind,
        items: &[NewBillItem],
    ) -> Result<Vec<BillItem>>;
    fn delete_bill_items(&self, job_id: &str, kind: BillKind) -> Result<()>;

    /// Swap every bill item of one kind for `items`. Backends that support
    /// transactions override this so a failed insert keeps the old lines.
    fn replace_bill_items(
        &self,
        job_id: &str,
        kind: BillKind,
        items: &[NewBillItem],
    ) -> Result<Vec<BillItem>> {
        self.delete_bill_items(job_id, kind)?;
        self.create_bill_items(job_id, kind, items)
    }
}

/// String settings storage
pub trait KeyValueStore {
    fn get_value(&self, key: &str) -> Result<Option<String>>;
    fn set_value(&self, key: &str, value: &str) -> Result<()>;
}

// ============================================================================
// SQLITE
// ============================================================================

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn to_sql_int(value: u64) -> Result<i64> {
    i64::try_from(value).with_context(|| format!("Value {} does not fit in SQLite", value))
}

fn column_u64(row: &Row, index: usize) -> rusqlite::Result<u64> {
    Ok(row.get::<_, i64>(index)?.max(0) as u64)
}

fn column_status(row: &Row, index: usize) -> rusqlite::Result<JobStatus> {
    let raw: String = row.get(index)?;
    raw.parse().map_err(|err: String| {
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, err.into())
    })
}

fn column_direction(row: &Row, index: usize) -> rusqlite::Result<Direction> {
    let raw: String = row.get(index)?;
    raw.parse().map_err(|err: String| {
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, err.into())
    })
}

fn column_kind(row: &Row, index: usize) -> rusqlite::Result<BillKind> {
    let raw: String = row.get(index)?;
    raw.parse().map_err(|err: String| {
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, err.into())
    })
}

const JOB_COLUMNS: &str = "id, output_item, output_quantity, status, produced, projected_cost,
    projected_revenue, job_start, job_end, sale_start, sale_end, runtime, created";

/// Job ids bound per child query, well under SQLite's variable limit
const CHILD_QUERY_CHUNK: usize = 500;

const TRANSACTION_COLUMNS: &str = "id, job_id, direction, date, quantity, item_name, unit_price,
    total_price, buyer, location, corporation, wallet, created";

fn job_from_row(row: &Row) -> rusqlite::Result<Job> {
    Ok(Job {
        id: row.get(0)?,
        output_item: row.get(1)?,
        output_quantity: column_u64(row, 2)?,
        status: column_status(row, 3)?,
        produced: column_u64(row, 4)?,
        projected_cost: row.get(5)?,
        projected_revenue: row.get(6)?,
        job_start: row.get(7)?,
        job_end: row.get(8)?,
        sale_start: row.get(9)?,
        sale_end: row.get(10)?,
        runtime: row.get::<_, Option<i64>>(11)?.map(|v| v.max(0) as u64),
        created: row.get(12)?,
        bill_of_materials: Vec::new(),
        consumed_materials: Vec::new(),
        expenditures: Vec::new(),
        income: Vec::new(),
    })
}

fn transaction_from_row(row: &Row) -> rusqlite::Result<(Direction, TransactionRecord)> {
    let direction = column_direction(row, 2)?;
    Ok((
        direction,
        TransactionRecord {
            id: row.get(0)?,
            job_id: row.get(1)?,
            date: row.get(3)?,
            quantity: column_u64(row, 4)?,
            item_name: row.get(5)?,
            unit_price: row.get(6)?,
            total_price: row.get(7)?,
            buyer: row.get(8)?,
            location: row.get(9)?,
            corporation: row.get(10)?,
            wallet: row.get(11)?,
            created: row.get(12)?,
        },
    ))
}

fn record_hash(tx: &TransactionRecord) -> String {
    key_hash(&transaction_key(
        &tx.date,
        &tx.item_name,
        tx.quantity,
        tx.total_price,
        &tx.buyer,
        &tx.location,
    ))
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery; in-memory databases report "memory"
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    debug!(journal_mode = %mode, "Opened database");
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            output_item TEXT NOT NULL,
            output_quantity INTEGER NOT NULL,
            status TEXT NOT NULL,
            produced INTEGER NOT NULL DEFAULT 0,
            projected_cost REAL NOT NULL DEFAULT 0,
            projected_revenue REAL NOT NULL DEFAULT 0,
            job_start TEXT,
            job_end TEXT,
            sale_start TEXT,
            sale_end TEXT,
            runtime INTEGER,
            created TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
            direction TEXT NOT NULL,
            date TEXT NOT NULL,
            quantity INTEGER NOT NULL,
            item_name TEXT NOT NULL,
            unit_price REAL NOT NULL,
            total_price REAL NOT NULL CHECK (total_price >= 0),
            buyer TEXT NOT NULL DEFAULT '',
            location TEXT NOT NULL DEFAULT '',
            corporation TEXT NOT NULL DEFAULT '',
            wallet TEXT NOT NULL DEFAULT '',
            idempotency_hash TEXT NOT NULL,
            created TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS bill_items (
            id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
            kind TEXT NOT NULL,
            name TEXT NOT NULL,
            quantity INTEGER NOT NULL CHECK (quantity > 0)
        );

        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
        CREATE INDEX IF NOT EXISTS idx_transactions_job ON transactions(job_id, direction);
        CREATE INDEX IF NOT EXISTS idx_idempotency_hash ON transactions(idempotency_hash);
        CREATE INDEX IF NOT EXISTS idx_bill_items_job ON bill_items(job_id, kind);",
    )?;

    Ok(())
}

pub struct SqliteRepository {
    conn: Connection,
}

impl SqliteRepository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        setup_database(&conn).context("Failed to set up schema")?;
        info!(path = %path.display(), "Database ready");
        Ok(SqliteRepository { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        setup_database(&conn)?;
        Ok(SqliteRepository { conn })
    }

    /// Attach ledgers and bill items, reading only rows of the given jobs
    fn load_children(&self, jobs: &mut [Job]) -> Result<()> {
        let index: HashMap<String, usize> = jobs
            .iter()
            .enumerate()
            .map(|(i, job)| (job.id.clone(), i))
            .collect();
        let ids: Vec<String> = jobs.iter().map(|job| job.id.clone()).collect();

        for chunk in ids.chunks(CHILD_QUERY_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");

            let mut stmt = self.conn.prepare(&format!(
                "SELECT {} FROM transactions WHERE job_id IN ({}) ORDER BY date, rowid",
                TRANSACTION_COLUMNS, placeholders
            ))?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), transaction_from_row)?;
            for row in rows {
                let (direction, tx) = row?;
                if let Some(&i) = index.get(&tx.job_id) {
                    jobs[i].transactions_mut(direction).push(tx);
                }
            }

            let mut stmt = self.conn.prepare(&format!(
                "SELECT id, job_id, kind, name, quantity FROM bill_items
                 WHERE job_id IN ({}) ORDER BY rowid",
                placeholders
            ))?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                Ok((
                    row.get::<_, String>(1)?,
                    column_kind(row, 2)?,
                    BillItem {
                        id: row.get(0)?,
                        name: row.get(3)?,
                        quantity: column_u64(row, 4)?,
                    },
                ))
            })?;
            for row in rows {
                let (job_id, kind, item) = row?;
                if let Some(&i) = index.get(&job_id) {
                    jobs[i].bill_items_mut(kind).push(item);
                }
            }
        }

        Ok(())
    }

    /// Insert bill items without opening a transaction of its own
    fn insert_bill_items(
        &self,
        job_id: &str,
        kind: BillKind,
        items: &[NewBillItem],
    ) -> Result<Vec<BillItem>> {
        let mut created = Vec::with_capacity(items.len());

        for item in items {
            let bill_item = BillItem {
                id: new_id(),
                name: item.name.clone(),
                quantity: item.quantity,
            };
            self.conn
                .execute(
                    "INSERT INTO bill_items (id, job_id, kind, name, quantity) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        bill_item.id,
                        job_id,
                        kind.as_str(),
                        bill_item.name,
                        to_sql_int(bill_item.quantity)?,
                    ],
                )
                .with_context(|| format!("Failed to insert bill item {}", item.name))?;
            created.push(bill_item);
        }

        Ok(created)
    }

    fn get_transaction(&self, id: &str) -> Result<Option<(Direction, TransactionRecord)>> {
        let found = self
            .conn
            .query_row(
                &format!("SELECT {} FROM transactions WHERE id = ?1", TRANSACTION_COLUMNS),
                params![id],
                transaction_from_row,
            )
            .optional()?;
        Ok(found)
    }

    fn insert_transaction(
        &self,
        job_id: &str,
        direction: Direction,
        transaction: &NewTransaction,
    ) -> Result<TransactionRecord> {
        let tx = transaction.clone().normalized();
        let record = TransactionRecord {
            id: new_id(),
            job_id: job_id.to_string(),
            date: tx.date,
            quantity: tx.quantity,
            item_name: tx.item_name,
            unit_price: tx.unit_price,
            total_price: tx.total_price,
            buyer: tx.buyer,
            location: tx.location,
            corporation: tx.corporation,
            wallet: tx.wallet,
            created: Some(now_timestamp()),
        };

        self.conn
            .execute(
                &format!(
                    "INSERT INTO transactions ({}, idempotency_hash)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                    TRANSACTION_COLUMNS
                ),
                params![
                    record.id,
                    record.job_id,
                    direction.as_str(),
                    record.date,
                    to_sql_int(record.quantity)?,
                    record.item_name,
                    record.unit_price,
                    record.total_price,
                    record.buyer,
                    record.location,
                    record.corporation,
                    record.wallet,
                    record.created,
                    record_hash(&record),
                ],
            )
            .with_context(|| format!("Failed to insert transaction for job {}", job_id))?;

        Ok(record)
    }
}

impl Repository for SqliteRepository {
    fn load_jobs(&self, statuses: Option<&[JobStatus]>) -> Result<Vec<Job>> {
        let mut jobs = match statuses {
            Some([]) => Vec::new(),
            Some(statuses) => {
                let placeholders = vec!["?"; statuses.len()].join(", ");
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {} FROM jobs WHERE status IN ({}) ORDER BY created, rowid",
                    JOB_COLUMNS, placeholders
                ))?;
                let rows = stmt.query_map(
                    params_from_iter(statuses.iter().map(|s| s.as_str())),
                    job_from_row,
                )?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {} FROM jobs ORDER BY created, rowid",
                    JOB_COLUMNS
                ))?;
                let rows = stmt.query_map([], job_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };

        self.load_children(&mut jobs)?;
        debug!(count = jobs.len(), "Loaded jobs");
        Ok(jobs)
    }

    fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let job = self
            .conn
            .query_row(
                &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
                params![id],
                job_from_row,
            )
            .optional()?;

        match job {
            Some(job) => {
                let mut jobs = vec![job];
                self.load_children(&mut jobs)?;
                Ok(jobs.pop())
            }
            None => Ok(None),
        }
    }

    fn create_job(&self, job: &NewJob) -> Result<Job> {
        let id = new_id();
        let runtime = job.runtime.map(to_sql_int).transpose()?;
        self.conn
            .execute(
                &format!(
                    "INSERT INTO jobs ({}) VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, NULL, NULL, NULL, NULL, ?7, ?8)",
                    JOB_COLUMNS
                ),
                params![
                    id,
                    job.output_item,
                    to_sql_int(job.output_quantity)?,
                    job.status.as_str(),
                    job.projected_cost,
                    job.projected_revenue,
                    runtime,
                    now_timestamp(),
                ],
            )
            .context("Failed to insert job")?;

        self.get_job(&id)?
            .ok_or_else(|| anyhow!("Job {} vanished after insert", id))
    }

    fn update_job(&self, id: &str, patch: &JobPatch) -> Result<Job> {
        let mut job = self
            .get_job(id)?
            .ok_or_else(|| anyhow!("Job not found: {}", id))?;
        job.apply(patch);

        let runtime = job.runtime.map(to_sql_int).transpose()?;
        self.conn
            .execute(
                "UPDATE jobs SET output_item = ?2, output_quantity = ?3, status = ?4, produced = ?5,
                    projected_cost = ?6, projected_revenue = ?7, job_start = ?8, job_end = ?9,
                    sale_start = ?10, sale_end = ?11, runtime = ?12
                 WHERE id = ?1",
                params![
                    id,
                    job.output_item,
                    to_sql_int(job.output_quantity)?,
                    job.status.as_str(),
                    to_sql_int(job.produced)?,
                    job.projected_cost,
                    job.projected_revenue,
                    job.job_start,
                    job.job_end,
                    job.sale_start,
                    job.sale_end,
                    runtime,
                ],
            )
            .with_context(|| format!("Failed to update job {}", id))?;

        Ok(job)
    }

    fn delete_job(&self, id: &str) -> Result<()> {
        let deleted = self.conn.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(anyhow!("Job not found: {}", id));
        }
        Ok(())
    }

    fn create_transaction(
        &self,
        job_id: &str,
        direction: Direction,
        transaction: &NewTransaction,
    ) -> Result<TransactionRecord> {
        self.insert_transaction(job_id, direction, transaction)
    }

    fn create_transactions(
        &self,
        job_id: &str,
        direction: Direction,
        transactions: &[NewTransaction],
    ) -> Result<Vec<TransactionRecord>> {
        // All or nothing per job
        let db_tx = self.conn.unchecked_transaction()?;
        let records = transactions
            .iter()
            .map(|tx| self.insert_transaction(job_id, direction, tx))
            .collect::<Result<Vec<_>>>()?;
        db_tx.commit()?;

        info!(job_id, direction = %direction, count = records.len(), "Stored transactions");
        Ok(records)
    }

    fn update_transaction(&self, id: &str, patch: &TransactionPatch) -> Result<TransactionRecord> {
        let (_, mut record) = self
            .get_transaction(id)?
            .ok_or_else(|| anyhow!("Transaction not found: {}", id))?;
        patch.apply(&mut record);

        self.conn
            .execute(
                "UPDATE transactions SET date = ?2, quantity = ?3, item_name = ?4, unit_price = ?5,
                    total_price = ?6, buyer = ?7, location = ?8, corporation = ?9, wallet = ?10,
                    idempotency_hash = ?11
                 WHERE id = ?1",
                params![
                    id,
                    record.date,
                    to_sql_int(record.quantity)?,
                    record.item_name,
                    record.unit_price,
                    record.total_price,
                    record.buyer,
                    record.location,
                    record.corporation,
                    record.wallet,
                    record_hash(&record),
                ],
            )
            .with_context(|| format!("Failed to update transaction {}", id))?;

        Ok(record)
    }

    fn delete_transaction(&self, id: &str) -> Result<()> {
        let deleted = self
            .conn
            .execute("DELETE FROM transactions WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(anyhow!("Transaction not found: {}", id));
        }
        Ok(())
    }

    fn create_bill_items(
        &self,
        job_id: &str,
        kind: BillKind,
        items: &[NewBillItem],
    ) -> Result<Vec<BillItem>> {
        let db_tx = self.conn.unchecked_transaction()?;
        let created = self.insert_bill_items(job_id, kind, items)?;
        db_tx.commit()?;
        Ok(created)
    }

    fn delete_bill_items(&self, job_id: &str, kind: BillKind) -> Result<()> {
        self.conn.execute(
            "DELETE FROM bill_items WHERE job_id = ?1 AND kind = ?2",
            params![job_id, kind.as_str()],
        )?;
        Ok(())
    }

    fn replace_bill_items(
        &self,
        job_id: &str,
        kind: BillKind,
        items: &[NewBillItem],
    ) -> Result<Vec<BillItem>> {
        // Dropping the transaction on error rolls the delete back
        let db_tx = self.conn.unchecked_transaction()?;
        self.delete_bill_items(job_id, kind)?;
        let created = self.insert_bill_items(job_id, kind, items)?;
        db_tx.commit()?;

        debug!(job_id, kind = kind.as_str(), count = created.len(), "Replaced bill items");
        Ok(created)
    }
}

impl KeyValueStore for SqliteRepository {
    fn get_value(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_value(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_transaction(item: &str, quantity: u64, total: f64) -> NewTransaction {
        NewTransaction {
            date: "2025-07-04T10:58:00.000Z".to_string(),
            quantity,
            item_name: item.to_string(),
            unit_price: total / quantity as f64,
            total_price: total,
            buyer: "Shocker Killer".to_string(),
            location: "Jita IV".to_string(),
            corporation: String::new(),
            wallet: String::new(),
        }
    }

    #[test]
    fn test_job_roundtrip_with_collections() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SqliteRepository::open(&dir.path().join("ledger.db")).unwrap();

        let job = repo
            .create_job(&NewJob::new("Rifter", 10, JobStatus::Acquisition))
            .unwrap();
        repo.create_bill_items(
            &job.id,
            BillKind::BillOfMaterials,
            &[NewBillItem::new("Tritanium", 100)],
        )
        .unwrap();
        repo.create_transactions(
            &job.id,
            Direction::Expenditure,
            &[create_test_transaction("Tritanium", 30, -150.0)],
        )
        .unwrap();

        let loaded = repo.get_job(&job.id).unwrap().unwrap();
        assert_eq!(loaded.output_item, "Rifter");
        assert_eq!(loaded.bill_of_materials.len(), 1);
        assert_eq!(loaded.expenditures.len(), 1);
        assert!(loaded.income.is_empty());
        // Stored as a magnitude
        assert_eq!(loaded.expenditures[0].total_price, 150.0);
    }

    #[test]
    fn test_load_jobs_by_status() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        repo.create_job(&NewJob::new("Rifter", 1, JobStatus::Running)).unwrap();
        repo.create_job(&NewJob::new("Slasher", 1, JobStatus::Closed)).unwrap();
        repo.create_job(&NewJob::new("Merlin", 1, JobStatus::Tracked)).unwrap();

        assert_eq!(repo.load_jobs(None).unwrap().len(), 3);

        let active = repo
            .load_jobs(Some(&[JobStatus::Running, JobStatus::Tracked][..]))
            .unwrap();
        let items: Vec<&str> = active.iter().map(|j| j.output_item.as_str()).collect();
        assert_eq!(items, vec!["Rifter", "Merlin"]);

        assert!(repo.load_jobs(Some(&[][..])).unwrap().is_empty());
    }

    #[test]
    fn test_update_job_and_transaction() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let job = repo.create_job(&NewJob::new("Rifter", 1, JobStatus::Running)).unwrap();
        let patch = JobPatch {
            status: Some(JobStatus::Done),
            produced: Some(9),
            ..JobPatch::default()
        };

        let updated = repo.update_job(&job.id, &patch).unwrap();
        assert_eq!(updated.status, JobStatus::Done);
        assert_eq!(repo.get_job(&job.id).unwrap().unwrap().produced, 9);

        let tx = repo
            .create_transaction(&job.id, Direction::Income, &create_test_transaction("Rifter", 1, 500.0))
            .unwrap();
        let tx = repo
            .update_transaction(
                &tx.id,
                &TransactionPatch {
                    quantity: Some(2),
                    total_price: Some(-1000.0),
                    corporation: Some("Brave Industries".to_string()),
                    wallet: Some("Master Wallet".to_string()),
                    ..TransactionPatch::default()
                },
            )
            .unwrap();
        assert_eq!(tx.total_price, 1000.0);
        let stored = &repo.get_job(&job.id).unwrap().unwrap().income[0];
        assert_eq!(stored.quantity, 2);
        assert_eq!(stored.corporation, "Brave Industries");
        assert_eq!(stored.wallet, "Master Wallet");

        assert!(repo.update_job("missing", &patch).is_err());
        assert!(repo.delete_transaction("missing").is_err());
    }

    #[test]
    fn test_delete_job_cascades() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let job = repo.create_job(&NewJob::new("Rifter", 1, JobStatus::Selling)).unwrap();
        let tx = repo
            .create_transaction(&job.id, Direction::Income, &create_test_transaction("Rifter", 1, 500.0))
            .unwrap();

        repo.delete_job(&job.id).unwrap();

        assert!(repo.get_job(&job.id).unwrap().is_none());
        assert!(repo.get_transaction(&tx.id).unwrap().is_none());
        assert!(repo.delete_job(&job.id).is_err());
    }

    #[test]
    fn test_idempotency_hash_matches_key() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let job = repo.create_job(&NewJob::new("Rifter", 1, JobStatus::Selling)).unwrap();
        let tx = repo
            .create_transaction(&job.id, Direction::Income, &create_test_transaction("Rifter", 1, -500.0))
            .unwrap();

        let stored: String = repo
            .conn
            .query_row(
                "SELECT idempotency_hash FROM transactions WHERE id = ?1",
                params![tx.id],
                |row| row.get(0),
            )
            .unwrap();

        let expected = key_hash("2025-07-04 10:58:00.000Z|Rifter|1|500|Shocker Killer|Jita IV");
        assert_eq!(stored, expected);
    }

    #[test]
    fn test_replace_bill_items() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let job = repo.create_job(&NewJob::new("Rifter", 1, JobStatus::Running)).unwrap();
        repo.create_bill_items(&job.id, BillKind::ConsumedMaterials, &[NewBillItem::new("Isogen", 5)])
            .unwrap();
        repo.create_bill_items(&job.id, BillKind::BillOfMaterials, &[NewBillItem::new("Isogen", 5)])
            .unwrap();

        repo.delete_bill_items(&job.id, BillKind::ConsumedMaterials).unwrap();

        let loaded = repo.get_job(&job.id).unwrap().unwrap();
        assert!(loaded.consumed_materials.is_empty());
        assert_eq!(loaded.bill_of_materials.len(), 1);
    }

    #[test]
    fn test_replace_bill_items_is_atomic() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let job = repo.create_job(&NewJob::new("Rifter", 1, JobStatus::Acquisition)).unwrap();
        repo.create_bill_items(&job.id, BillKind::BillOfMaterials, &[NewBillItem::new("Tritanium", 100)])
            .unwrap();

        let replaced = repo
            .replace_bill_items(
                &job.id,
                BillKind::BillOfMaterials,
                &[NewBillItem::new("Pyerite", 40), NewBillItem::new("Mexallon", 2)],
            )
            .unwrap();
        assert_eq!(replaced.len(), 2);

        // Second line cannot be stored, so nothing changes
        let err = repo.replace_bill_items(
            &job.id,
            BillKind::BillOfMaterials,
            &[NewBillItem::new("Isogen", 5), NewBillItem::new("Zydrine", u64::MAX)],
        );
        assert!(err.is_err());

        let names: Vec<String> = repo
            .get_job(&job.id)
            .unwrap()
            .unwrap()
            .bill_of_materials
            .into_iter()
            .map(|item| item.name)
            .collect();
        assert_eq!(names, vec!["Pyerite", "Mexallon"]);
    }

    #[test]
    fn test_child_rows_are_read_per_job() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let running = repo.create_job(&NewJob::new("Rifter", 1, JobStatus::Running)).unwrap();
        let closed = repo.create_job(&NewJob::new("Slasher", 1, JobStatus::Closed)).unwrap();
        repo.create_transaction(&running.id, Direction::Expenditure, &create_test_transaction("Tritanium", 10, 50.0))
            .unwrap();
        let other = repo
            .create_transaction(&closed.id, Direction::Income, &create_test_transaction("Slasher", 1, 500.0))
            .unwrap();

        // Make the other job's row unreadable: touching it would fail the load
        repo.conn
            .execute(
                "UPDATE transactions SET direction = 'sideways' WHERE id = ?1",
                params![other.id],
            )
            .unwrap();
        assert!(repo.load_jobs(None).is_err());

        let loaded = repo.get_job(&running.id).unwrap().unwrap();
        assert_eq!(loaded.expenditures.len(), 1);
        let active = repo.load_jobs(Some(&[JobStatus::Running][..])).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].expenditures[0].item_name, "Tritanium");
    }

    #[test]
    fn test_key_value_store() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        assert_eq!(repo.get_value("sales_tax").unwrap(), None);

        repo.set_value("sales_tax", "3.6").unwrap();
        repo.set_value("sales_tax", "4.5").unwrap();

        assert_eq!(repo.get_value("sales_tax").unwrap().as_deref(), Some("4.5"));
    }
}
