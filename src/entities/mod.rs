// Entity Models
// A job is the aggregate root: it owns its bill items and both transaction ledgers.

pub mod job;

pub use job::{
    same_material, BillItem, BillKind, Direction, Job, JobPatch, JobStatus, NewBillItem, NewJob,
    NewTransaction, TransactionPatch, TransactionRecord,
};
