// Industry Ledger - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod auth;
pub mod db;
pub mod deduplication;
pub mod entities;
pub mod error;
pub mod lifecycle;
pub mod materials;
pub mod matching;
pub mod metrics;
pub mod parser;
pub mod reconciliation;
pub mod settings;
pub mod store;

// Re-export commonly used types
pub use auth::{Authenticated, Authenticator, LocalSession};
pub use db::{setup_database, KeyValueStore, Repository, SqliteRepository};
pub use deduplication::{
    consolidate, key_hash, transaction_key, BatchConsolidator, DuplicateDetector, DuplicateReport,
    LedgerKey,
};
pub use entities::{
    BillItem, BillKind, Direction, Job, JobPatch, JobStatus, NewBillItem, NewJob,
    NewTransaction, TransactionPatch, TransactionRecord,
};
pub use error::{PreviewError, SettingsError, StoreError, StoreResult};
pub use lifecycle::{
    categorize_jobs, format_duration, needs_attention, next_status, previous_status,
    remaining_runtime, sort_jobs, status_change_patch, CategorizedJobs,
};
pub use materials::{
    export_bill_of_materials, export_bom_tab_separated, export_consumed_materials,
    export_missing_materials, materials_satisfied, missing_materials, parse_bill_of_materials,
    parse_bom_auto, parse_bom_tab_separated, parse_consumed_materials, MissingMaterial,
};
pub use matching::{JobMatch, JobMatcher, MatchReason};
pub use metrics::{JobMetrics, PortfolioMetrics, PortfolioTotals, PricePerformance, UnitPricing};
pub use parser::{format_isk, parse_paste, parse_paste_with_report, PasteParse, TransactionCandidate};
pub use reconciliation::{
    BatchPreview, JobAssignment, ReconciliationEngine, TransactionGroup,
};
pub use settings::{
    load_settings, sales_tax_percent, save_settings, set_sales_tax_percent, Settings,
};
pub use store::{JobStore, SubscriptionId};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
