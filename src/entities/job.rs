// 🏭 Job Entity - Manufacturing job with owned ledgers
//
// A job exclusively owns four collections:
// - bill_of_materials  (planned requirement)
// - consumed_materials (actually used)
// - expenditures       (cost transactions)
// - income             (revenue transactions)
//
// Stored prices are magnitudes. Direction comes from the collection, never the sign.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// JOB STATUS
// ============================================================================

/// Lifecycle status. Declaration order is lifecycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Planned,
    Acquisition,
    Running,
    Done,
    Selling,
    Closed,
    /// Long-lived tracking bucket, outside the lifecycle and portfolio totals
    Tracked,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Planned,
        JobStatus::Acquisition,
        JobStatus::Running,
        JobStatus::Done,
        JobStatus::Selling,
        JobStatus::Closed,
        JobStatus::Tracked,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Planned => "Planned",
            JobStatus::Acquisition => "Acquisition",
            JobStatus::Running => "Running",
            JobStatus::Done => "Done",
            JobStatus::Selling => "Selling",
            JobStatus::Closed => "Closed",
            JobStatus::Tracked => "Tracked",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| format!("Unknown job status: {}", s))
    }
}

// ============================================================================
// DIRECTION / BILL KIND
// ============================================================================

/// Which ledger of a job a transaction belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Expenditure,
    Income,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Expenditure => "expenditure",
            Direction::Income => "income",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "expenditure" | "expenditures" | "cost" => Ok(Direction::Expenditure),
            "income" | "revenue" | "sale" => Ok(Direction::Income),
            other => Err(format!("Unknown transaction direction: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BillKind {
    BillOfMaterials,
    ConsumedMaterials,
}

impl BillKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillKind::BillOfMaterials => "billOfMaterials",
            BillKind::ConsumedMaterials => "consumedMaterials",
        }
    }
}

impl FromStr for BillKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "billOfMaterials" | "bom" => Ok(BillKind::BillOfMaterials),
            "consumedMaterials" | "consumed" => Ok(BillKind::ConsumedMaterials),
            other => Err(format!("Unknown bill kind: {}", other)),
        }
    }
}

// ============================================================================
// RECORDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillItem {
    pub id: String,
    pub name: String,
    pub quantity: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBillItem {
    pub name: String,
    pub quantity: u64,
}

impl NewBillItem {
    pub fn new(name: &str, quantity: u64) -> Self {
        NewBillItem {
            name: name.trim().to_string(),
            quantity,
        }
    }
}

/// Persisted transaction. `total_price` is always a magnitude.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub id: String,
    pub job_id: String,
    pub date: String,
    pub quantity: u64,
    pub item_name: String,
    pub unit_price: f64,
    pub total_price: f64,
    #[serde(default)]
    pub buyer: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub corporation: String,
    #[serde(default)]
    pub wallet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
}

/// Transaction as written through the repository (no id, no job yet)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTransaction {
    pub date: String,
    pub quantity: u64,
    pub item_name: String,
    pub unit_price: f64,
    pub total_price: f64,
    #[serde(default)]
    pub buyer: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub corporation: String,
    #[serde(default)]
    pub wallet: String,
}

impl NewTransaction {
    /// Force the stored-magnitude invariant
    pub fn normalized(mut self) -> Self {
        self.unit_price = self.unit_price.abs();
        self.total_price = self.total_price.abs();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPatch {
    pub date: Option<String>,
    pub quantity: Option<u64>,
    pub item_name: Option<String>,
    pub unit_price: Option<f64>,
    pub total_price: Option<f64>,
    pub buyer: Option<String>,
    pub location: Option<String>,
    pub corporation: Option<String>,
    pub wallet: Option<String>,
}

impl TransactionPatch {
    pub fn apply(&self, tx: &mut TransactionRecord) {
        if let Some(date) = &self.date {
            tx.date = date.clone();
        }
        if let Some(quantity) = self.quantity {
            tx.quantity = quantity;
        }
        if let Some(item_name) = &self.item_name {
            tx.item_name = item_name.trim().to_string();
        }
        if let Some(unit_price) = self.unit_price {
            tx.unit_price = unit_price.abs();
        }
        if let Some(total_price) = self.total_price {
            tx.total_price = total_price.abs();
        }
        if let Some(buyer) = &self.buyer {
            tx.buyer = buyer.trim().to_string();
        }
        if let Some(location) = &self.location {
            tx.location = location.trim().to_string();
        }
        if let Some(corporation) = &self.corporation {
            tx.corporation = corporation.trim().to_string();
        }
        if let Some(wallet) = &self.wallet {
            tx.wallet = wallet.trim().to_string();
        }
    }
}

// ============================================================================
// JOB
// ============================================================================

/// Material names compare trimmed and ASCII case-insensitively
pub fn same_material(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub output_item: String,
    pub output_quantity: u64,
    pub status: JobStatus,
    #[serde(default)]
    pub produced: u64,
    #[serde(default)]
    pub projected_cost: f64,
    #[serde(default)]
    pub projected_revenue: f64,

    // Lifecycle timestamps (ISO-8601), some stamped on status transitions
    #[serde(default)]
    pub job_start: Option<String>,
    #[serde(default)]
    pub job_end: Option<String>,
    #[serde(default)]
    pub sale_start: Option<String>,
    #[serde(default)]
    pub sale_end: Option<String>,
    /// Expected run time in seconds
    #[serde(default)]
    pub runtime: Option<u64>,
    #[serde(default)]
    pub created: Option<String>,

    #[serde(default)]
    pub bill_of_materials: Vec<BillItem>,
    #[serde(default)]
    pub consumed_materials: Vec<BillItem>,
    #[serde(default)]
    pub expenditures: Vec<TransactionRecord>,
    #[serde(default)]
    pub income: Vec<TransactionRecord>,
}

impl Job {
    pub fn is_tracked(&self) -> bool {
        self.status == JobStatus::Tracked
    }

    pub fn transactions(&self, direction: Direction) -> &[TransactionRecord] {
        match direction {
            Direction::Expenditure => &self.expenditures,
            Direction::Income => &self.income,
        }
    }

    pub fn transactions_mut(&mut self, direction: Direction) -> &mut Vec<TransactionRecord> {
        match direction {
            Direction::Expenditure => &mut self.expenditures,
            Direction::Income => &mut self.income,
        }
    }

    pub fn bill_items(&self, kind: BillKind) -> &[BillItem] {
        match kind {
            BillKind::BillOfMaterials => &self.bill_of_materials,
            BillKind::ConsumedMaterials => &self.consumed_materials,
        }
    }

    pub fn bill_items_mut(&mut self, kind: BillKind) -> &mut Vec<BillItem> {
        match kind {
            BillKind::BillOfMaterials => &mut self.bill_of_materials,
            BillKind::ConsumedMaterials => &mut self.consumed_materials,
        }
    }

    pub fn total_expenditure(&self) -> f64 {
        self.expenditures.iter().map(|tx| tx.total_price).sum()
    }

    pub fn total_income(&self) -> f64 {
        self.income.iter().map(|tx| tx.total_price).sum()
    }

    /// Units sold so far (sum of income quantities)
    pub fn items_sold(&self) -> u64 {
        self.income.iter().map(|tx| tx.quantity).sum()
    }

    /// BOM line for a material. When a material is listed twice the first
    /// line wins.
    pub fn bom_requirement(&self, item_name: &str) -> Option<&BillItem> {
        self.bill_of_materials
            .iter()
            .find(|item| same_material(&item.name, item_name))
    }

    /// Quantity of a material already bought for this job
    pub fn expended_quantity(&self, item_name: &str) -> u64 {
        self.expenditures
            .iter()
            .filter(|tx| same_material(&tx.item_name, item_name))
            .map(|tx| tx.quantity)
            .sum()
    }

    /// Which ledger holds the transaction with this id, if any
    pub fn find_transaction(&self, transaction_id: &str) -> Option<Direction> {
        if self.expenditures.iter().any(|tx| tx.id == transaction_id) {
            Some(Direction::Expenditure)
        } else if self.income.iter().any(|tx| tx.id == transaction_id) {
            Some(Direction::Income)
        } else {
            None
        }
    }

    /// Apply the scalar fields of a patch (owned collections are never patched)
    pub fn apply(&mut self, patch: &JobPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(output_item) = &patch.output_item {
            self.output_item = output_item.clone();
        }
        if let Some(output_quantity) = patch.output_quantity {
            self.output_quantity = output_quantity;
        }
        if let Some(produced) = patch.produced {
            self.produced = produced;
        }
        if let Some(projected_cost) = patch.projected_cost {
            self.projected_cost = projected_cost;
        }
        if let Some(projected_revenue) = patch.projected_revenue {
            self.projected_revenue = projected_revenue;
        }
        if let Some(job_start) = &patch.job_start {
            self.job_start = Some(job_start.clone());
        }
        if let Some(job_end) = &patch.job_end {
            self.job_end = Some(job_end.clone());
        }
        if let Some(sale_start) = &patch.sale_start {
            self.sale_start = Some(sale_start.clone());
        }
        if let Some(sale_end) = &patch.sale_end {
            self.sale_end = Some(sale_end.clone());
        }
        if let Some(runtime) = patch.runtime {
            self.runtime = Some(runtime);
        }
    }
}

/// Fields needed to create a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewJob {
    pub output_item: String,
    pub output_quantity: u64,
    pub status: JobStatus,
    #[serde(default)]
    pub projected_cost: f64,
    #[serde(default)]
    pub projected_revenue: f64,
    #[serde(default)]
    pub runtime: Option<u64>,
}

impl NewJob {
    pub fn new(output_item: &str, output_quantity: u64, status: JobStatus) -> Self {
        NewJob {
            output_item: output_item.trim().to_string(),
            output_quantity,
            status,
            projected_cost: 0.0,
            projected_revenue: 0.0,
            runtime: None,
        }
    }
}

/// Partial update of a job's scalar fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub output_item: Option<String>,
    pub output_quantity: Option<u64>,
    pub produced: Option<u64>,
    pub projected_cost: Option<f64>,
    pub projected_revenue: Option<f64>,
    pub job_start: Option<String>,
    pub job_end: Option<String>,
    pub sale_start: Option<String>,
    pub sale_end: Option<String>,
    pub runtime: Option<u64>,
}

impl JobPatch {
    pub fn is_empty(&self) -> bool {
        *self == JobPatch::default()
    }
}

// ============================================================================
// TESTS
// ============================================================================
