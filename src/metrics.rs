// 📈 Metrics Aggregator - Per-job and portfolio figures
//
// Per job: spend, income, profit, margin, price performance, unit pricing.
// Portfolio: totals over every non-Tracked job, cached per job collection.

use crate::entities::Job;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

// ============================================================================
// JOB METRICS
// ============================================================================

/// Realized price per unit against the projected one
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricePerformance {
    pub expected_per_unit: f64,
    pub actual_per_unit: f64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMetrics {
    pub job_id: String,
    pub total_expenditure: f64,
    pub total_income: f64,
    pub profit: f64,
    /// Percent of income; 0 when nothing has been sold
    pub margin: f64,
    pub items_sold: u64,
    pub produced: u64,
    pub performance: Option<PricePerformance>,
    /// Spend as a percent of the projected cost
    pub cost_utilisation: Option<f64>,
}

impl JobMetrics {
    pub fn compute(job: &Job) -> Self {
        let total_expenditure = job.total_expenditure();
        let total_income = job.total_income();
        let profit = total_income - total_expenditure;
        let margin = if total_income > 0.0 {
            profit / total_income * 100.0
        } else {
            0.0
        };
        let items_sold = job.items_sold();

        let performance = if job.produced > 0 && items_sold > 0 && job.projected_revenue > 0.0 {
            let expected_per_unit = job.projected_revenue / job.produced as f64;
            let actual_per_unit = total_income / items_sold as f64;
            Some(PricePerformance {
                expected_per_unit,
                actual_per_unit,
                percentage: actual_per_unit / expected_per_unit * 100.0,
            })
        } else {
            None
        };

        let cost_utilisation = if job.projected_cost > 0.0 {
            Some(total_expenditure / job.projected_cost * 100.0)
        } else {
            None
        };

        JobMetrics {
            job_id: job.id.clone(),
            total_expenditure,
            total_income,
            profit,
            margin,
            items_sold,
            produced: job.produced,
            performance,
            cost_utilisation,
        }
    }

    pub fn is_profitable(&self) -> bool {
        self.profit > 0.0
    }
}

// ============================================================================
// UNIT PRICING
// ============================================================================

/// Suggested sale prices per unit, sales tax included.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitPricing {
    pub target: f64,
    pub break_even: f64,
    /// Over the units still unsold
    pub adjusted_target: Option<f64>,
    pub adjusted_break_even: Option<f64>,
    pub remaining_units: u64,
    pub sales_tax_percent: f64,
}

impl UnitPricing {
    /// `None` until the job has produced something
    pub fn compute(job: &Job, sales_tax_percent: f64) -> Option<Self> {
        if job.produced == 0 {
            return None;
        }

        let tax_factor = 1.0 + sales_tax_percent / 100.0;
        let produced = job.produced as f64;
        let total_expenditure = job.total_expenditure();
        let total_income = job.total_income();
        let remaining_units = job.produced.saturating_sub(job.items_sold());

        let (adjusted_target, adjusted_break_even) = if remaining_units > 0 {
            let remaining = remaining_units as f64;
            (
                Some((job.projected_revenue - total_income) / remaining * tax_factor),
                Some((total_expenditure - total_income).max(0.0) / remaining * tax_factor),
            )
        } else {
            (None, None)
        };

        Some(UnitPricing {
            target: job.projected_revenue / produced * tax_factor,
            break_even: total_expenditure / produced * tax_factor,
            adjusted_target,
            adjusted_break_even,
            remaining_units,
            sales_tax_percent,
        })
    }
}

// ============================================================================
// PORTFOLIO
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioTotals {
    pub job_count: usize,
    pub total_revenue: f64,
    pub total_expenditure: f64,
    pub total_profit: f64,
}

impl PortfolioTotals {
    /// Tracked jobs are excluded
    pub fn compute(jobs: &[Job]) -> Self {
        jobs.iter()
            .filter(|job| !job.is_tracked())
            .fold(PortfolioTotals::default(), |mut totals, job| {
                let income = job.total_income();
                let expenditure = job.total_expenditure();
                totals.job_count += 1;
                totals.total_revenue += income;
                totals.total_expenditure += expenditure;
                totals.total_profit += income - expenditure;
                totals
            })
    }
}

/// Portfolio totals memoized on the identity of the job collection.
///
/// The store replaces its `Arc` on every mutation, so pointer equality means
/// the content is unchanged.
#[derive(Debug, Default)]
pub struct PortfolioMetrics {
    cached: Option<(Arc<Vec<Job>>, PortfolioTotals)>,
    computations: usize,
}

impl PortfolioMetrics {
    pub fn new() -> Self {
        PortfolioMetrics::default()
    }

    pub fn totals(&mut self, jobs: &Arc<Vec<Job>>) -> PortfolioTotals {
        if let Some((source, totals)) = &self.cached {
            if Arc::ptr_eq(source, jobs) {
                return *totals;
            }
        }

        let totals = PortfolioTotals::compute(jobs);
        self.computations += 1;
        debug!(jobs = totals.job_count, "Recomputed portfolio totals");
        self.cached = Some((Arc::clone(jobs), totals));
        totals
    }

    /// How many times totals were actually recomputed
    pub fn computations(&self) -> usize {
        self.computations
    }
}

// ============================================================================
// TESTS
// ============================================================================
