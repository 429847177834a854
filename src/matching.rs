// 🎯 Job Matcher - Eligibility policies as data
// Picks the job a pasted transaction belongs to.
//
// One table row per direction decides which statuses are eligible and which
// strategy runs over them. Sales follow the output item; purchases follow the
// outstanding bill-of-materials need.

use crate::entities::{Direction, Job, JobStatus};
use serde::Serialize;
use tracing::debug;

// ============================================================================
// ELIGIBILITY POLICY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchStrategy {
    /// Income: item sold is the job's output
    OutputItem,
    /// Expenditure: item is a material the job still needs
    OutstandingNeed,
}

#[derive(Debug, Clone, Copy)]
pub struct EligibilityPolicy {
    pub direction: Direction,
    pub statuses: &'static [JobStatus],
    pub strategy: MatchStrategy,
}

impl EligibilityPolicy {
    pub fn is_eligible(&self, job: &Job) -> bool {
        self.statuses.contains(&job.status)
    }
}

pub const POLICIES: [EligibilityPolicy; 2] = [
    EligibilityPolicy {
        direction: Direction::Income,
        statuses: &[JobStatus::Running, JobStatus::Selling, JobStatus::Tracked],
        strategy: MatchStrategy::OutputItem,
    },
    EligibilityPolicy {
        direction: Direction::Expenditure,
        statuses: &[JobStatus::Acquisition],
        strategy: MatchStrategy::OutstandingNeed,
    },
];

pub fn policy_for(direction: Direction) -> &'static EligibilityPolicy {
    match direction {
        Direction::Income => &POLICIES[0],
        Direction::Expenditure => &POLICIES[1],
    }
}

// ============================================================================
// MATCH RESULT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchReason {
    ExactOutput,
    CaseInsensitiveOutput,
    TrackedExactOutput,
    TrackedCaseInsensitiveOutput,
    /// Tracked job whose BOM lists the item
    TrackedMaterial,
    OutstandingNeed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobMatch {
    pub job_id: String,
    pub reason: MatchReason,
}

// ============================================================================
// MATCHER
// ============================================================================

/// Matcher over the eligible subset of a job collection.
///
/// Eligibility is filtered once; collection order is preserved, so "first"
/// means first in the order the jobs were loaded.
pub struct JobMatcher<'a> {
    policy: &'static EligibilityPolicy,
    eligible: Vec<&'a Job>,
}

impl<'a> JobMatcher<'a> {
    pub fn new(jobs: &'a [Job], direction: Direction) -> Self {
        let policy = policy_for(direction);
        let eligible = jobs.iter().filter(|job| policy.is_eligible(job)).collect();
        JobMatcher { policy, eligible }
    }

    pub fn direction(&self) -> Direction {
        self.policy.direction
    }

    pub fn eligible_jobs(&self) -> &[&'a Job] {
        &self.eligible
    }

    /// Whether manual assignment to this job is allowed for this direction
    pub fn is_eligible(&self, job_id: &str) -> bool {
        self.eligible.iter().any(|job| job.id == job_id)
    }

    pub fn find_match(&self, item_name: &str) -> Option<JobMatch> {
        let item_name = item_name.trim();
        let result = match self.policy.strategy {
            MatchStrategy::OutputItem => self.match_output_item(item_name),
            MatchStrategy::OutstandingNeed => self.match_outstanding_need(item_name),
        };

        match &result {
            Some(found) => debug!(
                item = item_name,
                job_id = %found.job_id,
                reason = ?found.reason,
                "Matched transaction to job"
            ),
            None => debug!(item = item_name, direction = %self.direction(), "No eligible job"),
        }

        result
    }

    pub fn find_match_id(&self, item_name: &str) -> Option<String> {
        self.find_match(item_name).map(|found| found.job_id)
    }

    fn match_output_item(&self, item_name: &str) -> Option<JobMatch> {
        let (tracked, lifecycle): (Vec<&Job>, Vec<&Job>) =
            self.eligible.iter().copied().partition(|job| job.is_tracked());

        let exact = |jobs: &[&Job]| {
            jobs.iter()
                .find(|job| job.output_item == item_name)
                .map(|job| job.id.clone())
        };
        let relaxed = |jobs: &[&Job]| {
            jobs.iter()
                .find(|job| job.output_item.eq_ignore_ascii_case(item_name))
                .map(|job| job.id.clone())
        };

        let found = exact(&lifecycle)
            .map(|id| (id, MatchReason::ExactOutput))
            .or_else(|| relaxed(&lifecycle).map(|id| (id, MatchReason::CaseInsensitiveOutput)))
            .or_else(|| exact(&tracked).map(|id| (id, MatchReason::TrackedExactOutput)))
            .or_else(|| {
                relaxed(&tracked).map(|id| (id, MatchReason::TrackedCaseInsensitiveOutput))
            })
            .or_else(|| {
                tracked
                    .iter()
                    .find(|job| job.bom_requirement(item_name).is_some())
                    .map(|job| (job.id.clone(), MatchReason::TrackedMaterial))
            });

        found.map(|(job_id, reason)| JobMatch { job_id, reason })
    }

    fn match_outstanding_need(&self, item_name: &str) -> Option<JobMatch> {
        self.eligible
            .iter()
            .find(|job| match job.bom_requirement(item_name) {
                Some(required) => job.expended_quantity(item_name) < required.quantity,
                None => false,
            })
            .map(|job| JobMatch {
                job_id: job.id.clone(),
                reason: MatchReason::OutstandingNeed,
            })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{BillItem, TransactionRecord};

    fn create_test_job(id: &str, output: &str, status: JobStatus) -> Job {
        Job {
            id: id.to_string(),
            output_item: output.to_string(),
            output_quantity: 10,
            status,
            produced: 0,
            projected_cost: 0.0,
            projected_revenue: 0.0,
            job_start: None,
            job_end: None,
            sale_start: None,
            sale_end: None,
            runtime: None,
            created: None,
            bill_of_materials: vec![],
            consumed_materials: vec![],
            expenditures: vec![],
            income: vec![],
        }
    }

    fn with_bom(mut job: Job, name: &str, quantity: u64) -> Job {
        job.bill_of_materials.push(BillItem {
            id: format!("{}-{}", job.id, name),
            name: name.to_string(),
            quantity,
        });
        job
    }

    fn with_expenditure(mut job: Job, name: &str, quantity: u64) -> Job {
        job.expenditures.push(TransactionRecord {
            id: format!("{}-tx-{}", job.id, job.expenditures.len()),
            job_id: job.id.clone(),
            date: "2025-07-04T10:58:00.000Z".to_string(),
            quantity,
            item_name: name.to_string(),
            unit_price: 5.0,
            total_price: 5.0 * quantity as f64,
            buyer: String::new(),
            location: String::new(),
            corporation: String::new(),
            wallet: String::new(),
            created: None,
        });
        job
    }

    #[test]
    fn test_policy_table() {
        assert_eq!(policy_for(Direction::Income).strategy, MatchStrategy::OutputItem);
        assert_eq!(
            policy_for(Direction::Expenditure).statuses,
            &[JobStatus::Acquisition]
        );
        assert!(!policy_for(Direction::Income)
            .statuses
            .contains(&JobStatus::Done));
    }

    #[test]
    fn test_cost_matching_exclusivity() {
        let satisfied = with_expenditure(
            with_bom(create_test_job("a", "Rifter", JobStatus::Acquisition), "Tritanium", 100),
            "Tritanium",
            100,
        );
        let needing = with_bom(create_test_job("b", "Slasher", JobStatus::Acquisition), "Tritanium", 100);
        let jobs = vec![satisfied, needing];

        let matcher = JobMatcher::new(&jobs, Direction::Expenditure);
        let found = matcher.find_match("Tritanium").unwrap();

        assert_eq!(found.job_id, "b");
        assert_eq!(found.reason, MatchReason::OutstandingNeed);
    }

    #[test]
    fn test_cost_matching_first_in_collection_order() {
        let jobs = vec![
            with_bom(create_test_job("a", "Rifter", JobStatus::Acquisition), "tritanium", 100),
            with_bom(create_test_job("b", "Slasher", JobStatus::Acquisition), "Tritanium", 100),
        ];
        let matcher = JobMatcher::new(&jobs, Direction::Expenditure);
        assert_eq!(matcher.find_match_id("Tritanium").as_deref(), Some("a"));
    }

    #[test]
    fn test_cost_matching_ignores_ineligible_status() {
        let jobs = vec![with_bom(
            create_test_job("a", "Rifter", JobStatus::Running),
            "Tritanium",
            100,
        )];
        let matcher = JobMatcher::new(&jobs, Direction::Expenditure);
        assert!(matcher.find_match("Tritanium").is_none());
        assert!(!matcher.is_eligible("a"));
    }

    #[test]
    fn test_income_prefers_exact_output() {
        let jobs = vec![
            create_test_job("loose", "rifter", JobStatus::Selling),
            create_test_job("exact", "Rifter", JobStatus::Running),
        ];
        let matcher = JobMatcher::new(&jobs, Direction::Income);
        let found = matcher.find_match("Rifter").unwrap();
        assert_eq!(found.job_id, "exact");
        assert_eq!(found.reason, MatchReason::ExactOutput);

        let found = matcher.find_match("RIFTER").unwrap();
        assert_eq!(found.job_id, "loose");
        assert_eq!(found.reason, MatchReason::CaseInsensitiveOutput);
    }

    #[test]
    fn test_income_lifecycle_jobs_beat_tracked() {
        let jobs = vec![
            create_test_job("tracked", "Rifter", JobStatus::Tracked),
            create_test_job("selling", "rifter", JobStatus::Selling),
        ];
        let matcher = JobMatcher::new(&jobs, Direction::Income);
        assert_eq!(matcher.find_match_id("Rifter").as_deref(), Some("selling"));
    }

    #[test]
    fn test_income_tracked_fallbacks() {
        let jobs = vec![
            create_test_job("done", "Rifter", JobStatus::Done),
            create_test_job("tracked", "Rifter", JobStatus::Tracked),
            with_bom(create_test_job("reprocess", "Scrap", JobStatus::Tracked), "Pyerite", 1),
        ];
        let matcher = JobMatcher::new(&jobs, Direction::Income);

        let found = matcher.find_match("Rifter").unwrap();
        assert_eq!(found.job_id, "tracked");
        assert_eq!(found.reason, MatchReason::TrackedExactOutput);

        let found = matcher.find_match("pyerite").unwrap();
        assert_eq!(found.job_id, "reprocess");
        assert_eq!(found.reason, MatchReason::TrackedMaterial);

        assert!(matcher.find_match("Isogen").is_none());
    }
}
