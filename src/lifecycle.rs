// ⏰ Job Lifecycle - Status transitions, ordering, attention, durations
//
// Planned → Acquisition → Running → Done → Selling → Closed
// Tracked sits outside the lifecycle and has no neighbours.
//
// Entering Running, Done, Selling or Closed stamps the matching timestamp.

use crate::entities::{Job, JobPatch, JobStatus};
use crate::materials::materials_satisfied;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use std::cmp::Ordering;

// ============================================================================
// TRANSITIONS
// ============================================================================

const LIFECYCLE: [JobStatus; 6] = [
    JobStatus::Planned,
    JobStatus::Acquisition,
    JobStatus::Running,
    JobStatus::Done,
    JobStatus::Selling,
    JobStatus::Closed,
];

fn lifecycle_index(status: JobStatus) -> Option<usize> {
    LIFECYCLE.iter().position(|s| *s == status)
}

pub fn next_status(status: JobStatus) -> Option<JobStatus> {
    lifecycle_index(status).and_then(|i| LIFECYCLE.get(i + 1).copied())
}

pub fn previous_status(status: JobStatus) -> Option<JobStatus> {
    lifecycle_index(status)
        .and_then(|i| i.checked_sub(1))
        .map(|i| LIFECYCLE[i])
}

pub fn to_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|time| time.with_timezone(&Utc))
}

/// Patch for moving a job to `status`, stamping the timestamp that status owns
pub fn status_change_patch(status: JobStatus, now: DateTime<Utc>) -> JobPatch {
    let stamp = Some(to_timestamp(now));
    let mut patch = JobPatch {
        status: Some(status),
        ..JobPatch::default()
    };

    match status {
        JobStatus::Running => patch.job_start = stamp,
        JobStatus::Done => patch.job_end = stamp,
        JobStatus::Selling => patch.sale_start = stamp,
        JobStatus::Closed => patch.sale_end = stamp,
        _ => {}
    }

    patch
}

// ============================================================================
// ORDERING & CATEGORIES
// ============================================================================

/// Display priority: work needing action first, parked jobs last
pub fn sort_priority(status: JobStatus) -> u8 {
    match status {
        JobStatus::Acquisition => 1,
        JobStatus::Running => 2,
        JobStatus::Done => 3,
        JobStatus::Selling => 4,
        JobStatus::Closed => 5,
        JobStatus::Planned => 6,
        JobStatus::Tracked => 7,
    }
}

fn compare_jobs(a: &Job, b: &Job) -> Ordering {
    sort_priority(a.status)
        .cmp(&sort_priority(b.status))
        .then_with(|| {
            // Newest first; jobs without a creation time go last
            let created_a = a.created.as_deref().and_then(parse_timestamp);
            let created_b = b.created.as_deref().and_then(parse_timestamp);
            created_b.cmp(&created_a)
        })
}

pub fn sort_jobs(jobs: &mut [Job]) {
    jobs.sort_by(compare_jobs);
}

#[derive(Debug, Clone, Default)]
pub struct CategorizedJobs {
    pub regular: Vec<Job>,
    pub tracked: Vec<Job>,
}

/// Sort, filter by case-insensitive output item search, and split off Tracked jobs
pub fn categorize_jobs(jobs: &[Job], query: &str) -> CategorizedJobs {
    let query = query.trim().to_lowercase();
    let mut sorted: Vec<Job> = jobs.to_vec();
    sort_jobs(&mut sorted);

    let mut categorized = CategorizedJobs::default();
    for job in sorted {
        if !query.is_empty() && !job.output_item.to_lowercase().contains(&query) {
            continue;
        }
        if job.is_tracked() {
            categorized.tracked.push(job);
        } else {
            categorized.regular.push(job);
        }
    }
    categorized
}

// ============================================================================
// ATTENTION & DURATIONS
// ============================================================================

/// Seconds left until a running job finishes, never negative.
/// `None` when start time or runtime is unknown.
pub fn remaining_runtime(job: &Job, now: DateTime<Utc>) -> Option<i64> {
    let runtime = job.runtime.filter(|runtime| *runtime > 0)?;
    let start = parse_timestamp(job.job_start.as_deref()?)?;
    let runtime = i64::try_from(runtime).ok()?;
    let finish = start + Duration::try_seconds(runtime)?;
    Some((finish - now).num_seconds().max(0))
}

/// A job waiting on the user to move it along
pub fn needs_attention(job: &Job, now: DateTime<Utc>) -> bool {
    match job.status {
        JobStatus::Acquisition => {
            !job.bill_of_materials.is_empty() && materials_satisfied(job)
        }
        JobStatus::Running => matches!(remaining_runtime(job, now), Some(0)),
        JobStatus::Selling => job.produced > 0 && job.items_sold() >= job.produced,
        _ => false,
    }
}

/// `1w 2d 3h`, `Ready!` once elapsed
pub fn format_duration(seconds: i64) -> String {
    if seconds <= 0 {
        return "Ready!".to_string();
    }

    const UNITS: [(&str, i64); 5] = [("w", 604_800), ("d", 86_400), ("h", 3_600), ("m", 60), ("s", 1)];

    let mut remaining = seconds;
    let mut parts = Vec::new();
    for (name, size) in UNITS {
        if remaining >= size {
            parts.push(format!("{}{}", remaining / size, name));
            remaining %= size;
        }
    }
    parts.join(" ")
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{BillItem, TransactionRecord};
    use chrono::TimeZone;

    fn create_test_job(id: &str, output: &str, status: JobStatus, created: Option<&str>) -> Job {
        Job {
            id: id.to_string(),
            output_item: output.to_string(),
            output_quantity: 1,
            status,
            produced: 0,
            projected_cost: 0.0,
            projected_revenue: 0.0,
            job_start: None,
            job_end: None,
            sale_start: None,
            sale_end: None,
            runtime: None,
            created: created.map(str::to_string),
            bill_of_materials: vec![],
            consumed_materials: vec![],
            expenditures: vec![],
            income: vec![],
        }
    }

    fn create_test_transaction(item: &str, quantity: u64) -> TransactionRecord {
        TransactionRecord {
            id: format!("tx-{}", item),
            job_id: "job1".to_string(),
            date: "2025-07-04T10:58:00.000Z".to_string(),
            quantity,
            item_name: item.to_string(),
            unit_price: 1.0,
            total_price: quantity as f64,
            buyer: String::new(),
            location: String::new(),
            corporation: String::new(),
            wallet: String::new(),
            created: None,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 4, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_next_and_previous() {
        assert_eq!(next_status(JobStatus::Planned), Some(JobStatus::Acquisition));
        assert_eq!(next_status(JobStatus::Selling), Some(JobStatus::Closed));
        assert_eq!(next_status(JobStatus::Closed), None);
        assert_eq!(previous_status(JobStatus::Planned), None);
        assert_eq!(previous_status(JobStatus::Running), Some(JobStatus::Acquisition));
        assert_eq!(next_status(JobStatus::Tracked), None);
        assert_eq!(previous_status(JobStatus::Tracked), None);
    }

    #[test]
    fn test_status_change_stamps_dates() {
        let patch = status_change_patch(JobStatus::Running, now());
        assert_eq!(patch.status, Some(JobStatus::Running));
        assert_eq!(patch.job_start.as_deref(), Some("2025-07-04T12:00:00.000Z"));
        assert!(patch.job_end.is_none());

        assert!(status_change_patch(JobStatus::Closed, now()).sale_end.is_some());
        assert!(status_change_patch(JobStatus::Selling, now()).sale_start.is_some());

        let planned = status_change_patch(JobStatus::Planned, now());
        assert!(planned.job_start.is_none() && planned.sale_end.is_none());
    }

    #[test]
    fn test_sort_by_priority_then_newest() {
        let mut jobs = vec![
            create_test_job("planned", "A", JobStatus::Planned, None),
            create_test_job("old", "B", JobStatus::Acquisition, Some("2025-01-01T00:00:00.000Z")),
            create_test_job("tracked", "C", JobStatus::Tracked, None),
            create_test_job("new", "D", JobStatus::Acquisition, Some("2025-06-01T00:00:00.000Z")),
            create_test_job("running", "E", JobStatus::Running, None),
        ];

        sort_jobs(&mut jobs);
        let ids: Vec<&str> = jobs.iter().map(|job| job.id.as_str()).collect();

        assert_eq!(ids, vec!["new", "old", "running", "planned", "tracked"]);
    }

    #[test]
    fn test_categorize_jobs() {
        let jobs = vec![
            create_test_job("a", "Rifter", JobStatus::Selling, None),
            create_test_job("b", "Slasher", JobStatus::Running, None),
            create_test_job("c", "Rifter Blueprint", JobStatus::Tracked, None),
        ];

        let all = categorize_jobs(&jobs, "");
        assert_eq!(all.regular.len(), 2);
        assert_eq!(all.tracked.len(), 1);

        let rifters = categorize_jobs(&jobs, "RIFT");
        assert_eq!(rifters.regular.len(), 1);
        assert_eq!(rifters.regular[0].id, "a");
        assert_eq!(rifters.tracked[0].id, "c");
    }

    #[test]
    fn test_needs_attention() {
        let mut acquiring = create_test_job("a", "Rifter", JobStatus::Acquisition, None);
        assert!(!needs_attention(&acquiring, now()));
        acquiring.bill_of_materials.push(BillItem {
            id: "b1".to_string(),
            name: "Tritanium".to_string(),
            quantity: 10,
        });
        assert!(!needs_attention(&acquiring, now()));
        acquiring.expenditures.push(create_test_transaction("Tritanium", 10));
        assert!(needs_attention(&acquiring, now()));

        let mut running = create_test_job("r", "Rifter", JobStatus::Running, None);
        running.job_start = Some("2025-07-04T11:00:00.000Z".to_string());
        running.runtime = Some(3600);
        assert!(needs_attention(&running, now()));
        running.runtime = Some(7200);
        assert!(!needs_attention(&running, now()));
        assert_eq!(remaining_runtime(&running, now()), Some(3600));

        let mut selling = create_test_job("s", "Rifter", JobStatus::Selling, None);
        assert!(!needs_attention(&selling, now()));
        selling.produced = 2;
        selling.income.push(create_test_transaction("Rifter", 2));
        assert!(needs_attention(&selling, now()));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "Ready!");
        assert_eq!(format_duration(-5), "Ready!");
        assert_eq!(format_duration(59), "59s");
        assert_eq!(format_duration(604_800 + 2 * 86_400 + 3 * 3_600), "1w 2d 3h");
        assert_eq!(format_duration(3_661), "1h 1m 1s");
    }
}
