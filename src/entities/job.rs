// 💼 Job Catalog - job categories and average salaries keyed by job_id
//
// The source table carries exact duplicate rows. Those are removed here so
// the student ⋈ job join does not fan out.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: i64,
    pub job_category: Option<String>,
    pub avg_salary: Option<f64>,
}

impl JobRecord {
    /// Hashable identity of the whole row (exact-duplicate detection).
    fn row_key(&self) -> (i64, Option<String>, Option<u64>) {
        (
            self.job_id,
            self.job_category.clone(),
            self.avg_salary.map(f64::to_bits),
        )
    }
}

/// Remove exact duplicate rows, keeping the first occurrence and input order.
pub fn cleanse_jobs(jobs: Vec<JobRecord>) -> Vec<JobRecord> {
    let mut seen = HashSet::new();
    jobs.into_iter()
        .filter(|job| seen.insert(job.row_key()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: i64, category: &str, salary: f64) -> JobRecord {
        JobRecord {
            job_id: id,
            job_category: Some(category.to_string()),
            avg_salary: Some(salary),
        }
    }

    #[test]
    fn test_exact_duplicates_removed() {
        let jobs = vec![
            job(1, "analytics", 86000.0),
            job(2, "engineer", 101000.0),
            job(1, "analytics", 86000.0),
            job(2, "engineer", 101000.0),
        ];

        let cleansed = cleanse_jobs(jobs);

        assert_eq!(cleansed, vec![job(1, "analytics", 86000.0), job(2, "engineer", 101000.0)]);
    }

    #[test]
    fn test_rows_differing_in_any_field_are_kept() {
        let jobs = vec![job(1, "analytics", 86000.0), job(1, "analytics", 90000.0)];

        let cleansed = cleanse_jobs(jobs.clone());

        assert_eq!(cleansed, jobs);
    }
}
