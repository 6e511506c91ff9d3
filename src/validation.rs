// ✅ Validation Harness - checks that gate persistence
//
// Every check runs independently and reports what it found (rows, columns,
// counts), not just pass/fail. Blocking failures stop the run before anything
// is written; advisory failures are logged and the run continues.
//
//   no_null_rows        blocking
//   schema_parity       blocking   (skipped on first run)
//   type_parity         blocking   (skipped on first run)
//   no_fan_out          blocking   (skipped on first run)
//   unique_identity     blocking
//   identity_gap_ratio  advisory

use crate::db::CleanStoreSnapshot;
use crate::entities::IdentityGap;
use crate::merge::MergedStudentRecord;
use crate::schema::{infer_column_types, merged_schema, ColumnType};
use rusqlite::types::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use tracing::{debug, error, info, warn};

/// How many offending items a one-line summary lists before eliding.
const SUMMARY_LIMIT: usize = 10;

// ============================================================================
// CHECKS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Logged, run continues
    Advisory,
    /// Run aborts before persistence
    Blocking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    NoNullRows,
    SchemaParity,
    TypeParity,
    NoFanOut,
    UniqueIdentity,
    IdentityGapRatio,
}

impl CheckKind {
    pub fn name(&self) -> &'static str {
        match self {
            CheckKind::NoNullRows => "no_null_rows",
            CheckKind::SchemaParity => "schema_parity",
            CheckKind::TypeParity => "type_parity",
            CheckKind::NoFanOut => "no_fan_out",
            CheckKind::UniqueIdentity => "unique_identity",
            CheckKind::IdentityGapRatio => "identity_gap_ratio",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            CheckKind::IdentityGapRatio => Severity::Advisory,
            _ => Severity::Blocking,
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// FINDINGS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct NullRow {
    pub uuid: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeMismatch {
    pub column: String,
    pub batch: ColumnType,
    pub store: ColumnType,
}

/// What a failed check found.
#[derive(Debug, Clone, PartialEq)]
pub enum Finding {
    NullCells {
        rows: Vec<NullRow>,
    },
    ColumnCount {
        batch: usize,
        store: usize,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
    TypeMismatch {
        columns: Vec<TypeMismatch>,
    },
    FanOut {
        before: usize,
        after: usize,
        repeated_uuids: Vec<String>,
    },
    DuplicateIdentity {
        within_batch: Vec<String>,
        already_stored: Vec<String>,
    },
    IdentityGaps {
        dropped: usize,
        delta: usize,
        threshold: f64,
        uuids: Vec<String>,
    },
}

fn elide(items: &[String]) -> String {
    if items.len() <= SUMMARY_LIMIT {
        items.join(", ")
    } else {
        format!(
            "{} ... and {} more",
            items[..SUMMARY_LIMIT].join(", "),
            items.len() - SUMMARY_LIMIT
        )
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Finding::NullCells { rows } => {
                let listed: Vec<String> = rows
                    .iter()
                    .map(|r| format!("{} [{}]", r.uuid, r.columns.join(", ")))
                    .collect();
                write!(f, "{} row(s) with missing data: {}", rows.len(), elide(&listed))
            }
            Finding::ColumnCount {
                batch,
                store,
                missing,
                unexpected,
            } => write!(
                f,
                "batch has {} column(s), clean store has {} (missing: [{}], unexpected: [{}])",
                batch,
                store,
                missing.join(", "),
                unexpected.join(", ")
            ),
            Finding::TypeMismatch { columns } => {
                let listed: Vec<String> = columns
                    .iter()
                    .map(|m| format!("{} (batch {}, store {})", m.column, m.batch, m.store))
                    .collect();
                write!(f, "{} column type mismatch(es): {}", columns.len(), elide(&listed))
            }
            Finding::FanOut {
                before,
                after,
                repeated_uuids,
            } => write!(
                f,
                "merge produced {} row(s) from {} student(s); repeated: {}",
                after,
                before,
                elide(repeated_uuids)
            ),
            Finding::DuplicateIdentity {
                within_batch,
                already_stored,
            } => write!(
                f,
                "duplicate uuid(s) in batch: [{}]; already in clean store: [{}]",
                elide(within_batch),
                elide(already_stored)
            ),
            Finding::IdentityGaps {
                dropped,
                delta,
                threshold,
                uuids,
            } => write!(
                f,
                "{} of {} delta row(s) dropped for missing linkage (threshold {:.0}%): {}",
                dropped,
                delta,
                threshold * 100.0,
                elide(uuids)
            ),
        }
    }
}

// ============================================================================
// REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum CheckStatus {
    Passed,
    Skipped(String),
    Failed(Finding),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub check: CheckKind,
    pub severity: Severity,
    pub status: CheckStatus,
}

impl CheckOutcome {
    fn new(check: CheckKind, status: CheckStatus) -> Self {
        CheckOutcome {
            check,
            severity: check.severity(),
            status,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, CheckStatus::Failed(_))
    }

    pub fn finding(&self) -> Option<&Finding> {
        match &self.status {
            CheckStatus::Failed(finding) => Some(finding),
            _ => None,
        }
    }
}

impl fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            CheckStatus::Passed => write!(f, "{}: passed", self.check),
            CheckStatus::Skipped(reason) => write!(f, "{}: skipped ({})", self.check, reason),
            CheckStatus::Failed(finding) => write!(f, "{}: {}", self.check, finding),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub outcomes: Vec<CheckOutcome>,
}

impl ValidationReport {
    pub fn outcome(&self, check: CheckKind) -> Option<&CheckOutcome> {
        self.outcomes.iter().find(|o| o.check == check)
    }

    pub fn blocking_failures(&self) -> Vec<&CheckOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.is_failure() && o.severity == Severity::Blocking)
            .collect()
    }

    pub fn advisories(&self) -> Vec<&CheckOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.is_failure() && o.severity == Severity::Advisory)
            .collect()
    }

    pub fn is_blocked(&self) -> bool {
        !self.blocking_failures().is_empty()
    }

    pub fn passed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == CheckStatus::Passed)
            .count()
    }

    pub fn skipped_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, CheckStatus::Skipped(_)))
            .count()
    }

    /// One line per blocking failure.
    pub fn failure_summary(&self) -> String {
        let lines: Vec<String> = self
            .blocking_failures()
            .iter()
            .map(|o| o.to_string())
            .collect();

        if lines.is_empty() {
            "no blocking failures".to_string()
        } else {
            lines.join("; ")
        }
    }
}

// ============================================================================
// HARNESS
// ============================================================================

/// Everything the checks look at.
pub struct ValidationInput<'a> {
    pub merged: &'a [MergedStudentRecord],
    /// Cleansed student rows going into the merge
    pub students_before_merge: usize,
    /// Raw delta rows going into cleansing
    pub delta_rows: usize,
    pub identity_gaps: &'a [IdentityGap],
    /// `None` on a first run
    pub prior: Option<&'a CleanStoreSnapshot>,
}

pub struct ValidationHarness {
    /// Advisory threshold for the share of delta rows dropped as identity gaps
    pub max_dropped_ratio: f64,
}

impl ValidationHarness {
    pub fn new() -> Self {
        ValidationHarness {
            max_dropped_ratio: 0.25,
        }
    }

    pub fn with_max_dropped_ratio(max_dropped_ratio: f64) -> Self {
        ValidationHarness { max_dropped_ratio }
    }

    pub fn validate(&self, input: &ValidationInput<'_>) -> ValidationReport {
        let rows: Vec<Vec<Value>> = input.merged.iter().map(|r| r.to_row()).collect();

        let mut report = ValidationReport::default();
        report.outcomes.push(check_no_null_rows(input.merged, &rows));

        match input.prior {
            Some(prior) => {
                report.outcomes.push(check_schema_parity(prior));
                report.outcomes.push(check_type_parity(&rows, prior));
                report.outcomes.push(check_no_fan_out(input));
            }
            None => {
                for check in [CheckKind::SchemaParity, CheckKind::TypeParity, CheckKind::NoFanOut] {
                    report.outcomes.push(CheckOutcome::new(
                        check,
                        CheckStatus::Skipped("first run, no prior snapshot".to_string()),
                    ));
                }
            }
        }

        report.outcomes.push(check_unique_identity(input));
        report.outcomes.push(self.check_identity_gap_ratio(input));

        log_report(&report);
        report
    }

    fn check_identity_gap_ratio(&self, input: &ValidationInput<'_>) -> CheckOutcome {
        let dropped = input.identity_gaps.len();
        let exceeded = input.delta_rows > 0
            && dropped as f64 / input.delta_rows as f64 > self.max_dropped_ratio;

        let status = if exceeded {
            CheckStatus::Failed(Finding::IdentityGaps {
                dropped,
                delta: input.delta_rows,
                threshold: self.max_dropped_ratio,
                uuids: input.identity_gaps.iter().map(|g| g.uuid.clone()).collect(),
            })
        } else {
            CheckStatus::Passed
        };
        CheckOutcome::new(CheckKind::IdentityGapRatio, status)
    }
}

impl Default for ValidationHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn is_missing(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Real(f) => f.is_nan(),
        _ => false,
    }
}

fn check_no_null_rows(merged: &[MergedStudentRecord], rows: &[Vec<Value>]) -> CheckOutcome {
    let schema = merged_schema();

    let null_rows: Vec<NullRow> = merged
        .iter()
        .zip(rows)
        .filter_map(|(record, row)| {
            let columns: Vec<String> = row
                .iter()
                .zip(&schema)
                .filter(|(value, _)| is_missing(value))
                .map(|(_, column)| column.name.clone())
                .collect();
            (!columns.is_empty()).then(|| NullRow {
                uuid: record.uuid.clone(),
                columns,
            })
        })
        .collect();

    let status = if null_rows.is_empty() {
        CheckStatus::Passed
    } else {
        CheckStatus::Failed(Finding::NullCells { rows: null_rows })
    };
    CheckOutcome::new(CheckKind::NoNullRows, status)
}

fn check_schema_parity(prior: &CleanStoreSnapshot) -> CheckOutcome {
    let batch = merged_schema();
    let batch_names: HashSet<&str> = batch.iter().map(|c| c.name.as_str()).collect();
    let store_names: HashSet<&str> = prior.columns.iter().map(|c| c.name.as_str()).collect();

    let status = if batch.len() == prior.columns.len() {
        CheckStatus::Passed
    } else {
        let missing = prior
            .columns
            .iter()
            .filter(|c| !batch_names.contains(c.name.as_str()))
            .map(|c| c.name.clone())
            .collect();
        let unexpected = batch
            .iter()
            .filter(|c| !store_names.contains(c.name.as_str()))
            .map(|c| c.name.clone())
            .collect();

        CheckStatus::Failed(Finding::ColumnCount {
            batch: batch.len(),
            store: prior.columns.len(),
            missing,
            unexpected,
        })
    };
    CheckOutcome::new(CheckKind::SchemaParity, status)
}

fn check_type_parity(rows: &[Vec<Value>], prior: &CleanStoreSnapshot) -> CheckOutcome {
    let batch = infer_column_types(&merged_schema(), rows);
    let store: HashMap<&str, ColumnType> = prior
        .columns
        .iter()
        .map(|c| (c.name.as_str(), c.column_type))
        .collect();

    let mismatches: Vec<TypeMismatch> = batch
        .iter()
        .filter_map(|column| {
            let store_type = *store.get(column.name.as_str())?;
            (store_type != column.column_type).then(|| TypeMismatch {
                column: column.name.clone(),
                batch: column.column_type,
                store: store_type,
            })
        })
        .collect();

    let status = if mismatches.is_empty() {
        CheckStatus::Passed
    } else {
        CheckStatus::Failed(Finding::TypeMismatch {
            columns: mismatches,
        })
    };
    CheckOutcome::new(CheckKind::TypeParity, status)
}

fn uuid_counts(merged: &[MergedStudentRecord]) -> BTreeMap<&str, usize> {
    let mut counts = BTreeMap::new();
    for record in merged {
        *counts.entry(record.uuid.as_str()).or_insert(0) += 1;
    }
    counts
}

fn repeated_uuids(merged: &[MergedStudentRecord]) -> Vec<String> {
    uuid_counts(merged)
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(uuid, _)| uuid.to_string())
        .collect()
}

fn check_no_fan_out(input: &ValidationInput<'_>) -> CheckOutcome {
    let after = input.merged.len();
    let before = input.students_before_merge;

    let status = if after == before {
        CheckStatus::Passed
    } else {
        CheckStatus::Failed(Finding::FanOut {
            before,
            after,
            repeated_uuids: repeated_uuids(input.merged),
        })
    };
    CheckOutcome::new(CheckKind::NoFanOut, status)
}

fn check_unique_identity(input: &ValidationInput<'_>) -> CheckOutcome {
    let within_batch = repeated_uuids(input.merged);
    let already_stored: Vec<String> = match input.prior {
        Some(prior) => uuid_counts(input.merged)
            .into_keys()
            .filter(|uuid| prior.uuids.contains(*uuid))
            .map(str::to_string)
            .collect(),
        None => Vec::new(),
    };

    let status = if within_batch.is_empty() && already_stored.is_empty() {
        CheckStatus::Passed
    } else {
        CheckStatus::Failed(Finding::DuplicateIdentity {
            within_batch,
            already_stored,
        })
    };
    CheckOutcome::new(CheckKind::UniqueIdentity, status)
}

fn log_report(report: &ValidationReport) {
    for outcome in &report.outcomes {
        let check = outcome.check.name();
        match (&outcome.status, outcome.severity) {
            (CheckStatus::Passed, _) => debug!(check, "validation check passed"),
            (CheckStatus::Skipped(reason), _) => info!(check, reason = %reason, "validation check skipped"),
            (CheckStatus::Failed(finding), Severity::Advisory) => {
                warn!(check, finding = %finding, "advisory validation check failed")
            }
            (CheckStatus::Failed(finding), Severity::Blocking) => {
                error!(check, finding = %finding, "blocking validation check failed")
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::merge_students;
    use crate::merge::tests::{clean_student, courses, jobs};
    use crate::schema::{merged_schema, Column};

    fn merged(uuids: &[&str]) -> Vec<MergedStudentRecord> {
        let students: Vec<_> = uuids.iter().map(|u| clean_student(u, 1.0, 1.0)).collect();
        merge_students(&students, &courses(), &jobs())
    }

    fn snapshot(uuids: &[&str]) -> CleanStoreSnapshot {
        CleanStoreSnapshot {
            columns: merged_schema(),
            uuids: uuids.iter().map(|u| u.to_string()).collect(),
            row_count: uuids.len(),
        }
    }

    fn input<'a>(
        merged: &'a [MergedStudentRecord],
        prior: Option<&'a CleanStoreSnapshot>,
    ) -> ValidationInput<'a> {
        ValidationInput {
            merged,
            students_before_merge: merged.len(),
            delta_rows: merged.len(),
            identity_gaps: &[],
            prior,
        }
    }

    #[test]
    fn test_clean_batch_passes_every_check() {
        let batch = merged(&["a", "b"]);
        let prior = snapshot(&["x"]);

        let report = ValidationHarness::new().validate(&input(&batch, Some(&prior)));

        assert!(!report.is_blocked());
        assert_eq!(report.passed_count(), 6);
        assert_eq!(report.failure_summary(), "no blocking failures");
    }

    #[test]
    fn test_first_run_skips_cross_run_checks() {
        let batch = merged(&["a"]);

        let report = ValidationHarness::new().validate(&input(&batch, None));

        assert!(!report.is_blocked());
        assert_eq!(report.skipped_count(), 3);
        assert!(matches!(
            report.outcome(CheckKind::SchemaParity).unwrap().status,
            CheckStatus::Skipped(_)
        ));
    }

    #[test]
    fn test_null_cell_blocks_and_names_row_and_column() {
        let mut batch = merged(&["a", "b"]);
        batch[1].job_category = None;
        batch[1].email = None;

        let report = ValidationHarness::new().validate(&input(&batch, None));

        assert!(report.is_blocked());
        let finding = report.outcome(CheckKind::NoNullRows).unwrap().finding().unwrap();
        assert_eq!(
            finding,
            &Finding::NullCells {
                rows: vec![NullRow {
                    uuid: "b".to_string(),
                    columns: vec!["email".to_string(), "job_category".to_string()],
                }]
            }
        );
        assert!(report.failure_summary().contains("no_null_rows"));
    }

    #[test]
    fn test_column_count_mismatch_blocks() {
        let batch = merged(&["a"]);
        let mut prior = snapshot(&["x"]);
        prior.columns.pop();
        prior.columns.push(Column::new("legacy_flag", ColumnType::Integer));
        prior.columns.push(Column::new("another", ColumnType::Text));

        let report = ValidationHarness::new().validate(&input(&batch, Some(&prior)));

        let finding = report.outcome(CheckKind::SchemaParity).unwrap().finding().unwrap();
        assert_eq!(
            finding,
            &Finding::ColumnCount {
                batch: 20,
                store: 21,
                missing: vec!["legacy_flag".to_string(), "another".to_string()],
                unexpected: vec!["avg_salary".to_string()],
            }
        );
    }

    #[test]
    fn test_type_mismatch_blocks() {
        let batch = merged(&["a"]);
        let mut prior = snapshot(&["x"]);
        prior.columns[4].column_type = ColumnType::Integer; // job_id

        let report = ValidationHarness::new().validate(&input(&batch, Some(&prior)));

        assert!(report.is_blocked());
        assert_eq!(
            report.outcome(CheckKind::TypeParity).unwrap().finding(),
            Some(&Finding::TypeMismatch {
                columns: vec![TypeMismatch {
                    column: "job_id".to_string(),
                    batch: ColumnType::Real,
                    store: ColumnType::Integer,
                }]
            })
        );
    }

    #[test]
    fn test_fan_out_blocks() {
        let mut batch = merged(&["a", "b"]);
        batch.push(batch[0].clone());
        let prior = snapshot(&["x"]);
        let mut inp = input(&batch, Some(&prior));
        inp.students_before_merge = 2;

        let report = ValidationHarness::new().validate(&inp);

        assert_eq!(
            report.outcome(CheckKind::NoFanOut).unwrap().finding(),
            Some(&Finding::FanOut {
                before: 2,
                after: 3,
                repeated_uuids: vec!["a".to_string()],
            })
        );
    }

    #[test]
    fn test_uuid_already_stored_blocks() {
        let batch = merged(&["abc"]);
        let prior = snapshot(&["abc"]);

        let report = ValidationHarness::new().validate(&input(&batch, Some(&prior)));

        assert!(matches!(
            report.outcome(CheckKind::UniqueIdentity).unwrap().finding(),
            Some(Finding::DuplicateIdentity { already_stored, .. }) if already_stored == &vec!["abc".to_string()]
        ));
    }

    #[test]
    fn test_identity_gap_ratio_is_advisory() {
        let batch = merged(&["a"]);
        let gaps = vec![
            IdentityGap { uuid: "g1".to_string(), missing: vec!["job_id".to_string()] },
            IdentityGap { uuid: "g2".to_string(), missing: vec!["job_id".to_string()] },
        ];
        let inp = ValidationInput {
            merged: &batch,
            students_before_merge: 1,
            delta_rows: 3,
            identity_gaps: &gaps,
            prior: None,
        };

        let report = ValidationHarness::new().validate(&inp);

        assert!(!report.is_blocked());
        assert_eq!(report.advisories().len(), 1);
        assert_eq!(report.advisories()[0].check, CheckKind::IdentityGapRatio);
    }
}
