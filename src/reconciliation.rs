// ⚖️ Reconciliation Engine - one incremental run, start to finish
//
//   Start → ExtractRaw → DetectDelta ─┬─ NoNewData
//                                     └─ Cleanse ─┬─ NoNewData (every row dropped)
//                                                 └─ Merge → Validate ─┬─ Abort
//                                                                      ├─ DryRun
//                                                                      └─ Persist → WriteChangelog → Done
//
// Nothing is written before Validate passes. Persist appends to the clean
// store in one transaction and, before committing it, stages the rebuilt CSV
// mirror and the next changelog as temp files. A staging failure rolls the
// append back. After the commit the mirror is renamed into place, then the
// changelog. A run that finds nothing new writes nothing.

use crate::changelog::{Changelog, SemVer};
use crate::db::{CleanStore, PriorState};
use crate::delta::{detect_delta, StudentDelta};
use crate::entities::{
    cleanse_courses, cleanse_jobs, cleanse_students, fingerprint, CourseRecord, IdentityGap,
    JobRecord, RawStudentRecord, StudentCleanse,
};
use crate::error::{ReconcileError, ValidationFailure};
use crate::merge::{merge_students, MergedStudentRecord};
use crate::mirror::stage_csv_mirror;
use crate::source::RawSource;
use crate::staging::StagedFile;
use crate::validation::{ValidationHarness, ValidationInput, ValidationReport};
use chrono::NaiveDate;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info, info_span, warn, Dispatch};
use uuid::Uuid;

// ============================================================================
// RUN RESULT
// ============================================================================

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub as_of: NaiveDate,
    pub first_run: bool,
    /// Raw rows not yet in the clean store
    pub delta_rows: usize,
    pub identity_gaps: Vec<IdentityGap>,
    /// Rows appended to the clean store (0 on a dry run)
    pub rows_appended: usize,
    /// Clean store size after the run
    pub total_rows: i64,
    /// Changelog version written; `None` on a dry run
    pub version: Option<SemVer>,
    /// SHA-256 of the merged batch; `None` if it could not be computed
    pub fingerprint: Option<String>,
    pub report: ValidationReport,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Persisted(RunSummary),
    NoNewData {
        run_id: Uuid,
        already_stored: usize,
        /// Delta rows dropped during cleansing
        identity_gaps: usize,
    },
    DryRun(RunSummary),
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Persisted(_) => "persisted",
            RunOutcome::NoNewData { .. } => "no_new_data",
            RunOutcome::DryRun(_) => "dry_run",
        }
    }

    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            RunOutcome::Persisted(summary) | RunOutcome::DryRun(summary) => Some(summary),
            RunOutcome::NoNewData { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputPaths {
    pub csv_mirror: PathBuf,
    pub changelog: PathBuf,
}

// ============================================================================
// STATE MACHINE
// ============================================================================

struct Extracted {
    students: Vec<RawStudentRecord>,
    courses: Vec<CourseRecord>,
    jobs: Vec<JobRecord>,
}

struct Cleansed {
    prior_state: PriorState,
    delta_rows: usize,
    students: StudentCleanse,
    courses: Vec<CourseRecord>,
    jobs: Vec<JobRecord>,
}

struct Batch {
    prior_state: PriorState,
    delta_rows: usize,
    students_before_merge: usize,
    identity_gaps: Vec<IdentityGap>,
    merged: Vec<MergedStudentRecord>,
    fingerprint: Option<String>,
}

enum RunState {
    Start,
    ExtractRaw,
    DetectDelta(Extracted),
    Cleanse {
        delta: StudentDelta,
        prior_state: PriorState,
        courses: Vec<CourseRecord>,
        jobs: Vec<JobRecord>,
    },
    Merge(Cleansed),
    Validate(Batch),
    Persist(Batch, ValidationReport),
    WriteChangelog(RunSummary, Option<StagedFile>),
    Done(RunOutcome),
}

impl RunState {
    fn name(&self) -> &'static str {
        match self {
            RunState::Start => "start",
            RunState::ExtractRaw => "extract_raw",
            RunState::DetectDelta(_) => "detect_delta",
            RunState::Cleanse { .. } => "cleanse",
            RunState::Merge(_) => "merge",
            RunState::Validate(_) => "validate",
            RunState::Persist(..) => "persist",
            RunState::WriteChangelog(..) => "write_changelog",
            RunState::Done(_) => "done",
        }
    }
}

// ============================================================================
// RECONCILER
// ============================================================================

pub struct Reconciler<'a, S: RawSource, C: CleanStore> {
    source: &'a S,
    store: &'a mut C,
    outputs: OutputPaths,
    as_of: NaiveDate,
    harness: ValidationHarness,
    /// Table name quoted in changelog entries
    table_label: String,
    dry_run: bool,
}

impl<'a, S: RawSource, C: CleanStore> Reconciler<'a, S, C> {
    pub fn new(source: &'a S, store: &'a mut C, outputs: OutputPaths, as_of: NaiveDate) -> Self {
        Reconciler {
            source,
            store,
            outputs,
            as_of,
            harness: ValidationHarness::new(),
            table_label: "student_info".to_string(),
            dry_run: false,
        }
    }

    pub fn with_harness(mut self, harness: ValidationHarness) -> Self {
        self.harness = harness;
        self
    }

    pub fn with_table_label(mut self, table: &str) -> Self {
        self.table_label = table.to_string();
        self
    }

    /// Stop after validation without writing anything.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Run with logs routed to `dispatch` for the duration of the run.
    pub fn run_with_sink(&mut self, dispatch: &Dispatch) -> Result<RunOutcome, ReconcileError> {
        tracing::dispatcher::with_default(dispatch, || self.run())
    }

    pub fn run(&mut self) -> Result<RunOutcome, ReconcileError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("reconcile", %run_id, as_of = %self.as_of);
        let _enter = span.enter();

        info!(dry_run = self.dry_run, "reconciliation started");
        let started = Instant::now();

        let result = self.drive(run_id);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(outcome) => info!(outcome = outcome.label(), elapsed_ms, "reconciliation finished"),
            Err(ReconcileError::Validation(failure)) => error!(
                blocking = failure.report.blocking_failures().len(),
                elapsed_ms,
                "reconciliation aborted, nothing persisted: {}",
                failure
            ),
            Err(err) => error!(elapsed_ms, "reconciliation failed: {}", err),
        }
        result
    }

    fn drive(&mut self, run_id: Uuid) -> Result<RunOutcome, ReconcileError> {
        let mut state = RunState::Start;

        loop {
            let from = state.name();
            state = self.step(run_id, state)?;
            tracing::debug!(from, to = state.name(), "state transition");

            if let RunState::Done(outcome) = state {
                return Ok(outcome);
            }
        }
    }

    fn step(&mut self, run_id: Uuid, state: RunState) -> Result<RunState, ReconcileError> {
        let next = match state {
            RunState::Start => RunState::ExtractRaw,

            RunState::ExtractRaw => {
                let extracted = Extracted {
                    students: self.source.read_students().map_err(ReconcileError::Source)?,
                    courses: self.source.read_courses().map_err(ReconcileError::Source)?,
                    jobs: self.source.read_jobs().map_err(ReconcileError::Source)?,
                };
                info!(
                    students = extracted.students.len(),
                    courses = extracted.courses.len(),
                    jobs = extracted.jobs.len(),
                    "extracted raw source"
                );
                RunState::DetectDelta(extracted)
            }

            RunState::DetectDelta(extracted) => {
                let prior_state = self.store.prior_state();
                let delta = detect_delta(extracted.students, &prior_state);

                if delta.is_empty() {
                    info!(already_stored = delta.already_stored, "no new data");
                    RunState::Done(RunOutcome::NoNewData {
                        run_id,
                        already_stored: delta.already_stored,
                        identity_gaps: 0,
                    })
                } else {
                    RunState::Cleanse {
                        delta,
                        prior_state,
                        courses: extracted.courses,
                        jobs: extracted.jobs,
                    }
                }
            }

            RunState::Cleanse {
                delta,
                prior_state,
                courses,
                jobs,
            } => {
                let students = cleanse_students(&delta.students, self.as_of)?;
                let courses = cleanse_courses(courses);
                let jobs = cleanse_jobs(jobs);

                for gap in &students.identity_gaps {
                    warn!(uuid = %gap.uuid, missing = ?gap.missing, "dropped student with identity gap");
                }
                info!(
                    delta = delta.len(),
                    kept = students.records.len(),
                    dropped = students.identity_gaps.len(),
                    courses = courses.len(),
                    jobs = jobs.len(),
                    "cleansed delta"
                );

                if students.records.is_empty() {
                    info!("every delta row was dropped, no new data");
                    RunState::Done(RunOutcome::NoNewData {
                        run_id,
                        already_stored: delta.already_stored,
                        identity_gaps: students.identity_gaps.len(),
                    })
                } else {
                    RunState::Merge(Cleansed {
                        prior_state,
                        delta_rows: delta.len(),
                        students,
                        courses,
                        jobs,
                    })
                }
            }

            RunState::Merge(cleansed) => {
                let merged = merge_students(&cleansed.students.records, &cleansed.courses, &cleansed.jobs);
                let fingerprint = fingerprint(&merged)
                    .map_err(|err| warn!(error = %err, "could not fingerprint merged batch"))
                    .ok();
                info!(rows = merged.len(), fingerprint = ?fingerprint, "merged delta");

                RunState::Validate(Batch {
                    prior_state: cleansed.prior_state,
                    delta_rows: cleansed.delta_rows,
                    students_before_merge: cleansed.students.records.len(),
                    identity_gaps: cleansed.students.identity_gaps,
                    merged,
                    fingerprint,
                })
            }

            RunState::Validate(batch) => {
                let report = self.harness.validate(&ValidationInput {
                    merged: &batch.merged,
                    students_before_merge: batch.students_before_merge,
                    delta_rows: batch.delta_rows,
                    identity_gaps: &batch.identity_gaps,
                    prior: batch.prior_state.snapshot(),
                });

                if report.is_blocked() {
                    return Err(ValidationFailure { report }.into());
                }

                if self.dry_run {
                    let total_rows = self.store.count().map_err(ReconcileError::Store)?;
                    RunState::Done(RunOutcome::DryRun(RunSummary {
                        run_id,
                        as_of: self.as_of,
                        first_run: batch.prior_state.is_first_run(),
                        delta_rows: batch.delta_rows,
                        identity_gaps: batch.identity_gaps,
                        rows_appended: 0,
                        total_rows,
                        version: None,
                        fingerprint: batch.fingerprint,
                        report,
                    }))
                } else {
                    RunState::Persist(batch, report)
                }
            }

            RunState::Persist(batch, report) => {
                let mut changelog =
                    Changelog::load(&self.outputs.changelog).map_err(ReconcileError::Changelog)?;
                let version = changelog.record_added(batch.merged.len(), &self.table_label);

                let outputs = &self.outputs;
                let mut staged_mirror = None;
                let mut staged_changelog = None;
                let mut stage_error = None;
                let mut total_rows = 0i64;

                let appended = self.store.append_staged(
                    &batch.merged,
                    &mut |contents: &[MergedStudentRecord]| -> anyhow::Result<()> {
                        total_rows = contents.len() as i64;
                        match stage_csv_mirror(&outputs.csv_mirror, contents) {
                            Ok(file) => staged_mirror = Some(file),
                            Err(err) => {
                                stage_error = Some(ReconcileError::Mirror(err));
                                anyhow::bail!("staging CSV mirror failed");
                            }
                        }
                        match changelog.stage(&outputs.changelog) {
                            Ok(file) => staged_changelog = Some(file),
                            Err(err) => {
                                stage_error = Some(ReconcileError::Changelog(err));
                                anyhow::bail!("staging changelog failed");
                            }
                        }
                        Ok(())
                    },
                );
                let rows_appended = match appended {
                    Ok(rows) => rows,
                    Err(err) => return Err(stage_error.unwrap_or(ReconcileError::Store(err))),
                };
                info!(rows_appended, total_rows, "appended to clean store");

                if let Some(mirror) = staged_mirror {
                    mirror.commit().map_err(ReconcileError::Mirror)?;
                    info!(rows = total_rows, path = %self.outputs.csv_mirror.display(), "rewrote CSV mirror");
                }

                RunState::WriteChangelog(
                    RunSummary {
                        run_id,
                        as_of: self.as_of,
                        first_run: batch.prior_state.is_first_run(),
                        delta_rows: batch.delta_rows,
                        identity_gaps: batch.identity_gaps,
                        rows_appended,
                        total_rows,
                        version: Some(version),
                        fingerprint: batch.fingerprint,
                        report,
                    },
                    staged_changelog,
                )
            }

            RunState::WriteChangelog(summary, staged) => {
                if let Some(file) = staged {
                    file.commit().map_err(ReconcileError::Changelog)?;
                }
                if let Some(version) = summary.version {
                    info!(%version, rows = summary.rows_appended, "changelog updated");
                }
                RunState::Done(RunOutcome::Persisted(summary))
            }

            RunState::Done(outcome) => RunState::Done(outcome),
        };

        Ok(next)
    }
}

// ============================================================================
// TESTS
// ============================================================================
