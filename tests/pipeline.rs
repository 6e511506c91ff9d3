// End-to-end runs over real SQLite source/clean stores in a temp directory.

use chrono::NaiveDate;
use enrollment_reconcile::{
    Changelog, CleanStore, OutputPaths, ReconcileConfig, Reconciler, RunLogSink, RunOutcome,
    SemVer, SqliteCleanStore, SqliteSource,
};
use rusqlite::Connection;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const SCHEMA: &str = "
CREATE TABLE cademycode_students (
    uuid INTEGER, name TEXT, dob TEXT, sex TEXT, contact_info TEXT,
    job_id TEXT, num_course_taken TEXT, current_career_path_id TEXT, time_spent_hrs TEXT
);
CREATE TABLE cademycode_courses (career_path_id INTEGER, career_path_name TEXT, hours_to_complete INTEGER);
CREATE TABLE cademycode_student_jobs (job_id INTEGER, job_category TEXT, avg_salary INTEGER);
INSERT INTO cademycode_courses VALUES (1, 'data scientist', 20), (2, 'data engineer', 20);
INSERT INTO cademycode_student_jobs VALUES
    (1, 'analytics', 86000), (2, 'engineer', 101000), (2, 'engineer', 101000);
";

fn add_student(source: &Path, uuid: i64, dob: &str, job_id: Option<&str>, courses: Option<&str>, path: Option<&str>) {
    let conn = Connection::open(source).unwrap();
    let contact = format!(
        "{{\"mailing_address\": \"{} Crescent Fair, Shoals, Indiana, 37439\", \"email\": \"student{}@example.com\"}}",
        uuid, uuid
    );
    conn.execute(
        "INSERT INTO cademycode_students VALUES (?1, ?2, ?3, 'F', ?4, ?5, ?6, ?7, '4.5')",
        rusqlite::params![uuid, format!("Student {}", uuid), dob, contact, job_id, courses, path],
    )
    .unwrap();
}

struct Pipeline {
    _dir: TempDir,
    config: ReconcileConfig,
}

impl Pipeline {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let toml = format!(
            r#"
[source]
path = "{root}/dev/cademycode.db"

[clean_store]
path = "{root}/dev/cademycode_clean.db"

[outputs]
csv_mirror = "{root}/dev/student_info_cleansed.csv"
changelog = "{root}/changelog.md"

[logging]
file = "{root}/clean_db.log"
"#,
            root = dir.path().display()
        );
        let config = ReconcileConfig::from_toml(&toml).unwrap();

        fs::create_dir_all(dir.path().join("dev")).unwrap();
        Connection::open(&config.source.path)
            .unwrap()
            .execute_batch(SCHEMA)
            .unwrap();

        Pipeline { _dir: dir, config }
    }

    fn store(&self) -> SqliteCleanStore {
        SqliteCleanStore::new(&self.config.clean_store.path, &self.config.clean_store.table)
    }

    fn run(&self) -> Result<RunOutcome, enrollment_reconcile::ReconcileError> {
        let sink = RunLogSink::open(&self.config.logging).unwrap();
        let source = SqliteSource::new(&self.config.source.path, self.config.source.tables());
        let mut store = self.store();
        let outputs = OutputPaths {
            csv_mirror: self.config.outputs.csv_mirror.clone(),
            changelog: self.config.outputs.changelog.clone(),
        };

        Reconciler::new(&source, &mut store, outputs, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
            .with_table_label(&self.config.clean_store.table)
            .run_with_sink(sink.dispatch())
    }

    fn changelog(&self) -> String {
        fs::read_to_string(&self.config.outputs.changelog).unwrap_or_default()
    }
}

#[test]
fn test_incremental_runs() {
    let pipeline = Pipeline::new();
    let source = pipeline.config.source.path.clone();

    add_student(&source, 1, "1943-07-03", Some("1.0"), Some("6.0"), Some("1.0"));
    add_student(&source, 2, "1991-02-07", Some("1.0"), Some("2.0"), None);
    // no num_course_taken: dropped, never stored
    add_student(&source, 3, "1985-11-20", Some("1.0"), None, Some("2.0"));

    // First run
    let outcome = pipeline.run().unwrap();
    let summary = outcome.summary().unwrap();
    assert!(summary.first_run);
    assert_eq!(summary.rows_appended, 2);
    assert_eq!(summary.identity_gaps.len(), 1);
    assert_eq!(summary.version, Some(SemVer::new(0, 0, 0)));

    let stored = pipeline.store().read_all().unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].age, 80);
    assert_eq!(stored[0].age_group, 80);
    assert_eq!(stored[0].street, "1 Crescent Fair");
    // missing career path joins the "no path" sentinel
    assert_eq!(stored[1].career_path_id, Some(0));
    assert_eq!(stored[1].career_path_name.as_deref(), Some("no path"));
    assert_eq!(stored[1].hours_to_complete, Some(0));

    // Nothing new: byte-identical outputs
    let csv_before = fs::read(&pipeline.config.outputs.csv_mirror).unwrap();
    let changelog_before = pipeline.changelog();
    assert!(matches!(pipeline.run().unwrap(), RunOutcome::NoNewData { .. }));
    assert_eq!(fs::read(&pipeline.config.outputs.csv_mirror).unwrap(), csv_before);
    assert_eq!(pipeline.changelog(), changelog_before);

    // One new student
    add_student(&source, 4, "2000-01-01", Some("1.0"), Some("1.0"), Some("2.0"));
    let outcome = pipeline.run().unwrap();
    let summary = outcome.summary().unwrap();
    assert!(!summary.first_run);
    assert_eq!(summary.rows_appended, 1);
    assert_eq!(summary.total_rows, 3);
    assert_eq!(summary.version, Some(SemVer::new(0, 0, 1)));

    let csv = fs::read_to_string(&pipeline.config.outputs.csv_mirror).unwrap();
    assert_eq!(csv.lines().count(), 4);

    let log = Changelog::parse(&pipeline.changelog());
    assert_eq!(log.entries.len(), 2);
    assert_eq!(log.entries[0].rows_added(), Some(1));
    assert_eq!(log.entries[1].rows_added(), Some(2));

    let run_log = fs::read_to_string(&pipeline.config.logging.file).unwrap();
    assert!(run_log.contains("reconcile"));
    assert!(run_log.contains("changelog updated"));
}

#[test]
fn test_duplicate_job_key_aborts_second_run() {
    let pipeline = Pipeline::new();
    let source = pipeline.config.source.path.clone();

    add_student(&source, 1, "1990-01-01", Some("1.0"), Some("1.0"), Some("1.0"));
    pipeline.run().unwrap();

    // job 2 appears twice in the jobs relation (exact duplicate), so the
    // cleanser collapses it and the merge stays one row per student
    add_student(&source, 2, "1990-01-01", Some("2.0"), Some("1.0"), Some("1.0"));
    let outcome = pipeline.run().unwrap();
    assert_eq!(outcome.summary().unwrap().rows_appended, 1);

    // a non-identical duplicate survives cleansing and fans out
    Connection::open(&source)
        .unwrap()
        .execute("INSERT INTO cademycode_student_jobs VALUES (1, 'analytics', 90000)", [])
        .unwrap();
    add_student(&source, 3, "1990-01-01", Some("1.0"), Some("1.0"), Some("1.0"));

    let changelog_before = pipeline.changelog();
    let err = pipeline.run().unwrap_err();

    assert!(err.is_validation_abort());
    assert_eq!(pipeline.store().count().unwrap(), 2);
    assert_eq!(pipeline.changelog(), changelog_before);
}

#[test]
fn test_unreadable_clean_store_degrades_to_first_run_then_fails_on_write() {
    let pipeline = Pipeline::new();
    add_student(&pipeline.config.source.path, 1, "1990-01-01", Some("1.0"), Some("1.0"), Some("1.0"));
    fs::write(&pipeline.config.clean_store.path, vec![b'x'; 4096]).unwrap();

    let err = pipeline.run().unwrap_err();

    assert!(!err.is_validation_abort());
    assert!(matches!(err, enrollment_reconcile::ReconcileError::Store(_)));
    assert!(pipeline.changelog().is_empty());
}

#[test]
fn test_mirror_failure_leaves_store_and_changelog_untouched() {
    let pipeline = Pipeline::new();
    add_student(&pipeline.config.source.path, 1, "1990-01-01", Some("1.0"), Some("1.0"), Some("1.0"));
    pipeline.run().unwrap();
    let changelog_before = pipeline.changelog();

    add_student(&pipeline.config.source.path, 2, "1991-01-01", Some("1.0"), Some("1.0"), Some("1.0"));
    let mirror = &pipeline.config.outputs.csv_mirror;
    fs::remove_file(mirror).unwrap();
    fs::create_dir(mirror).unwrap();

    let err = pipeline.run().unwrap_err();

    assert!(matches!(err, enrollment_reconcile::ReconcileError::Mirror(_)));
    assert_eq!(pipeline.store().count().unwrap(), 1);
    assert_eq!(pipeline.changelog(), changelog_before);

    // the rerun picks up the same delta
    fs::remove_dir(mirror).unwrap();
    let summary = pipeline.run().unwrap().summary().cloned().unwrap();
    assert_eq!(summary.rows_appended, 1);
    assert_eq!(summary.version, Some(SemVer::new(0, 0, 1)));
    assert_eq!(fs::read_to_string(mirror).unwrap().lines().count(), 3);
}
