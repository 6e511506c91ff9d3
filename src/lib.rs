// Enrollment Reconcile - Core Library
// Exposes the pipeline stages for the CLI and tests

pub mod changelog;      // Semantic-version log of persisted batches
pub mod config;         // TOML configuration
pub mod db;             // Clean store (SQLite, append-only)
pub mod delta;          // Set difference against the clean store
pub mod entities;       // Student / course / job records and cleansers
pub mod error;
pub mod logging;        // Run-scoped tracing sink
pub mod merge;          // Left joins into the denormalized record
pub mod mirror;         // CSV snapshot of the clean store
pub mod reconciliation; // Orchestrator state machine
pub mod schema;         // Merged column set and type inference
pub mod source;         // Raw source store reader
pub mod staging;        // Temp-file outputs renamed into place
pub mod validation;     // Blocking/advisory checks before persistence

// Re-export commonly used types
pub use changelog::{Changelog, ChangelogEntry, SemVer};
pub use config::ReconcileConfig;
pub use db::{CleanStore, CleanStoreSnapshot, FirstRunReason, PriorState, SqliteCleanStore};
pub use delta::{detect_delta, StudentDelta};
pub use entities::{
    cleanse_courses, cleanse_jobs, cleanse_students, CleanStudentRecord, CourseRecord,
    IdentityGap, JobRecord, RawStudentRecord, StudentCleanse,
};
pub use error::{ConfigError, MalformedInput, ReconcileError, ValidationFailure};
pub use logging::RunLogSink;
pub use merge::{merge_students, MergedStudentRecord};
pub use mirror::{stage_csv_mirror, write_csv_mirror};
pub use reconciliation::{OutputPaths, Reconciler, RunOutcome, RunSummary};
pub use source::{RawSource, SourceTables, SqliteSource};
pub use staging::StagedFile;
pub use validation::{
    CheckKind, CheckOutcome, CheckStatus, Finding, Severity, ValidationHarness, ValidationReport,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
