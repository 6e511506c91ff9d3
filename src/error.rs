// 🚨 Error taxonomy for a reconciliation run
//
// MalformedInput  -> cleansing cannot continue, run fails
// Validation      -> blocking check failed, nothing persisted
// Source/Store/.. -> adapter I/O failures (context carried by anyhow)
//
// Identity gaps and an unreadable clean store are NOT errors: see
// `entities::student::IdentityGap` and `db::PriorState`.

use crate::validation::ValidationReport;
use thiserror::Error;

/// A raw field that cannot be cleansed. Always fatal for the run so a corrupt
/// record is never passed downstream half-cleansed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MalformedInput {
    #[error("student {uuid}: cannot parse dob '{value}'")]
    Dob { uuid: String, value: String },

    #[error("student {uuid}: contact_info is not a mapping ({reason})")]
    ContactInfo { uuid: String, reason: String },

    #[error("student {uuid}: mailing address '{value}' splits into {parts} part(s), expected 4")]
    Address {
        uuid: String,
        value: String,
        parts: usize,
    },

    #[error("student {uuid}: column '{column}' value '{value}' is not numeric")]
    Numeric {
        uuid: String,
        column: &'static str,
        value: String,
    },
}

/// Blocking validation failure. Carries the full report so the caller can
/// show every offending row/column, not just the first.
#[derive(Debug, Clone, Error)]
#[error("{}", .report.failure_summary())]
pub struct ValidationFailure {
    pub report: ValidationReport,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config validation error: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    MalformedInput(#[from] MalformedInput),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationFailure),

    #[error("source store: {0:#}")]
    Source(anyhow::Error),

    #[error("clean store: {0:#}")]
    Store(anyhow::Error),

    #[error("csv mirror: {0:#}")]
    Mirror(anyhow::Error),

    #[error("changelog: {0:#}")]
    Changelog(anyhow::Error),
}

impl ReconcileError {
    /// True when the run was stopped by the validation harness (as opposed to
    /// bad input or broken I/O).
    pub fn is_validation_abort(&self) -> bool {
        matches!(self, ReconcileError::Validation(_))
    }
}
