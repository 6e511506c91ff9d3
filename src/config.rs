// ⚙️ Configuration - where the stores, outputs and log live
//
// Every section is optional; defaults reproduce the `dev/` layout:
//
//   [source]        path, students_table, courses_table, jobs_table
//   [clean_store]   path, table
//   [outputs]       csv_mirror, changelog
//   [logging]       file, level, console, append
//   [validation]    max_dropped_ratio

use crate::error::ConfigError;
use crate::source::SourceTables;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconcileConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub clean_store: CleanStoreConfig,
    #[serde(default)]
    pub outputs: OutputsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub path: PathBuf,
    pub students_table: String,
    pub courses_table: String,
    pub jobs_table: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        let tables = SourceTables::default();
        SourceConfig {
            path: PathBuf::from("dev/cademycode.db"),
            students_table: tables.students,
            courses_table: tables.courses,
            jobs_table: tables.jobs,
        }
    }
}

impl SourceConfig {
    pub fn tables(&self) -> SourceTables {
        SourceTables {
            students: self.students_table.clone(),
            courses: self.courses_table.clone(),
            jobs: self.jobs_table.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CleanStoreConfig {
    pub path: PathBuf,
    pub table: String,
}

impl Default for CleanStoreConfig {
    fn default() -> Self {
        CleanStoreConfig {
            path: PathBuf::from("dev/cademycode_clean.db"),
            table: "student_info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OutputsConfig {
    pub csv_mirror: PathBuf,
    pub changelog: PathBuf,
}

impl Default for OutputsConfig {
    fn default() -> Self {
        OutputsConfig {
            csv_mirror: PathBuf::from("dev/student_info_cleansed.csv"),
            changelog: PathBuf::from("changelog.md"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub file: PathBuf,
    /// EnvFilter directive; `RUST_LOG` wins when set
    pub level: String,
    /// Also print log lines to stderr
    pub console: bool,
    /// Keep earlier runs in the log file instead of truncating it
    pub append: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            file: PathBuf::from("clean_db.log"),
            level: "info".to_string(),
            console: false,
            append: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Advisory threshold for identity-gap drops per delta
    pub max_dropped_ratio: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        ValidationConfig {
            max_dropped_ratio: 0.25,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl ReconcileConfig {
    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        let config: ReconcileConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Explicit path must exist; without one, `reconcile.toml` is used if
    /// present, else the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default_path = Path::new("reconcile.toml");
                if default_path.exists() {
                    Self::from_file(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let identifiers = [
            ("source.students_table", &self.source.students_table),
            ("source.courses_table", &self.source.courses_table),
            ("source.jobs_table", &self.source.jobs_table),
            ("clean_store.table", &self.clean_store.table),
        ];
        for (key, value) in identifiers {
            if !is_sql_identifier(value) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be a plain SQL identifier (letters, digits, underscore), got '{}'",
                    key, value
                )));
            }
        }

        let ratio = self.validation.max_dropped_ratio;
        if !(0.0..=1.0).contains(&ratio) {
            return Err(ConfigError::Invalid(format!(
                "validation.max_dropped_ratio must be between 0 and 1, got {}",
                ratio
            )));
        }

        if self.clean_store.path == self.source.path {
            return Err(ConfigError::Invalid(
                "clean_store.path must differ from source.path".to_string(),
            ));
        }

        Ok(())
    }
}

fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ReconcileConfig::from_toml("").unwrap();

        assert_eq!(config, ReconcileConfig::default());
        assert_eq!(config.source.path, PathBuf::from("dev/cademycode.db"));
        assert_eq!(config.clean_store.table, "student_info");
        assert_eq!(config.outputs.changelog, PathBuf::from("changelog.md"));
        assert_eq!(config.logging.file, PathBuf::from("clean_db.log"));
        assert!(!config.logging.append);
        assert_eq!(config.validation.max_dropped_ratio, 0.25);
    }

    #[test]
    fn test_partial_sections() {
        let config = ReconcileConfig::from_toml(
            r#"
[clean_store]
path = "/tmp/clean.db"

[validation]
max_dropped_ratio = 0.5
"#,
        )
        .unwrap();

        assert_eq!(config.clean_store.path, PathBuf::from("/tmp/clean.db"));
        assert_eq!(config.clean_store.table, "student_info");
        assert_eq!(config.validation.max_dropped_ratio, 0.5);
        assert_eq!(config.source.tables(), SourceTables::default());
    }

    #[test]
    fn test_rejects_unsafe_table_name() {
        let err = ReconcileConfig::from_toml(
            r#"
[clean_store]
table = "student_info; DROP TABLE x"
"#,
        )
        .unwrap_err();

        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("clean_store.table"));
    }

    #[test]
    fn test_rejects_ratio_out_of_range() {
        let err = ReconcileConfig::from_toml("[validation]\nmax_dropped_ratio = 1.5\n").unwrap_err();

        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_unknown_section_and_bad_toml() {
        assert!(matches!(
            ReconcileConfig::from_toml("[sources]\npath = \"x\"\n"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            ReconcileConfig::from_toml("[source\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = ReconcileConfig::load_or_default(Some(Path::new("/nonexistent/reconcile.toml")))
            .unwrap_err();

        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
