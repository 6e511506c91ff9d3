// 📜 Changelog - semantic-version log of every persisted batch
//
// The file is a rendered view of a structured log:
//
//   ## 0.0.2
//   ### Added
//   - 17 more rows of raw data added to student_info
//
//   ## 0.0.1
//   ...
//
// Newest entry first, no timestamps. Each successful persist bumps PATCH by
// one and keeps MAJOR.MINOR; an empty or missing log starts at 0.0.0.

use crate::staging::StagedFile;
use anyhow::{anyhow, Context, Result};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

// ============================================================================
// VERSION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SemVer {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SemVer {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        SemVer {
            major,
            minor,
            patch,
        }
    }

    pub fn next_patch(&self) -> Self {
        SemVer {
            patch: self.patch + 1,
            ..*self
        }
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for SemVer {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);

        let parts: Vec<&str> = trimmed.split('.').collect();
        if parts.len() != 3 {
            return Err(anyhow!("'{}' is not MAJOR.MINOR.PATCH", s));
        }

        let number = |part: &str| -> Result<u64> {
            part.parse::<u64>()
                .with_context(|| format!("'{}' is not a version number in '{}'", part, s))
        };

        Ok(SemVer {
            major: number(parts[0])?,
            minor: number(parts[1])?,
            patch: number(parts[2])?,
        })
    }
}

// ============================================================================
// ENTRY
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ChangelogEntry {
    pub version: SemVer,
    /// Lines under the version header, kept verbatim
    pub body: Vec<String>,
}

impl ChangelogEntry {
    pub fn added(version: SemVer, rows_added: usize, table: &str) -> Self {
        ChangelogEntry {
            version,
            body: vec![
                "### Added".to_string(),
                format!("- {} more rows of raw data added to {}", rows_added, table),
            ],
        }
    }

    /// Row count from the "Added" note, if the entry has one.
    pub fn rows_added(&self) -> Option<usize> {
        self.body.iter().find_map(|line| {
            let note = line.trim_start().trim_start_matches('-').trim_start();
            let digits: String = note.chars().take_while(|c| c.is_ascii_digit()).collect();
            if digits.is_empty() || !note[digits.len()..].contains("more rows") {
                return None;
            }
            digits.parse().ok()
        })
    }
}

// ============================================================================
// LOG
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changelog {
    /// Free text above the first version header (title, notes)
    pub preamble: Vec<String>,
    /// Newest first
    pub entries: Vec<ChangelogEntry>,
}

fn version_header(line: &str) -> Option<SemVer> {
    let rest = line.strip_prefix("## ")?;
    rest.trim().parse().ok()
}

fn trim_trailing_blank(lines: &mut Vec<String>) {
    while lines.last().map_or(false, |l| l.trim().is_empty()) {
        lines.pop();
    }
}

impl Changelog {
    pub fn parse(text: &str) -> Self {
        let mut log = Changelog::default();

        for line in text.lines() {
            if let Some(version) = version_header(line) {
                log.entries.push(ChangelogEntry {
                    version,
                    body: Vec::new(),
                });
                continue;
            }

            match log.entries.last_mut() {
                Some(entry) => entry.body.push(line.to_string()),
                None => log.preamble.push(line.to_string()),
            }
        }

        trim_trailing_blank(&mut log.preamble);
        for entry in &mut log.entries {
            trim_trailing_blank(&mut entry.body);
        }
        log
    }

    /// Missing file reads as an empty log.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Changelog::default());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read changelog {:?}", path))?;
        Ok(Changelog::parse(&text))
    }

    pub fn latest(&self) -> Option<&ChangelogEntry> {
        self.entries.first()
    }

    pub fn current_version(&self) -> Option<SemVer> {
        self.latest().map(|e| e.version)
    }

    /// Version the next persisted batch gets.
    pub fn next_version(&self) -> SemVer {
        match self.current_version() {
            Some(version) => version.next_patch(),
            None => SemVer::default(),
        }
    }

    /// Prepend an "Added" entry for `rows_added` rows; returns its version.
    pub fn record_added(&mut self, rows_added: usize, table: &str) -> SemVer {
        let version = self.next_version();
        self.entries
            .insert(0, ChangelogEntry::added(version, rows_added, table));
        version
    }

    pub fn render(&self) -> String {
        let mut out = String::new();

        if !self.preamble.is_empty() {
            out.push_str(&self.preamble.join("\n"));
            out.push_str("\n\n");
        }

        for entry in &self.entries {
            out.push_str(&format!("## {}\n", entry.version));
            for line in &entry.body {
                out.push_str(line);
                out.push('\n');
            }
            out.push('\n');
        }

        out
    }

    /// Render to a temp file beside `path`; `commit()` puts it in place.
    pub fn stage(&self, path: &Path) -> Result<StagedFile> {
        let text = self.render();
        StagedFile::write_with(path, |tmp| {
            fs::write(tmp, &text).with_context(|| format!("Failed to write changelog {:?}", tmp))
        })
    }

    /// Rewrite the file wholesale.
    pub fn save(&self, path: &Path) -> Result<()> {
        self.stage(path)?.commit()
    }
}

// ============================================================================
// TESTS
// ============================================================================
