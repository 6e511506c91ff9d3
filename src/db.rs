// 🗄️ Clean Store - append-only SQLite table of merged student records
//
// One relation keyed by uuid. Rows are only ever INSERTed: a uuid collision
// fails the append (inside a transaction) instead of rewriting history.

use crate::merge::MergedStudentRecord;
use crate::schema::{Column, ColumnType, MERGED_COLUMNS};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, params_from_iter, Connection, OpenFlags};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

// ============================================================================
// SNAPSHOT
// ============================================================================

/// What the clean store looked like before this run.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanStoreSnapshot {
    pub columns: Vec<Column>,
    pub uuids: HashSet<String>,
    pub row_count: usize,
}

/// Why a run has no prior snapshot to compare against.
#[derive(Debug, Clone, PartialEq)]
pub enum FirstRunReason {
    /// Database file does not exist yet
    NoStore,
    /// Database exists but the clean table was never created
    NoTable,
    /// Table exists with zero rows
    EmptyTable,
    /// Store exists but could not be read (degrades to first-run semantics)
    Unavailable(String),
}

impl FirstRunReason {
    pub fn describe(&self) -> String {
        match self {
            FirstRunReason::NoStore => "clean store does not exist".to_string(),
            FirstRunReason::NoTable => "clean table does not exist".to_string(),
            FirstRunReason::EmptyTable => "clean table is empty".to_string(),
            FirstRunReason::Unavailable(detail) => format!("clean store unreadable: {}", detail),
        }
    }
}

/// Tagged result of reading the prior clean store.
#[derive(Debug, Clone, PartialEq)]
pub enum PriorState {
    FirstRun(FirstRunReason),
    Present(CleanStoreSnapshot),
}

impl PriorState {
    pub fn is_first_run(&self) -> bool {
        matches!(self, PriorState::FirstRun(_))
    }

    pub fn snapshot(&self) -> Option<&CleanStoreSnapshot> {
        match self {
            PriorState::Present(snapshot) => Some(snapshot),
            PriorState::FirstRun(_) => None,
        }
    }
}

// ============================================================================
// STORE TRAIT
// ============================================================================

pub trait CleanStore {
    /// Read the prior snapshot. Never fails: an unreadable store is reported
    /// as `FirstRun(Unavailable)`.
    fn prior_state(&self) -> PriorState;

    /// Append records in one transaction. `stage` sees the full contents
    /// (prior rows plus `records`) before the commit; if it fails, nothing is
    /// appended. Returns the number of rows inserted.
    fn append_staged(
        &mut self,
        records: &[MergedStudentRecord],
        stage: &mut dyn FnMut(&[MergedStudentRecord]) -> Result<()>,
    ) -> Result<usize>;

    fn append(&mut self, records: &[MergedStudentRecord]) -> Result<usize> {
        self.append_staged(records, &mut |_| Ok(()))
    }

    /// Every stored record, in insertion order.
    fn read_all(&self) -> Result<Vec<MergedStudentRecord>>;

    fn count(&self) -> Result<i64>;
}

// ============================================================================
// SQLITE IMPLEMENTATION
// ============================================================================

pub struct SqliteCleanStore {
    path: PathBuf,
    table: String,
}

impl SqliteCleanStore {
    pub fn new(path: impl Into<PathBuf>, table: &str) -> Self {
        SqliteCleanStore {
            path: path.into(),
            table: table.to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Open an existing store without creating it.
    fn open_existing(&self) -> Result<Connection> {
        Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("Failed to open clean store {:?}", self.path))
    }

    fn try_prior_state(&self) -> Result<PriorState> {
        let conn = self.open_existing()?;

        let prior_state = match read_snapshot(&conn, &self.table)? {
            None => PriorState::FirstRun(FirstRunReason::NoTable),
            Some(snapshot) if snapshot.row_count == 0 => {
                PriorState::FirstRun(FirstRunReason::EmptyTable)
            }
            Some(snapshot) => PriorState::Present(snapshot),
        };
        Ok(prior_state)
    }
}

impl CleanStore for SqliteCleanStore {
    fn prior_state(&self) -> PriorState {
        if !self.path.exists() {
            return PriorState::FirstRun(FirstRunReason::NoStore);
        }

        self.try_prior_state().unwrap_or_else(|err| {
            PriorState::FirstRun(FirstRunReason::Unavailable(format!("{:#}", err)))
        })
    }

    fn append_staged(
        &mut self,
        records: &[MergedStudentRecord],
        stage: &mut dyn FnMut(&[MergedStudentRecord]) -> Result<()>,
    ) -> Result<usize> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let mut conn = Connection::open(&self.path)
            .with_context(|| format!("Failed to open clean store {:?}", self.path))?;
        enable_wal(&conn)?;

        // Dropping `tx` without commit rolls back the table creation too
        let tx = conn.transaction()?;
        create_clean_table(&tx, &self.table)?;
        let inserted = insert_rows(&tx, &self.table, records)?;
        let contents = get_all_records(&tx, &self.table)?;
        stage(&contents)?;
        tx.commit()?;

        Ok(inserted)
    }

    fn read_all(&self) -> Result<Vec<MergedStudentRecord>> {
        let conn = self.open_existing()?;
        get_all_records(&conn, &self.table)
    }

    fn count(&self) -> Result<i64> {
        if !self.path.exists() {
            return Ok(0);
        }
        let conn = self.open_existing()?;
        if !table_exists(&conn, &self.table)? {
            return Ok(0);
        }
        verify_count(&conn, &self.table)
    }
}

// ============================================================================
// CONNECTION-LEVEL OPERATIONS
// ============================================================================

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn column_list() -> String {
    MERGED_COLUMNS
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn setup_clean_store(conn: &Connection, table: &str) -> Result<()> {
    enable_wal(conn)?;
    create_clean_table(conn, table)
}

// Enable WAL mode for crash recovery
fn enable_wal(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    Ok(())
}

fn create_clean_table(conn: &Connection, table: &str) -> Result<()> {

    let columns = MERGED_COLUMNS
        .iter()
        .map(|(name, column_type)| {
            if *name == "uuid" {
                format!("{} {} PRIMARY KEY NOT NULL", name, column_type.name())
            } else {
                format!("{} {}", name, column_type.name())
            }
        })
        .collect::<Vec<_>>()
        .join(",\n            ");

    conn.execute(
        &format!("CREATE TABLE IF NOT EXISTS {} (\n            {}\n        )", quote(table), columns),
        [],
    )
    .with_context(|| format!("Failed to create clean table {}", table))?;

    Ok(())
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Declared columns of `table`, mapped through SQLite type affinity.
pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<Column>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote(table)))?;

    let columns = stmt
        .query_map([], |row| {
            let name: String = row.get(1)?;
            let declared: String = row.get(2)?;
            Ok(Column {
                name,
                column_type: ColumnType::from_declared(&declared),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(columns)
}

/// `None` when the table does not exist.
pub fn read_snapshot(conn: &Connection, table: &str) -> Result<Option<CleanStoreSnapshot>> {
    if !table_exists(conn, table)? {
        return Ok(None);
    }

    let columns = table_columns(conn, table)?;

    let mut stmt = conn
        .prepare(&format!("SELECT uuid FROM {}", quote(table)))
        .with_context(|| format!("Clean table {} has no uuid column", table))?;
    let uuids = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<HashSet<_>, _>>()?;

    let row_count = verify_count(conn, table)? as usize;

    Ok(Some(CleanStoreSnapshot {
        columns,
        uuids,
        row_count,
    }))
}

/// Insert `records` in a single transaction.
pub fn insert_records(
    conn: &mut Connection,
    table: &str,
    records: &[MergedStudentRecord],
) -> Result<usize> {
    let tx = conn.transaction()?;
    let inserted = insert_rows(&tx, table, records)?;
    tx.commit()?;
    Ok(inserted)
}

fn insert_rows(conn: &Connection, table: &str, records: &[MergedStudentRecord]) -> Result<usize> {
    let placeholders = (1..=MERGED_COLUMNS.len())
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote(table),
        column_list(),
        placeholders
    );

    let mut stmt = conn.prepare(&sql)?;
    let mut inserted = 0;
    for record in records {
        stmt.execute(params_from_iter(record.to_row()))
            .with_context(|| format!("Failed to append student {}", record.uuid))?;
        inserted += 1;
    }

    Ok(inserted)
}

pub fn get_all_records(conn: &Connection, table: &str) -> Result<Vec<MergedStudentRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM {} ORDER BY rowid",
        column_list(),
        quote(table)
    ))?;

    let records = stmt
        .query_map([], |row| {
            let dob_str: String = row.get(2)?;
            let dob = NaiveDate::parse_from_str(&dob_str, "%Y-%m-%d").map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    2,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;

            Ok(MergedStudentRecord {
                uuid: row.get(0)?,
                name: row.get(1)?,
                dob,
                sex: row.get(3)?,
                job_id: row.get(4)?,
                num_course_taken: row.get(5)?,
                current_career_path_id: row.get(6)?,
                time_spent_hrs: row.get(7)?,
                age: row.get(8)?,
                age_group: row.get(9)?,
                email: row.get(10)?,
                street: row.get(11)?,
                city: row.get(12)?,
                state: row.get(13)?,
                zipcode: row.get(14)?,
                career_path_id: row.get(15)?,
                career_path_name: row.get(16)?,
                hours_to_complete: row.get(17)?,
                job_category: row.get(18)?,
                avg_salary: row.get(19)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(records)
}

pub fn verify_count(conn: &Connection, table: &str) -> Result<i64> {
    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", quote(table)),
        [],
        |row| row.get(0),
    )?;

    Ok(count)
}

// ============================================================================
// TESTS
// ============================================================================
