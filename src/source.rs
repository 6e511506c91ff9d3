// 📥 Source Store - read-only access to the raw relational dataset
//
// Three relations, read in full every run:
//   students      → RawStudentRecord
//   courses       → CourseRecord
//   student jobs  → JobRecord
//
// Column types in the raw store are not reliable (numbers are sometimes stored
// as text), so every cell is read as a dynamic `Value` and converted here.

use crate::entities::{CourseRecord, JobRecord, RawStudentRecord};
use anyhow::{anyhow, Context, Result};
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, Row};
use std::path::PathBuf;

pub trait RawSource {
    fn read_students(&self) -> Result<Vec<RawStudentRecord>>;
    fn read_courses(&self) -> Result<Vec<CourseRecord>>;
    fn read_jobs(&self) -> Result<Vec<JobRecord>>;
}

/// Table names of the three source relations.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceTables {
    pub students: String,
    pub courses: String,
    pub jobs: String,
}

impl Default for SourceTables {
    fn default() -> Self {
        SourceTables {
            students: "cademycode_students".to_string(),
            courses: "cademycode_courses".to_string(),
            jobs: "cademycode_student_jobs".to_string(),
        }
    }
}

pub struct SqliteSource {
    path: PathBuf,
    tables: SourceTables,
}

impl SqliteSource {
    pub fn new(path: impl Into<PathBuf>, tables: SourceTables) -> Self {
        SqliteSource {
            path: path.into(),
            tables,
        }
    }

    fn open(&self) -> Result<Connection> {
        Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("Failed to open source store {:?}", self.path))
    }
}

impl RawSource for SqliteSource {
    fn read_students(&self) -> Result<Vec<RawStudentRecord>> {
        let conn = self.open()?;
        read_table(&conn, &self.tables.students, |cells| {
            Ok(RawStudentRecord {
                uuid: cells.required_text("uuid")?,
                name: cells.text("name")?,
                dob: cells.required_text("dob")?,
                sex: cells.text("sex")?,
                contact_info: cells.required_text("contact_info")?,
                mailing_address: cells.text("mailing_address")?,
                job_id: cells.text("job_id")?,
                num_course_taken: cells.text("num_course_taken")?,
                current_career_path_id: cells.text("current_career_path_id")?,
                time_spent_hrs: cells.text("time_spent_hrs")?,
            })
        })
    }

    fn read_courses(&self) -> Result<Vec<CourseRecord>> {
        let conn = self.open()?;
        read_table(&conn, &self.tables.courses, |cells| {
            Ok(CourseRecord {
                career_path_id: cells
                    .integer("career_path_id")?
                    .ok_or_else(|| anyhow!("career_path_id is NULL"))?,
                career_path_name: cells.text("career_path_name")?,
                hours_to_complete: cells.integer("hours_to_complete")?,
            })
        })
    }

    fn read_jobs(&self) -> Result<Vec<JobRecord>> {
        let conn = self.open()?;
        read_table(&conn, &self.tables.jobs, |cells| {
            Ok(JobRecord {
                job_id: cells
                    .integer("job_id")?
                    .ok_or_else(|| anyhow!("job_id is NULL"))?,
                job_category: cells.text("job_category")?,
                avg_salary: cells.real("avg_salary")?,
            })
        })
    }
}

// ============================================================================
// ROW DECODING
// ============================================================================

/// One source row, addressable by column name. Absent columns read as NULL.
pub struct Cells {
    row_number: usize,
    names: Vec<String>,
    values: Vec<Value>,
}

impl Cells {
    fn from_row(row_number: usize, names: &[String], row: &Row<'_>) -> rusqlite::Result<Self> {
        let values = (0..names.len())
            .map(|i| row.get::<_, Value>(i))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(Cells {
            row_number,
            names: names.to_vec(),
            values,
        })
    }

    fn get(&self, column: &str) -> Option<&Value> {
        self.names
            .iter()
            .position(|n| n == column)
            .map(|i| &self.values[i])
    }

    /// Any scalar rendered as text; integral reals keep a trailing `.0`.
    pub fn text(&self, column: &str) -> Result<Option<String>> {
        match self.get(column) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Integer(i)) => Ok(Some(i.to_string())),
            Some(Value::Real(f)) => Ok(Some(format!("{:?}", f))),
            Some(Value::Text(s)) => Ok(Some(s.clone())),
            Some(Value::Blob(bytes)) => String::from_utf8(bytes.clone())
                .map(Some)
                .with_context(|| format!("row {}: column {} is not UTF-8", self.row_number, column)),
        }
    }

    pub fn required_text(&self, column: &str) -> Result<String> {
        self.text(column)?
            .ok_or_else(|| anyhow!("row {}: required column {} is NULL", self.row_number, column))
    }

    pub fn integer(&self, column: &str) -> Result<Option<i64>> {
        match self.get(column) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Integer(i)) => Ok(Some(*i)),
            Some(Value::Real(f)) if f.fract() == 0.0 => Ok(Some(*f as i64)),
            Some(Value::Text(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::Text(s)) => {
                let parsed: f64 = s.trim().parse().with_context(|| {
                    format!("row {}: column {} value '{}' is not numeric", self.row_number, column, s)
                })?;
                if parsed.fract() != 0.0 {
                    return Err(anyhow!(
                        "row {}: column {} value '{}' is not an integer",
                        self.row_number,
                        column,
                        s
                    ));
                }
                Ok(Some(parsed as i64))
            }
            Some(other) => Err(anyhow!(
                "row {}: column {} has unexpected value {:?}",
                self.row_number,
                column,
                other
            )),
        }
    }

    pub fn real(&self, column: &str) -> Result<Option<f64>> {
        match self.get(column) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Integer(i)) => Ok(Some(*i as f64)),
            Some(Value::Real(f)) => Ok(Some(*f)),
            Some(Value::Text(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::Text(s)) => s.trim().parse().map(Some).with_context(|| {
                format!("row {}: column {} value '{}' is not numeric", self.row_number, column, s)
            }),
            Some(other) => Err(anyhow!(
                "row {}: column {} has unexpected value {:?}",
                self.row_number,
                column,
                other
            )),
        }
    }
}

fn read_table<T, F>(conn: &Connection, table: &str, decode: F) -> Result<Vec<T>>
where
    F: Fn(&Cells) -> Result<T>,
{
    let mut stmt = conn
        .prepare(&format!("SELECT * FROM \"{}\"", table.replace('"', "\"\"")))
        .with_context(|| format!("Failed to query source table {}", table))?;
    let names: Vec<String> = stmt.column_names().iter().map(|n| n.to_string()).collect();

    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    let mut row_number = 0;
    while let Some(row) = rows.next()? {
        row_number += 1;
        let cells = Cells::from_row(row_number, &names, row)?;
        out.push(decode(&cells).with_context(|| format!("Failed to decode {} row {}", table, row_number))?);
    }

    Ok(out)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(path: &std::path::Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE cademycode_students (
                uuid INTEGER, name TEXT, dob TEXT, sex TEXT, contact_info TEXT,
                job_id TEXT, num_course_taken TEXT, current_career_path_id TEXT, time_spent_hrs TEXT
            );
            INSERT INTO cademycode_students VALUES
                (1, 'Annabelle Avery', '1943-07-03', 'F',
                 '{\"mailing_address\": \"303 N Timber Key, Irondale, Wisconsin, 84736\", \"email\": \"a@b.com\"}',
                 '7.0', '6.0', '1.0', '4.99'),
                (2, 'Micah Rubio', '1991-02-07', 'M',
                 '{\"mailing_address\": \"767 Crescent Fair, Shoals, Indiana, 37439\", \"email\": \"c@d.com\"}',
                 '7.0', NULL, '8.0', '4.35');
            CREATE TABLE cademycode_courses (career_path_id INTEGER, career_path_name TEXT, hours_to_complete INTEGER);
            INSERT INTO cademycode_courses VALUES (1, 'data scientist', 20), (2, 'data engineer', 20);
            CREATE TABLE cademycode_student_jobs (job_id INTEGER, job_category TEXT, avg_salary INTEGER);
            INSERT INTO cademycode_student_jobs VALUES (1, 'analytics', 86000), (1, 'analytics', 86000);",
        )
        .unwrap();
    }

    #[test]
    fn test_reads_all_three_relations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("source.db");
        seed(&path);

        let source = SqliteSource::new(&path, SourceTables::default());

        let students = source.read_students().unwrap();
        assert_eq!(students.len(), 2);
        assert_eq!(students[0].uuid, "1");
        assert_eq!(students[0].mailing_address, None);
        assert_eq!(students[0].job_id.as_deref(), Some("7.0"));
        assert_eq!(students[1].num_course_taken, None);

        let courses = source.read_courses().unwrap();
        assert_eq!(courses.len(), 2);
        assert_eq!(courses[1].career_path_name.as_deref(), Some("data engineer"));

        let jobs = source.read_jobs().unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].avg_salary, Some(86000.0));
    }

    #[test]
    fn test_missing_source_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = SqliteSource::new(dir.path().join("absent.db"), SourceTables::default());

        assert!(source.read_students().is_err());
    }
}
