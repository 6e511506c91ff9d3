// 🔗 Merge Engine - one denormalized row per student
//
//   students ⟕ courses  ON current_career_path_id = career_path_id
//            ⟕ jobs     ON job_id = job_id
//
// Left outer: a student without a matching course/job keeps its row with
// nulls on the right side. Non-unique right keys are NOT collapsed here: every
// match is emitted so the validation harness sees the fan-out.

use crate::entities::{CleanStudentRecord, CourseRecord, JobRecord};
use chrono::NaiveDate;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

// ============================================================================
// MERGED RECORD
// ============================================================================

/// Field order matches `schema::MERGED_COLUMNS`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedStudentRecord {
    pub uuid: String,
    pub name: Option<String>,
    pub dob: NaiveDate,
    pub sex: Option<String>,
    pub job_id: f64,
    pub num_course_taken: f64,
    pub current_career_path_id: f64,
    pub time_spent_hrs: f64,
    pub age: i64,
    pub age_group: i64,
    pub email: Option<String>,
    pub street: String,
    pub city: String,
    pub state: String,
    pub zipcode: String,
    pub career_path_id: Option<i64>,
    pub career_path_name: Option<String>,
    pub hours_to_complete: Option<i64>,
    pub job_category: Option<String>,
    pub avg_salary: Option<f64>,
}

impl MergedStudentRecord {
    fn join(
        student: &CleanStudentRecord,
        course: Option<&CourseRecord>,
        job: Option<&JobRecord>,
    ) -> Self {
        MergedStudentRecord {
            uuid: student.uuid.clone(),
            name: student.name.clone(),
            dob: student.dob,
            sex: student.sex.clone(),
            job_id: student.job_id,
            num_course_taken: student.num_course_taken,
            current_career_path_id: student.current_career_path_id,
            time_spent_hrs: student.time_spent_hrs,
            age: student.age,
            age_group: student.age_group,
            email: student.email.clone(),
            street: student.street.clone(),
            city: student.city.clone(),
            state: student.state.clone(),
            zipcode: student.zipcode.clone(),
            career_path_id: course.map(|c| c.career_path_id),
            career_path_name: course.and_then(|c| c.career_path_name.clone()),
            hours_to_complete: course.and_then(|c| c.hours_to_complete),
            job_category: job.and_then(|j| j.job_category.clone()),
            avg_salary: job.and_then(|j| j.avg_salary),
        }
    }

    /// Storage values in column order. Missing data becomes `Value::Null`.
    pub fn to_row(&self) -> Vec<Value> {
        fn text(v: &Option<String>) -> Value {
            v.clone().map(Value::Text).unwrap_or(Value::Null)
        }

        vec![
            Value::Text(self.uuid.clone()),
            text(&self.name),
            Value::Text(self.dob.format("%Y-%m-%d").to_string()),
            text(&self.sex),
            Value::Real(self.job_id),
            Value::Real(self.num_course_taken),
            Value::Real(self.current_career_path_id),
            Value::Real(self.time_spent_hrs),
            Value::Integer(self.age),
            Value::Integer(self.age_group),
            text(&self.email),
            Value::Text(self.street.clone()),
            Value::Text(self.city.clone()),
            Value::Text(self.state.clone()),
            Value::Text(self.zipcode.clone()),
            self.career_path_id.map(Value::Integer).unwrap_or(Value::Null),
            text(&self.career_path_name),
            self.hours_to_complete.map(Value::Integer).unwrap_or(Value::Null),
            text(&self.job_category),
            self.avg_salary.map(Value::Real).unwrap_or(Value::Null),
        ]
    }
}

// ============================================================================
// JOIN
// ============================================================================

/// Float reference → integer join key. Non-integral values never match.
fn join_key(value: f64) -> Option<i64> {
    if value.is_finite() && value.fract() == 0.0 {
        Some(value as i64)
    } else {
        None
    }
}

fn index_by<T, F: Fn(&T) -> i64>(rows: &[T], key: F) -> HashMap<i64, Vec<&T>> {
    let mut index: HashMap<i64, Vec<&T>> = HashMap::new();
    for row in rows {
        index.entry(key(row)).or_default().push(row);
    }
    index
}

fn duplicated_keys<T>(index: &HashMap<i64, Vec<&T>>) -> Vec<i64> {
    let mut keys: Vec<i64> = index
        .iter()
        .filter(|(_, rows)| rows.len() > 1)
        .map(|(key, _)| *key)
        .collect();
    keys.sort_unstable();
    keys
}

/// Left-join cleansed students to courses, then to jobs.
pub fn merge_students(
    students: &[CleanStudentRecord],
    courses: &[CourseRecord],
    jobs: &[JobRecord],
) -> Vec<MergedStudentRecord> {
    let course_index = index_by(courses, |c| c.career_path_id);
    let job_index = index_by(jobs, |j| j.job_id);

    let dup_courses = duplicated_keys(&course_index);
    if !dup_courses.is_empty() {
        warn!(keys = ?dup_courses, "course catalog has non-unique career_path_id, join will fan out");
    }
    let dup_jobs = duplicated_keys(&job_index);
    if !dup_jobs.is_empty() {
        warn!(keys = ?dup_jobs, "job catalog has non-unique job_id, join will fan out");
    }

    let mut merged = Vec::with_capacity(students.len());

    for student in students {
        let course_matches: Vec<Option<&CourseRecord>> = join_key(student.current_career_path_id)
            .and_then(|key| course_index.get(&key))
            .map(|rows| rows.iter().map(|c| Some(*c)).collect())
            .unwrap_or_else(|| vec![None]);

        let job_matches: Vec<Option<&JobRecord>> = join_key(student.job_id)
            .and_then(|key| job_index.get(&key))
            .map(|rows| rows.iter().map(|j| Some(*j)).collect())
            .unwrap_or_else(|| vec![None]);

        for course in &course_matches {
            for job in &job_matches {
                merged.push(MergedStudentRecord::join(student, *course, *job));
            }
        }
    }

    merged
}

// ============================================================================
// TESTS
// ============================================================================
