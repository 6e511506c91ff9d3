// 📚 Course Catalog - career paths a student can be enrolled in
//
// Static reference entity. The only cleansing rule is the "no path" sentinel:
// students without a career path are filled with id 0 (see student.rs), so the
// catalog must contain exactly one id-0 row for the join to resolve them.

use serde::{Deserialize, Serialize};

/// Id of the synthetic "no career path" catalog row.
pub const NO_PATH_ID: i64 = 0;
pub const NO_PATH_NAME: &str = "no path";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseRecord {
    pub career_path_id: i64,
    pub career_path_name: Option<String>,
    pub hours_to_complete: Option<i64>,
}

impl CourseRecord {
    /// The synthetic "no path" row (id 0, 0 hours).
    pub fn no_path() -> Self {
        CourseRecord {
            career_path_id: NO_PATH_ID,
            career_path_name: Some(NO_PATH_NAME.to_string()),
            hours_to_complete: Some(0),
        }
    }

    pub fn is_no_path(&self) -> bool {
        self.career_path_id == NO_PATH_ID
    }
}

/// Append the "no path" sentinel unless an id-0 row already exists.
///
/// Idempotent: `cleanse_courses(cleanse_courses(x)) == cleanse_courses(x)`.
pub fn cleanse_courses(mut courses: Vec<CourseRecord>) -> Vec<CourseRecord> {
    if !courses.iter().any(CourseRecord::is_no_path) {
        courses.push(CourseRecord::no_path());
    }
    courses
}

// ============================================================================
// TESTS
// ============================================================================
