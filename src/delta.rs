// 🔍 Delta Detector - which raw students are not in the clean store yet
//
// Set difference on uuid. Whether there is a prior snapshot at all is part of
// the input (`PriorState`), not a caught failure: every first-run reason
// yields the full raw set and disables the cross-run validation checks.

use crate::db::{FirstRunReason, PriorState};
use crate::entities::RawStudentRecord;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct StudentDelta {
    pub students: Vec<RawStudentRecord>,
    pub is_first_run: bool,
    /// Raw rows skipped because their uuid is already stored
    pub already_stored: usize,
}

impl StudentDelta {
    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }

    pub fn len(&self) -> usize {
        self.students.len()
    }
}

pub fn detect_delta(raw: Vec<RawStudentRecord>, prior_state: &PriorState) -> StudentDelta {
    match prior_state {
        PriorState::FirstRun(reason) => {
            match reason {
                FirstRunReason::Unavailable(detail) => warn!(
                    detail = %detail,
                    "clean store unreadable, treating as first run"
                ),
                other => info!(reason = %other.describe(), "first run, whole raw set is the delta"),
            }

            StudentDelta {
                students: raw,
                is_first_run: true,
                already_stored: 0,
            }
        }
        PriorState::Present(snapshot) => {
            let total = raw.len();
            let students: Vec<RawStudentRecord> = raw
                .into_iter()
                .filter(|s| !snapshot.uuids.contains(&s.uuid))
                .collect();
            let already_stored = total - students.len();

            info!(
                raw = total,
                already_stored,
                delta = students.len(),
                "computed student delta against clean store"
            );

            StudentDelta {
                students,
                is_first_run: false,
                already_stored,
            }
        }
    }
}
