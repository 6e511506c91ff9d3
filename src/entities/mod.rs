// Entity Models - the three source relations and their cleansers
//
// Each entity has:
// - A record type as read from the source store
// - A pure cleanser (no I/O, deterministic)

pub mod course;
pub mod job;
pub mod student;

pub use course::{cleanse_courses, CourseRecord, NO_PATH_ID};
pub use job::{cleanse_jobs, JobRecord};
pub use student::{
    cleanse_students, CleanStudentRecord, IdentityGap, RawStudentRecord, StudentCleanse,
};

use serde::Serialize;
use sha2::{Digest, Sha256};

/// SHA-256 over the JSON form of each record, one per line.
/// Two batches with the same fingerprint are byte-for-byte identical.
pub fn fingerprint<T: Serialize>(records: &[T]) -> Result<String, serde_json::Error> {
    let mut hasher = Sha256::new();
    for record in records {
        hasher.update(serde_json::to_vec(record)?);
        hasher.update(b"\n");
    }
    Ok(format!("{:x}", hasher.finalize()))
}
