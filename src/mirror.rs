// 🪞 CSV Mirror - full snapshot of the clean store as a flat file
//
// Rewritten wholesale after every persisting run. The header row is always
// present, even for an empty store.

use crate::merge::MergedStudentRecord;
use crate::schema::merged_column_names;
use crate::staging::StagedFile;
use anyhow::{Context, Result};
use std::path::Path;

/// Write `records` to a temp file beside `path`; `commit()` puts it in place.
pub fn stage_csv_mirror(path: &Path, records: &[MergedStudentRecord]) -> Result<StagedFile> {
    StagedFile::write_with(path, |tmp| {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(tmp)
            .with_context(|| format!("Failed to create CSV file {:?}", tmp))?;

        writer.write_record(merged_column_names())?;
        for record in records {
            writer
                .serialize(record)
                .with_context(|| format!("Failed to write row for student {}", record.uuid))?;
        }
        writer.flush()?;
        Ok(())
    })
}

/// Overwrite `path` with `records`; returns the number of data rows written.
pub fn write_csv_mirror(path: &Path, records: &[MergedStudentRecord]) -> Result<usize> {
    stage_csv_mirror(path, records)?.commit()?;
    Ok(records.len())
}
