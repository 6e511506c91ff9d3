// 📦 Staged output files - write next to the target, rename into place later
//
// Lets a run prepare every output file before the clean store commits, so a
// failure while writing leaves the previous files untouched. An uncommitted
// staged file removes itself on drop.

use anyhow::{bail, Context, Result};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct StagedFile {
    tmp: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedFile {
    /// Create the temp file via `write`. Fails up front when the target can
    /// never be replaced (it is a directory).
    pub fn write_with<F>(target: &Path, write: F) -> Result<Self>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        if target.is_dir() {
            bail!("{:?} is a directory", target);
        }
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let staged = StagedFile {
            tmp: tmp_path(target),
            target: target.to_path_buf(),
            committed: false,
        };
        write(&staged.tmp)?;
        Ok(staged)
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Move the temp file over the target.
    pub fn commit(mut self) -> Result<()> {
        fs::rename(&self.tmp, &self.target)
            .with_context(|| format!("Failed to replace {:?}", self.target))?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.tmp);
        }
    }
}

fn tmp_path(target: &Path) -> PathBuf {
    let mut name: OsString = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    target.with_file_name(name)
}
