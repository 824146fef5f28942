use anyhow::{anyhow, Result};
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    atomic_write(path, &json)
}

pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let mut staged = StagedFile::create(path)?;
    staged
        .file()
        .write_all(data)
        .map_err(|err| anyhow!("failed to write temp file {:?}: {}", staged.tmp_path, err))?;
    staged.commit()
}

/// An output written under a hidden temp name in the target directory and
/// renamed into place by [`StagedFile::commit`]. Dropping it uncommitted
/// removes the temp file.
pub struct StagedFile {
    path: PathBuf,
    tmp_path: PathBuf,
    file: File,
    committed: bool,
}

impl StagedFile {
    pub fn create(path: &Path) -> Result<Self> {
        let parent = parent_dir(path);
        fs::create_dir_all(parent)
            .map_err(|err| anyhow!("failed to create output directory {:?}: {}", parent, err))?;

        let tmp_path = temp_path(path);
        let file = File::create(&tmp_path)
            .map_err(|err| anyhow!("failed to create temp file {:?}: {}", tmp_path, err))?;
        Ok(Self {
            path: path.to_path_buf(),
            tmp_path,
            file,
            committed: false,
        })
    }

    pub fn file(&mut self) -> &mut File {
        &mut self.file
    }

    /// Second handle on the temp file, for writers that need to own one.
    pub fn try_clone_file(&self) -> Result<File> {
        self.file
            .try_clone()
            .map_err(|err| anyhow!("failed to open temp file {:?}: {}", self.tmp_path, err))
    }

    pub fn commit(mut self) -> Result<()> {
        self.file
            .sync_all()
            .map_err(|err| anyhow!("failed to sync temp file {:?}: {}", self.tmp_path, err))?;

        fs::rename(&self.tmp_path, &self.path)
            .map_err(|err| anyhow!("failed to replace output {:?}: {}", self.path, err))?;
        self.committed = true;

        if let Ok(dir) = File::open(parent_dir(&self.path)) {
            let _ = dir.sync_all();
        }
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("output");
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let pid = std::process::id();
    parent_dir(path).join(format!(".{}.part-{}-{}", file_name, pid, stamp))
}
