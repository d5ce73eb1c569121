use std::path::{Path, PathBuf};

use crate::error::Result;

/// Directory tree under the data dir that tracks where each statement file is
/// in the pipeline.
#[derive(Debug, Clone)]
pub struct InboxDirs {
    pub inbox: PathBuf,
    pub queue: PathBuf,
    pub failed: PathBuf,
    pub archive: PathBuf,
}

impl InboxDirs {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            inbox: data_dir.join("inbox"),
            queue: data_dir.join("queue"),
            failed: data_dir.join("failed"),
            archive: data_dir.join("archive"),
        }
    }

    pub fn ensure(&self) -> Result<()> {
        for dir in [&self.inbox, &self.queue, &self.failed, &self.archive] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Regular, non-hidden files in `dir`, sorted by name. A missing dir is empty.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if !hidden && entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

fn free_name(dest_dir: &Path, filename: &str) -> PathBuf {
    let candidate = dest_dir.join(filename);
    if !candidate.exists() {
        return candidate;
    }
    let path = Path::new(filename);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(filename);
    let ext = path.extension().and_then(|e| e.to_str());
    (1..)
        .map(|n| match ext {
            Some(ext) => dest_dir.join(format!("{stem}-{n}.{ext}")),
            None => dest_dir.join(format!("{stem}-{n}")),
        })
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

/// Move a file into `dest_dir`, suffixing the name if it is taken.
pub fn move_into(path: &Path, dest_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dest_dir)?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let dest = free_name(dest_dir, &filename);
    std::fs::rename(path, &dest)?;
    Ok(dest)
}

pub fn copy_into(path: &Path, dest_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dest_dir)?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let dest = free_name(dest_dir, &filename);
    std::fs::copy(path, &dest)?;
    Ok(dest)
}

/// Move a fully committed batch's file out of the queue. A file that is no
/// longer there (imported directly, or moved by hand) is not an error.
pub fn archive(dirs: &InboxDirs, filename: &str) -> Result<Option<PathBuf>> {
    let queued = dirs.queue.join(filename);
    if !queued.exists() {
        return Ok(None);
    }
    Ok(Some(move_into(&queued, &dirs.archive)?))
}
