use anyhow::{Context, Result};
use chrono::Local;
use image::ImageFormat;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::config::{RetentionConfig, StorageConfig};

/// Writes uploads and annotated images under the configured storage root.
#[derive(Debug, Clone)]
pub struct UploadStore {
    storage: StorageConfig,
    retention: RetentionConfig,
}

/// Collision suffixes tried before giving up on a name.
const MAX_NAME_ATTEMPTS: usize = 1000;

/// A stored upload and the stamp that made its name unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedUpload {
    pub path: PathBuf,
    pub stamp: String,
}

/// Result of a cleanup operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupResult {
    pub files_deleted: usize,
    pub bytes_freed: u64,
}

impl UploadStore {
    pub fn new(storage: StorageConfig, retention: RetentionConfig) -> Self {
        Self { storage, retention }
    }

    /// Create every managed directory.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in self.managed_dirs() {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn keypoint_input_dir(&self) -> PathBuf {
        self.storage.keypoint_input_dir()
    }

    pub fn mesh_input_dir(&self) -> PathBuf {
        self.storage.mesh_input_dir()
    }

    pub fn mesh_output_dir(&self) -> PathBuf {
        self.storage.mesh_output_dir()
    }

    fn managed_dirs(&self) -> [PathBuf; 3] {
        [
            self.keypoint_input_dir(),
            self.mesh_input_dir(),
            self.mesh_output_dir(),
        ]
    }

    /// Write an uploaded file as `<stamp>_<filename>` under `dir`.
    ///
    /// An existing file is never replaced: when the name is taken, the stamp
    /// gets a `_1`, `_2`, ... suffix. Derive related paths from the returned
    /// stamp.
    pub fn save_upload(&self, dir: &Path, stamp: &str, filename: &str, bytes: &[u8]) -> io::Result<SavedUpload> {
        fs::create_dir_all(dir)?;
        let name = sanitize_filename(filename);

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let unique = if attempt == 0 {
                stamp.to_string()
            } else {
                format!("{}_{}", stamp, attempt)
            };
            let path = dir.join(format!("{}_{}", unique, name));

            match fs::File::options().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(bytes)?;
                    return Ok(SavedUpload { path, stamp: unique });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }

        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free name for {} under {}", name, dir.display()),
        ))
    }

    /// Destination for the annotated copy of an upload.
    ///
    /// Names without a recognized image extension get `.png` appended so the
    /// encoder can pick a format.
    pub fn annotated_path(&self, stamp: &str, filename: &str) -> PathBuf {
        let mut name = format!("annotated_{}_{}", stamp, sanitize_filename(filename));
        if ImageFormat::from_path(&name).is_err() {
            name.push_str(".png");
        }
        self.mesh_output_dir().join(name)
    }

    /// Delete files past the configured age, then the oldest files beyond
    /// the configured count, in each managed directory.
    pub fn sweep(&self) -> Result<CleanupResult> {
        let mut result = CleanupResult::default();
        let max_age = self
            .retention
            .max_age_days
            .map(|days| Duration::from_secs(u64::from(days) * 24 * 60 * 60));

        for dir in self.managed_dirs() {
            let mut files = list_files(&dir)?;
            // Newest first
            files.sort_by(|a, b| b.modified.cmp(&a.modified));

            let now = SystemTime::now();
            let mut kept = 0usize;
            for file in files {
                let expired = max_age
                    .map(|age| now.duration_since(file.modified).unwrap_or_default() > age)
                    .unwrap_or(false);
                let over_count = self.retention.max_files.map(|max| kept >= max).unwrap_or(false);

                if expired || over_count {
                    fs::remove_file(&file.path)
                        .with_context(|| format!("Failed to delete {}", file.path.display()))?;
                    result.files_deleted += 1;
                    result.bytes_freed += file.size;
                } else {
                    kept += 1;
                }
            }
        }

        Ok(result)
    }
}

/// Timestamp prefix for stored files, local time.
pub fn timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Reduce a client-supplied name to a safe single path component.
pub fn sanitize_filename(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.trim_matches('.').is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

struct StoredFile {
    path: PathBuf,
    modified: SystemTime,
    size: u64,
}

fn list_files(dir: &Path) -> Result<Vec<StoredFile>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            let metadata = entry.metadata()?;
            files.push(StoredFile {
                path: entry.path(),
                modified: metadata.modified()?,
                size: metadata.len(),
            });
        }
    }
    Ok(files)
}
