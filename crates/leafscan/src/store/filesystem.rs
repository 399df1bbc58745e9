use std::io::Write;
use std::path::{Path, PathBuf};

use super::Storage;
use crate::error::StorageError;
use crate::model::{ImageId, ModelId, ReportId};

/// Blob storage as a directory tree: `images/<id>.bin`, `weights/<id>.bin`
/// and `masks/<id>.png` under a root directory.
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, kind: &str, id: i64, extension: &str) -> PathBuf {
        self.root.join(kind).join(format!("{}.{}", id, extension))
    }

    /// Writes `content` to a uniquely named temporary file next to `path`
    /// and renames it into place, so readers never see a partial blob.
    fn write_atomic(&self, path: &Path, content: &[u8]) -> Result<(), StorageError> {
        let dir = path.parent().unwrap_or(&self.root);
        self.ensure_directory(dir)?;

        let tmp_path = dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        let write_err = |source| StorageError::WriteFile {
            path: tmp_path.clone(),
            source,
        };

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
            .map_err(write_err)?;
        file.write_all(content).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
        drop(file);

        std::fs::rename(&tmp_path, path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp_path);
            StorageError::WriteFile {
                path: path.to_path_buf(),
                source: e,
            }
        })
    }

    fn read(&self, path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
        match std::fs::read(path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::ReadFile {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }
}

impl Storage for FileStorage {
    fn store_image(&self, image_id: ImageId, data: &[u8]) -> Result<(), StorageError> {
        self.write_atomic(&self.blob_path("images", image_id, "bin"), data)
    }

    fn store_weights(&self, model_id: ModelId, data: &[u8]) -> Result<(), StorageError> {
        self.write_atomic(&self.blob_path("weights", model_id, "bin"), data)
    }

    fn retrieve_weights(&self, model_id: ModelId) -> Result<Vec<u8>, StorageError> {
        self.read(&self.blob_path("weights", model_id, "bin"))?
            .ok_or(StorageError::NotFound {
                kind: "weights",
                id: model_id,
            })
    }

    fn store_mask(&self, report_id: ReportId, data: &[u8]) -> Result<(), StorageError> {
        self.write_atomic(&self.blob_path("masks", report_id, "png"), data)
    }

    fn retrieve_mask(&self, report_id: ReportId) -> Result<Option<Vec<u8>>, StorageError> {
        self.read(&self.blob_path("masks", report_id, "png"))
    }
}
