use bytes::Bytes;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum SpoolError {
    #[error("failed to create spool directory: {0}")]
    CreateDir(std::io::Error),
    #[error("failed to write spooled upload: {0}")]
    Write(std::io::Error),
}

/// Holds uploaded bytes on disk for the duration of one request. Spool names
/// are generated, never client-supplied: concurrent uploads that share an
/// original filename must not collide.
pub struct TempSpool {
    dir: PathBuf,
}

impl TempSpool {
    pub fn new(dir: PathBuf) -> Result<Self, SpoolError> {
        std::fs::create_dir_all(&dir).map_err(SpoolError::CreateDir)?;
        Ok(Self { dir })
    }

    pub async fn stash(
        &self,
        original_name: &str,
        data: Bytes,
    ) -> Result<SpooledUpload, SpoolError> {
        let path = self.dir.join(spool_file_name(original_name));
        tokio::fs::write(&path, &data)
            .await
            .map_err(SpoolError::Write)?;

        Ok(SpooledUpload { path })
    }
}

pub struct SpooledUpload {
    path: PathBuf,
}

impl SpooledUpload {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SpooledUpload {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn spool_file_name(original_name: &str) -> String {
    let id = Uuid::new_v4();
    match Path::new(original_name).extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}.{}", id, ext),
        None => id.to_string(),
    }
}
