use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use fs4::tokio::AsyncFileExt;
use serde::{de::DeserializeOwned, Serialize};
use tokio::{fs::File, io::AsyncWriteExt};
use tracing::debug;

use crate::error::{Error, Result};

/// Reads a json document from `path`. A missing file is not an error and yields [None], anything
/// that exists but doesn't parse is [Error::ConfigCorrupt].
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("{path:?} doesn't exist yet");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    serde_json::from_slice::<T>(&bytes)
        .map(Some)
        .map_err(|e| Error::corrupt(path, e))
}

/// Writes `value` as pretty json. The data first lands in a sibling `.tmp` file which is synced
/// and then renamed over `path`, so a crash leaves either the old or the new document.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buffer = serde_json::to_vec_pretty(value)
        .map_err(|e| Error::Io(std::io::Error::new(ErrorKind::InvalidData, e)))?;
    buffer.push(b'\n');

    let temp_path = temp_path_for(path);
    let mut file = File::create(&temp_path).await?;
    file.write_all(&buffer).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&temp_path, path).await?;
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Advisory lock over a group of files. Readers take it shared, writers exclusive, so a reader
/// never observes a half-saved group.
pub struct FileGroupLock {
    file: File,
}

impl FileGroupLock {
    async fn open(path: &Path) -> Result<File> {
        Ok(File::options()
            .write(true)
            .create(true)
            .read(true)
            .truncate(false)
            .open(path)
            .await?)
    }

    pub async fn shared(path: &Path) -> Result<Self> {
        let file = Self::open(path).await?;
        file.lock_shared()?;
        Ok(Self { file })
    }

    pub async fn exclusive(path: &Path) -> Result<Self> {
        let file = Self::open(path).await?;
        file.lock_exclusive()?;
        Ok(Self { file })
    }

    pub async fn release(self) -> Result<()> {
        self.file.unlock_async().await?;
        Ok(())
    }
}
