//! File operations

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::errors::DevServerError;

/// A local file: settings to read, logs to write
#[derive(Debug, Clone)]
pub struct File {
    path: PathBuf,
}

impl File {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse the file as JSON
    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, DevServerError> {
        let contents = fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Replace the file contents, creating missing parent directories
    pub async fn write_string(&self, contents: &str) -> Result<(), DevServerError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&self.path).await?;
        file.write_all(contents.as_bytes()).await?;
        file.sync_all().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_creates_parent_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let file = File::new(tmp.path().join("autoupdate_logs").join("CrOS_update_h_1.log"));

        file.write_string("{\"pid\": 1}").await.unwrap();
        let value: serde_json::Value = file.read_json().await.unwrap();
        assert_eq!(value["pid"], 1);
    }
}
