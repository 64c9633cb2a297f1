use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{Snapshot, StorageBackend, Tables};

const ENTITIES_FILE: &str = "entities.json";

/// JSON file-based storage backend.
///
/// Directory structure:
/// ```text
/// data/
///   entities.json
/// ```
///
/// Every commit rewrites the whole file through a temporary sibling and a
/// rename, so readers of the file never observe a half-written state.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    base_path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    pub fn entities_file(&self) -> PathBuf {
        self.base_path.join(ENTITIES_FILE)
    }

    fn temp_file(&self) -> PathBuf {
        self.base_path.join(format!(".{ENTITIES_FILE}.tmp"))
    }

    async fn write_json_atomic(&self, value: &Snapshot) -> Result<()> {
        fs::create_dir_all(&self.base_path)
            .await
            .with_context(|| format!("Failed to create data dir {:?}", self.base_path))?;

        let content = serde_json::to_vec_pretty(value).context("Failed to serialize JSON")?;
        let tmp = self.temp_file();
        let mut file = fs::File::create(&tmp)
            .await
            .with_context(|| format!("Failed to create {tmp:?}"))?;
        file.write_all(&content)
            .await
            .context("Failed to write snapshot")?;
        file.sync_all().await.context("Failed to sync snapshot")?;
        drop(file);

        let target = self.entities_file();
        fs::rename(&tmp, &target)
            .await
            .with_context(|| format!("Failed to move snapshot into place at {target:?}"))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl StorageBackend for JsonFileBackend {
    async fn load(&self) -> Result<Option<Snapshot>> {
        let path = self.entities_file();
        match fs::read_to_string(&path).await {
            Ok(content) => {
                let snapshot = serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse JSON from {path:?}"))?;
                Ok(Some(snapshot))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {path:?}")),
        }
    }

    async fn persist(&self, tables: &Tables) -> Result<()> {
        self.write_json_atomic(&tables.to_snapshot()).await
    }

    fn name(&self) -> &str {
        "json_file"
    }
}
