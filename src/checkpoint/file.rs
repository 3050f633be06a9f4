use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;

use super::Checkpoint;
use crate::error::{Error, Result};

/// One file named `.<sync_name>` under a configured directory, holding an
/// ASCII decimal integer (`spec.md` §6). `set` writes to a sibling temp file
/// and renames over the target so a reader never observes a partial write —
/// the "last successful set wins" contract from `spec.md` §4.1.
pub struct FileCheckpoint {
    path: PathBuf,
    dir: PathBuf,
}

impl FileCheckpoint {
    pub fn new(sync_name: &str, dir: &str) -> Self {
        let dir = PathBuf::from(dir);
        FileCheckpoint {
            path: dir.join(format!(".{sync_name}")),
            dir,
        }
    }
}

#[async_trait]
impl Checkpoint for FileCheckpoint {
    async fn validate(&self) -> Result<()> {
        let meta = fs::metadata(&self.dir).await.map_err(|e| {
            Error::environment(format!(
                "checkpoint directory '{}' is not accessible: {e}",
                self.dir.display()
            ))
        })?;
        if !meta.is_dir() {
            return Err(Error::environment(format!(
                "checkpoint path '{}' is not a directory",
                self.dir.display()
            )));
        }
        let probe = self.dir.join(".indexflow_write_probe");
        fs::write(&probe, b"").await.map_err(|e| {
            Error::environment(format!(
                "checkpoint directory '{}' is not writable: {e}",
                self.dir.display()
            ))
        })?;
        let _ = fs::remove_file(&probe).await;
        Ok(())
    }

    async fn get(&self) -> Result<Option<i64>> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let trimmed = contents.trim();
                if trimmed.is_empty() {
                    return Ok(None);
                }
                trimmed
                    .parse::<i64>()
                    .map(Some)
                    .map_err(|e| Error::parse("checkpoint", e))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn set(&self, value: i64) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, value.to_string()).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn teardown(&self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %self.path.display(), "checkpoint file already absent during teardown");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove checkpoint file");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_value() {
        let dir = std::env::temp_dir().join(format!("indexflow_ckpt_{}", std::process::id()));
        fs::create_dir_all(&dir).await.unwrap();
        let checkpoint = FileCheckpoint::new("test_sync", dir.to_str().unwrap());

        checkpoint.validate().await.unwrap();
        assert_eq!(checkpoint.get().await.unwrap(), None);

        checkpoint.set(100).await.unwrap();
        assert_eq!(checkpoint.get().await.unwrap(), Some(100));

        checkpoint.set(101).await.unwrap();
        assert_eq!(checkpoint.get().await.unwrap(), Some(101));

        checkpoint.teardown().await.unwrap();
        assert_eq!(checkpoint.get().await.unwrap(), None);

        let _ = fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn teardown_tolerates_missing_file() {
        let dir = std::env::temp_dir().join(format!("indexflow_ckpt_missing_{}", std::process::id()));
        fs::create_dir_all(&dir).await.unwrap();
        let checkpoint = FileCheckpoint::new("never_written", dir.to_str().unwrap());
        assert!(checkpoint.teardown().await.is_ok());
        let _ = fs::remove_dir_all(&dir).await;
    }
}
