use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Byte progress callback: `(transferred, total)`.
pub type TransferProgress<'a> = &'a (dyn Fn(u64, u64) + Send + Sync);

/// Remote artifact store used at job boundaries.
///
/// `Ok(false)` means the transfer did not happen (e.g. missing source);
/// `Err` carries I/O failures.
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    async fn upload(&self, local: &Path, remote: &str, progress: Option<TransferProgress<'_>>) -> anyhow::Result<bool>;

    async fn download(&self, remote: &str, local: &Path, progress: Option<TransferProgress<'_>>) -> anyhow::Result<bool>;

    /// Deleting a file that does not exist counts as success.
    async fn delete(&self, remote: &str) -> anyhow::Result<bool>;
}

const COPY_CHUNK: usize = 64 * 1024;

/// "Remote" storage on a mounted directory.
#[derive(Debug, Clone)]
pub struct LocalDirStorage {
    root: PathBuf,
}

impl LocalDirStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a remote path under the root. Rejects paths escaping it.
    fn resolve(&self, remote: &str) -> anyhow::Result<PathBuf> {
        let normalized = remote.replace('\\', "/");
        let relative = Path::new(normalized.trim_start_matches('/'));
        if relative.components().any(|c| !matches!(c, Component::Normal(_) | Component::CurDir)) {
            anyhow::bail!("Remote path escapes storage root: {}", remote);
        }
        Ok(self.root.join(relative))
    }
}

async fn copy_with_progress(from: &Path, to: &Path, progress: Option<TransferProgress<'_>>) -> anyhow::Result<()> {
    let mut src = tokio::fs::File::open(from)
        .await
        .with_context(|| format!("Failed to open {:?}", from))?;
    let total = src.metadata().await?.len();
    let mut dst = tokio::fs::File::create(to)
        .await
        .with_context(|| format!("Failed to create {:?}", to))?;

    let mut buf = vec![0u8; COPY_CHUNK];
    let mut done = 0u64;
    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        dst.write_all(&buf[..n]).await?;
        done += n as u64;
        if let Some(progress) = progress {
            progress(done, total);
        }
    }
    dst.flush().await?;
    Ok(())
}

#[async_trait]
impl RemoteStorage for LocalDirStorage {
    async fn upload(&self, local: &Path, remote: &str, progress: Option<TransferProgress<'_>>) -> anyhow::Result<bool> {
        if !tokio::fs::try_exists(local).await? {
            tracing::warn!(?local, "upload source missing");
            return Ok(false);
        }
        let target = self.resolve(remote)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create remote directory {:?}", parent))?;
        }
        tracing::info!(?local, remote, "uploading");
        copy_with_progress(local, &target, progress).await?;
        Ok(true)
    }

    async fn download(&self, remote: &str, local: &Path, progress: Option<TransferProgress<'_>>) -> anyhow::Result<bool> {
        let source = self.resolve(remote)?;
        if !tokio::fs::try_exists(&source).await? {
            tracing::warn!(remote, "download source missing");
            return Ok(false);
        }
        tracing::info!(remote, ?local, "downloading");
        copy_with_progress(&source, local, progress).await?;
        Ok(true)
    }

    async fn delete(&self, remote: &str) -> anyhow::Result<bool> {
        let target = self.resolve(remote)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!(remote, "delete of missing remote file");
                Ok(true)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to delete {:?}", target)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[tokio::test]
    async fn upload_download_delete_round_trip() -> anyhow::Result<()> {
        let root = tempfile::TempDir::new()?;
        let local = tempfile::TempDir::new()?;
        let storage = LocalDirStorage::new(root.path());

        let src = local.path().join("in.bin");
        std::fs::write(&src, vec![7u8; 200_000])?;

        let seen = AtomicU64::new(0);
        let report = |done: u64, total: u64| {
            assert!(done <= total);
            seen.store(done, Ordering::SeqCst);
        };
        assert!(storage.upload(&src, "videos\\in.bin", Some(&report)).await?);
        assert_eq!(seen.load(Ordering::SeqCst), 200_000);
        assert!(root.path().join("videos/in.bin").is_file());

        let back = local.path().join("back.bin");
        assert!(storage.download("videos/in.bin", &back, None).await?);
        assert_eq!(std::fs::read(&back)?.len(), 200_000);

        assert!(storage.delete("videos/in.bin").await?);
        assert!(storage.delete("videos/in.bin").await?);
        assert!(!storage.download("videos/in.bin", &back, None).await?);
        Ok(())
    }

    #[tokio::test]
    async fn rejects_paths_outside_root() {
        let root = tempfile::TempDir::new().unwrap();
        let storage = LocalDirStorage::new(root.path());
        assert!(storage.delete("../etc/passwd").await.is_err());
    }
}
