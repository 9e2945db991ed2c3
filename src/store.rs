use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use tokio::fs;

pub const RUN_LOCK_FILE: &str = ".histoslide.lock";

pub async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value = serde_json::from_slice(&bytes).context("parse json")?;
    Ok(Some(value))
}

pub async fn write_json_atomic<T: serde::Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    fs::write(&tmp_path, &data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}

/// Size of the file at `path`, or `None` when it does not exist.
pub async fn file_size(path: &Path) -> anyhow::Result<Option<u64>> {
    match fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
        Ok(_) => Ok(None),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("stat: {}", path.display())),
    }
}

/// Removes `path`, ignoring a file that is already gone.
pub async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Exclusive marker for one pipeline run against a data root. Removed on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(data_root: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(data_root)
            .with_context(|| format!("create data root: {}", data_root.display()))?;

        let path = data_root.join(RUN_LOCK_FILE);
        let mut file = match OpenOptions::new().create_new(true).write(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = std::fs::read_to_string(&path).unwrap_or_default();
                anyhow::bail!(
                    "another run holds the lock {} ({}); remove it if that run is gone",
                    path.display(),
                    holder.trim()
                );
            }
            Err(err) => {
                return Err(err).with_context(|| format!("create run lock: {}", path.display()));
            }
        };

        writeln!(
            file,
            "pid={} started_at={}",
            std::process::id(),
            chrono::Utc::now().to_rfc3339()
        )
        .with_context(|| format!("write run lock: {}", path.display()))?;

        Ok(Self { path })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), ?err, "failed to remove run lock");
        }
    }
}
