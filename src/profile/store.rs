use anyhow::{Context, Result};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::ProfileConfig;

/// Every profile write in the process funnels through this lock, capping
/// file I/O concurrency at one writer.
static FILE_IO_LOCK: Mutex<()> = Mutex::const_new(());

/// Atomic profile write: temp file, fsync, rename.
pub(crate) async fn write_profile(path: &Path, config: &ProfileConfig) -> Result<()> {
    let _io = FILE_IO_LOCK.lock().await;

    let json =
        serde_json::to_string_pretty(config).context("failed to serialize profile")?;
    let temp_path = path.with_extension("tmp");

    tokio::fs::write(&temp_path, &json)
        .await
        .context("failed to write temporary profile file")?;

    let temp_file = tokio::fs::OpenOptions::new()
        .write(true)
        .open(&temp_path)
        .await?;
    temp_file
        .sync_all()
        .await
        .context("failed to sync temporary profile file")?;
    drop(temp_file);

    tokio::fs::rename(&temp_path, path)
        .await
        .context("failed to move profile file into place")?;

    debug!("profile saved to {}", path.display());
    Ok(())
}

pub(crate) async fn read_profile(path: &Path) -> Result<ProfileConfig> {
    let content = tokio::fs::read_to_string(path)
        .await
        .context("failed to read profile file")?;
    serde_json::from_str(&content).context("failed to parse profile file")
}

pub(crate) async fn delete_profile(path: &Path) -> Result<()> {
    tokio::fs::remove_file(path)
        .await
        .context("failed to delete profile file")
}

/// `<name>-Profile.json`, the on-disk identity of a profile.
pub(crate) fn profile_file_name(name: &str) -> String {
    format!("{}-Profile.json", name)
}
