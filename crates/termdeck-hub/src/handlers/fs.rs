use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use crate::bridge::{Args, Bridge, BridgeError, Thrown};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileStat {
    pub size: u64,
    pub is_file: bool,
    pub is_directory: bool,
    pub is_symlink: bool,
    pub readonly: bool,
    /// Milliseconds since the Unix epoch, when the platform reports it.
    pub modified_ms: Option<u64>,
    pub created_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DirEntryInfo {
    pub name: String,
    pub path: String,
    pub is_file: bool,
    pub is_directory: bool,
}

fn epoch_ms(time: io::Result<std::time::SystemTime>) -> Option<u64> {
    let elapsed = time.ok()?.duration_since(UNIX_EPOCH).ok()?;
    u64::try_from(elapsed.as_millis()).ok()
}

pub(crate) async fn stat(path: &Path) -> io::Result<FileStat> {
    let link = tokio::fs::symlink_metadata(path).await?;
    let meta = if link.file_type().is_symlink() {
        tokio::fs::metadata(path).await.unwrap_or(link.clone())
    } else {
        link.clone()
    };
    Ok(FileStat {
        size: meta.len(),
        is_file: meta.is_file(),
        is_directory: meta.is_dir(),
        is_symlink: link.file_type().is_symlink(),
        readonly: meta.permissions().readonly(),
        modified_ms: epoch_ms(meta.modified()),
        created_ms: epoch_ms(meta.created()),
    })
}

/// Entries of `path` sorted directories first, then by name.
pub(crate) async fn read_dir(path: &Path) -> io::Result<Vec<DirEntryInfo>> {
    let mut entries = Vec::new();
    let mut dir = tokio::fs::read_dir(path).await?;
    while let Some(entry) = dir.next_entry().await? {
        let entry_path = entry.path();
        let (is_file, is_directory) = match tokio::fs::metadata(&entry_path).await {
            Ok(meta) => (meta.is_file(), meta.is_dir()),
            Err(_) => (false, false),
        };
        entries.push(DirEntryInfo {
            name: entry.file_name().to_string_lossy().to_string(),
            path: entry_path.to_string_lossy().to_string(),
            is_file,
            is_directory,
        });
    }
    entries.sort_by(|a, b| {
        b.is_directory
            .cmp(&a.is_directory)
            .then_with(|| a.name.cmp(&b.name))
    });
    Ok(entries)
}

async fn exists(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}

pub(super) fn register(bridge: &Bridge) -> Result<(), BridgeError> {
    bridge.handle("fs:stat", |args: Args| async move {
        let path: PathBuf = args.get(0)?;
        Ok::<_, Thrown>(stat(&path).await?)
    })?;
    bridge.handle("fs:read-file", |args: Args| async move {
        let path: PathBuf = args.get(0)?;
        Ok::<_, Thrown>(tokio::fs::read_to_string(&path).await?)
    })?;
    bridge.handle("fs:read-dir", |args: Args| async move {
        let path: PathBuf = args.get(0)?;
        Ok::<_, Thrown>(read_dir(&path).await?)
    })?;
    bridge.handle("fs:exists", |args: Args| async move {
        let path: PathBuf = args.get(0)?;
        Ok::<_, Thrown>(exists(&path).await)
    })?;
    bridge.handle("fs:is-file", |args: Args| async move {
        let path: PathBuf = args.get(0)?;
        let is_file = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.is_file(),
            Err(_) => false,
        };
        Ok::<_, Thrown>(is_file)
    })?;
    bridge.handle("fs:is-directory", |args: Args| async move {
        let path: PathBuf = args.get(0)?;
        let is_dir = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.is_dir(),
            Err(_) => false,
        };
        Ok::<_, Thrown>(is_dir)
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::{SystemTime, UNIX_EPOCH};
    use termdeck_core::bridge_ipc::{BridgeResult, CallEnvelope};

    fn test_dir(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        std::env::temp_dir().join(format!("termdeck-fs-test-{name}-{nanos}"))
    }

    #[tokio::test]
    async fn read_dir_lists_directories_first() {
        let dir = test_dir("listing");
        std::fs::create_dir_all(dir.join("sub")).expect("mkdir");
        std::fs::write(dir.join("a.txt"), "alpha").expect("write");

        let entries = read_dir(&dir).await.expect("read_dir");
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["sub", "a.txt"]);
        assert!(entries[0].is_directory);
        assert!(entries[1].is_file);

        let meta = stat(&dir.join("a.txt")).await.expect("stat");
        assert_eq!(meta.size, 5);
        assert!(meta.is_file);
        assert!(meta.modified_ms.is_some());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn handlers_report_missing_files() {
        let bridge = Bridge::default();
        register(&bridge).expect("register");
        let missing = test_dir("missing").join("nothing.txt");
        let path = json!(missing.to_string_lossy());

        let exists = bridge
            .dispatch(CallEnvelope::new("fs:exists", vec![path.clone()]))
            .await;
        assert_eq!(exists, BridgeResult::success(json!(false)));

        let read = bridge
            .dispatch(CallEnvelope::new("fs:read-file", vec![path.clone()]))
            .await;
        assert!(!read.is_success());

        let is_dir = bridge
            .dispatch(CallEnvelope::new("fs:is-directory", vec![path]))
            .await;
        assert_eq!(is_dir, BridgeResult::success(json!(false)));
    }
}
