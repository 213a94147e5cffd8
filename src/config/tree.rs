//! Directory tree helpers for the configuration store

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::error::{ConfigError, ConfigResult};

/// Marker left in the store root while a save is being written
pub const SAVE_MARKER: &str = ".save-in-progress";

/// Sibling locations derived from the store root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    pub root: PathBuf,
    pub backup: PathBuf,
    pub marker: PathBuf,
    pub corrupted: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let sibling = |suffix: &str| {
            let mut name = root
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "config".into());
            name.push(suffix);
            root.with_file_name(name)
        };
        Self {
            backup: sibling(".backup"),
            marker: sibling(".backup-state"),
            corrupted: sibling(".corrupted"),
            root,
        }
    }

    pub fn save_marker(&self) -> PathBuf {
        self.root.join(SAVE_MARKER)
    }
}

/// Relative paths (with `/` separators) of every file below `root`
async fn list_files(root: &Path) -> ConfigResult<Vec<String>> {
    let mut files = Vec::new();
    let mut pending = vec![PathBuf::new()];
    while let Some(relative) = pending.pop() {
        let dir = root.join(&relative);
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| ConfigError::io("list", &dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ConfigError::io("list", &dir, e))?
        {
            let child = relative.join(entry.file_name());
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| ConfigError::io("inspect", entry.path(), e))?;
            if file_type.is_dir() {
                pending.push(child);
            } else {
                let name = child
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if name != SAVE_MARKER {
                    files.push(name);
                }
            }
        }
    }
    files.sort();
    Ok(files)
}

/// SHA-256 of every file below `root`, keyed by relative path
pub async fn hash_tree(root: &Path) -> ConfigResult<BTreeMap<String, String>> {
    let mut hashes = BTreeMap::new();
    for name in list_files(root).await? {
        let path = root.join(&name);
        let contents = tokio::fs::read(&path)
            .await
            .map_err(|e| ConfigError::io("read", &path, e))?;
        let digest = Sha256::digest(&contents);
        let hex: String = digest.iter().map(|byte| format!("{:02x}", byte)).collect();
        hashes.insert(name, hex);
    }
    Ok(hashes)
}

/// Copy every file below `source` into `target`, creating directories
pub async fn copy_tree(source: &Path, target: &Path) -> ConfigResult<usize> {
    let files = list_files(source).await?;
    tokio::fs::create_dir_all(target)
        .await
        .map_err(|e| ConfigError::io("create", target, e))?;
    for name in &files {
        let from = source.join(name);
        let to = target.join(name);
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ConfigError::io("create", parent, e))?;
        }
        tokio::fs::copy(&from, &to)
            .await
            .map_err(|e| ConfigError::io("copy", &from, e))?;
    }
    Ok(files.len())
}

/// Remove a directory tree, treating "already gone" as success
pub async fn remove_tree(path: &Path) -> ConfigResult<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ConfigError::io("remove", path, e)),
    }
}

/// Write `contents` to a temporary sibling, then rename over `path`
pub async fn write_atomic(path: &Path, contents: &[u8]) -> ConfigResult<()> {
    let mut temp_name = path.as_os_str().to_os_string();
    temp_name.push(".tmp");
    let temp = PathBuf::from(temp_name);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ConfigError::io("create", parent, e))?;
    }
    tokio::fs::write(&temp, contents)
        .await
        .map_err(|e| ConfigError::io("write", &temp, e))?;
    tokio::fs::rename(&temp, path)
        .await
        .map_err(|e| ConfigError::io("rename", &temp, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_siblings() {
        let layout = StoreLayout::new("/home/u/.config/Endsession");
        assert_eq!(layout.backup, PathBuf::from("/home/u/.config/Endsession.backup"));
        assert_eq!(
            layout.marker,
            PathBuf::from("/home/u/.config/Endsession.backup-state")
        );
        assert_eq!(
            layout.corrupted,
            PathBuf::from("/home/u/.config/Endsession.corrupted")
        );
        assert_eq!(
            layout.save_marker(),
            PathBuf::from("/home/u/.config/Endsession/.save-in-progress")
        );
    }

    #[tokio::test]
    async fn test_copy_and_hash_match() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("cfg");
        tokio::fs::create_dir_all(source.join("extensions")).await.unwrap();
        tokio::fs::write(source.join("settings.toml"), "auto_save = true\n")
            .await
            .unwrap();
        tokio::fs::write(source.join("extensions/history.toml"), "recent = []\n")
            .await
            .unwrap();
        tokio::fs::write(source.join(SAVE_MARKER), "").await.unwrap();

        let target = dir.path().join("copy");
        assert_eq!(copy_tree(&source, &target).await.unwrap(), 2);

        let original = hash_tree(&source).await.unwrap();
        let copied = hash_tree(&target).await.unwrap();
        assert_eq!(original, copied);
        assert!(original.contains_key("extensions/history.toml"));
        assert!(!target.join(SAVE_MARKER).exists());
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        write_atomic(&path, b"one").await.unwrap();
        write_atomic(&path, b"two").await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"two");
    }
}
