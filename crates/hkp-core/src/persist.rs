//! Crash-safe JSON snapshots.
//!
//! Every write goes through a sibling temp file and a backup of the previous
//! live file:
//!
//! 1. serialize to `<file>.tmp`
//! 2. move the live file (if any) to `<file>.bak`
//! 3. move `<file>.tmp` to the live path
//! 4. delete `<file>.bak`
//!
//! A process killed between any two steps leaves either a readable live file
//! or a readable backup, and [`JsonFileStore::load`] promotes the backup back
//! to live on the next start.

use std::{
    ffi::OsString,
    fs::{self, File},
    io::{BufWriter, ErrorKind, Write},
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error, info, warn};

use crate::{errors::Error, Result};

#[derive(Clone, Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn temp_path(&self) -> PathBuf {
        sibling(&self.path, ".tmp")
    }

    pub fn backup_path(&self) -> PathBuf {
        sibling(&self.path, ".bak")
    }

    /// Atomically replace the live file with `value`.
    pub fn save<T: Serialize>(&self, value: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.temp_path();
        let backup = self.backup_path();
        write_json(&tmp, value)?;

        let had_live = self.path.exists();
        if had_live {
            fs::rename(&self.path, &backup)?;
        }

        if let Err(e) = fs::rename(&tmp, &self.path) {
            if had_live {
                if let Err(restore) = fs::rename(&backup, &self.path) {
                    error!(path = %self.path.display(), "failed to restore backup: {restore}");
                }
            }
            return Err(Error::Io(e));
        }

        if had_live {
            if let Err(e) = fs::remove_file(&backup) {
                debug!(path = %backup.display(), "could not remove backup: {e}");
            }
        }
        Ok(())
    }

    /// Load the live file, falling back to the backup.
    ///
    /// Never fails: `None` means neither file was readable. A backup that
    /// loads is promoted to be the new live file.
    pub fn load<T: DeserializeOwned>(&self) -> Option<T> {
        self.discard_stale_temp();

        match read_json::<T>(&self.path) {
            Ok(v) => return Some(v),
            Err(Error::Io(e)) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no live file");
            }
            Err(e) => {
                warn!(path = %self.path.display(), "live file unreadable: {e}");
            }
        }

        let backup = self.backup_path();
        match read_json::<T>(&backup) {
            Ok(v) => {
                if let Err(e) = fs::rename(&backup, &self.path) {
                    warn!(path = %backup.display(), "could not promote backup: {e}");
                } else {
                    info!(path = %self.path.display(), "recovered from backup");
                }
                Some(v)
            }
            Err(Error::Io(e)) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %backup.display(), "backup file unreadable: {e}");
                None
            }
        }
    }

    pub fn load_or_default<T: DeserializeOwned + Default>(&self) -> T {
        self.load().unwrap_or_else(|| {
            info!(path = %self.path.display(), "starting from empty state");
            T::default()
        })
    }

    // A leftover temp file is an interrupted write; the backup is authoritative.
    fn discard_stale_temp(&self) {
        let tmp = self.temp_path();
        if tmp.exists() {
            warn!(path = %tmp.display(), "discarding interrupted write");
            let _ = fs::remove_file(&tmp);
        }
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut w, value)?;
    w.flush()?;
    w.get_ref().sync_all()?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    type Doc = BTreeMap<String, Vec<u32>>;

    fn doc(pairs: &[(&str, &[u32])]) -> Doc {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_vec()))
            .collect()
    }

    #[test]
    fn save_then_load_round_trips_and_leaves_no_side_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested/favorites.json"));

        store.save(&doc(&[("qq:1", &[1, 2])])).unwrap();
        store.save(&doc(&[("qq:1", &[1, 2, 3])])).unwrap();

        let loaded: Doc = store.load().unwrap();
        assert_eq!(loaded, doc(&[("qq:1", &[1, 2, 3])]));
        assert!(!store.temp_path().exists());
        assert!(!store.backup_path().exists());
    }

    #[test]
    fn crash_before_rename_falls_back_to_backup() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("favorites.json"));

        // Step 2 done, step 3 not: live moved to backup, temp half-written.
        fs::write(store.backup_path(), r#"{"qq:1":[7]}"#).unwrap();
        fs::write(store.temp_path(), r#"{"qq:1":[7,"#).unwrap();

        let loaded: Doc = store.load().unwrap();
        assert_eq!(loaded, doc(&[("qq:1", &[7])]));
        assert!(store.path().exists(), "backup promoted to live");
        assert!(!store.backup_path().exists());
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn corrupt_live_uses_backup() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("cache.json"));
        fs::write(store.path(), "not json").unwrap();
        fs::write(store.backup_path(), r#"{"a":[1]}"#).unwrap();

        let loaded: Doc = store.load().unwrap();
        assert_eq!(loaded, doc(&[("a", &[1])]));
        let live: Doc = read_json(store.path()).unwrap();
        assert_eq!(live, loaded);
    }

    #[test]
    fn missing_or_corrupt_everything_yields_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("cache.json"));
        assert!(store.load::<Doc>().is_none());

        fs::write(store.path(), "{").unwrap();
        fs::write(store.backup_path(), "[").unwrap();
        let loaded: Doc = store.load_or_default();
        assert!(loaded.is_empty());
    }
}
