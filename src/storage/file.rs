use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::error::StorageError;

use super::KvStore;

const ENTRY_SUFFIX: &str = ".kv";
const TEMP_EXTENSION: &str = "tmp";
/// Longest encoded run used as one path component; longer encodings are
/// split into nested directories to stay under the 255-byte name limit.
const MAX_SEGMENT: usize = 200;

/// Directory-backed key-value store: one file per key.
///
/// File names are the base64url encoding of the key, so any key is a valid
/// file name. Writes go to a temporary file that is synced and then renamed
/// over the target, and the directory is synced after the rename, so a crash
/// never leaves a half-written value behind.
pub struct FileKvStore {
    root: PathBuf,
    write_guard: Mutex<()>,
}

impl FileKvStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            write_guard: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let encoded = URL_SAFE_NO_PAD.encode(key);
        let mut path = self.root.clone();
        let mut rest = encoded.as_str();
        while rest.len() > MAX_SEGMENT {
            let (segment, tail) = rest.split_at(MAX_SEGMENT);
            path.push(segment);
            rest = tail;
        }
        path.push(format!("{}{}", rest, ENTRY_SUFFIX));
        path
    }

    fn key_for(encoded_dirs: &str, file_name: &str) -> Option<String> {
        let encoded = file_name.strip_suffix(ENTRY_SUFFIX)?;
        let bytes = URL_SAFE_NO_PAD
            .decode(format!("{}{}", encoded_dirs, encoded))
            .ok()?;
        String::from_utf8(bytes).ok()
    }

    fn collect_keys(
        dir: &Path,
        encoded_dirs: &mut String,
        prefix: &str,
        keys: &mut Vec<String>,
    ) -> Result<(), StorageError> {
        for dir_entry in fs::read_dir(dir)? {
            let dir_entry = dir_entry?;
            let file_name = dir_entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if dir_entry.file_type()?.is_dir() {
                if file_name.len() != MAX_SEGMENT {
                    continue;
                }
                let depth = encoded_dirs.len();
                encoded_dirs.push_str(file_name);
                Self::collect_keys(&dir_entry.path(), encoded_dirs, prefix, keys)?;
                encoded_dirs.truncate(depth);
                continue;
            }
            // Leftover temp files and foreign files are skipped.
            if let Some(key) = Self::key_for(encoded_dirs, file_name) {
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        Ok(())
    }

    /// Drop directories left empty by `remove`, up to the root.
    fn prune_empty_dirs(&self, mut dir: &Path) {
        while dir != self.root && fs::remove_dir(dir).is_ok() {
            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<(), StorageError> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<(), StorageError> {
    Ok(())
}

impl KvStore for FileKvStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let _guard = self
            .write_guard
            .lock()
            .map_err(|_| StorageError::LockPoisoned("file write"))?;
        let target = self.path_for(key);
        let parent = target.parent().unwrap_or(&self.root);
        if parent != self.root {
            fs::create_dir_all(parent)?;
        }
        let temp = target.with_extension(TEMP_EXTENSION);
        {
            let mut file = File::create(&temp)?;
            file.write_all(value)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &target)?;
        sync_dir(parent)
    }

    fn remove(&self, key: &str) -> Result<bool, StorageError> {
        let _guard = self
            .write_guard
            .lock()
            .map_err(|_| StorageError::LockPoisoned("file write"))?;
        let target = self.path_for(key);
        match fs::remove_file(&target) {
            Ok(()) => {
                let parent = target.parent().unwrap_or(&self.root);
                sync_dir(parent)?;
                self.prune_empty_dirs(parent);
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        Self::collect_keys(&self.root, &mut String::new(), prefix, &mut keys)?;
        keys.sort();
        Ok(keys)
    }
}
