// Copyright 2024, The Android Open Source Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Locates and reads the per-user artifact files.
//!
//! The platform stores all artifacts of a key-blob family under
//! `<root>/<uid>/spblob/` as `<handle><suffix>`. The handle string this
//! engine derives may be shorter than the one used in the file names by one
//! or two leading zeros, so every lookup probes the `0`- and `00`-prefixed
//! variants as well. The store never interprets file contents.

use crate::error::Error;
use crate::sp_err;
use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Default root of the device-encrypted system directories.
pub const DEFAULT_SPBLOB_ROOT: &str = "/data/system_de";

/// Scrypt parameters, salt, and gatekeeper handle.
pub const PASSWORD_DATA_SUFFIX: &str = ".pwd";
/// The wrapped synthetic password envelope.
pub const SPBLOB_SUFFIX: &str = ".spblob";
/// Weaver slot record; its presence selects the weaver path.
pub const WEAVER_SUFFIX: &str = ".weaver";
/// Bulk secdiscardable blob; used when no weaver record exists.
pub const SECDISCARDABLE_SUFFIX: &str = ".secdis";

/// Prefix of the keystore alias holding the wrapping key of a handle.
const SYNTHETIC_PASSWORD_KEY_PREFIX: &str = "synthetic_password_";

/// Name of the keystore's per-boot persistent database.
const PERSISTENT_DB_NAME: &str = "persistent.sqlite";

/// Read-only view of the artifact files below a configurable root.
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn spblob_dir(&self, user_id: u32) -> PathBuf {
        self.root.join(user_id.to_string()).join("spblob")
    }

    /// True if the user has a synthetic password directory at all.
    pub fn spblob_dir_exists(&self, user_id: u32) -> bool {
        self.spblob_dir(user_id).is_dir()
    }

    fn candidates(&self, user_id: u32, handle: &str, suffix: &str) -> [PathBuf; 3] {
        let dir = self.spblob_dir(user_id);
        [
            dir.join(format!("{handle}{suffix}")),
            dir.join(format!("0{handle}{suffix}")),
            dir.join(format!("00{handle}{suffix}")),
        ]
    }

    /// Reads the artifact `<handle><suffix>`, trying the zero-padded name
    /// variants in order. The first readable candidate wins.
    pub fn read(&self, user_id: u32, handle: &str, suffix: &str) -> Result<Vec<u8>> {
        let mut last_io_error = None;
        for path in self.candidates(user_id, handle, suffix) {
            match fs::read(&path) {
                Ok(data) => return Ok(data),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    log::warn!("Failed to read '{}': {}", path.display(), e);
                    last_io_error = Some(e);
                }
            }
        }
        match last_io_error {
            Some(e) => Err(e)
                .map_err(|_| Error::IoError)
                .context(sp_err!("could not read any {} candidate for user {}", suffix, user_id)),
            None => Err(Error::BlobMissing)
                .context(sp_err!("no {} artifact for user {}", suffix, user_id)),
        }
    }

    /// True if any name variant of `<handle><suffix>` exists.
    pub fn exists(&self, user_id: u32, handle: &str, suffix: &str) -> bool {
        self.candidates(user_id, handle, suffix).iter().any(|p| p.exists())
    }

    /// Returns the user's handle: the stem of the `.spblob` file with
    /// leading zeros stripped. The platform pads the file name to a fixed
    /// hex width while the handle string is unpadded, which is why
    /// [`BlobStore::read`] probes the padded variants.
    pub fn handle(&self, user_id: u32) -> Result<String> {
        let dir = self.spblob_dir(user_id);
        let entries = fs::read_dir(&dir)
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => Error::BlobMissing,
                _ => Error::IoError,
            })
            .with_context(|| sp_err!("cannot list '{}'", dir.display()))?;
        for entry in entries {
            let entry = entry
                .map_err(|_| Error::IoError)
                .with_context(|| sp_err!("cannot list '{}'", dir.display()))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(stem) = name.strip_suffix(SPBLOB_SUFFIX).filter(|s| !s.is_empty()) {
                let trimmed = stem.trim_start_matches('0');
                let handle = if trimmed.is_empty() { "0" } else { trimmed };
                log::info!("User {} key-blob handle is '{}'", user_id, handle);
                return Ok(handle.to_string());
            }
        }
        Err(Error::BlobMissing)
            .context(sp_err!("no {} artifact under '{}'", SPBLOB_SUFFIX, dir.display()))
    }

    /// The keystore alias of the wrapping key for a handle.
    pub fn keystore_alias(handle: &str) -> String {
        format!("{SYNTHETIC_PASSWORD_KEY_PREFIX}{handle}")
    }
}

/// Copies the keystore's `persistent.sqlite` from the data partition into a
/// writable overlay directory. The keystore opens its database read-write,
/// so this snapshot must exist before the first keystore call.
pub fn snapshot_persistent_db(src_dir: &Path, dst_dir: &Path) -> Result<()> {
    fs::create_dir_all(dst_dir)
        .map_err(|_| Error::IoError)
        .with_context(|| sp_err!("cannot create '{}'", dst_dir.display()))?;
    let src = src_dir.join(PERSISTENT_DB_NAME);
    let dst = dst_dir.join(PERSISTENT_DB_NAME);
    log::info!("Copying '{}' to '{}'", src.display(), dst.display());
    fs::copy(&src, &dst)
        .map_err(|_| Error::IoError)
        .with_context(|| sp_err!("cannot copy '{}'", src.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn store_with_user(user_id: u32) -> (tempfile::TempDir, BlobStore) {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(user_id.to_string()).join("spblob")).unwrap();
        let store = BlobStore::new(dir.path());
        (dir, store)
    }

    fn write_artifact(dir: &tempfile::TempDir, user_id: u32, name: &str, data: &[u8]) {
        fs::write(dir.path().join(user_id.to_string()).join("spblob").join(name), data).unwrap();
    }

    #[test]
    fn test_read_plain_name() {
        let (dir, store) = store_with_user(0);
        write_artifact(&dir, 0, "abc.pwd", b"data");
        assert_eq!(store.read(0, "abc", PASSWORD_DATA_SUFFIX).unwrap(), b"data");
    }

    #[test]
    fn test_read_resolves_zero_padded_variants() {
        let (dir, store) = store_with_user(0);
        write_artifact(&dir, 0, "0abc.pwd", b"one");
        assert_eq!(store.read(0, "abc", PASSWORD_DATA_SUFFIX).unwrap(), b"one");

        write_artifact(&dir, 0, "00def.secdis", b"two");
        assert_eq!(store.read(0, "def", SECDISCARDABLE_SUFFIX).unwrap(), b"two");
    }

    #[test]
    fn test_read_missing_is_blob_missing() {
        let (_dir, store) = store_with_user(0);
        let e = store.read(0, "abc", SPBLOB_SUFFIX).expect_err("must be missing");
        assert_eq!(Error::root_of(&e), Some(Error::BlobMissing));
    }

    #[test]
    fn test_exists_probes_variants() {
        let (dir, store) = store_with_user(10);
        assert!(!store.exists(10, "abc", WEAVER_SUFFIX));
        write_artifact(&dir, 10, "00abc.weaver", &[1, 7, 0, 0, 0]);
        assert!(store.exists(10, "abc", WEAVER_SUFFIX));
    }

    #[test]
    fn test_handle_discovery_strips_leading_zeros() {
        let (dir, store) = store_with_user(0);
        write_artifact(&dir, 0, "00b3c4.spblob", b"\x02\x00");
        assert_eq!(store.handle(0).unwrap(), "b3c4");
    }

    #[test]
    fn test_handle_discovery_all_zero_stem() {
        let (dir, store) = store_with_user(0);
        write_artifact(&dir, 0, "0000.spblob", b"\x02\x00");
        assert_eq!(store.handle(0).unwrap(), "0");
    }

    #[test]
    fn test_handle_missing_directory() {
        let store = BlobStore::new("/nonexistent/root");
        let e = store.handle(0).expect_err("must fail");
        assert_eq!(Error::root_of(&e), Some(Error::BlobMissing));
    }

    #[test]
    fn test_keystore_alias() {
        assert_eq!(BlobStore::keystore_alias("b3c4"), "synthetic_password_b3c4");
    }

    #[test]
    fn test_snapshot_persistent_db() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        fs::write(src.path().join("persistent.sqlite"), b"sqlite bytes").unwrap();
        let overlay = dst.path().join("misc").join("keystore");
        snapshot_persistent_db(src.path(), &overlay).unwrap();
        assert_eq!(fs::read(overlay.join("persistent.sqlite")).unwrap(), b"sqlite bytes");
    }

    #[test]
    fn test_snapshot_missing_source_is_io_error() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        let e = snapshot_persistent_db(src.path(), dst.path()).expect_err("must fail");
        assert_eq!(Error::root_of(&e), Some(Error::IoError));
    }
}
