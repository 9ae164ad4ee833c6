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

//! Classifies the stored credential so the caller can prompt accordingly.
//!
//! Synthetic password users carry the class in the password data record.
//! Devices from before the synthetic password scheme store per-credential
//! gatekeeper files instead; for those the probe reports which legacy file
//! it found so the caller can drive the old unlock flow.

use crate::blob_store::{BlobStore, PASSWORD_DATA_SUFFIX};
use crate::records::PasswordData;
use anyhow::Result;
use std::path::{Path, PathBuf};

/// Default root of the legacy credential-file directories.
pub const DEFAULT_LEGACY_ROOT: &str = "/data/system";

const LEGACY_PASSWORD_FILE: &str = "gatekeeper.password.key";
const LEGACY_PATTERN_FILE: &str = "gatekeeper.pattern.key";

/// Semantic class of the stored credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialType {
    /// No enrolled credential found anywhere.
    None,
    /// Synthetic password present but not bound to a user credential; try
    /// the default password.
    Default,
    Password,
    Pattern,
    Pin,
    /// Platforms before the PIN/password split store both under one class.
    PasswordOrPin,
}

/// Probe result: the credential class, plus the legacy gatekeeper file if
/// the class came from the pre-synthetic-password layout.
#[derive(Debug, PartialEq, Eq)]
pub struct CredentialProbe {
    pub credential_type: CredentialType,
    pub legacy_file: Option<PathBuf>,
}

impl CredentialProbe {
    fn synthetic(credential_type: CredentialType) -> Self {
        Self { credential_type, legacy_file: None }
    }
}

/// Classifies the stored credential of `user_id`.
pub fn password_type(
    store: &BlobStore,
    legacy_root: &Path,
    user_id: u32,
) -> Result<CredentialProbe> {
    if store.spblob_dir_exists(user_id) {
        let handle = store.handle(user_id)?;
        let pwd = PasswordData::parse(&store.read(user_id, &handle, PASSWORD_DATA_SUFFIX)?)?;
        let credential_type = match pwd.password_type {
            1 => CredentialType::Pattern,
            2 => CredentialType::PasswordOrPin,
            3 => CredentialType::Pin,
            4 => CredentialType::Password,
            other => {
                log::info!("Unrecognized password type {}, trying default password", other);
                CredentialType::Default
            }
        };
        log::info!("User {} credential type: {:?}", user_id, credential_type);
        return Ok(CredentialProbe::synthetic(credential_type));
    }

    let dir = if user_id == 0 {
        legacy_root.to_path_buf()
    } else {
        legacy_root.join("users").join(user_id.to_string())
    };
    for (file, credential_type) in [
        (LEGACY_PASSWORD_FILE, CredentialType::Password),
        (LEGACY_PATTERN_FILE, CredentialType::Pattern),
    ] {
        let path = dir.join(file);
        if path.metadata().map(|m| m.len() > 0).unwrap_or(false) {
            log::info!("User {} has legacy credential file '{}'", user_id, path.display());
            return Ok(CredentialProbe { credential_type, legacy_file: Some(path) });
        }
    }
    log::info!("No credential artifacts for user {}", user_id);
    Ok(CredentialProbe { credential_type: CredentialType::None, legacy_file: None })
}
