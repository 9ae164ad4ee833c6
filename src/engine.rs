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

//! Drives the synthetic password unwrap pipeline.
//!
//! One `unlock` call walks the full chain: resolve the user's handle,
//! validate the wrapped envelope, derive the password token, authenticate
//! through weaver or through secdiscardable plus gatekeeper, assemble the
//! application id, open both envelope layers, post-process to the FBE
//! secret, and hand it to CE storage. There are no internal retries and no
//! mid-pipeline cancellation; every attempt runs to a terminal state and
//! wipes its derived buffers on the way out.
//!
//! Which authentication path runs is decided solely by the presence of the
//! weaver record. On the secdiscardable path the auth token must reach the
//! authorization broker before the keystore operation begins, otherwise the
//! auth-bound wrapping key refuses to open.

use crate::blob_store::{
    self, BlobStore, PASSWORD_DATA_SUFFIX, SECDISCARDABLE_SUFFIX, SPBLOB_SUFFIX, WEAVER_SUFFIX,
};
use crate::crypto::{
    self, AES_256_KEY_LENGTH, GCM_NONCE_LENGTH, GCM_TAG_LENGTH, PERSONALIZATION_APPLICATION_ID,
    PERSONALIZATION_FBE_CONTEXT, PERSONALIZATION_FBE_KEY, PERSONALIZATION_SECDISCARDABLE,
    PERSONALIZATION_USER_GK_AUTH, PERSONALIZATION_WEAVER_KEY, PERSONALIZATION_WEAVER_PASSWORD,
};
use crate::error::Error;
use crate::hal::{self, authorization, gatekeeper, keystore, weaver, HalServices, ServiceRuntime};
use crate::probe::{self, CredentialProbe, DEFAULT_LEGACY_ROOT};
use crate::records::{PasswordData, SpBlob, WeaverData, SYNTHETIC_PASSWORD_VERSION_V3};
use crate::sp_err;
use crate::zvec::{Credential, ZVec};
use anyhow::{Context, Result};
use std::path::PathBuf;

/// Storage flag selecting the credential-encrypted area.
pub const STORAGE_FLAG_CE: i32 = 2;

/// Largest user id the engine accepts.
pub const MAX_USER_ID: u32 = 9999;

/// The downstream filesystem-encryption layer. External to this engine;
/// implementations wrap whatever installs keys and prepares user
/// directories on the host system.
pub trait CeStorage {
    fn unlock_ce_storage(&self, user_id: u32, secret: &[u8]) -> Result<()>;
    fn prepare_user_storage(&self, user_id: u32, flags: i32) -> Result<()>;
}

/// On-disk roots the engine works against. Defaults match the live system;
/// tests point them at fixtures.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root of the per-user spblob directories.
    pub spblob_root: PathBuf,
    /// Root of the legacy credential-file layout.
    pub legacy_root: PathBuf,
    /// Directory holding the keystore's persistent database.
    pub keystore_db_dir: PathBuf,
    /// Writable overlay the database is snapshotted into before the
    /// keystore starts.
    pub keystore_db_overlay_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            spblob_root: blob_store::DEFAULT_SPBLOB_ROOT.into(),
            legacy_root: DEFAULT_LEGACY_ROOT.into(),
            keystore_db_dir: "/data/misc/keystore".into(),
            keystore_db_overlay_dir: "/tmp/misc/keystore".into(),
        }
    }
}

/// Stations of one unlock attempt. Terminal are `Unlocked` and any failure;
/// the failure kinds are the [`Error`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockState {
    Locked,
    TokenDerived,
    ApplicationIdBuilt,
    EnvelopeOpened,
    SecretDerived,
    Unlocked,
}

/// Tracks and logs the state transitions of one attempt.
struct Progress {
    user_id: u32,
    state: UnlockState,
}

impl Progress {
    fn new(user_id: u32) -> Self {
        Self { user_id, state: UnlockState::Locked }
    }

    fn advance(&mut self, to: UnlockState) {
        log::debug!("User {}: {:?} -> {:?}", self.user_id, self.state, to);
        self.state = to;
    }
}

/// The synthetic password unwrap engine. Holds only capabilities; no
/// transport-specific handles. The caller serializes unlock attempts per
/// user.
pub struct UnwrapEngine {
    config: EngineConfig,
    store: BlobStore,
    hal: HalServices,
    runtime: Box<dyn ServiceRuntime>,
    ce: Box<dyn CeStorage>,
}

impl UnwrapEngine {
    pub fn new(
        config: EngineConfig,
        hal: HalServices,
        runtime: Box<dyn ServiceRuntime>,
        ce: Box<dyn CeStorage>,
    ) -> Self {
        let store = BlobStore::new(&config.spblob_root);
        Self { config, store, hal, runtime, ce }
    }

    /// One-time process-wide bootstrap of the RPC plumbing and the keystore
    /// daemon. Must run before the first `unlock`.
    pub fn init(&self) -> Result<()> {
        hal::initialize(&*self.runtime).context(sp_err!("initialize failed"))
    }

    /// Releases what [`UnwrapEngine::init`] acquired.
    pub fn shutdown(&self) -> Result<()> {
        hal::shutdown(&*self.runtime).context(sp_err!("shutdown failed"))
    }

    /// Classifies the stored credential of `user_id` so the caller can
    /// prompt accordingly.
    pub fn password_type(&self, user_id: u32) -> Result<CredentialProbe> {
        check_user_id(user_id)?;
        probe::password_type(&self.store, &self.config.legacy_root, user_id)
    }

    /// Reconstructs the user's FBE secret from `credential` and unlocks CE
    /// storage. `"!"` selects the default password. Terminal error kinds
    /// are classified via [`Error::root_of`]; the caller retries by calling
    /// again.
    pub fn unlock(&self, user_id: u32, credential: &str) -> Result<()> {
        check_user_id(user_id)?;
        log::info!("Attempting to unlock CE storage for user {}", user_id);
        let credential = Credential::from(credential);
        let mut progress = Progress::new(user_id);
        let secret = self.derive_fbe_secret(user_id, &credential, &mut progress)?;
        self.ce
            .unlock_ce_storage(user_id, &secret)
            .context(sp_err!("unlock_ce_storage failed for user {}", user_id))?;
        self.ce
            .prepare_user_storage(user_id, STORAGE_FLAG_CE)
            .context(sp_err!("prepare_user_storage failed for user {}", user_id))?;
        progress.advance(UnlockState::Unlocked);
        log::info!("User {} CE storage unlocked", user_id);
        Ok(())
    }

    fn derive_fbe_secret(
        &self,
        user_id: u32,
        credential: &Credential,
        progress: &mut Progress,
    ) -> Result<ZVec> {
        let handle = self.store.handle(user_id)?;

        // Validate the envelope before anything touches hardware, so a
        // corrupt blob cannot cost the user a throttled attempt.
        let spblob = SpBlob::parse(&self.store.read(user_id, &handle, SPBLOB_SUFFIX)?)
            .context(sp_err!("spblob of user {}", user_id))?;

        let (password_data, password_token) = if credential.is_default() {
            log::info!("User {} uses the default password", user_id);
            blob_store::snapshot_persistent_db(
                &self.config.keystore_db_dir,
                &self.config.keystore_db_overlay_dir,
            )
            .context(sp_err!("database snapshot failed"))?;
            (None, crypto::default_password_token())
        } else {
            let pwd = PasswordData::parse(&self.store.read(user_id, &handle, PASSWORD_DATA_SUFFIX)?)
                .context(sp_err!("password data of user {}", user_id))?;
            let token = crypto::derive_password_token(
                credential,
                &pwd.salt,
                pwd.scrypt_log_n,
                pwd.scrypt_log_r,
                pwd.scrypt_log_p,
            )?;
            (Some(pwd), token)
        };
        progress.advance(UnlockState::TokenDerived);

        let second_half = if self.store.exists(user_id, &handle, WEAVER_SUFFIX) {
            self.weaver_secret(user_id, &handle, &password_token)?
        } else {
            self.secdiscardable_secret(user_id, &handle, password_data.as_ref(), &password_token)?
        };
        let application_id = ZVec::concat(&[&password_token, &second_half]);
        progress.advance(UnlockState::ApplicationIdBuilt);

        let alias = BlobStore::keystore_alias(&handle);
        let envelope =
            keystore::unwrap_outer_blob(&*self.hal.keystore, &alias, &spblob.iv, &spblob.ciphertext)?;
        progress.advance(UnlockState::EnvelopeOpened);

        if envelope.len() < GCM_NONCE_LENGTH + GCM_TAG_LENGTH {
            return Err(Error::BlobCorrupt)
                .context(sp_err!("inner envelope is {} bytes", envelope.len()));
        }
        let (inner_iv, inner_ciphertext) = envelope.split_at(GCM_NONCE_LENGTH);
        let personalized_app_id =
            crypto::personalized_hash(PERSONALIZATION_APPLICATION_ID, &application_id)?;
        let synthetic_password = crypto::aes_gcm_decrypt(
            inner_ciphertext,
            inner_iv,
            &personalized_app_id[..AES_256_KEY_LENGTH],
        )?;
        progress.advance(UnlockState::SecretDerived);

        if spblob.version == SYNTHETIC_PASSWORD_VERSION_V3 {
            crypto::sp800_derive(
                &synthetic_password,
                PERSONALIZATION_FBE_KEY,
                PERSONALIZATION_FBE_CONTEXT,
            )
        } else {
            // v2 hands the secret downstream in hex string form.
            let hash = crypto::personalized_hash(PERSONALIZATION_FBE_KEY, &synthetic_password)?;
            Ok(ZVec::from(hex::encode(&*hash).into_bytes()))
        }
    }

    fn weaver_secret(&self, user_id: u32, handle: &str, password_token: &ZVec) -> Result<ZVec> {
        log::info!("Using weaver to authenticate user {}", user_id);
        let weaver_data = WeaverData::parse(&self.store.read(user_id, handle, WEAVER_SUFFIX)?)
            .context(sp_err!("weaver record of user {}", user_id))?;
        let weaver = self
            .hal
            .weaver
            .as_deref()
            .ok_or(Error::HardwareUnavailable)
            .context(sp_err!("weaver record present but no weaver service"))?;
        let weaver_key = crypto::personalized_hash(PERSONALIZATION_WEAVER_KEY, password_token)?;
        let payload = weaver::escrow_payload(weaver, weaver_data.slot, &weaver_key)?;
        crypto::personalized_hash(PERSONALIZATION_WEAVER_PASSWORD, &payload)
    }

    /// `password_data` is present exactly when the user typed a credential;
    /// the default password authenticates through the keystore alone.
    fn secdiscardable_secret(
        &self,
        user_id: u32,
        handle: &str,
        password_data: Option<&PasswordData>,
        password_token: &ZVec,
    ) -> Result<ZVec> {
        log::info!("Using secdiscardable to authenticate user {}", user_id);
        let secdis = self.store.read(user_id, handle, SECDISCARDABLE_SUFFIX)?;
        let secdiscardable_hash =
            crypto::personalized_hash(PERSONALIZATION_SECDISCARDABLE, &secdis)?;
        if let Some(pwd) = password_data {
            if pwd.password_handle.is_empty() {
                return Err(Error::BlobCorrupt)
                    .context(sp_err!("no password handle enrolled for user {}", user_id));
            }
            let gk = self
                .hal
                .gatekeeper
                .as_deref()
                .ok_or(Error::HardwareUnavailable)
                .context(sp_err!("no gatekeeper service"))?;
            let gk_password_token =
                crypto::personalized_hash(PERSONALIZATION_USER_GK_AUTH, password_token)?;
            if let Some(token) = gatekeeper::verify_credential(
                gk,
                user_id,
                &pwd.password_handle,
                &gk_password_token,
            )? {
                authorization::install_auth_token(self.hal.authorization.as_deref(), &token)?;
            }
        }
        Ok(secdiscardable_hash)
    }
}

fn check_user_id(user_id: u32) -> Result<()> {
    if user_id > MAX_USER_ID {
        return Err(Error::IoError).context(sp_err!("user id {} out of range", user_id));
    }
    Ok(())
}
