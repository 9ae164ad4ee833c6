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

//! The keystore capability: the hardware-backed key-blob service holding
//! the outer AES-256-GCM wrapping key of each handle.
//!
//! The fixed call sequence is lookup, begin, finish: `get_key` resolves the
//! user-scoped alias in the locksettings namespace, `create_operation`
//! opens an AES/GCM/no-padding decrypt with the caller-supplied nonce and a
//! 128-bit tag, and `finish` feeds the tag-appended ciphertext and yields
//! the plaintext envelope. The wrapping key is auth bound: begin succeeds
//! only if the authorization broker already holds a matching token.

use crate::crypto::GCM_MAC_LENGTH_BITS;
use crate::error::Error;
use crate::sp_err;
use crate::watchdog as wd;
use crate::zvec::ZVec;
use anyhow::Result;

/// SELinux namespace of the lock settings service.
pub const NAMESPACE_LOCKSETTINGS: i64 = 103;

/// Key origin domains understood by the keystore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    App,
    Selinux,
}

/// Identifies a key entry in the keystore database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDescriptor {
    pub domain: Domain,
    pub nspace: i64,
    pub alias: String,
}

/// Descriptor of the wrapping key behind a synthetic password alias.
pub fn key_descriptor(alias: &str) -> KeyDescriptor {
    KeyDescriptor { domain: Domain::Selinux, nspace: NAMESPACE_LOCKSETTINGS, alias: alias.into() }
}

/// Opaque reference to a resolved key entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyHandle(pub i64);

/// Parameters of a keystore operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyParameter {
    Algorithm(Algorithm),
    BlockMode(BlockMode),
    PaddingMode(PaddingMode),
    KeyPurpose(KeyPurpose),
    Nonce(Vec<u8>),
    MacLength(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Aes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockMode {
    Gcm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaddingMode {
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPurpose {
    Decrypt,
}

/// Service-specific error codes the engine distinguishes. Everything else a
/// transport can report collapses into `SystemError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("key entry not found")]
    KeyNotFound,
    #[error("key not yet valid")]
    KeyNotYetValid,
    #[error("user not authenticated")]
    KeyUserNotAuthenticated,
    #[error("system error")]
    SystemError,
}

/// RPC surface of the keystore service.
pub trait Keystore {
    fn get_key(&self, descriptor: &KeyDescriptor) -> Result<KeyHandle, ServiceError>;
    fn create_operation(
        &self,
        key: &KeyHandle,
        params: &[KeyParameter],
    ) -> Result<Box<dyn KeystoreOperation>, ServiceError>;
}

/// A begun keystore operation; consumed by `finish`.
pub trait KeystoreOperation {
    fn finish(self: Box<Self>, input: &[u8]) -> Result<Vec<u8>, ServiceError>;
}

/// Unwraps the outer envelope layer with the keystore-held key.
///
/// Error mapping follows what the service codes mean for this pipeline: a
/// missing key entry means the platform rotated the wrapping key out from
/// under us (`KeyRotated`); an authentication failure at begin or finish
/// means the earlier gatekeeper step did not install a usable token
/// (`CredentialWrong`); anything else is `HardwareUnavailable`.
pub fn unwrap_outer_blob(
    keystore: &dyn Keystore,
    alias: &str,
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<ZVec> {
    let descriptor = key_descriptor(alias);
    let key = {
        let _wp = wd::watch_millis("IKeystoreService::getKeyEntry", 500);
        keystore.get_key(&descriptor)
    }
    .map_err(|e| match e {
        ServiceError::KeyNotFound => anyhow::Error::new(Error::KeyRotated)
            .context(sp_err!("no key entry for alias '{}'", alias)),
        e => {
            log::error!("getKeyEntry('{}') failed: {:?}", alias, e);
            anyhow::Error::new(Error::HardwareUnavailable).context(sp_err!("getKeyEntry failed"))
        }
    })?;

    let params = [
        KeyParameter::Algorithm(Algorithm::Aes),
        KeyParameter::BlockMode(BlockMode::Gcm),
        KeyParameter::PaddingMode(PaddingMode::None),
        KeyParameter::KeyPurpose(KeyPurpose::Decrypt),
        KeyParameter::Nonce(iv.to_vec()),
        KeyParameter::MacLength(GCM_MAC_LENGTH_BITS),
    ];
    let operation = {
        let _wp = wd::watch_millis("IKeystoreSecurityLevel::createOperation", 500);
        keystore.create_operation(&key, &params)
    }
    .map_err(|e| map_operation_error(e, "createOperation"))?;

    let plaintext = {
        let _wp = wd::watch_millis("IKeystoreOperation::finish", 500);
        operation.finish(ciphertext)
    }
    .map_err(|e| map_operation_error(e, "finish"))?;
    Ok(ZVec::from(plaintext))
}

fn map_operation_error(e: ServiceError, what: &str) -> anyhow::Error {
    match e {
        ServiceError::KeyNotYetValid | ServiceError::KeyUserNotAuthenticated => {
            anyhow::Error::new(Error::CredentialWrong)
                .context(sp_err!("{} rejected for authentication: {:?}", what, e))
        }
        e => {
            log::error!("{} failed: {:?}", what, e);
            anyhow::Error::new(Error::HardwareUnavailable).context(sp_err!("{} failed", what))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct ScriptedKeystore {
        get_key: Result<KeyHandle, ServiceError>,
        begin: Result<(), ServiceError>,
        finish: Result<Vec<u8>, ServiceError>,
        seen_params: RefCell<Vec<KeyParameter>>,
    }

    struct ScriptedOperation(Result<Vec<u8>, ServiceError>);

    impl Keystore for ScriptedKeystore {
        fn get_key(&self, descriptor: &KeyDescriptor) -> Result<KeyHandle, ServiceError> {
            assert_eq!(descriptor.domain, Domain::Selinux);
            assert_eq!(descriptor.nspace, NAMESPACE_LOCKSETTINGS);
            self.get_key.clone()
        }
        fn create_operation(
            &self,
            _key: &KeyHandle,
            params: &[KeyParameter],
        ) -> Result<Box<dyn KeystoreOperation>, ServiceError> {
            *self.seen_params.borrow_mut() = params.to_vec();
            self.begin.map(|_| {
                Box::new(ScriptedOperation(self.finish.clone())) as Box<dyn KeystoreOperation>
            })
        }
    }

    impl KeystoreOperation for ScriptedOperation {
        fn finish(self: Box<Self>, _input: &[u8]) -> Result<Vec<u8>, ServiceError> {
            self.0
        }
    }

    fn keystore_ok() -> ScriptedKeystore {
        ScriptedKeystore {
            get_key: Ok(KeyHandle(1)),
            begin: Ok(()),
            finish: Ok(vec![1, 2, 3]),
            seen_params: RefCell::new(Vec::new()),
        }
    }

    #[test]
    fn test_unwrap_outer_blob_passes_gcm_parameters() {
        let ks = keystore_ok();
        let out = unwrap_outer_blob(&ks, "synthetic_password_1", &[9u8; 12], &[0u8; 32]).unwrap();
        assert_eq!(&*out, &[1, 2, 3]);
        let params = ks.seen_params.borrow();
        assert!(params.contains(&KeyParameter::Algorithm(Algorithm::Aes)));
        assert!(params.contains(&KeyParameter::BlockMode(BlockMode::Gcm)));
        assert!(params.contains(&KeyParameter::PaddingMode(PaddingMode::None)));
        assert!(params.contains(&KeyParameter::KeyPurpose(KeyPurpose::Decrypt)));
        assert!(params.contains(&KeyParameter::Nonce(vec![9u8; 12])));
        assert!(params.contains(&KeyParameter::MacLength(128)));
    }

    #[test]
    fn test_missing_key_entry_is_key_rotated() {
        let mut ks = keystore_ok();
        ks.get_key = Err(ServiceError::KeyNotFound);
        let e = unwrap_outer_blob(&ks, "a", &[0u8; 12], &[]).expect_err("must fail");
        assert_eq!(Error::root_of(&e), Some(Error::KeyRotated));
    }

    #[test]
    fn test_unauthenticated_begin_is_credential_wrong() {
        let mut ks = keystore_ok();
        ks.begin = Err(ServiceError::KeyUserNotAuthenticated);
        let e = unwrap_outer_blob(&ks, "a", &[0u8; 12], &[]).expect_err("must fail");
        assert_eq!(Error::root_of(&e), Some(Error::CredentialWrong));
    }

    #[test]
    fn test_generic_finish_failure_is_hardware_error() {
        let mut ks = keystore_ok();
        ks.finish = Err(ServiceError::SystemError);
        let e = unwrap_outer_blob(&ks, "a", &[0u8; 12], &[]).expect_err("must fail");
        assert_eq!(Error::root_of(&e), Some(Error::HardwareUnavailable));
    }
}
