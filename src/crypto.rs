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

//! Derivation primitives of the unwrap pipeline.
//!
//! Three families live here:
//! - the scrypt password token derivation, parameterized by the exponents
//!   stored in the password data record;
//! - the personalized hashes: `SHA-512(pad_128(label) || data)` where the
//!   UTF-8 label is right-padded with NUL bytes to exactly 128 bytes, and
//!   the SP 800-108 counter-mode variant (HMAC-SHA-256 PRF) used by v3
//!   blobs;
//! - the inner AES-256-GCM open of the synthetic password envelope.
//!
//! Byte layouts here must match the platform that wrote the artifacts
//! exactly; there is no negotiation and a mismatch yields an unusable key.

use crate::error::Error;
use crate::sp_err;
use crate::zvec::ZVec;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use scrypt::{scrypt, Params};
use sha2::{Digest, Sha256, Sha512};

/// Width the personalization label is NUL-padded to.
pub const PERSONALIZATION_WIDTH: usize = 128;
/// Length of a personalized hash (SHA-512 digest).
pub const SHA512_DIGEST_LENGTH: usize = 64;
/// Length of the scrypt-derived password token.
pub const PASSWORD_TOKEN_SIZE: usize = 32;
/// AES-256 key length, also the prefix taken from the personalized
/// application id.
pub const AES_256_KEY_LENGTH: usize = 32;
/// AES-GCM nonce length used by both envelope layers.
pub const GCM_NONCE_LENGTH: usize = 12;
/// AES-GCM tag length in bytes (128 bits, appended to the ciphertext).
pub const GCM_TAG_LENGTH: usize = 16;
/// AES-GCM tag length in bits, as the keystore parameter set expects it.
pub const GCM_MAC_LENGTH_BITS: u32 = 128;

/// Keys the application id before the inner envelope open.
pub const PERSONALIZATION_APPLICATION_ID: &str = "application-id";
/// Post-processes the synthetic password into the FBE secret.
pub const PERSONALIZATION_FBE_KEY: &str = "fbe-key";
/// Context string of the v3 SP 800-108 FBE derivation.
pub const PERSONALIZATION_FBE_CONTEXT: &str = "fbe-key-context";
/// Transforms the secdiscardable blob into the second application id half.
pub const PERSONALIZATION_SECDISCARDABLE: &str = "secdiscardable-transform";
/// Derives the weaver slot key from the password token.
pub const PERSONALIZATION_WEAVER_KEY: &str = "weaver-key";
/// Transforms the escrowed weaver payload into the second application id
/// half.
pub const PERSONALIZATION_WEAVER_PASSWORD: &str = "weaver-pwd";
/// Derives the token presented to gatekeeper from the password token.
pub const PERSONALIZATION_USER_GK_AUTH: &str = "user-gk-authentication";

/// The password token of a user without a lock screen credential: the
/// literal bytes `default-password`, NUL-padded to the token size.
pub const DEFAULT_PASSWORD: &[u8] = b"default-password";

/// `SHA-512(pad_128(label) || data)`. All intermediate secrets of the
/// pipeline are domain-separated through this construction.
pub fn personalized_hash(label: &str, data: &[u8]) -> Result<ZVec> {
    if label.len() > PERSONALIZATION_WIDTH {
        return Err(Error::CryptoError)
            .context(sp_err!("personalization label exceeds {} bytes", PERSONALIZATION_WIDTH));
    }
    let mut padded = [0u8; PERSONALIZATION_WIDTH];
    padded[..label.len()].copy_from_slice(label.as_bytes());
    let mut hasher = Sha512::new();
    hasher.update(padded);
    hasher.update(data);
    Ok(ZVec::from(hasher.finalize().to_vec()))
}

/// NIST SP 800-108 counter-mode KDF with HMAC-SHA-256 as the PRF, keyed by
/// `key`. Single block: `HMAC(key, BE32(1) || label || 0x00 || context ||
/// BE32(256))`, yielding 32 bytes. Used only for version-3 blobs.
pub fn sp800_derive(key: &[u8], label: &str, context: &str) -> Result<ZVec> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
        .map_err(|_| Error::CryptoError)
        .context(sp_err!("HMAC init failed"))?;
    mac.update(&1u32.to_be_bytes());
    mac.update(label.as_bytes());
    mac.update(&[0u8]);
    mac.update(context.as_bytes());
    mac.update(&(8 * Sha256::output_size() as u32).to_be_bytes());
    Ok(ZVec::from(mac.finalize().into_bytes().to_vec()))
}

/// Runs scrypt over the credential with `N = 1 << log_n`, `r = 1 << log_r`,
/// `p = 1 << log_p` to a 32-byte token. The exponents come verbatim from the
/// password data record; they are not clamped here.
pub fn derive_password_token(
    credential: &[u8],
    salt: &[u8],
    log_n: u8,
    log_r: u8,
    log_p: u8,
) -> Result<ZVec> {
    let (r, p) = 1u32
        .checked_shl(log_r.into())
        .zip(1u32.checked_shl(log_p.into()))
        .ok_or(Error::KdfError)
        .context(sp_err!("scrypt exponents ({}, {}) out of range", log_r, log_p))?;
    let params = Params::new(log_n, r, p, PASSWORD_TOKEN_SIZE)
        .map_err(|_| Error::KdfError)
        .context(sp_err!("invalid scrypt parameters 2^({}, {}, {})", log_n, log_r, log_p))?;
    let mut token = ZVec::new(PASSWORD_TOKEN_SIZE);
    scrypt(credential, salt, &params, &mut token)
        .map_err(|_| Error::KdfError)
        .context(sp_err!("scrypt failed"))?;
    Ok(token)
}

/// The fixed token used in place of a scrypt derivation for a
/// default-password user.
pub fn default_password_token() -> ZVec {
    let mut token = ZVec::new(PASSWORD_TOKEN_SIZE);
    token[..DEFAULT_PASSWORD.len()].copy_from_slice(DEFAULT_PASSWORD);
    token
}

/// Opens an AES-256-GCM envelope. `data` is ciphertext with the 16-byte tag
/// appended; `iv` is the 12-byte nonce; there is no associated data and no
/// padding. A tag mismatch is reported as `CryptoError`.
pub fn aes_gcm_decrypt(data: &[u8], iv: &[u8], key: &[u8]) -> Result<ZVec> {
    if iv.len() != GCM_NONCE_LENGTH {
        return Err(Error::CryptoError)
            .context(sp_err!("nonce must be {} bytes, got {}", GCM_NONCE_LENGTH, iv.len()));
    }
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| Error::CryptoError)
        .context(sp_err!("decryption key must be {} bytes", AES_256_KEY_LENGTH))?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(iv), data)
        .map_err(|_| Error::CryptoError)
        .context(sp_err!("AES-GCM open failed"))?;
    Ok(ZVec::from(plaintext))
}
