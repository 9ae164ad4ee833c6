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

//! Parsers for the on-disk artifact formats.
//!
//! These records are written by the platform and read back here without any
//! trust in their declared lengths: every access goes through a
//! bounds-checked reader, and a declared length that exceeds the available
//! bytes fails with `BlobCorrupt`.
//!
//! Endianness is part of the format: the password data integers are
//! big-endian, the weaver slot is a host-endian integer.

use crate::crypto::{GCM_NONCE_LENGTH, GCM_TAG_LENGTH};
use crate::error::Error;
use crate::sp_err;
use anyhow::{Context, Result};

/// Version byte of a v2 synthetic password blob.
pub const SYNTHETIC_PASSWORD_VERSION_V2: u8 = 2;
/// Version byte of a v3 synthetic password blob.
pub const SYNTHETIC_PASSWORD_VERSION_V3: u8 = 3;
/// The only supported blob type: wrapped by a password-derived application
/// id.
pub const SYNTHETIC_PASSWORD_PASSWORD_BASED: u8 = 0;

/// Cursor over an untrusted byte buffer. Every read states what it is
/// reading so truncation errors name the offending field.
struct BlobReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BlobReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn read_slice(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or(Error::BlobCorrupt)
            .with_context(|| {
                sp_err!("{}: need {} bytes, {} left", what, len, self.buf.len() - self.pos)
            })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.read_slice(1, what)?[0])
    }

    fn read_be_i32(&mut self, what: &str) -> Result<i32> {
        let bytes = self.read_slice(4, what)?;
        Ok(i32::from_be_bytes(bytes.try_into().unwrap()))
    }

    fn read_ne_i32(&mut self, what: &str) -> Result<i32> {
        let bytes = self.read_slice(4, what)?;
        Ok(i32::from_ne_bytes(bytes.try_into().unwrap()))
    }

    fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}

/// Checks a declared length field: it must be non-negative and representable.
fn declared_len(len: i32, what: &str) -> Result<usize> {
    usize::try_from(len)
        .map_err(|_| Error::BlobCorrupt)
        .with_context(|| sp_err!("{}: negative declared length {}", what, len))
}

/// Contents of the password data record: the semantic credential class, the
/// scrypt parameter exponents, the salt, and the enrolled gatekeeper
/// password handle.
#[derive(Debug)]
pub struct PasswordData {
    pub password_type: i32,
    pub scrypt_log_n: u8,
    pub scrypt_log_r: u8,
    pub scrypt_log_p: u8,
    pub salt: Vec<u8>,
    /// May be empty when the slot is escrowed by weaver; a non-weaver unlock
    /// requires a non-empty handle.
    pub password_handle: Vec<u8>,
}

impl PasswordData {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = BlobReader::new(data);
        let password_type = reader.read_be_i32("password type")?;
        let scrypt_log_n = reader.read_u8("scrypt N exponent")?;
        let scrypt_log_r = reader.read_u8("scrypt r exponent")?;
        let scrypt_log_p = reader.read_u8("scrypt p exponent")?;
        let salt_len = reader.read_be_i32("salt length")?;
        if salt_len <= 0 {
            return Err(Error::BlobCorrupt)
                .context(sp_err!("salt length must be positive, got {}", salt_len));
        }
        let salt = reader.read_slice(declared_len(salt_len, "salt length")?, "salt")?.to_vec();
        let handle_len = declared_len(reader.read_be_i32("handle length")?, "handle length")?;
        let password_handle = reader.read_slice(handle_len, "password handle")?.to_vec();
        Ok(PasswordData {
            password_type,
            scrypt_log_n,
            scrypt_log_r,
            scrypt_log_p,
            salt,
            password_handle,
        })
    }
}

/// The outer synthetic password envelope: version, type, the GCM nonce of
/// the keystore-held wrapping key, and the tag-appended ciphertext.
#[derive(Debug)]
pub struct SpBlob {
    pub version: u8,
    pub iv: [u8; GCM_NONCE_LENGTH],
    pub ciphertext: Vec<u8>,
}

impl SpBlob {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = BlobReader::new(data);
        let version = reader.read_u8("blob version")?;
        if version != SYNTHETIC_PASSWORD_VERSION_V2 && version != SYNTHETIC_PASSWORD_VERSION_V3 {
            return Err(Error::BlobCorrupt)
                .context(sp_err!("unsupported synthetic password version {}", version));
        }
        let blob_type = reader.read_u8("blob type")?;
        if blob_type != SYNTHETIC_PASSWORD_PASSWORD_BASED {
            return Err(Error::BlobCorrupt)
                .context(sp_err!("blob type {} is not password based", blob_type));
        }
        let iv: [u8; GCM_NONCE_LENGTH] =
            reader.read_slice(GCM_NONCE_LENGTH, "nonce")?.try_into().unwrap();
        let ciphertext = reader.remaining().to_vec();
        if ciphertext.len() < GCM_TAG_LENGTH {
            return Err(Error::BlobCorrupt)
                .context(sp_err!("ciphertext shorter than the {} byte tag", GCM_TAG_LENGTH));
        }
        Ok(SpBlob { version, iv, ciphertext })
    }
}

/// The weaver record: a version byte followed by the escrow slot number.
#[derive(Debug, PartialEq, Eq)]
pub struct WeaverData {
    pub version: u8,
    pub slot: i32,
}

impl WeaverData {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = BlobReader::new(data);
        let version = reader.read_u8("weaver version")?;
        let slot = reader.read_ne_i32("weaver slot")?;
        if slot < 0 {
            return Err(Error::BlobCorrupt).context(sp_err!("negative weaver slot {}", slot));
        }
        Ok(WeaverData { version, slot })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_password_data() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&3i32.to_be_bytes());
        data.push(11);
        data.push(3);
        data.push(1);
        data.extend_from_slice(&16i32.to_be_bytes());
        data.extend_from_slice(&[0xA5; 16]);
        data.extend_from_slice(&4i32.to_be_bytes());
        data.extend_from_slice(&[1, 2, 3, 4]);
        data
    }

    #[test]
    fn test_password_data_parse() {
        let pwd = PasswordData::parse(&sample_password_data()).unwrap();
        assert_eq!(pwd.password_type, 3);
        assert_eq!((pwd.scrypt_log_n, pwd.scrypt_log_r, pwd.scrypt_log_p), (11, 3, 1));
        assert_eq!(pwd.salt, vec![0xA5; 16]);
        assert_eq!(pwd.password_handle, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_password_data_empty_handle_allowed() {
        let mut data = sample_password_data();
        let len = data.len();
        data.truncate(len - 8);
        data.extend_from_slice(&0i32.to_be_bytes());
        let pwd = PasswordData::parse(&data).unwrap();
        assert!(pwd.password_handle.is_empty());
    }

    #[test]
    fn test_password_data_salt_overruns_file() {
        let mut data = sample_password_data();
        data[7..11].copy_from_slice(&1000i32.to_be_bytes());
        let e = PasswordData::parse(&data).expect_err("oversized salt must fail");
        assert_eq!(Error::root_of(&e), Some(Error::BlobCorrupt));
    }

    #[test]
    fn test_password_data_zero_salt_rejected() {
        let mut data = sample_password_data();
        data[7..11].copy_from_slice(&0i32.to_be_bytes());
        let e = PasswordData::parse(&data).expect_err("zero salt must fail");
        assert_eq!(Error::root_of(&e), Some(Error::BlobCorrupt));
    }

    #[test]
    fn test_password_data_negative_handle_len_rejected() {
        let mut data = sample_password_data();
        let off = data.len() - 8;
        data[off..off + 4].copy_from_slice(&(-1i32).to_be_bytes());
        let e = PasswordData::parse(&data).expect_err("negative length must fail");
        assert_eq!(Error::root_of(&e), Some(Error::BlobCorrupt));
    }

    #[test]
    fn test_password_data_truncated() {
        let e = PasswordData::parse(&[0, 0]).expect_err("truncated record must fail");
        assert_eq!(Error::root_of(&e), Some(Error::BlobCorrupt));
    }

    fn sample_spblob(version: u8, blob_type: u8) -> Vec<u8> {
        let mut data = vec![version, blob_type];
        data.extend_from_slice(&[0x42; 12]);
        data.extend_from_slice(&[0xCC; 40]);
        data
    }

    #[test]
    fn test_spblob_parse_v2_and_v3() {
        for version in [SYNTHETIC_PASSWORD_VERSION_V2, SYNTHETIC_PASSWORD_VERSION_V3] {
            let blob = SpBlob::parse(&sample_spblob(version, 0)).unwrap();
            assert_eq!(blob.version, version);
            assert_eq!(blob.iv, [0x42; 12]);
            assert_eq!(blob.ciphertext.len(), 40);
        }
    }

    #[test]
    fn test_spblob_rejects_unsupported_versions() {
        for version in [0u8, 1, 4, 5, 0xFF] {
            let e = SpBlob::parse(&sample_spblob(version, 0)).expect_err("bad version");
            assert_eq!(Error::root_of(&e), Some(Error::BlobCorrupt));
        }
    }

    #[test]
    fn test_spblob_rejects_non_password_type() {
        let e = SpBlob::parse(&sample_spblob(2, 1)).expect_err("bad type");
        assert_eq!(Error::root_of(&e), Some(Error::BlobCorrupt));
    }

    #[test]
    fn test_spblob_rejects_tagless_ciphertext() {
        let mut data = vec![2u8, 0];
        data.extend_from_slice(&[0x42; 12]);
        data.extend_from_slice(&[0xCC; 15]);
        let e = SpBlob::parse(&data).expect_err("short ciphertext");
        assert_eq!(Error::root_of(&e), Some(Error::BlobCorrupt));
    }

    #[test]
    fn test_weaver_data_slot_is_host_endian() {
        let mut data = vec![1u8];
        data.extend_from_slice(&7i32.to_ne_bytes());
        assert_eq!(WeaverData::parse(&data).unwrap(), WeaverData { version: 1, slot: 7 });
    }

    #[test]
    fn test_weaver_data_rejects_negative_slot() {
        let mut data = vec![1u8];
        data.extend_from_slice(&(-3i32).to_ne_bytes());
        let e = WeaverData::parse(&data).expect_err("negative slot");
        assert_eq!(Error::root_of(&e), Some(Error::BlobCorrupt));
    }

    #[test]
    fn test_weaver_data_truncated() {
        let e = WeaverData::parse(&[1, 0, 0]).expect_err("truncated record");
        assert_eq!(Error::root_of(&e), Some(Error::BlobCorrupt));
    }
}
