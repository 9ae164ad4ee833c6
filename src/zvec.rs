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

//! Zeroizing containers for key material.
//!
//! Every derived buffer in the unwrap pipeline (password token, weaver key,
//! application id, synthetic password, FBE secret) lives in a [`ZVec`]. The
//! backing memory is wiped when the buffer is dropped, on success and failure
//! paths alike. `ZVec` is deliberately not `Clone` and its `Debug` output is
//! redacted.

use std::fmt;
use std::ops::{Deref, DerefMut};
use zeroize::Zeroize;

/// A byte vector that is zeroed on drop.
pub struct ZVec(Vec<u8>);

impl ZVec {
    /// Creates a new all-zero buffer of the given size.
    pub fn new(size: usize) -> Self {
        Self(vec![0; size])
    }

    /// Concatenates the given slices into one zeroizing buffer.
    pub fn concat(parts: &[&[u8]]) -> Self {
        let mut out = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
        for part in parts {
            out.extend_from_slice(part);
        }
        Self(out)
    }
}

impl Drop for ZVec {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl Deref for ZVec {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for ZVec {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<Vec<u8>> for ZVec {
    fn from(v: Vec<u8>) -> Self {
        Self(v)
    }
}

impl fmt::Debug for ZVec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ZVec size: {} [redacted]", self.0.len())
    }
}

/// The credential string handed to `unlock`. The literal `"!"` stands for
/// the default password of a user that never set a lock screen credential.
pub struct Credential(ZVec);

/// The marker credential of a default-password user.
pub const DEFAULT_CREDENTIAL: &str = "!";

impl Credential {
    pub fn is_default(&self) -> bool {
        &*self.0 == DEFAULT_CREDENTIAL.as_bytes()
    }
}

impl From<&str> for Credential {
    fn from(s: &str) -> Self {
        Self(ZVec::from(s.as_bytes().to_vec()))
    }
}

impl Deref for Credential {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Credential [redacted]")
    }
}
