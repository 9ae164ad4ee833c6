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

//! Terminal error kinds of the unwrap engine.
//!
//! Engine functions return `anyhow::Result` and add context with `sp_err!`
//! every time an error is forwarded. The terminal classification is carried
//! as the anyhow root cause in the form of an [`Error`] variant; callers
//! recover it with [`Error::root_of`]. No error is recovered internally, and
//! no error message contains secret material.

use std::cmp::PartialEq;

/// One unlock attempt ends in exactly one of these kinds. The engine never
/// retries on its own; the caller re-invokes `unlock` after a failure.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A required on-disk artifact was not found under any handle variant.
    #[error("required artifact not found")]
    BlobMissing,
    /// An artifact failed structural validation (truncated, bad declared
    /// length, or unsupported version/type byte).
    #[error("artifact failed validation")]
    BlobCorrupt,
    /// The credential was rejected by weaver, gatekeeper, or the keystore
    /// authorization check.
    #[error("credential rejected")]
    CredentialWrong,
    /// The authenticator is throttling; the caller may retry after the
    /// reported number of milliseconds.
    #[error("authenticator throttled, retry in {0} ms")]
    RetryAfter(u32),
    /// A hardware service could not be reached or reported a generic error.
    #[error("hardware service unavailable")]
    HardwareUnavailable,
    /// The keystore no longer holds the wrapping key for this handle.
    #[error("keystore key entry not found")]
    KeyRotated,
    /// The scrypt derivation failed.
    #[error("key derivation failed")]
    KdfError,
    /// Authenticated decryption of the inner envelope failed (tag mismatch).
    #[error("authenticated decryption failed")]
    CryptoError,
    /// Any other I/O failure.
    #[error("I/O failure")]
    IoError,
}

impl Error {
    /// Recovers the terminal kind from an `anyhow::Error`, if the root cause
    /// is one. Returns `None` for errors that never received a terminal
    /// classification; treat those as system errors.
    pub fn root_of(e: &anyhow::Error) -> Option<Error> {
        e.root_cause().downcast_ref::<Error>().copied()
    }
}
