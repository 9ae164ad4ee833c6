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

//! Synthetic password unwrap engine.
//!
//! Reconstructs a user's file-based-encryption secret from a supplied
//! credential and the artifacts the platform's synthetic password manager
//! left on disk, then unlocks the user's credential-encrypted storage. The
//! engine cooperates with four hardware-backed capabilities (weaver,
//! gatekeeper, keystore, authorization) injected by the host environment.
//!
//! Public surface: [`UnwrapEngine::init`] bootstraps the process-wide RPC
//! plumbing, [`UnwrapEngine::password_type`] classifies the stored
//! credential for the prompt, and [`UnwrapEngine::unlock`] runs one unwrap
//! attempt to a terminal state. Unlock is a strictly read-only path: it
//! never enrolls, changes, or upgrades anything on disk.

pub mod blob_store;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod hal;
pub mod probe;
pub mod records;
mod sp_err;
pub mod watchdog;
pub mod zvec;

pub use engine::{CeStorage, EngineConfig, UnlockState, UnwrapEngine, STORAGE_FLAG_CE};
pub use error::Error;
pub use probe::{CredentialProbe, CredentialType};
pub use zvec::{Credential, ZVec, DEFAULT_CREDENTIAL};
