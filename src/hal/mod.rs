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

//! Hardware service capabilities.
//!
//! Each hardware role the engine talks to (weaver, gatekeeper, keystore,
//! authorization) is one capability trait with the transport hidden behind
//! it. The orchestrator holds only the capability bundle; which transport
//! generation backs a capability is decided once, by whoever constructs
//! [`HalServices`], and never revisited.

pub mod authorization;
pub mod gatekeeper;
pub mod keystore;
pub mod weaver;

use crate::error::Error;
use crate::sp_err;
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// The capability bundle handed to the engine. Weaver, gatekeeper, and
/// authorization are absent on devices that do not declare them; a pipeline
/// path that needs a missing capability fails with `HardwareUnavailable`.
pub struct HalServices {
    pub weaver: Option<Box<dyn weaver::Weaver>>,
    pub gatekeeper: Option<Box<dyn gatekeeper::Gatekeeper>>,
    pub keystore: Box<dyn keystore::Keystore>,
    pub authorization: Option<Box<dyn authorization::Authorization>>,
}

/// Process-wide RPC plumbing: the call dispatcher thread pool and the
/// lifecycle of the keystore daemon. One implementation per host
/// environment.
pub trait ServiceRuntime {
    /// Starts the RPC dispatcher threads. Must happen before the first
    /// keystore call.
    fn start_thread_pool(&self) -> Result<()>;
    /// Asks init to start the keystore daemon.
    fn start_keystore(&self) -> Result<()>;
    /// True once the keystore service answers.
    fn keystore_ready(&self) -> bool;
    /// Releases the dispatcher and stops anything `self` started.
    fn shutdown(&self) -> Result<()>;
}

/// The keystore daemon is not always up when the recovery environment
/// boots; poll for this many one-second intervals before giving up.
pub const KEYSTORE_STARTUP_RETRIES: u32 = 50;

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// One-time process-wide bootstrap: dispatcher threads, keystore daemon
/// start, and a bounded readiness poll. Calling this a second time is a
/// no-op.
pub fn initialize(runtime: &dyn ServiceRuntime) -> Result<()> {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        log::info!("In initialize: called for a second time");
        return Ok(());
    }
    runtime.start_thread_pool().context(sp_err!("start_thread_pool failed"))?;
    runtime.start_keystore().context(sp_err!("start_keystore failed"))?;
    let mut retries = KEYSTORE_STARTUP_RETRIES;
    while !runtime.keystore_ready() {
        if retries == 0 {
            return Err(Error::HardwareUnavailable)
                .context(sp_err!("keystore did not come up"));
        }
        log::info!("Waiting for keystore service... {}", retries);
        retries -= 1;
        thread::sleep(Duration::from_secs(1));
    }
    Ok(())
}

/// Releases the process-wide plumbing acquired by [`initialize`].
pub fn shutdown(runtime: &dyn ServiceRuntime) -> Result<()> {
    if !INITIALIZED.swap(false, Ordering::SeqCst) {
        return Ok(());
    }
    runtime.shutdown().context(sp_err!("runtime shutdown failed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[derive(Default)]
    struct CountingRuntime {
        pool_starts: AtomicU32,
        keystore_starts: AtomicU32,
        shutdowns: AtomicU32,
    }

    impl ServiceRuntime for CountingRuntime {
        fn start_thread_pool(&self) -> Result<()> {
            self.pool_starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn start_keystore(&self) -> Result<()> {
            self.keystore_starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn keystore_ready(&self) -> bool {
            true
        }
        fn shutdown(&self) -> Result<()> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_initialize_is_once_per_process() {
        let runtime = CountingRuntime::default();
        initialize(&runtime).unwrap();
        initialize(&runtime).unwrap();
        assert_eq!(runtime.pool_starts.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.keystore_starts.load(Ordering::SeqCst), 1);

        shutdown(&runtime).unwrap();
        shutdown(&runtime).unwrap();
        assert_eq!(runtime.shutdowns.load(Ordering::SeqCst), 1);

        // A fresh initialize after shutdown bootstraps again.
        initialize(&runtime).unwrap();
        assert_eq!(runtime.pool_starts.load(Ordering::SeqCst), 2);
        shutdown(&runtime).unwrap();
    }
}
