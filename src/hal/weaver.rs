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

//! The weaver capability: a secure-element key escrow that releases its
//! payload only for the correct (slot, key) pair and throttles guessing.

use crate::error::Error;
use crate::sp_err;
use crate::watchdog as wd;
use crate::zvec::ZVec;
use anyhow::{Context, Result};

/// Outcome of a weaver verify call, as reported by the service.
#[derive(Debug)]
pub enum WeaverVerifyResult {
    /// Key matched; the escrowed payload is released.
    Verified { payload: Vec<u8> },
    /// Too many recent attempts; try again after the given delay.
    Throttled { timeout_ms: u32 },
    /// The presented key does not match the slot.
    Incorrect,
    /// The service failed internally.
    Failed,
}

/// RPC surface of the weaver service. A transport error (as opposed to a
/// service-reported outcome) is returned as `Err`.
pub trait Weaver {
    fn key_size(&self) -> Result<u32>;
    fn verify(&self, slot: u32, key: &[u8]) -> Result<WeaverVerifyResult>;
}

/// Verifies `weaver_key` against `slot` and returns the escrowed payload.
/// The derived key length must match the size the service expects; the
/// service outcomes map onto the terminal error kinds.
pub fn escrow_payload(weaver: &dyn Weaver, slot: i32, weaver_key: &[u8]) -> Result<ZVec> {
    let key_size = {
        let _wp = wd::watch_millis("IWeaver::getKeySize", 500);
        weaver.key_size()
    }
    .map_err(log_and_unavailable("IWeaver::getKeySize"))?;
    if key_size as usize != weaver_key.len() {
        return Err(Error::HardwareUnavailable).context(sp_err!(
            "weaver expects {} byte keys, derived key is {} bytes",
            key_size,
            weaver_key.len()
        ));
    }
    let result = {
        let _wp = wd::watch_millis("IWeaver::verify", 5000);
        weaver.verify(slot as u32, weaver_key)
    }
    .map_err(log_and_unavailable("IWeaver::verify"))?;
    match result {
        WeaverVerifyResult::Verified { payload } => {
            log::info!("Weaver released payload for slot {}", slot);
            Ok(ZVec::from(payload))
        }
        WeaverVerifyResult::Throttled { timeout_ms } => Err(Error::RetryAfter(timeout_ms))
            .context(sp_err!("weaver throttled slot {}", slot)),
        WeaverVerifyResult::Incorrect => {
            Err(Error::CredentialWrong).context(sp_err!("weaver rejected key for slot {}", slot))
        }
        WeaverVerifyResult::Failed => {
            Err(Error::HardwareUnavailable).context(sp_err!("weaver verify failed internally"))
        }
    }
}

pub(crate) fn log_and_unavailable(
    what: &'static str,
) -> impl FnOnce(anyhow::Error) -> anyhow::Error {
    move |e| {
        log::error!("{} transport failure: {:?}", what, e);
        anyhow::Error::new(Error::HardwareUnavailable).context(sp_err!("{} failed", what))
    }
}
