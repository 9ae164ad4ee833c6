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

//! The authorization capability: the per-boot broker that holds hardware
//! auth tokens for the keystore.
//!
//! Installing the token must happen before the keystore begin call; the
//! keystore looks the token up in the broker's table when it opens an
//! auth-bound key operation.

use super::gatekeeper::HardwareAuthToken;
use super::weaver::log_and_unavailable;
use crate::error::Error;
use crate::sp_err;
use crate::watchdog as wd;
use anyhow::{Context, Result};

/// RPC surface of the authorization service.
pub trait Authorization {
    fn add_auth_token(&self, token: &HardwareAuthToken) -> Result<()>;
}

/// Forwards the auth token to the broker. The token metadata is loggable;
/// the HMAC is not reproduced anywhere.
pub fn install_auth_token(
    authorization: Option<&dyn Authorization>,
    token: &HardwareAuthToken,
) -> Result<()> {
    let authorization = authorization
        .ok_or(Error::HardwareUnavailable)
        .context(sp_err!("no authorization service"))?;
    log::info!(
        "addAuthToken(challenge={}, userId={}, authId={}, authType={:#x}, timestamp={}ms)",
        token.challenge,
        token.user_id,
        token.authenticator_id,
        token.authenticator_type,
        token.timestamp_ms,
    );
    {
        let _wp = wd::watch_millis("IKeystoreAuthorization::addAuthToken", 500);
        authorization.add_auth_token(token)
    }
    .map_err(log_and_unavailable("IKeystoreAuthorization::addAuthToken"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn token() -> HardwareAuthToken {
        HardwareAuthToken {
            version: 0,
            challenge: 1,
            user_id: 2,
            authenticator_id: 3,
            authenticator_type: 2,
            timestamp_ms: 4,
            mac: [0; 32],
        }
    }

    struct RecordingAuthorization(Mutex<Vec<HardwareAuthToken>>);

    impl Authorization for RecordingAuthorization {
        fn add_auth_token(&self, token: &HardwareAuthToken) -> Result<()> {
            self.0.lock().unwrap().push(token.clone());
            Ok(())
        }
    }

    #[test]
    fn test_install_auth_token_forwards() {
        let broker = RecordingAuthorization(Mutex::new(Vec::new()));
        install_auth_token(Some(&broker), &token()).unwrap();
        assert_eq!(broker.0.lock().unwrap().as_slice(), &[token()]);
    }

    #[test]
    fn test_install_auth_token_without_service() {
        let e = install_auth_token(None, &token()).expect_err("must fail");
        assert_eq!(Error::root_of(&e), Some(Error::HardwareUnavailable));
    }
}
