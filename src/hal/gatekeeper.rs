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

//! The gatekeeper capability: verifies a password-derived token against an
//! enrolled handle and issues a signed hardware auth token.
//!
//! The auth token crosses two interface generations: gatekeeper hands it
//! out in the packed 69-byte HAL layout, the authorization service takes a
//! parsed structure. `authenticator_type` and `timestamp` are big-endian in
//! the packed form and must be byte-swapped here; the other integers are
//! host-endian.

use super::weaver::log_and_unavailable;
use crate::error::Error;
use crate::sp_err;
use crate::watchdog as wd;
use anyhow::{Context, Result};

/// Users authenticate to gatekeeper under an offset uid.
const FAKE_UID_BASE: u32 = 100_000;

/// Packed size of a hardware auth token: version byte, three host-endian
/// u64s, a big-endian u32 and u64, and a 32-byte HMAC.
pub const AUTH_TOKEN_LENGTH: usize = 69;

/// Outcome of a gatekeeper verify call, as reported by the service.
#[derive(Debug)]
pub enum GatekeeperResponse {
    /// Token accepted; carries the packed hardware auth token (may be
    /// empty on HALs that do not return one).
    Verified { auth_token: Vec<u8> },
    /// Too many recent attempts; try again after the given delay.
    Throttled { timeout_ms: u32 },
    /// The token does not match the enrolled handle.
    Denied,
}

/// RPC surface of the gatekeeper service. A transport error is returned as
/// `Err`.
pub trait Gatekeeper {
    fn verify(
        &self,
        uid: u32,
        challenge: u64,
        password_handle: &[u8],
        token: &[u8],
    ) -> Result<GatekeeperResponse>;
}

/// A hardware auth token in parsed form, ready for the authorization
/// service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareAuthToken {
    pub version: u8,
    pub challenge: u64,
    pub user_id: u64,
    pub authenticator_id: u64,
    pub authenticator_type: u32,
    pub timestamp_ms: u64,
    pub mac: [u8; 32],
}

impl HardwareAuthToken {
    /// Parses the packed HAL layout, swapping the big-endian fields to host
    /// order.
    pub fn parse(blob: &[u8]) -> Result<Self> {
        if blob.len() != AUTH_TOKEN_LENGTH {
            return Err(Error::HardwareUnavailable).context(sp_err!(
                "auth token must be {} bytes, got {}",
                AUTH_TOKEN_LENGTH,
                blob.len()
            ));
        }
        Ok(HardwareAuthToken {
            version: blob[0],
            challenge: u64::from_ne_bytes(blob[1..9].try_into().unwrap()),
            user_id: u64::from_ne_bytes(blob[9..17].try_into().unwrap()),
            authenticator_id: u64::from_ne_bytes(blob[17..25].try_into().unwrap()),
            authenticator_type: u32::from_be_bytes(blob[25..29].try_into().unwrap()),
            timestamp_ms: u64::from_be_bytes(blob[29..37].try_into().unwrap()),
            mac: blob[37..69].try_into().unwrap(),
        })
    }
}

/// Verifies the personalized password token against the enrolled handle.
/// Returns the parsed auth token, or `None` when the HAL verified the
/// credential but returned no token. Throttling and rejection surface as
/// terminal error kinds; there is no retry here.
pub fn verify_credential(
    gatekeeper: &dyn Gatekeeper,
    user_id: u32,
    password_handle: &[u8],
    gk_password_token: &[u8],
) -> Result<Option<HardwareAuthToken>> {
    let response = {
        let _wp = wd::watch_millis("IGatekeeper::verify", 5000);
        gatekeeper.verify(fake_uid(user_id), 0, password_handle, gk_password_token)
    }
    .map_err(log_and_unavailable("IGatekeeper::verify"))?;
    match response {
        GatekeeperResponse::Verified { auth_token } if auth_token.is_empty() => {
            log::info!("Gatekeeper verified user {} without an auth token", user_id);
            Ok(None)
        }
        GatekeeperResponse::Verified { auth_token } => {
            log::info!("Gatekeeper verified user {}", user_id);
            HardwareAuthToken::parse(&auth_token).map(Some)
        }
        GatekeeperResponse::Throttled { timeout_ms } => Err(Error::RetryAfter(timeout_ms))
            .context(sp_err!("gatekeeper throttled user {}", user_id)),
        GatekeeperResponse::Denied => Err(Error::CredentialWrong)
            .context(sp_err!("gatekeeper rejected credential for user {}", user_id)),
    }
}

/// The uid gatekeeper expects: `100000 + uid`.
pub fn fake_uid(user_id: u32) -> u32 {
    FAKE_UID_BASE + user_id
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packed_token() -> Vec<u8> {
        let mut blob = vec![0u8];
        blob.extend_from_slice(&0xAABBu64.to_ne_bytes());
        blob.extend_from_slice(&42u64.to_ne_bytes());
        blob.extend_from_slice(&7u64.to_ne_bytes());
        blob.extend_from_slice(&2u32.to_be_bytes());
        blob.extend_from_slice(&1_234_567u64.to_be_bytes());
        blob.extend_from_slice(&[0x5A; 32]);
        blob
    }

    #[test]
    fn test_parse_swaps_big_endian_fields() {
        let token = HardwareAuthToken::parse(&packed_token()).unwrap();
        assert_eq!(token.version, 0);
        assert_eq!(token.challenge, 0xAABB);
        assert_eq!(token.user_id, 42);
        assert_eq!(token.authenticator_id, 7);
        assert_eq!(token.authenticator_type, 2);
        assert_eq!(token.timestamp_ms, 1_234_567);
        assert_eq!(token.mac, [0x5A; 32]);
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        let e = HardwareAuthToken::parse(&[0u8; 68]).expect_err("short token");
        assert_eq!(Error::root_of(&e), Some(Error::HardwareUnavailable));
    }

    struct ScriptedGatekeeper(fn() -> Result<GatekeeperResponse>);

    impl Gatekeeper for ScriptedGatekeeper {
        fn verify(&self, uid: u32, challenge: u64, _: &[u8], _: &[u8]) -> Result<GatekeeperResponse> {
            assert_eq!(uid, fake_uid(10));
            assert_eq!(challenge, 0);
            (self.0)()
        }
    }

    #[test]
    fn test_verify_credential_parses_token() {
        let gk = ScriptedGatekeeper(|| {
            Ok(GatekeeperResponse::Verified {
                auth_token: {
                    let mut blob = vec![0u8; 37];
                    blob.extend_from_slice(&[0u8; 32]);
                    blob
                },
            })
        });
        let token = verify_credential(&gk, 10, b"handle", b"token").unwrap();
        assert!(token.is_some());
    }

    #[test]
    fn test_verify_credential_empty_token_is_none() {
        let gk = ScriptedGatekeeper(|| Ok(GatekeeperResponse::Verified { auth_token: vec![] }));
        assert!(verify_credential(&gk, 10, b"handle", b"token").unwrap().is_none());
    }

    #[test]
    fn test_verify_credential_throttled() {
        let gk = ScriptedGatekeeper(|| Ok(GatekeeperResponse::Throttled { timeout_ms: 30000 }));
        let e = verify_credential(&gk, 10, b"handle", b"token").expect_err("must fail");
        assert_eq!(Error::root_of(&e), Some(Error::RetryAfter(30000)));
    }

    #[test]
    fn test_verify_credential_denied() {
        let gk = ScriptedGatekeeper(|| Ok(GatekeeperResponse::Denied));
        let e = verify_credential(&gk, 10, b"handle", b"token").expect_err("must fail");
        assert_eq!(Error::root_of(&e), Some(Error::CredentialWrong));
    }

    #[test]
    fn test_fake_uid() {
        assert_eq!(fake_uid(0), 100_000);
        assert_eq!(fake_uid(10), 100_010);
    }
}
