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

//! Reports hardware-service calls that exceed their expected latency.
//!
//! Each outbound call is bracketed by a [`WatchPoint`]; if the call outlives
//! its deadline the overrun is logged when the point is dropped. This is a
//! diagnosis aid for a pipeline that has no timeouts of its own: a stuck
//! weaver or keystore call surfaces in the log with the call site name.

use std::time::{Duration, Instant};

/// Scope guard around one monitored call.
pub struct WatchPoint {
    id: &'static str,
    started: Instant,
    deadline: Duration,
}

/// Sets a watch point with `id` and a deadline of `millis` milliseconds.
pub fn watch_millis(id: &'static str, millis: u64) -> WatchPoint {
    WatchPoint { id, started: Instant::now(), deadline: Duration::from_millis(millis) }
}

impl Drop for WatchPoint {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        if elapsed > self.deadline {
            log::warn!(
                "{} took {}ms, deadline was {}ms",
                self.id,
                elapsed.as_millis(),
                self.deadline.as_millis()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_point_tracks_elapsed_time() {
        let wp = watch_millis("test::fast_call", 10_000);
        assert!(wp.started.elapsed() < wp.deadline);
    }
}
