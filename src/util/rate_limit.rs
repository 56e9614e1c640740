//! Inbound frame budgets for a session

use governor::{DefaultDirectRateLimiter, DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;

/// Frames per second one sensor may send. Keyed by sensor id, so reconnecting
/// does not refill the budget.
pub const SENSOR_FRAME_RATE: u32 = 120;

/// Frames per second from the host. In relay mode the host forwards every
/// sensor's data, so this covers a full mass-competitive lobby.
pub const HOST_FRAME_RATE: u32 = 8 * SENSOR_FRAME_RATE;

fn per_second(rate: u32) -> Quota {
    Quota::per_second(NonZeroU32::new(rate).unwrap_or(NonZeroU32::MIN))
}

/// Rate limits shared by every connection of one session.
/// These sit in front of the engine's per-mode sample throttle.
pub struct SessionRateLimits {
    sensors: DefaultKeyedRateLimiter<String>,
    host: DefaultDirectRateLimiter,
}

impl SessionRateLimits {
    pub fn new(sensor_rate: u32, host_rate: u32) -> Self {
        Self {
            sensors: RateLimiter::keyed(per_second(sensor_rate)),
            host: RateLimiter::direct(per_second(host_rate)),
        }
    }

    /// Check if a frame from this sensor is allowed (returns true if allowed)
    pub fn admit_sensor_frame(&self, sensor_id: &str) -> bool {
        self.sensors.check_key(&sensor_id.to_string()).is_ok()
    }

    pub fn admit_host_frame(&self) -> bool {
        self.host.check().is_ok()
    }

    /// Drop the state of sensors whose budget has fully refilled
    pub fn shrink(&self) {
        self.sensors.retain_recent();
    }
}

impl Default for SessionRateLimits {
    fn default() -> Self {
        Self::new(SENSOR_FRAME_RATE, HOST_FRAME_RATE)
    }
}
