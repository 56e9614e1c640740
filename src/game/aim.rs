//! Sensor-to-aim transform: orientation samples to smoothed canvas positions

use std::collections::HashMap;

use tracing::debug;

use super::mode::{AimGeometry, ModeDescriptor};
use super::player::PlayerRegistry;
use super::{Canvas, Point};

/// Tilt (degrees) that maps to the edge of a player's aim region
pub const MAX_TILT_DEG: f32 = 25.0;

/// Raw device orientation. Fields are optional because sensors drop them.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OrientationSample {
    /// Front-back tilt, drives y
    pub beta: Option<f32>,
    /// Left-right tilt, drives x
    pub gamma: Option<f32>,
}

impl OrientationSample {
    pub fn new(beta: f32, gamma: f32) -> Self {
        Self {
            beta: Some(beta),
            gamma: Some(gamma),
        }
    }
}

/// Clamp one angle to ±MAX_TILT_DEG and scale to [-1, 1]. Missing or non-finite is 0.
fn normalize_angle(angle: Option<f32>) -> f32 {
    match angle {
        Some(a) if a.is_finite() => a.clamp(-MAX_TILT_DEG, MAX_TILT_DEG) / MAX_TILT_DEG,
        _ => 0.0,
    }
}

/// Normalized tilt in [-1, 1]², x from gamma and y from beta
pub fn normalize_tilt(sample: &OrientationSample) -> Point {
    Point::new(normalize_angle(sample.gamma), normalize_angle(sample.beta))
}

/// Map normalized tilt into the slot's aim region
pub fn map_to_canvas(tilt: Point, geometry: AimGeometry, slot: usize, canvas: Canvas) -> Point {
    let region = geometry.region(slot, canvas);
    let half_w = region.width / 2.0;
    let half_h = canvas.height / 2.0;
    let x = region.x_min + half_w + tilt.x * half_w;
    let y = half_h + tilt.y * half_h;
    canvas.clamp(Point::new(x, y))
}

/// Resting aim point for a slot: the center of its region
pub fn region_center(geometry: AimGeometry, slot: usize, canvas: Canvas) -> Point {
    map_to_canvas(Point::default(), geometry, slot, canvas)
}

/// One exponential smoothing step, clamped to the canvas
pub fn smooth(pos: Point, target: Point, factor: f32, canvas: Canvas) -> Point {
    let factor = factor.clamp(0.0, 1.0);
    canvas.clamp(Point::new(
        pos.x + (target.x - pos.x) * factor,
        pos.y + (target.y - pos.y) * factor,
    ))
}

/// Latest-value input slot for one sensor
#[derive(Debug, Default, Clone)]
struct InputSlot {
    pending: Option<OrientationSample>,
    last_accepted_at: Option<u64>,
}

/// Buffers sensor samples between ticks and moves aim points each tick
#[derive(Debug, Default)]
pub struct AimTransform {
    slots: HashMap<String, InputSlot>,
}

impl AimTransform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a sample unless it arrives inside the throttle window.
    /// A newer accepted sample overwrites an unconsumed older one.
    pub fn submit(
        &mut self,
        sensor_id: &str,
        sample: OrientationSample,
        received_at: u64,
        throttle_ms: u64,
    ) -> bool {
        let slot = self.slots.entry(sensor_id.to_string()).or_default();
        if let Some(last) = slot.last_accepted_at {
            if received_at.saturating_sub(last) < throttle_ms {
                return false;
            }
        }
        slot.last_accepted_at = Some(received_at);
        slot.pending = Some(sample);
        true
    }

    /// Consume pending samples and advance every active player's aim one step
    pub fn update(&mut self, players: &mut PlayerRegistry, mode: &ModeDescriptor, canvas: Canvas) {
        for player in players.iter_mut().filter(|p| p.is_active) {
            let slot = player.color_index;
            if let Some(sample) = self
                .slots
                .get_mut(&player.id)
                .and_then(|s| s.pending.take())
            {
                let tilt = normalize_tilt(&sample);
                player.raw_tilt = tilt;
                player.aim_target = map_to_canvas(tilt, mode.aim_geometry, slot, canvas);
            }

            player.aim_pos = smooth(
                player.aim_pos,
                player.aim_target,
                mode.smoothing_factor(slot),
                canvas,
            );
        }
    }

    /// Drop buffered state for a sensor
    pub fn forget(&mut self, sensor_id: &str) {
        if self.slots.remove(sensor_id).is_some() {
            debug!(sensor_id = %sensor_id, "Dropped aim input slot");
        }
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }
}
