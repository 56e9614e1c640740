//! Game simulation modules

pub mod aim;
pub mod engine;
pub mod mode;
pub mod player;
pub mod scoring;
pub mod session;
pub mod snapshot;
pub mod target;

pub use engine::EngineConfig;
pub use mode::GameModeId;
pub use session::{SessionHandle, SessionInput, SessionRegistry};

use serde::{Deserialize, Serialize};

use aim::OrientationSample;

/// Canvas-space coordinate
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Logical drawing surface the presentation layer renders onto
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Canvas {
    pub width: f32,
    pub height: f32,
}

impl Canvas {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn center(&self) -> Point {
        Point::new(self.width / 2.0, self.height / 2.0)
    }

    /// Clamp into `[0, width] x [0, height]`; non-finite coordinates collapse to the center
    pub fn clamp(&self, p: Point) -> Point {
        let x = if p.x.is_finite() { p.x.clamp(0.0, self.width) } else { self.width / 2.0 };
        let y = if p.y.is_finite() { p.y.clamp(0.0, self.height) } else { self.height / 2.0 };
        Point::new(x, y)
    }
}

impl Default for Canvas {
    fn default() -> Self {
        Self::new(1280.0, 720.0)
    }
}

/// Validated inbound event from the transport, queued until the next tick
#[derive(Debug, Clone, PartialEq)]
pub enum SensorEvent {
    /// Transport channel is ready
    ChannelReady,
    /// Session code assigned by the transport, forwarded to presentation
    SessionCreated { session_code: String },
    SensorConnected {
        sensor_id: String,
        name: Option<String>,
        connected_count: usize,
    },
    SensorDisconnected { sensor_id: String },
    SensorData {
        sensor_id: String,
        sample: OrientationSample,
        received_at: u64,
    },
    /// Whole transport went away
    ChannelClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_keeps_points_on_canvas() {
        let canvas = Canvas::new(100.0, 50.0);
        assert_eq!(canvas.clamp(Point::new(-5.0, 80.0)), Point::new(0.0, 50.0));
        assert_eq!(canvas.clamp(Point::new(f32::NAN, f32::INFINITY)), Point::new(50.0, 25.0));
    }
}
