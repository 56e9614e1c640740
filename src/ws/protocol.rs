//! WebSocket protocol message definitions
//! These are the wire types between the transport, the host display and the server

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::game::aim::OrientationSample;
use crate::game::mode::{GameModeId, ModeDescriptor};
use crate::game::target::TargetTier;
use crate::game::{Point, SensorEvent};

/// Run phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    /// No mode selected
    Idle,
    /// Mode selected, collecting sensors
    Waiting,
    Playing,
    Paused,
    /// Terminal until reset
    Ended,
}

impl std::fmt::Display for GamePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            GamePhase::Idle => "idle",
            GamePhase::Waiting => "waiting",
            GamePhase::Playing => "playing",
            GamePhase::Paused => "paused",
            GamePhase::Ended => "ended",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Inbound
// ============================================================================

/// Events emitted by the sensor transport. Field names follow the transport's camelCase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum TransportEvent {
    /// Channel ready
    Connected,
    SessionCreated {
        session_code: String,
    },
    SensorConnected {
        sensor_id: String,
        #[serde(default)]
        connected_count: usize,
        #[serde(default)]
        name: Option<String>,
    },
    SensorDisconnected {
        sensor_id: String,
    },
    SensorData {
        sensor_id: String,
        #[serde(default)]
        data: SensorPayload,
    },
    /// Transport lost every sensor at once
    ChannelClosed,
}

impl TransportEvent {
    /// Validate into the engine's event type, stamping data with the receive time
    pub fn into_sensor_event(self, received_at: u64) -> SensorEvent {
        match self {
            TransportEvent::Connected => SensorEvent::ChannelReady,
            TransportEvent::SessionCreated { session_code } => {
                SensorEvent::SessionCreated { session_code }
            }
            TransportEvent::SensorConnected {
                sensor_id,
                connected_count,
                name,
            } => SensorEvent::SensorConnected {
                sensor_id,
                name,
                connected_count,
            },
            TransportEvent::SensorDisconnected { sensor_id } => {
                SensorEvent::SensorDisconnected { sensor_id }
            }
            TransportEvent::SensorData { sensor_id, data } => SensorEvent::SensorData {
                sensor_id,
                sample: data.sample(),
                received_at,
            },
            TransportEvent::ChannelClosed => SensorEvent::ChannelClosed,
        }
    }
}

/// Sensor data body: `{ orientation: { beta, gamma } }`.
/// Also the frame format sensors send directly over `/ws/sensor`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SensorPayload {
    #[serde(default)]
    pub orientation: Option<RawOrientation>,
}

/// Orientation angles as sent; anything non-numeric reads as missing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawOrientation {
    #[serde(default)]
    pub beta: Option<Value>,
    #[serde(default)]
    pub gamma: Option<Value>,
}

impl SensorPayload {
    pub fn sample(&self) -> OrientationSample {
        let angle = |v: &Option<Value>| v.as_ref().and_then(Value::as_f64).map(|a| a as f32);
        match &self.orientation {
            Some(o) => OrientationSample {
                beta: angle(&o.beta),
                gamma: angle(&o.gamma),
            },
            None => OrientationSample::default(),
        }
    }
}

/// Control messages from the host display
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HostMsg {
    SelectMode { mode: GameModeId },
    Start,
    Pause,
    Resume,
    End,
    Reset,
}

/// Anything the host socket may send: its own controls, or relayed transport events
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum HostInbound {
    Control(HostMsg),
    Transport(TransportEvent),
}

// ============================================================================
// Outbound
// ============================================================================

/// Messages sent from server to the host display
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMsg {
    /// First message on a host connection
    Welcome {
        session_code: String,
        mode: GameModeId,
        server_time: u64,
    },

    /// Session code to show to sensor holders
    SessionCreated { session_code: String },

    /// Render-ready state
    Snapshot(GameSnapshot),

    /// Final ranking and summary
    GameEnded(GameReport),

    /// Informational or rejected-transition message
    Status { code: String, message: String },

    /// Error message
    Error { code: String, message: String },
}

/// Per-tick view of the run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub tick: u64,
    pub phase: GamePhase,
    pub mode: Option<GameModeId>,
    pub time_remaining_secs: u32,
    pub players: Vec<PlayerSnapshot>,
    pub targets: Vec<TargetSnapshot>,
    /// Events since the previous snapshot
    pub events: Vec<GameEvent>,
}

/// Player state in a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub id: String,
    pub name: String,
    pub color: String,
    pub score: u64,
    pub combo: u32,
    /// 0.0 - 1.0
    pub accuracy: f32,
    pub aim_pos: Point,
    pub is_active: bool,
}

/// Target state in a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSnapshot {
    pub id: u64,
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    pub tier: TargetTier,
    /// Fade-out opacity, 1.0 until the last second of life
    pub alpha: f32,
}

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    TimeUp,
    NotEnoughPlayers,
    Requested,
}

/// Game events (spawns, hits, phase changes)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum GameEvent {
    SessionCreated {
        session_code: String,
    },

    PlayerJoined {
        player_id: String,
        name: String,
        color: String,
    },

    PlayerReconnected {
        player_id: String,
    },

    PlayerLeft {
        player_id: String,
    },

    TargetSpawned {
        target_id: u64,
        tier: TargetTier,
        x: f32,
        y: f32,
    },

    TargetHit {
        player_id: String,
        target_id: u64,
        tier: TargetTier,
        points: u64,
        combo: u32,
        x: f32,
        y: f32,
    },

    /// Silent expiry, no miss charged
    TargetExpired {
        target_id: u64,
    },

    ComboReset {
        player_id: String,
    },

    PhaseChanged {
        from: GamePhase,
        to: GamePhase,
    },

    /// Something the engine refused or wants shown
    Notice {
        code: String,
        message: String,
    },
}

/// End-of-game output for the presentation layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameReport {
    pub mode: GameModeId,
    pub reason: EndReason,
    /// None on a tie for first
    pub winner_id: Option<String>,
    pub ranking: Vec<RankedPlayer>,
    pub summary: GameSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedPlayer {
    pub rank: u32,
    pub id: String,
    pub name: String,
    pub color: String,
    pub score: u64,
    pub hits: u32,
    pub misses: u32,
    pub accuracy: f32,
    pub max_combo: u32,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSummary {
    pub total_targets_spawned: u64,
    pub total_hits: u32,
    /// Combined score; the team result in coop
    pub total_score: u64,
    /// Mean accuracy over players with at least one attempt
    pub average_accuracy: f32,
    pub duration_secs: u32,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Mode catalog entry for `/modes`
#[derive(Debug, Clone, Serialize)]
pub struct ModeInfo {
    pub id: GameModeId,
    #[serde(flatten)]
    pub descriptor: &'static ModeDescriptor,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn parses_sensor_data_event() {
        let json = r#"{"type":"sensor-data","sensorId":"sensor1","data":{"orientation":{"beta":10.5,"gamma":-3}}}"#;
        let event: TransportEvent = assert_ok!(serde_json::from_str(json));
        let SensorEvent::SensorData { sensor_id, sample, received_at } = event.into_sensor_event(42) else {
            panic!("expected sensor data");
        };
        assert_eq!(sensor_id, "sensor1");
        assert_eq!(sample, OrientationSample::new(10.5, -3.0));
        assert_eq!(received_at, 42);
    }

    #[test]
    fn malformed_orientation_becomes_missing_angles() {
        let json = r#"{"type":"sensor-data","sensorId":"s","data":{"orientation":{"beta":"up","gamma":null}}}"#;
        let event: TransportEvent = assert_ok!(serde_json::from_str(json));
        let SensorEvent::SensorData { sample, .. } = event.into_sensor_event(0) else {
            panic!("expected sensor data");
        };
        assert_eq!(sample, OrientationSample::default());

        let no_data = r#"{"type":"sensor-data","sensorId":"s"}"#;
        let event: TransportEvent = assert_ok!(serde_json::from_str(no_data));
        assert!(matches!(
            event.into_sensor_event(0),
            SensorEvent::SensorData { sample, .. } if sample == OrientationSample::default()
        ));
    }

    #[test]
    fn parses_connect_and_disconnect() {
        let connected: TransportEvent = assert_ok!(serde_json::from_str(
            r#"{"type":"sensor-connected","sensorId":"sensor2","connectedCount":2}"#
        ));
        assert_eq!(
            connected.into_sensor_event(0),
            SensorEvent::SensorConnected {
                sensor_id: "sensor2".into(),
                name: None,
                connected_count: 2,
            }
        );

        let gone: TransportEvent =
            assert_ok!(serde_json::from_str(r#"{"type":"sensor-disconnected","sensorId":"sensor2"}"#));
        assert_eq!(
            gone.into_sensor_event(0),
            SensorEvent::SensorDisconnected { sensor_id: "sensor2".into() }
        );
    }

    #[test]
    fn host_socket_accepts_controls_and_relayed_events() {
        let control: HostInbound =
            assert_ok!(serde_json::from_str(r#"{"type":"select-mode","mode":"mass-competitive"}"#));
        assert!(matches!(
            control,
            HostInbound::Control(HostMsg::SelectMode { mode: GameModeId::MassCompetitive })
        ));

        let relayed: HostInbound = assert_ok!(serde_json::from_str(r#"{"type":"connected"}"#));
        assert!(matches!(relayed, HostInbound::Transport(TransportEvent::Connected)));

        assert_err!(serde_json::from_str::<HostInbound>(r#"{"type":"launch-missiles"}"#));
    }

    #[test]
    fn snapshot_serializes_with_type_tag() {
        let msg = ServerMsg::Snapshot(GameSnapshot {
            tick: 3,
            phase: GamePhase::Playing,
            mode: Some(GameModeId::Solo),
            time_remaining_secs: 60,
            players: vec![],
            targets: vec![],
            events: vec![GameEvent::TargetExpired { target_id: 9 }],
        });
        let value = assert_ok!(serde_json::to_value(&msg));
        assert_eq!(value["type"], "snapshot");
        assert_eq!(value["phase"], "playing");
        assert_eq!(value["events"][0]["event_type"], "target_expired");
    }
}
