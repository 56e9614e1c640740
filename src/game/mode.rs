//! Game mode catalog - player bounds, aim geometry and difficulty scaling

use serde::{Deserialize, Serialize};

use super::Canvas;

/// Playable modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GameModeId {
    /// One player, full canvas
    Solo,
    /// Two players sharing the canvas in halves, combined score
    Coop,
    /// Two players over the full canvas
    Competitive,
    /// Three to eight players with density scaling
    MassCompetitive,
}

impl GameModeId {
    pub const ALL: [GameModeId; 4] = [
        GameModeId::Solo,
        GameModeId::Coop,
        GameModeId::Competitive,
        GameModeId::MassCompetitive,
    ];

    pub fn descriptor(self) -> &'static ModeDescriptor {
        match self {
            GameModeId::Solo => &SOLO,
            GameModeId::Coop => &COOP,
            GameModeId::Competitive => &COMPETITIVE,
            GameModeId::MassCompetitive => &MASS_COMPETITIVE,
        }
    }
}

impl std::fmt::Display for GameModeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.descriptor().key)
    }
}

impl std::str::FromStr for GameModeId {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GameModeId::ALL
            .into_iter()
            .find(|m| m.descriptor().key == s)
            .ok_or_else(|| UnknownMode(s.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown game mode: {0}")]
pub struct UnknownMode(pub String);

/// How normalized tilt maps onto the canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AimGeometry {
    /// Every player spans the whole canvas
    FullScreen,
    /// Slot 0 owns the left half, slot 1 the right half
    SplitHalves,
}

/// Horizontal band a player's aim is confined to
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AimRegion {
    pub x_min: f32,
    pub width: f32,
}

impl AimGeometry {
    pub fn region(self, slot: usize, canvas: Canvas) -> AimRegion {
        match self {
            AimGeometry::FullScreen => AimRegion {
                x_min: 0.0,
                width: canvas.width,
            },
            AimGeometry::SplitHalves => {
                let half = canvas.width / 2.0;
                // Slots beyond the first two never happen in two-player modes; keep them right.
                let x_min = if slot == 0 { 0.0 } else { half };
                AimRegion { x_min, width: half }
            }
        }
    }
}

/// What moves the run from waiting to playing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StartRule {
    /// Starts as soon as the required sensors are connected
    Automatic,
    /// Host sends an explicit start
    Manual,
}

/// Static per-mode tuning
#[derive(Debug, Clone, Serialize)]
pub struct ModeDescriptor {
    pub key: &'static str,
    pub min_players: usize,
    pub max_players: usize,
    pub aim_geometry: AimGeometry,
    pub start_rule: StartRule,

    pub base_targets: usize,
    pub targets_per_player: usize,
    pub max_targets_limit: usize,
    pub base_spawn_interval_ms: u64,
    pub min_spawn_interval_ms: u64,
    pub spawn_interval_reduction_per_player: u64,

    /// None = uncapped
    pub combo_cap: Option<u32>,
    /// Minimum spacing between accepted sensor samples
    pub input_throttle_ms: u64,
    /// Smoothing factor per connection slot; the last entry repeats for higher slots
    pub smoothing: &'static [f32],
    pub default_duration_secs: u32,
}

impl ModeDescriptor {
    /// Live-target ceiling for the given number of active players
    pub fn max_targets(&self, active_players: usize) -> usize {
        (self.base_targets + active_players * self.targets_per_player).min(self.max_targets_limit)
    }

    /// Spawn cadence for the given number of active players
    pub fn spawn_interval_ms(&self, active_players: usize) -> u64 {
        let reduction = active_players as u64 * self.spawn_interval_reduction_per_player;
        self.base_spawn_interval_ms
            .saturating_sub(reduction)
            .max(self.min_spawn_interval_ms)
    }

    pub fn smoothing_factor(&self, slot: usize) -> f32 {
        self.smoothing
            .get(slot)
            .or_else(|| self.smoothing.last())
            .copied()
            .unwrap_or(0.2)
    }

    pub fn clamp_combo(&self, combo: u32) -> u32 {
        match self.combo_cap {
            Some(cap) => combo.min(cap),
            None => combo,
        }
    }

    /// Whether a single required sensor dropping pauses the run
    pub fn pauses_on_disconnect(&self) -> bool {
        self.start_rule == StartRule::Automatic
    }

    /// Active player floor below which a running game ends
    pub fn ends_below_active(&self) -> Option<usize> {
        match self.start_rule {
            StartRule::Manual => Some(2),
            StartRule::Automatic => None,
        }
    }
}

static SOLO: ModeDescriptor = ModeDescriptor {
    key: "solo",
    min_players: 1,
    max_players: 1,
    aim_geometry: AimGeometry::FullScreen,
    start_rule: StartRule::Automatic,
    base_targets: 3,
    targets_per_player: 0,
    max_targets_limit: 3,
    base_spawn_interval_ms: 2000,
    min_spawn_interval_ms: 2000,
    spawn_interval_reduction_per_player: 0,
    combo_cap: None,
    input_throttle_ms: 33,
    smoothing: &[0.2],
    default_duration_secs: 180,
};

static COOP: ModeDescriptor = ModeDescriptor {
    key: "coop",
    min_players: 2,
    max_players: 2,
    aim_geometry: AimGeometry::SplitHalves,
    start_rule: StartRule::Automatic,
    base_targets: 2,
    targets_per_player: 1,
    max_targets_limit: 4,
    base_spawn_interval_ms: 1800,
    min_spawn_interval_ms: 1500,
    spawn_interval_reduction_per_player: 100,
    combo_cap: None,
    input_throttle_ms: 33,
    smoothing: &[0.2, 0.1],
    default_duration_secs: 180,
};

static COMPETITIVE: ModeDescriptor = ModeDescriptor {
    key: "competitive",
    min_players: 2,
    max_players: 2,
    aim_geometry: AimGeometry::FullScreen,
    start_rule: StartRule::Automatic,
    base_targets: 2,
    targets_per_player: 1,
    max_targets_limit: 4,
    base_spawn_interval_ms: 1800,
    min_spawn_interval_ms: 1500,
    spawn_interval_reduction_per_player: 100,
    combo_cap: None,
    input_throttle_ms: 33,
    smoothing: &[0.2, 0.1],
    default_duration_secs: 120,
};

static MASS_COMPETITIVE: ModeDescriptor = ModeDescriptor {
    key: "mass-competitive",
    min_players: 3,
    max_players: 8,
    aim_geometry: AimGeometry::FullScreen,
    start_rule: StartRule::Manual,
    base_targets: 2,
    targets_per_player: 1,
    max_targets_limit: 12,
    base_spawn_interval_ms: 1500,
    min_spawn_interval_ms: 800,
    spawn_interval_reduction_per_player: 100,
    combo_cap: Some(3),
    input_throttle_ms: 16,
    smoothing: &[0.18, 0.19, 0.20, 0.21, 0.22, 0.23, 0.24, 0.25],
    default_duration_secs: 120,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mass_competitive_scaling_matches_formula() {
        let mode = GameModeId::MassCompetitive.descriptor();
        assert_eq!(mode.max_targets(3), 5);
        assert_eq!(mode.spawn_interval_ms(3), 1200);
        assert_eq!(mode.max_targets(8), 10);
        assert_eq!(mode.spawn_interval_ms(8), 800);
    }

    #[test]
    fn mass_competitive_scaling_is_monotonic_and_clamped() {
        let mode = GameModeId::MassCompetitive.descriptor();
        let counts = [3, 5, 8];
        for pair in counts.windows(2) {
            assert!(mode.max_targets(pair[1]) >= mode.max_targets(pair[0]));
            assert!(mode.spawn_interval_ms(pair[1]) <= mode.spawn_interval_ms(pair[0]));
        }
        assert_eq!(mode.max_targets(40), 12);
        assert_eq!(mode.spawn_interval_ms(40), 800);
    }

    #[test]
    fn mode_keys_round_trip_through_from_str() {
        for mode in GameModeId::ALL {
            let parsed: GameModeId = mode.to_string().parse().unwrap();
            assert_eq!(parsed, mode);
        }
        assert!("deathmatch".parse::<GameModeId>().is_err());
    }

    #[test]
    fn split_halves_confine_each_slot() {
        let canvas = Canvas::new(800.0, 600.0);
        let left = AimGeometry::SplitHalves.region(0, canvas);
        let right = AimGeometry::SplitHalves.region(1, canvas);
        assert_eq!(left, AimRegion { x_min: 0.0, width: 400.0 });
        assert_eq!(right, AimRegion { x_min: 400.0, width: 400.0 });
    }

    #[test]
    fn smoothing_is_asymmetric_for_two_player_modes() {
        let coop = GameModeId::Coop.descriptor();
        assert_eq!(coop.smoothing_factor(0), 0.2);
        assert_eq!(coop.smoothing_factor(1), 0.1);
        let mass = GameModeId::MassCompetitive.descriptor();
        assert!((0.18..=0.25).contains(&mass.smoothing_factor(7)));
        assert_eq!(mass.smoothing_factor(12), 0.25);
    }

    #[test]
    fn combo_cap_only_applies_to_mass_competitive() {
        assert_eq!(GameModeId::MassCompetitive.descriptor().clamp_combo(9), 3);
        assert_eq!(GameModeId::Solo.descriptor().clamp_combo(9), 9);
    }
}
