//! Mode orchestrator: run state machine, tick body and end-of-game output

use std::collections::VecDeque;
use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::util::time::Clock;
use crate::ws::protocol::{EndReason, GameEvent, GamePhase, GameReport, GameSnapshot};

use super::aim::{region_center, AimTransform};
use super::mode::{GameModeId, ModeDescriptor, StartRule};
use super::player::PlayerRegistry;
use super::scoring::ScoringEngine;
use super::snapshot;
use super::target::{TargetScheduler, TARGET_LIFETIME_MS};
use super::{Canvas, SensorEvent};

/// Engine construction parameters
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub canvas: Canvas,
    /// Overrides the mode's default round length
    pub duration_override_secs: Option<u32>,
    pub target_lifetime_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            canvas: Canvas::default(),
            duration_override_secs: None,
            target_lifetime_ms: TARGET_LIFETIME_MS,
        }
    }
}

/// Rejected orchestrator call. The engine state is unchanged when one is returned.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransitionError {
    #[error("No game mode selected")]
    NoMode,

    #[error("Cannot {action} while {phase}")]
    InvalidPhase {
        action: &'static str,
        phase: GamePhase,
    },

    #[error("{mode} needs {required} active players, {active} connected")]
    NotEnoughPlayers {
        mode: GameModeId,
        required: usize,
        active: usize,
    },

    #[error("{mode} allows at most {max} players")]
    TooManyPlayers { mode: GameModeId, max: usize },
}

impl TransitionError {
    pub fn code(&self) -> &'static str {
        match self {
            TransitionError::NoMode => "no_mode",
            TransitionError::InvalidPhase { .. } => "invalid_phase",
            TransitionError::NotEnoughPlayers { .. } => "not_enough_players",
            TransitionError::TooManyPlayers { .. } => "too_many_players",
        }
    }
}

/// Run bookkeeping owned by the orchestrator
#[derive(Debug, Clone)]
pub struct GameRunState {
    pub phase: GamePhase,
    pub time_remaining_secs: u32,
    pub started_at: Option<u64>,
    pub total_targets_spawned: u64,
}

impl Default for GameRunState {
    fn default() -> Self {
        Self {
            phase: GamePhase::Idle,
            time_remaining_secs: 0,
            started_at: None,
            total_targets_spawned: 0,
        }
    }
}

/// A sensor whose transport connection is open, whether or not it holds a player slot
#[derive(Debug, Clone)]
struct AttachedSensor {
    id: String,
    name: Option<String>,
}

/// One game instance. Synchronous and single-threaded; the session task drives it.
pub struct GameEngine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    rng: ChaCha8Rng,
    mode: Option<GameModeId>,
    run: GameRunState,
    players: PlayerRegistry,
    targets: TargetScheduler,
    aim: AimTransform,
    /// Open sensor connections in arrival order. Survives `reset` so a new run
    /// picks up phones that never disconnected.
    attached: Vec<AttachedSensor>,
    inbox: VecDeque<SensorEvent>,
    events: Vec<GameEvent>,
    tick: u64,
    paused_at: Option<u64>,
    /// Milliseconds spent paused since start
    paused_total_ms: u64,
    report: Option<GameReport>,
}

impl GameEngine {
    pub fn new(config: EngineConfig, clock: Arc<dyn Clock>, seed: u64) -> Self {
        let targets = TargetScheduler::new(config.target_lifetime_ms);
        Self {
            config,
            clock,
            rng: ChaCha8Rng::seed_from_u64(seed),
            mode: None,
            run: GameRunState::default(),
            players: PlayerRegistry::new(),
            targets,
            aim: AimTransform::new(),
            attached: Vec::new(),
            inbox: VecDeque::new(),
            events: Vec::new(),
            tick: 0,
            paused_at: None,
            paused_total_ms: 0,
            report: None,
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn mode(&self) -> Option<GameModeId> {
        self.mode
    }

    pub fn phase(&self) -> GamePhase {
        self.run.phase
    }

    pub fn run_state(&self) -> &GameRunState {
        &self.run
    }

    pub fn players(&self) -> &PlayerRegistry {
        &self.players
    }

    pub fn targets(&self) -> &TargetScheduler {
        &self.targets
    }

    pub fn canvas(&self) -> Canvas {
        self.config.canvas
    }

    pub fn report(&self) -> Option<&GameReport> {
        self.report.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.run.phase == GamePhase::Playing
    }

    fn descriptor(&self) -> Option<&'static ModeDescriptor> {
        self.mode.map(GameModeId::descriptor)
    }

    fn duration_secs(&self, mode: &ModeDescriptor) -> u32 {
        self.config
            .duration_override_secs
            .unwrap_or(mode.default_duration_secs)
    }

    // ------------------------------------------------------------------
    // Orchestrator calls
    // ------------------------------------------------------------------

    /// idle -> waiting. Re-selecting while waiting is allowed if the roster fits.
    pub fn select_mode(&mut self, mode: GameModeId) -> Result<(), TransitionError> {
        let descriptor = mode.descriptor();
        match self.run.phase {
            GamePhase::Idle => {}
            GamePhase::Waiting if self.players.len() <= descriptor.max_players => {}
            GamePhase::Waiting => {
                return Err(TransitionError::TooManyPlayers {
                    mode,
                    max: descriptor.max_players,
                })
            }
            phase => {
                return Err(TransitionError::InvalidPhase {
                    action: "select a mode",
                    phase,
                })
            }
        }

        self.mode = Some(mode);
        self.run.time_remaining_secs = self.duration_secs(descriptor);
        self.place_players_at_rest();
        self.set_phase(GamePhase::Waiting);
        info!(mode = %mode, "Game mode selected");

        self.admit_attached();
        self.maybe_auto_start();
        Ok(())
    }

    /// waiting -> playing
    pub fn start(&mut self) -> Result<(), TransitionError> {
        let mode_id = self.mode.ok_or(TransitionError::NoMode)?;
        let mode = mode_id.descriptor();
        if self.run.phase != GamePhase::Waiting {
            return Err(TransitionError::InvalidPhase {
                action: "start",
                phase: self.run.phase,
            });
        }

        let active = self.players.active_count();
        if active < mode.min_players {
            return Err(TransitionError::NotEnoughPlayers {
                mode: mode_id,
                required: mode.min_players,
                active,
            });
        }

        let now = self.clock.now_millis();
        self.targets.clear();
        self.run.started_at = Some(now);
        self.run.time_remaining_secs = self.duration_secs(mode);
        self.run.total_targets_spawned = 0;
        self.paused_at = None;
        self.paused_total_ms = 0;
        self.place_players_at_rest();
        self.set_phase(GamePhase::Playing);

        info!(mode = %mode_id, players = active, "Game started");
        Ok(())
    }

    /// playing -> paused
    pub fn pause(&mut self) -> Result<(), TransitionError> {
        if self.run.phase != GamePhase::Playing {
            return Err(TransitionError::InvalidPhase {
                action: "pause",
                phase: self.run.phase,
            });
        }
        self.paused_at = Some(self.clock.now_millis());
        self.set_phase(GamePhase::Paused);
        Ok(())
    }

    /// paused -> playing. Refused while required sensors are still missing.
    pub fn resume(&mut self) -> Result<(), TransitionError> {
        let mode_id = self.mode.ok_or(TransitionError::NoMode)?;
        if self.run.phase != GamePhase::Paused {
            return Err(TransitionError::InvalidPhase {
                action: "resume",
                phase: self.run.phase,
            });
        }

        let required = resume_floor(mode_id.descriptor());
        let active = self.players.active_count();
        if active < required {
            return Err(TransitionError::NotEnoughPlayers {
                mode: mode_id,
                required,
                active,
            });
        }

        // Freeze target lifetimes and combo windows across the pause
        if let Some(paused_at) = self.paused_at.take() {
            let offset = self.clock.now_millis().saturating_sub(paused_at);
            self.paused_total_ms += offset;
            self.targets.shift_time(offset);
            for player in self.players.iter_mut() {
                if let Some(last) = player.last_hit_at.as_mut() {
                    *last += offset;
                }
            }
        }

        self.set_phase(GamePhase::Playing);
        Ok(())
    }

    /// playing | paused -> ended
    pub fn end(&mut self, reason: EndReason) -> Result<(), TransitionError> {
        let mode = self.mode.ok_or(TransitionError::NoMode)?;
        if !matches!(self.run.phase, GamePhase::Playing | GamePhase::Paused) {
            return Err(TransitionError::InvalidPhase {
                action: "end",
                phase: self.run.phase,
            });
        }

        let now = self.clock.now_millis();
        if let Some(paused_at) = self.paused_at.take() {
            self.paused_total_ms += now.saturating_sub(paused_at);
        }
        let played_ms = self
            .run
            .started_at
            .map(|start| now.saturating_sub(start).saturating_sub(self.paused_total_ms))
            .unwrap_or(0);

        self.run.total_targets_spawned = self.targets.total_spawned();
        self.set_phase(GamePhase::Ended);

        let report = snapshot::build_report(
            mode,
            reason,
            &self.players,
            self.run.total_targets_spawned,
            (played_ms / 1000) as u32,
            now,
        );
        info!(
            mode = %mode,
            reason = ?reason,
            winner = ?report.winner_id,
            "Game ended"
        );
        self.report = Some(report);
        Ok(())
    }

    /// Any phase -> idle. Drops players, targets and the report; open sensor
    /// connections are kept and rejoin on the next `select_mode`.
    pub fn reset(&mut self) {
        self.mode = None;
        self.players.clear();
        self.targets.clear();
        self.aim.clear();
        self.inbox.clear();
        self.run = GameRunState {
            phase: self.run.phase,
            ..GameRunState::default()
        };
        self.paused_at = None;
        self.paused_total_ms = 0;
        self.report = None;
        self.set_phase(GamePhase::Idle);
    }

    // ------------------------------------------------------------------
    // Input
    // ------------------------------------------------------------------

    /// Queue a transport event for the next tick
    pub fn push_event(&mut self, event: SensorEvent) {
        self.inbox.push_back(event);
    }

    fn drain_inbox(&mut self) {
        while let Some(event) = self.inbox.pop_front() {
            self.apply_event(event);
        }
    }

    fn apply_event(&mut self, event: SensorEvent) {
        match event {
            SensorEvent::ChannelReady => debug!("Transport channel ready"),
            SensorEvent::SessionCreated { session_code } => {
                self.events.push(GameEvent::SessionCreated { session_code });
            }
            SensorEvent::SensorConnected {
                sensor_id, name, ..
            } => {
                self.attach(&sensor_id, name.clone());
                self.handle_sensor_connected(&sensor_id, name.as_deref());
            }
            SensorEvent::SensorDisconnected { sensor_id } => {
                self.attached.retain(|s| s.id != sensor_id);
                self.handle_sensor_disconnected(&sensor_id)
            }
            SensorEvent::SensorData {
                sensor_id,
                sample,
                received_at,
            } => {
                let Some(mode) = self.descriptor() else {
                    return;
                };
                match self.players.get(&sensor_id) {
                    Some(p) if p.is_active => {
                        self.aim
                            .submit(&sensor_id, sample, received_at, mode.input_throttle_ms);
                    }
                    Some(_) => debug!(sensor_id = %sensor_id, "Data from inactive sensor ignored"),
                    None => debug!(sensor_id = %sensor_id, "Data from unknown sensor ignored"),
                }
            }
            SensorEvent::ChannelClosed => {
                self.attached.clear();
                self.handle_channel_closed();
            }
        }
    }

    fn attach(&mut self, sensor_id: &str, name: Option<String>) {
        match self.attached.iter_mut().find(|s| s.id == sensor_id) {
            Some(sensor) => sensor.name = name.or(sensor.name.take()),
            None => self.attached.push(AttachedSensor {
                id: sensor_id.to_string(),
                name,
            }),
        }
    }

    /// Give every open connection without a record a player slot
    fn admit_attached(&mut self) {
        let pending: Vec<AttachedSensor> = self
            .attached
            .iter()
            .filter(|s| !self.players.contains(&s.id))
            .cloned()
            .collect();
        for sensor in pending {
            self.admit_sensor(&sensor.id, sensor.name.as_deref());
        }
    }

    fn handle_sensor_connected(&mut self, sensor_id: &str, name: Option<&str>) {
        self.admit_sensor(sensor_id, name);
        self.maybe_auto_start();
    }

    /// Join or reactivate a player. Start rules are applied by the caller.
    fn admit_sensor(&mut self, sensor_id: &str, name: Option<&str>) {
        let Some(mode) = self.mode else {
            self.notice("no_mode", format!("Sensor {} waiting for a mode to be selected", sensor_id));
            return;
        };
        let descriptor = mode.descriptor();
        if self.run.phase == GamePhase::Ended {
            self.notice("game_over", format!("Sensor {} connected after the game ended", sensor_id));
            return;
        }

        let now = self.clock.now_millis();
        if self.players.contains(sensor_id) {
            self.players.activate(sensor_id, now);
            self.events.push(GameEvent::PlayerReconnected {
                player_id: sensor_id.to_string(),
            });
            info!(sensor_id = %sensor_id, "Sensor reconnected");

            if self.run.phase == GamePhase::Paused
                && descriptor.start_rule == StartRule::Automatic
                && self.players.active_count() >= descriptor.min_players
            {
                if let Err(e) = self.resume() {
                    warn!(error = %e, "Auto-resume failed");
                }
            }
        } else {
            if self.run.phase == GamePhase::Waiting && self.players.len() >= descriptor.max_players {
                // No scores exist yet; slots held by dropped sensors are freed
                let pruned = self.players.remove_inactive();
                if pruned > 0 {
                    debug!(pruned, "Released slots of disconnected sensors");
                }
            }
            if self.players.len() >= descriptor.max_players {
                let err = TransitionError::TooManyPlayers {
                    mode,
                    max: descriptor.max_players,
                };
                self.notice(err.code(), err.to_string());
                return;
            }

            let canvas = self.config.canvas;
            let player = self.players.add(sensor_id, name, now);
            player.place_aim(region_center(descriptor.aim_geometry, player.color_index, canvas));
            self.events.push(GameEvent::PlayerJoined {
                player_id: player.id.clone(),
                name: player.display_name.clone(),
                color: player.color().to_string(),
            });
            info!(sensor_id = %sensor_id, slot = player.color_index, "Sensor joined");
        }
    }

    fn handle_sensor_disconnected(&mut self, sensor_id: &str) {
        if !self.players.deactivate(sensor_id) {
            debug!(sensor_id = %sensor_id, "Disconnect for unknown sensor ignored");
            return;
        }
        self.aim.forget(sensor_id);
        self.events.push(GameEvent::PlayerLeft {
            player_id: sensor_id.to_string(),
        });
        info!(sensor_id = %sensor_id, "Sensor disconnected");

        let Some(mode) = self.descriptor() else {
            return;
        };
        if self.run.phase != GamePhase::Playing {
            return;
        }

        if mode.pauses_on_disconnect() {
            let _ = self.pause();
        } else if let Some(floor) = mode.ends_below_active() {
            if self.players.active_count() < floor {
                let _ = self.end(EndReason::NotEnoughPlayers);
            }
        }
    }

    fn handle_channel_closed(&mut self) {
        warn!("Transport channel closed, deactivating all sensors");
        let ids: Vec<String> = self
            .players
            .all_active()
            .map(|p| p.id.clone())
            .collect();
        for id in ids {
            self.players.deactivate(&id);
            self.aim.forget(&id);
            self.events.push(GameEvent::PlayerLeft { player_id: id });
        }
        if self.run.phase == GamePhase::Playing {
            let _ = self.pause();
        }
    }

    fn maybe_auto_start(&mut self) {
        let Some(mode) = self.descriptor() else {
            return;
        };
        if self.run.phase == GamePhase::Waiting
            && mode.start_rule == StartRule::Automatic
            && self.players.active_count() >= mode.min_players
        {
            if let Err(e) = self.start() {
                warn!(error = %e, "Auto-start failed");
            }
        }
    }

    // ------------------------------------------------------------------
    // Clocks
    // ------------------------------------------------------------------

    /// Render tick: drain input, then spawn, aim and score while playing
    pub fn tick(&mut self) {
        self.tick += 1;
        self.drain_inbox();

        if self.run.phase != GamePhase::Playing {
            return;
        }
        let Some(mode) = self.descriptor() else {
            return;
        };

        let now = self.clock.now_millis();
        let canvas = self.config.canvas;
        let active = self.players.active_count();

        for expired in self.targets.sweep_expired(now) {
            self.events.push(GameEvent::TargetExpired {
                target_id: expired.id,
            });
        }
        if let Some(t) = self
            .targets
            .spawn_tick(now, active, mode, canvas, &mut self.rng)
        {
            self.events.push(GameEvent::TargetSpawned {
                target_id: t.id,
                tier: t.tier,
                x: t.x,
                y: t.y,
            });
        }
        self.run.total_targets_spawned = self.targets.total_spawned();

        self.aim.update(&mut self.players, mode, canvas);

        for hit in ScoringEngine::detect_hits(&mut self.players, &mut self.targets, now, mode) {
            debug!(
                sensor_id = %hit.player_id,
                target_id = hit.target_id,
                points = hit.points,
                combo = hit.combo,
                "Target hit"
            );
            self.events.push(GameEvent::TargetHit {
                player_id: hit.player_id,
                target_id: hit.target_id,
                tier: hit.tier,
                points: hit.points,
                combo: hit.combo,
                x: hit.x,
                y: hit.y,
            });
        }

        for player_id in ScoringEngine::sweep_combos(&mut self.players, now) {
            self.events.push(GameEvent::ComboReset { player_id });
        }
    }

    /// One-second game timer. Does nothing unless playing.
    pub fn timer_tick(&mut self) {
        if self.run.phase != GamePhase::Playing {
            return;
        }
        self.run.time_remaining_secs = self.run.time_remaining_secs.saturating_sub(1);
        if self.run.time_remaining_secs == 0 {
            let _ = self.end(EndReason::TimeUp);
        }
    }

    // ------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------

    /// Render-ready view; takes the events accumulated since the last call
    pub fn snapshot(&mut self) -> GameSnapshot {
        let events = std::mem::take(&mut self.events);
        snapshot::build_snapshot(
            self.tick,
            self.mode,
            &self.run,
            &self.players,
            &self.targets,
            self.clock.now_millis(),
            events,
        )
    }

    fn set_phase(&mut self, to: GamePhase) {
        let from = self.run.phase;
        if from != to {
            self.run.phase = to;
            self.events.push(GameEvent::PhaseChanged { from, to });
            debug!(from = %from, to = %to, "Phase changed");
        }
    }

    fn notice(&mut self, code: &str, message: String) {
        warn!(code = code, "{}", message);
        self.events.push(GameEvent::Notice {
            code: code.to_string(),
            message,
        });
    }

    fn place_players_at_rest(&mut self) {
        let Some(mode) = self.descriptor() else {
            return;
        };
        let canvas = self.config.canvas;
        for player in self.players.iter_mut() {
            player.place_aim(region_center(mode.aim_geometry, player.color_index, canvas));
        }
    }
}

/// Active players needed to leave the paused state
fn resume_floor(mode: &ModeDescriptor) -> usize {
    match mode.ends_below_active() {
        Some(floor) => floor,
        None => mode.min_players,
    }
}
