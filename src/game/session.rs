//! Session runtime: one task per live game, plus the registry of sessions

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::util::rate_limit::SessionRateLimits;
use crate::util::time::{
    Clock, SystemClock, RENDER_TICK_MICROS, RENDER_TPS, SNAPSHOT_TPS, TIMER_PERIOD_MILLIS,
};
use crate::ws::protocol::{EndReason, GamePhase, HostMsg, ServerMsg};

use super::engine::{EngineConfig, GameEngine};
use super::mode::GameModeId;
use super::snapshot::SnapshotBuilder;
use super::SensorEvent;

/// Attempts at drawing an unused session code before giving up
const CODE_ATTEMPTS: usize = 64;

/// Everything a session task accepts
#[derive(Debug, Clone)]
pub enum SessionInput {
    /// Validated transport event
    Transport(SensorEvent),
    /// Host control
    Control(HostMsg),
    /// Host went away, shut the session down
    Close,
}

/// Handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    pub id: Uuid,
    pub code: String,
    pub input_tx: mpsc::Sender<SessionInput>,
    pub snapshot_tx: broadcast::Sender<ServerMsg>,
    pub sensor_count: Arc<AtomicUsize>,
    /// Inbound frame budgets shared by the host and sensor connections
    pub limits: Arc<SessionRateLimits>,
}

impl SessionHandle {
    pub fn sensor_count(&self) -> usize {
        self.sensor_count.load(Ordering::Relaxed)
    }

    /// Bump the live sensor connection count, returning the new value
    pub fn sensor_attached(&self) -> usize {
        self.sensor_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn sensor_detached(&self) {
        let _ = self
            .sensor_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("No free session code available")]
    CodesExhausted,
}

/// Registry of all live sessions, keyed by session code
pub struct SessionRegistry {
    sessions: DashMap<String, SessionHandle>,
    engine_config: EngineConfig,
    rng_seed: Option<u64>,
}

impl SessionRegistry {
    pub fn new(engine_config: EngineConfig, rng_seed: Option<u64>) -> Self {
        Self {
            sessions: DashMap::new(),
            engine_config,
            rng_seed,
        }
    }

    pub fn get(&self, code: &str) -> Option<SessionHandle> {
        self.sessions.get(code).map(|s| s.value().clone())
    }

    pub fn remove(&self, code: &str) -> Option<SessionHandle> {
        self.sessions.remove(code).map(|(_, h)| h)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn total_sensors(&self) -> usize {
        self.sessions
            .iter()
            .map(|s| s.value().sensor_count())
            .sum()
    }

    /// Create a session under a fresh 4-digit code and spawn its task.
    /// The session removes itself from the registry when the task exits.
    pub fn create_session(self: &Arc<Self>, mode: GameModeId) -> Result<SessionHandle, RegistryError> {
        let mut rng = rand::thread_rng();
        for _ in 0..CODE_ATTEMPTS {
            let code = format!("{:04}", rng.gen_range(0..10_000u32));
            let Entry::Vacant(slot) = self.sessions.entry(code.clone()) else {
                continue;
            };

            let seed = self.rng_seed.unwrap_or_else(rand::random);
            let (session, handle) = GameSession::new(
                code.clone(),
                mode,
                self.engine_config.clone(),
                Arc::new(SystemClock),
                seed,
            );
            slot.insert(handle.clone());

            info!(session = %code, mode = %mode, seed, "Created session");

            let registry = Arc::clone(self);
            tokio::spawn(async move {
                session.run().await;
                registry.remove(&code);
                info!(session = %code, "Session removed from registry");
            });

            return Ok(handle);
        }
        Err(RegistryError::CodesExhausted)
    }
}

/// One live game: owns the engine and drives its clocks
pub struct GameSession {
    id: Uuid,
    code: String,
    engine: GameEngine,
    input_rx: mpsc::Receiver<SessionInput>,
    snapshot_tx: broadcast::Sender<ServerMsg>,
    snapshot_builder: SnapshotBuilder,
    last_phase: GamePhase,
    report_sent: bool,
    closed: bool,
}

impl GameSession {
    pub fn new(
        code: String,
        mode: GameModeId,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        seed: u64,
    ) -> (Self, SessionHandle) {
        let (input_tx, input_rx) = mpsc::channel(256);
        let (snapshot_tx, _) = broadcast::channel(64);
        let id = Uuid::new_v4();

        let handle = SessionHandle {
            id,
            code: code.clone(),
            input_tx,
            snapshot_tx: snapshot_tx.clone(),
            sensor_count: Arc::new(AtomicUsize::new(0)),
            limits: Arc::new(SessionRateLimits::default()),
        };

        let mut engine = GameEngine::new(config, clock, seed);
        if let Err(e) = engine.select_mode(mode) {
            warn!(session = %code, error = %e, "Initial mode selection rejected");
        }

        let session = Self {
            id,
            code,
            engine,
            input_rx,
            snapshot_tx,
            snapshot_builder: SnapshotBuilder::new(RENDER_TPS / SNAPSHOT_TPS),
            last_phase: GamePhase::Idle,
            report_sent: false,
            closed: false,
        };

        (session, handle)
    }

    /// Run until the host closes the session or every sender is dropped.
    /// The render tick and the game timer are only polled while playing, so a
    /// paused or finished run cannot be advanced by a stale timer.
    pub async fn run(mut self) {
        info!(session = %self.code, id = %self.id, "Session loop started");

        let mut render = interval(Duration::from_micros(RENDER_TICK_MICROS));
        render.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut timer = interval(Duration::from_millis(TIMER_PERIOD_MILLIS));
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut clocks_armed = false;

        while !self.closed {
            let running = self.engine.is_running();
            if running && !clocks_armed {
                render.reset();
                timer.reset();
            }
            clocks_armed = running;

            tokio::select! {
                _ = render.tick(), if running => {
                    self.process_inputs();
                    self.engine.tick();
                    self.publish(false);
                }
                _ = timer.tick(), if running => {
                    self.engine.timer_tick();
                    self.publish(true);
                }
                input = self.input_rx.recv(), if !running => {
                    match input {
                        Some(input) => {
                            self.handle_input(input);
                            self.engine.tick();
                            self.publish(true);
                        }
                        None => self.closed = true,
                    }
                }
            }
        }

        if matches!(self.engine.phase(), GamePhase::Playing | GamePhase::Paused) {
            let _ = self.engine.end(EndReason::Requested);
            self.publish(true);
        }
        info!(session = %self.code, "Session loop finished");
    }

    /// Drain everything queued since the last render tick
    fn process_inputs(&mut self) {
        loop {
            match self.input_rx.try_recv() {
                Ok(input) => self.handle_input(input),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.closed = true;
                    break;
                }
            }
        }
    }

    fn handle_input(&mut self, input: SessionInput) {
        match input {
            SessionInput::Transport(event) => self.engine.push_event(event),
            SessionInput::Control(msg) => self.handle_control(msg),
            SessionInput::Close => {
                debug!(session = %self.code, "Close requested");
                self.closed = true;
            }
        }
    }

    fn handle_control(&mut self, msg: HostMsg) {
        let result = match msg {
            HostMsg::SelectMode { mode } => self.engine.select_mode(mode),
            HostMsg::Start => self.engine.start(),
            HostMsg::Pause => self.engine.pause(),
            HostMsg::Resume => self.engine.resume(),
            HostMsg::End => self.engine.end(EndReason::Requested),
            HostMsg::Reset => {
                self.engine.reset();
                Ok(())
            }
        };

        if let Err(e) = result {
            debug!(session = %self.code, error = %e, "Control rejected");
            let _ = self.snapshot_tx.send(ServerMsg::Status {
                code: e.code().to_string(),
                message: e.to_string(),
            });
        }
    }

    /// Broadcast a snapshot when due, and the final report once per run.
    /// Phase changes always go out immediately.
    fn publish(&mut self, force: bool) {
        let phase = self.engine.phase();
        if force || phase != self.last_phase {
            self.last_phase = phase;
            self.snapshot_builder.force_next();
        }
        if self.snapshot_builder.should_send() {
            let _ = self
                .snapshot_tx
                .send(ServerMsg::Snapshot(self.engine.snapshot()));
        }

        match (self.engine.phase(), self.engine.report()) {
            (GamePhase::Ended, Some(report)) if !self.report_sent => {
                let _ = self.snapshot_tx.send(ServerMsg::GameEnded(report.clone()));
                self.report_sent = true;
            }
            (GamePhase::Ended, _) => {}
            _ => self.report_sent = false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::aim::OrientationSample;
    use crate::ws::protocol::GameSnapshot;
    use tokio::time::timeout;
    use tokio_test::assert_ok;

    async fn next_snapshot_where(
        rx: &mut broadcast::Receiver<ServerMsg>,
        pred: impl Fn(&GameSnapshot) -> bool,
    ) -> GameSnapshot {
        let wait = async {
            loop {
                match rx.recv().await {
                    Ok(ServerMsg::Snapshot(s)) if pred(&s) => return s,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => panic!("session closed"),
                }
            }
        };
        assert_ok!(timeout(Duration::from_secs(5), wait).await)
    }

    fn connected(id: &str) -> SessionInput {
        SessionInput::Transport(SensorEvent::SensorConnected {
            sensor_id: id.to_string(),
            name: None,
            connected_count: 1,
        })
    }

    #[tokio::test]
    async fn solo_session_runs_pauses_and_closes() {
        let registry = Arc::new(SessionRegistry::new(EngineConfig::default(), Some(7)));
        let handle = registry.create_session(GameModeId::Solo).unwrap();
        assert_eq!(handle.code.len(), 4);
        assert!(registry.get(&handle.code).is_some());

        let mut rx = handle.snapshot_tx.subscribe();
        handle.input_tx.send(connected("sensor1")).await.unwrap();
        let playing = next_snapshot_where(&mut rx, |s| s.phase == GamePhase::Playing).await;
        assert_eq!(playing.players.len(), 1);

        handle
            .input_tx
            .send(SessionInput::Transport(SensorEvent::SensorData {
                sensor_id: "sensor1".into(),
                sample: OrientationSample::new(10.0, 10.0),
                received_at: 0,
            }))
            .await
            .unwrap();
        next_snapshot_where(&mut rx, |s| !s.targets.is_empty()).await;

        handle
            .input_tx
            .send(SessionInput::Control(HostMsg::Pause))
            .await
            .unwrap();
        next_snapshot_where(&mut rx, |s| s.phase == GamePhase::Paused).await;

        handle.input_tx.send(SessionInput::Close).await.unwrap();
        let removed = async {
            while registry.get(&handle.code).is_some() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        assert_ok!(timeout(Duration::from_secs(5), removed).await);
    }

    #[tokio::test]
    async fn rejected_control_reports_status() {
        let registry = Arc::new(SessionRegistry::new(EngineConfig::default(), Some(1)));
        let handle = registry.create_session(GameModeId::MassCompetitive).unwrap();
        let mut rx = handle.snapshot_tx.subscribe();

        handle
            .input_tx
            .send(SessionInput::Control(HostMsg::Start))
            .await
            .unwrap();

        let status = async {
            loop {
                if let Ok(ServerMsg::Status { code, .. }) = rx.recv().await {
                    return code;
                }
            }
        };
        let code = assert_ok!(timeout(Duration::from_secs(5), status).await);
        assert_eq!(code, "not_enough_players");
    }

    #[tokio::test]
    async fn selected_mode_is_reported_in_snapshots() {
        let registry = Arc::new(SessionRegistry::new(EngineConfig::default(), Some(3)));
        let handle = registry.create_session(GameModeId::Coop).unwrap();
        let mut rx = handle.snapshot_tx.subscribe();

        handle
            .input_tx
            .send(SessionInput::Control(HostMsg::SelectMode {
                mode: GameModeId::Competitive,
            }))
            .await
            .unwrap();
        next_snapshot_where(&mut rx, |s| s.mode == Some(GameModeId::Competitive)).await;
    }

    #[test]
    fn sensor_count_never_underflows() {
        let (_session, handle) = GameSession::new(
            "0000".into(),
            GameModeId::Solo,
            EngineConfig::default(),
            Arc::new(SystemClock),
            0,
        );
        assert_eq!(handle.sensor_attached(), 1);
        handle.sensor_detached();
        handle.sensor_detached();
        assert_eq!(handle.sensor_count(), 0);
    }
}
