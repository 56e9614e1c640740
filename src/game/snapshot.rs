//! Snapshot and end-of-game report building

use chrono::DateTime;

use crate::ws::protocol::{
    EndReason, GameEvent, GameReport, GameSnapshot, GameSummary, PlayerSnapshot, RankedPlayer,
    TargetSnapshot,
};

use super::engine::GameRunState;
use super::mode::GameModeId;
use super::player::PlayerRegistry;
use super::target::TargetScheduler;

/// Decides which render ticks produce a broadcast snapshot
pub struct SnapshotBuilder {
    /// Tick counter since last snapshot
    ticks_since_snapshot: u32,
    /// Snapshot interval in ticks
    snapshot_interval: u32,
}

impl SnapshotBuilder {
    pub fn new(snapshot_interval: u32) -> Self {
        Self {
            ticks_since_snapshot: 0,
            snapshot_interval: snapshot_interval.max(1),
        }
    }

    /// Check if it's time to send a snapshot
    pub fn should_send(&mut self) -> bool {
        self.ticks_since_snapshot += 1;
        if self.ticks_since_snapshot >= self.snapshot_interval {
            self.ticks_since_snapshot = 0;
            true
        } else {
            false
        }
    }

    /// Force snapshot on next check (used for important events)
    pub fn force_next(&mut self) {
        self.ticks_since_snapshot = self.snapshot_interval;
    }
}

/// Build the per-tick view. Targets already past their lifetime are left out.
pub fn build_snapshot(
    tick: u64,
    mode: Option<GameModeId>,
    run: &GameRunState,
    players: &PlayerRegistry,
    targets: &TargetScheduler,
    now: u64,
    events: Vec<GameEvent>,
) -> GameSnapshot {
    let lifetime = targets.lifetime_ms();

    let players = players
        .iter()
        .map(|p| PlayerSnapshot {
            id: p.id.clone(),
            name: p.display_name.clone(),
            color: p.color().to_string(),
            score: p.score,
            combo: p.combo,
            accuracy: p.accuracy(),
            aim_pos: p.aim_pos,
            is_active: p.is_active,
        })
        .collect();

    let targets = targets
        .live()
        .iter()
        .filter(|t| !t.is_expired(now, lifetime))
        .map(|t| TargetSnapshot {
            id: t.id,
            x: t.x,
            y: t.y,
            radius: t.radius,
            tier: t.tier,
            alpha: t.alpha(now, lifetime),
        })
        .collect();

    GameSnapshot {
        tick,
        phase: run.phase,
        mode,
        time_remaining_secs: run.time_remaining_secs,
        players,
        targets,
        events,
    }
}

/// Ranking plus aggregate statistics for a finished run
pub fn build_report(
    mode: GameModeId,
    reason: EndReason,
    players: &PlayerRegistry,
    total_targets_spawned: u64,
    duration_secs: u32,
    now: u64,
) -> GameReport {
    let ranking: Vec<RankedPlayer> = players
        .ranked_by_score()
        .into_iter()
        .enumerate()
        .map(|(i, p)| RankedPlayer {
            rank: (i + 1) as u32,
            id: p.id.clone(),
            name: p.display_name.clone(),
            color: p.color().to_string(),
            score: p.score,
            hits: p.hits,
            misses: p.misses,
            accuracy: p.accuracy(),
            max_combo: p.max_combo,
            is_active: p.is_active,
        })
        .collect();

    let winner_id = match ranking.as_slice() {
        [first, second, ..] if first.score == second.score => None,
        [first, ..] => Some(first.id.clone()),
        [] => None,
    };

    let attempted: Vec<f32> = players
        .iter()
        .filter(|p| p.hits + p.misses > 0)
        .map(|p| p.accuracy())
        .collect();
    let average_accuracy = if attempted.is_empty() {
        0.0
    } else {
        attempted.iter().sum::<f32>() / attempted.len() as f32
    };

    GameReport {
        mode,
        reason,
        winner_id,
        summary: GameSummary {
            total_targets_spawned,
            total_hits: players.iter().map(|p| p.hits).sum(),
            total_score: players.iter().map(|p| p.score).sum(),
            average_accuracy,
            duration_secs,
            ended_at: DateTime::from_timestamp_millis(now as i64),
        },
        ranking,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::Canvas;
    use crate::ws::protocol::GamePhase;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn builder_sends_every_interval() {
        let mut builder = SnapshotBuilder::new(2);
        let sent: Vec<bool> = (0..4).map(|_| builder.should_send()).collect();
        assert_eq!(sent, vec![false, true, false, true]);

        builder.should_send();
        builder.force_next();
        assert!(builder.should_send());
    }

    #[test]
    fn snapshot_hides_expired_targets() {
        let mut targets = TargetScheduler::new(5_000);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        targets.spawn_tick(0, 1, GameModeId::Solo.descriptor(), Canvas::default(), &mut rng);

        let run = GameRunState {
            phase: GamePhase::Playing,
            ..GameRunState::default()
        };
        let players = PlayerRegistry::new();

        let live = build_snapshot(1, Some(GameModeId::Solo), &run, &players, &targets, 4_999, vec![]);
        assert_eq!(live.targets.len(), 1);
        let gone = build_snapshot(2, Some(GameModeId::Solo), &run, &players, &targets, 5_000, vec![]);
        assert!(gone.targets.is_empty());
    }

    #[test]
    fn tied_leaders_have_no_winner() {
        let mut players = PlayerRegistry::new();
        players.add("a", None, 10).score = 300;
        players.add("b", None, 5).score = 300;

        let report = build_report(GameModeId::Competitive, EndReason::TimeUp, &players, 4, 60, 0);
        assert!(report.winner_id.is_none());
        assert_eq!(report.ranking[0].id, "b");
        assert_eq!(report.summary.average_accuracy, 0.0);
        assert_eq!(report.summary.total_targets_spawned, 4);
    }
}
