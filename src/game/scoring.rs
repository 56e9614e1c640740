//! Hit detection and combo scoring

use super::mode::ModeDescriptor;
use super::player::{Player, PlayerRegistry};
use super::target::{Target, TargetScheduler, TargetTier};

/// Distance from a target's center at which an aim point claims it
pub const HIT_RADIUS: f32 = 15.0;
/// Per-combo-step score multiplier
pub const COMBO_MULTIPLIER: f64 = 1.5;
/// Idle time after the last hit that drops the combo
pub const COMBO_TIMEOUT_MS: u64 = 4_500;

/// Points for hitting a target worth `base` while holding `combo`
pub fn combo_points(base: u32, combo: u32) -> u64 {
    (base as f64 * (1.0 + combo as f64 * (COMBO_MULTIPLIER - 1.0))).floor() as u64
}

/// Outcome of one claimed target
#[derive(Debug, Clone, PartialEq)]
pub struct HitRecord {
    pub player_id: String,
    pub target_id: u64,
    pub tier: TargetTier,
    pub points: u64,
    /// Combo after the hit
    pub combo: u32,
    pub x: f32,
    pub y: f32,
}

/// Scoring rules over players and targets
pub struct ScoringEngine;

impl ScoringEngine {
    /// Drop the combo if the player has idled past the timeout. Returns true on reset.
    pub fn expire_combo(player: &mut Player, now: u64) -> bool {
        let idle = player
            .last_hit_at
            .map(|last| now.saturating_sub(last) > COMBO_TIMEOUT_MS)
            .unwrap_or(false);
        if idle && player.combo > 0 {
            player.combo = 0;
            true
        } else {
            false
        }
    }

    /// Periodic combo timeout sweep. Returns ids whose combo was reset.
    pub fn sweep_combos(players: &mut PlayerRegistry, now: u64) -> Vec<String> {
        players
            .iter_mut()
            .filter_map(|p| Self::expire_combo(p, now).then(|| p.id.clone()))
            .collect()
    }

    /// Credit a hit to the player and return the points awarded
    pub fn apply_hit(player: &mut Player, target: &Target, now: u64, mode: &ModeDescriptor) -> u64 {
        Self::expire_combo(player, now);

        let combo = mode.clamp_combo(player.combo);
        let points = combo_points(target.points, combo);

        player.score += points;
        player.combo = mode.clamp_combo(combo + 1);
        player.max_combo = player.max_combo.max(player.combo);
        player.hits += 1;
        player.last_hit_at = Some(now);
        player.last_activity_at = now;

        points
    }

    /// One detection pass. Players are visited in registry order and targets in
    /// spawn order; the first target under a player's aim is claimed and removed,
    /// so no target can score twice.
    pub fn detect_hits(
        players: &mut PlayerRegistry,
        targets: &mut TargetScheduler,
        now: u64,
        mode: &ModeDescriptor,
    ) -> Vec<HitRecord> {
        let mut hits = Vec::new();

        for player in players.iter_mut().filter(|p| p.is_active) {
            let aim = player.aim_pos;
            let claimed = targets
                .live()
                .iter()
                .find(|t| t.contains(aim.x, aim.y, HIT_RADIUS))
                .map(|t| t.id);

            let Some(target) = claimed.and_then(|id| targets.take(id)) else {
                continue;
            };

            let points = Self::apply_hit(player, &target, now, mode);
            hits.push(HitRecord {
                player_id: player.id.clone(),
                target_id: target.id,
                tier: target.tier,
                points,
                combo: player.combo,
                x: target.x,
                y: target.y,
            });
        }

        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::mode::GameModeId;
    use crate::game::{Canvas, Point};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn large_target(id: u64, x: f32, y: f32) -> Target {
        Target::new(id, x, y, TargetTier::Large, 0)
    }

    #[test]
    fn consecutive_hits_follow_linear_combo() {
        let mode = GameModeId::Solo.descriptor();
        let mut player = Player::new("p".into(), "P".into(), 0, 0);
        let mut total = 0;
        for n in 1..=6u64 {
            let gained = ScoringEngine::apply_hit(&mut player, &large_target(n, 0.0, 0.0), n * 1_000, mode);
            let expected = (100.0 * (1.0 + (n - 1) as f64 * 0.5)).floor() as u64;
            assert_eq!(gained, expected);
            total += gained;
        }
        assert_eq!(player.score, total);
        assert_eq!(player.combo, 6);
        assert_eq!(player.max_combo, 6);
    }

    #[test]
    fn solo_combo_decays_after_idle() {
        let mode = GameModeId::Solo.descriptor();
        let mut player = Player::new("p".into(), "P".into(), 0, 0);

        assert_eq!(ScoringEngine::apply_hit(&mut player, &large_target(1, 0.0, 0.0), 0, mode), 100);
        assert_eq!(player.combo, 1);
        assert_eq!(ScoringEngine::apply_hit(&mut player, &large_target(2, 0.0, 0.0), 1_000, mode), 150);
        assert_eq!(player.score, 250);
        assert_eq!(ScoringEngine::apply_hit(&mut player, &large_target(3, 0.0, 0.0), 6_000, mode), 100);
        assert_eq!(player.score, 350);
        assert_eq!(player.combo, 1);
    }

    #[test]
    fn mass_competitive_combo_is_capped() {
        let mode = GameModeId::MassCompetitive.descriptor();
        let mut player = Player::new("p".into(), "P".into(), 0, 0);
        let gains: Vec<u64> = (0..6u64)
            .map(|n| ScoringEngine::apply_hit(&mut player, &large_target(n, 0.0, 0.0), n * 100, mode))
            .collect();
        assert_eq!(gains, vec![100, 150, 200, 250, 250, 250]);
        assert_eq!(player.combo, 3);
    }

    #[test]
    fn sweep_resets_idle_combos_only() {
        let mode = GameModeId::Solo.descriptor();
        let mut players = PlayerRegistry::new();
        ScoringEngine::apply_hit(players.add("idle", None, 0), &large_target(1, 0.0, 0.0), 0, mode);
        ScoringEngine::apply_hit(players.add("busy", None, 0), &large_target(2, 0.0, 0.0), 4_000, mode);

        assert!(ScoringEngine::sweep_combos(&mut players, 4_500).is_empty());
        assert_eq!(ScoringEngine::sweep_combos(&mut players, 4_501), vec!["idle".to_string()]);
        assert_eq!(players.get("busy").map(|p| p.combo), Some(1));
    }

    fn tiny_canvas() -> Canvas {
        // Every tier falls back to the center at (50, 50)
        Canvas::new(100.0, 100.0)
    }

    #[test]
    fn oldest_overlapping_target_is_claimed_first() {
        let mode = GameModeId::MassCompetitive.descriptor();
        let mut players = PlayerRegistry::new();
        players.add("p", None, 0).place_aim(Point::new(50.0, 50.0));

        let mut scheduler = TargetScheduler::default();
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        scheduler.spawn_tick(0, 3, mode, tiny_canvas(), &mut rng);
        scheduler.spawn_tick(1_200, 3, mode, tiny_canvas(), &mut rng);
        let ids: Vec<u64> = scheduler.live().iter().map(|t| t.id).collect();
        assert_eq!(ids.len(), 2);

        let hits = ScoringEngine::detect_hits(&mut players, &mut scheduler, 1_300, mode);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].target_id, ids[0]);
        assert_eq!(scheduler.live().len(), 1);
        assert_eq!(scheduler.live()[0].id, ids[1]);
    }

    #[test]
    fn a_target_scores_for_only_one_player() {
        let mode = GameModeId::Competitive.descriptor();
        let mut players = PlayerRegistry::new();
        players.add("first", None, 0).place_aim(Point::new(50.0, 50.0));
        players.add("second", None, 0).place_aim(Point::new(50.0, 50.0));

        let mut scheduler = TargetScheduler::default();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        scheduler.spawn_tick(0, 2, mode, tiny_canvas(), &mut rng);

        let hits = ScoringEngine::detect_hits(&mut players, &mut scheduler, 10, mode);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].player_id, "first");
        assert_eq!(players.get("second").map(|p| p.hits), Some(0));
    }

    #[test]
    fn aim_outside_hit_radius_misses_silently() {
        let mode = GameModeId::Solo.descriptor();
        let mut players = PlayerRegistry::new();
        players
            .add("p", None, 0)
            .place_aim(Point::new(50.0 + HIT_RADIUS + 1.0, 50.0));

        let mut scheduler = TargetScheduler::default();
        let mut rng = ChaCha8Rng::seed_from_u64(6);
        scheduler.spawn_tick(0, 1, mode, tiny_canvas(), &mut rng);

        assert!(ScoringEngine::detect_hits(&mut players, &mut scheduler, 10, mode).is_empty());
        let player = players.get("p").unwrap();
        assert_eq!((player.hits, player.misses), (0, 0));
        assert_eq!(scheduler.live().len(), 1);
    }

    #[test]
    fn inactive_players_cannot_claim() {
        let mode = GameModeId::Solo.descriptor();
        let mut players = PlayerRegistry::new();
        players.add("p", None, 0).place_aim(Point::new(50.0, 50.0));
        players.deactivate("p");

        let mut scheduler = TargetScheduler::default();
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        scheduler.spawn_tick(0, 1, mode, tiny_canvas(), &mut rng);

        assert!(ScoringEngine::detect_hits(&mut players, &mut scheduler, 10, mode).is_empty());
    }
}
