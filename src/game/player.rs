//! Player entity and the keyed player registry

use super::Point;

/// Display colors, indexed by connection slot
pub const PLAYER_COLORS: [&str; 8] = [
    "#3b82f6", "#ef4444", "#10b981", "#f59e0b", "#8b5cf6", "#ec4899", "#06b6d4", "#84cc16",
];

/// Per-sensor player state
#[derive(Debug, Clone)]
pub struct Player {
    pub id: String,
    pub display_name: String,
    /// Connection slot; drives color, aim region and smoothing
    pub color_index: usize,

    // Scoring
    pub score: u64,
    pub hits: u32,
    pub misses: u32,
    pub combo: u32,
    pub max_combo: u32,
    pub last_hit_at: Option<u64>,
    pub last_activity_at: u64,

    // Aim
    pub raw_tilt: Point,
    pub aim_target: Point,
    pub aim_pos: Point,

    pub is_active: bool,
}

impl Player {
    pub fn new(id: String, display_name: String, color_index: usize, now: u64) -> Self {
        Self {
            id,
            display_name,
            color_index,
            score: 0,
            hits: 0,
            misses: 0,
            combo: 0,
            max_combo: 0,
            last_hit_at: None,
            last_activity_at: now,
            raw_tilt: Point::default(),
            aim_target: Point::default(),
            aim_pos: Point::default(),
            is_active: true,
        }
    }

    pub fn color(&self) -> &'static str {
        PLAYER_COLORS[self.color_index % PLAYER_COLORS.len()]
    }

    /// hits / (hits + misses), 0 before any attempt
    pub fn accuracy(&self) -> f32 {
        let attempts = self.hits + self.misses;
        if attempts == 0 {
            0.0
        } else {
            self.hits as f32 / attempts as f32
        }
    }

    /// Place both the displayed and the target aim point
    pub fn place_aim(&mut self, at: Point) {
        self.aim_target = at;
        self.aim_pos = at;
    }
}

/// Insertion-ordered registry of players keyed by sensor id
#[derive(Debug, Default)]
pub struct PlayerRegistry {
    players: Vec<Player>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a player, or return the existing record for `id`
    pub fn add(&mut self, id: &str, name: Option<&str>, now: u64) -> &mut Player {
        let idx = match self.position(id) {
            Some(idx) => idx,
            None => {
                let slot = self.next_slot();
                let display_name = name
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Player {}", slot + 1));
                self.players
                    .push(Player::new(id.to_string(), display_name, slot, now));
                self.players.len() - 1
            }
        };
        &mut self.players[idx]
    }

    pub fn remove(&mut self, id: &str) -> Option<Player> {
        self.position(id).map(|idx| self.players.remove(idx))
    }

    /// Drop every inactive record, returning how many went
    pub fn remove_inactive(&mut self) -> usize {
        let before = self.players.len();
        self.players.retain(|p| p.is_active);
        before - self.players.len()
    }

    /// Returns false when the id is unknown
    pub fn activate(&mut self, id: &str, now: u64) -> bool {
        match self.get_mut(id) {
            Some(player) => {
                player.is_active = true;
                player.last_activity_at = now;
                true
            }
            None => false,
        }
    }

    /// Returns false when the id is unknown
    pub fn deactivate(&mut self, id: &str) -> bool {
        match self.get_mut(id) {
            Some(player) => {
                player.is_active = false;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    pub fn all_active(&self) -> impl Iterator<Item = &Player> {
        self.players.iter().filter(|p| p.is_active)
    }

    pub fn active_count(&self) -> usize {
        self.all_active().count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.players.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Player> {
        self.players.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn clear(&mut self) {
        self.players.clear();
    }

    /// Players by descending score, ties broken by earliest activity
    pub fn ranked_by_score(&self) -> Vec<&Player> {
        let mut ranked: Vec<&Player> = self.players.iter().collect();
        ranked.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then(a.last_activity_at.cmp(&b.last_activity_at))
        });
        ranked
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.players.iter().position(|p| p.id == id)
    }

    /// Lowest slot not held by a current record
    fn next_slot(&self) -> usize {
        (0..)
            .find(|slot| !self.players.iter().any(|p| p.color_index == *slot))
            .unwrap_or(self.players.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_idempotent() {
        let mut registry = PlayerRegistry::new();
        registry.add("sensor1", Some("Ada"), 10).score = 40;
        let again = registry.add("sensor1", Some("Other"), 20);
        assert_eq!(again.score, 40);
        assert_eq!(again.display_name, "Ada");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn slots_are_assigned_in_connection_order_and_reused() {
        let mut registry = PlayerRegistry::new();
        registry.add("a", None, 0);
        registry.add("b", None, 0);
        registry.add("c", None, 0);
        assert_eq!(registry.get("c").map(|p| p.color_index), Some(2));
        assert_eq!(registry.get("b").map(|p| p.display_name.as_str()), Some("Player 2"));

        registry.remove("b");
        let d = registry.add("d", None, 0);
        assert_eq!(d.color_index, 1);
    }

    #[test]
    fn remove_inactive_frees_slots() {
        let mut registry = PlayerRegistry::new();
        registry.add("a", None, 0);
        registry.add("b", None, 0);
        registry.deactivate("a");

        assert_eq!(registry.remove_inactive(), 1);
        assert!(!registry.contains("a"));
        assert_eq!(registry.add("c", None, 0).color_index, 0);
    }

    #[test]
    fn unknown_ids_return_not_found() {
        let mut registry = PlayerRegistry::new();
        assert!(registry.get("ghost").is_none());
        assert!(!registry.deactivate("ghost"));
        assert!(!registry.activate("ghost", 5));
        assert!(registry.remove("ghost").is_none());
    }

    #[test]
    fn deactivated_players_keep_their_score() {
        let mut registry = PlayerRegistry::new();
        registry.add("a", None, 0).score = 300;
        registry.add("b", None, 0);
        assert!(registry.deactivate("a"));

        assert_eq!(registry.active_count(), 1);
        assert_eq!(registry.get("a").map(|p| p.score), Some(300));
        assert!(registry.activate("a", 99));
        assert_eq!(registry.active_count(), 2);
    }

    #[test]
    fn ranking_breaks_ties_by_earliest_activity() {
        let mut registry = PlayerRegistry::new();
        registry.add("late", None, 500).score = 200;
        registry.add("early", None, 100).score = 200;
        registry.add("top", None, 900).score = 450;

        let ids: Vec<&str> = registry
            .ranked_by_score()
            .iter()
            .map(|p| p.id.as_str())
            .collect();
        assert_eq!(ids, vec!["top", "early", "late"]);
    }

    #[test]
    fn accuracy_is_zero_without_attempts() {
        let mut player = Player::new("a".into(), "A".into(), 0, 0);
        assert_eq!(player.accuracy(), 0.0);
        player.hits = 3;
        player.misses = 1;
        assert!((player.accuracy() - 0.75).abs() < f32::EPSILON);
    }
}
