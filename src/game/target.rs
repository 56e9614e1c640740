//! Targets and the spawn scheduler

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::mode::ModeDescriptor;
use super::Canvas;

/// How long a target stays live
pub const TARGET_LIFETIME_MS: u64 = 5_000;
/// Final stretch of life over which alpha fades to 0
pub const FADE_OUT_MS: u64 = 1_000;
/// Minimum clearance between a target's edge and the canvas edge
pub const SPAWN_MARGIN: f32 = 50.0;

/// Target size/value class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetTier {
    /// Rare, tiny, valuable
    Small,
    Medium,
    /// Common, big, cheap
    Large,
}

/// Tier tuning
#[derive(Debug, Clone, Copy)]
pub struct TierStats {
    pub radius: f32,
    pub points: u32,
    /// Relative spawn weight
    pub weight: f32,
}

impl TargetTier {
    pub const ALL: [TargetTier; 3] = [TargetTier::Small, TargetTier::Medium, TargetTier::Large];

    pub fn stats(self) -> TierStats {
        match self {
            TargetTier::Small => TierStats {
                radius: 25.0,
                points: 500,
                weight: 0.15,
            },
            TargetTier::Medium => TierStats {
                radius: 40.0,
                points: 200,
                weight: 0.35,
            },
            TargetTier::Large => TierStats {
                radius: 60.0,
                points: 100,
                weight: 0.5,
            },
        }
    }

    /// Weighted draw across all tiers
    pub fn roll<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let total: f32 = Self::ALL.iter().map(|t| t.stats().weight).sum();
        let mut pick = rng.gen_range(0.0..total);
        for tier in Self::ALL {
            let weight = tier.stats().weight;
            if pick < weight {
                return tier;
            }
            pick -= weight;
        }
        TargetTier::Large
    }
}

/// A live target
#[derive(Debug, Clone)]
pub struct Target {
    pub id: u64,
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    pub tier: TargetTier,
    pub points: u32,
    pub spawned_at: u64,
}

impl Target {
    pub fn new(id: u64, x: f32, y: f32, tier: TargetTier, spawned_at: u64) -> Self {
        let stats = tier.stats();
        Self {
            id,
            x,
            y,
            radius: stats.radius,
            tier,
            points: stats.points,
            spawned_at,
        }
    }

    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.spawned_at)
    }

    pub fn is_expired(&self, now: u64, lifetime_ms: u64) -> bool {
        self.age(now) >= lifetime_ms
    }

    /// 1.0 until the fade window, then linear down to 0.0 at expiry
    pub fn alpha(&self, now: u64, lifetime_ms: u64) -> f32 {
        let remaining = lifetime_ms.saturating_sub(self.age(now));
        (remaining as f32 / FADE_OUT_MS as f32).clamp(0.0, 1.0)
    }

    /// Whether `(x, y)` lies within `radius` of the center
    pub fn contains(&self, x: f32, y: f32, radius: f32) -> bool {
        let dx = self.x - x;
        let dy = self.y - y;
        dx * dx + dy * dy <= radius * radius
    }
}

/// Owns the live target list and decides when and where to spawn
#[derive(Debug)]
pub struct TargetScheduler {
    targets: Vec<Target>,
    next_id: u64,
    last_spawn_at: Option<u64>,
    total_spawned: u64,
    lifetime_ms: u64,
}

impl TargetScheduler {
    pub fn new(lifetime_ms: u64) -> Self {
        Self {
            targets: Vec::new(),
            next_id: 1,
            last_spawn_at: None,
            total_spawned: 0,
            lifetime_ms,
        }
    }

    /// Spawn at most one target if below the ceiling and the cadence allows.
    /// Returns the new target.
    pub fn spawn_tick<R: Rng + ?Sized>(
        &mut self,
        now: u64,
        active_players: usize,
        mode: &ModeDescriptor,
        canvas: Canvas,
        rng: &mut R,
    ) -> Option<&Target> {
        if self.targets.len() >= mode.max_targets(active_players) {
            return None;
        }

        let interval = mode.spawn_interval_ms(active_players);
        if let Some(last) = self.last_spawn_at {
            if now.saturating_sub(last) < interval {
                return None;
            }
        }

        let tier = TargetTier::roll(rng);
        let radius = tier.stats().radius;
        let x = spawn_coordinate(rng, canvas.width, radius);
        let y = spawn_coordinate(rng, canvas.height, radius);

        let target = Target::new(self.next_id, x, y, tier, now);
        self.next_id += 1;
        self.total_spawned += 1;
        self.last_spawn_at = Some(now);
        self.targets.push(target);
        self.targets.last()
    }

    /// Remove every target that reached its lifetime, returning them
    pub fn sweep_expired(&mut self, now: u64) -> Vec<Target> {
        let lifetime = self.lifetime_ms;
        let (expired, live): (Vec<Target>, Vec<Target>) = self
            .targets
            .drain(..)
            .partition(|t| t.is_expired(now, lifetime));
        self.targets = live;
        expired
    }

    /// Remove a target by id (hit claim)
    pub fn take(&mut self, id: u64) -> Option<Target> {
        let idx = self.targets.iter().position(|t| t.id == id)?;
        Some(self.targets.remove(idx))
    }

    /// Live targets in spawn order
    pub fn live(&self) -> &[Target] {
        &self.targets
    }

    pub fn lifetime_ms(&self) -> u64 {
        self.lifetime_ms
    }

    pub fn total_spawned(&self) -> u64 {
        self.total_spawned
    }

    /// Push every timestamp forward, used to freeze lifetimes across a pause
    pub fn shift_time(&mut self, offset_ms: u64) {
        for target in &mut self.targets {
            target.spawned_at += offset_ms;
        }
        if let Some(last) = self.last_spawn_at.as_mut() {
            *last += offset_ms;
        }
    }

    pub fn clear(&mut self) {
        self.targets.clear();
        self.last_spawn_at = None;
        self.total_spawned = 0;
    }
}

impl Default for TargetScheduler {
    fn default() -> Self {
        Self::new(TARGET_LIFETIME_MS)
    }
}

/// Uniform coordinate keeping `radius + SPAWN_MARGIN` clear of both edges
fn spawn_coordinate<R: Rng + ?Sized>(rng: &mut R, extent: f32, radius: f32) -> f32 {
    let lo = radius + SPAWN_MARGIN;
    let hi = extent - radius - SPAWN_MARGIN;
    if lo >= hi {
        extent / 2.0
    } else {
        rng.gen_range(lo..=hi)
    }
}
