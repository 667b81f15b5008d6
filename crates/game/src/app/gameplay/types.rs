use engine::{EntityId, Vec3};
use serde::Serialize;
use thiserror::Error;

use super::combat::CombatKind;
use super::status::DebuffKind;

/// Tick rate the per-tick speed values in content were tuned at. Speeds are
/// scaled by `fixed_dt * REFERENCE_TICKS_PER_SECOND` so other tick rates
/// cover the same ground per second.
pub(crate) const REFERENCE_TICKS_PER_SECOND: f32 = 60.0;

/// When a melee attack actually reaches other actors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MeleeHitTiming {
    /// Broadcast the moment the attack animation starts.
    AnimationStart,
    /// Broadcast when the given frame boundary (1-based) is crossed.
    ImpactFrame(u32),
}

#[derive(Debug, Clone)]
pub(crate) struct SimConfig {
    pub(crate) speak_distance: f32,
    pub(crate) run_speed_bonus: f32,
    pub(crate) melee_hit_timing: MeleeHitTiming,
    pub(crate) body_half_extents: Vec3,
    pub(crate) collision_margin: f32,
    pub(crate) default_zone: String,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            speak_distance: 2.0,
            run_speed_bonus: 0.1,
            melee_hit_timing: MeleeHitTiming::AnimationStart,
            body_half_extents: Vec3::new(0.4, 0.5, 0.4),
            collision_margin: 0.1,
            default_zone: "meadow".to_string(),
        }
    }
}

/// Session-wide flags and clock, passed to every tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct SimContext {
    pub(crate) paused: bool,
    pub(crate) lock_player: bool,
    pub(crate) loading: bool,
    pub(crate) elapsed_seconds: f32,
    pub(crate) tick: u64,
    active: bool,
}

impl SimContext {
    pub(crate) fn begin_session(&mut self) {
        *self = Self {
            active: true,
            ..Self::default()
        };
    }

    pub(crate) fn end_session(&mut self) {
        *self = Self::default();
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn advance(&mut self, fixed_dt_seconds: f32) {
        self.elapsed_seconds += fixed_dt_seconds;
        self.tick = self.tick.saturating_add(1);
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum BuildError {
    #[error("entity '{label}' has a combat resolver but no status engine")]
    CombatWithoutStatus { label: String },
    #[error("entity '{label}' has an orchestrator but is not navigation driven")]
    OrchestratorWithoutNavigation { label: String },
    #[error("entity '{label}' is input driven and cannot own a dialogue")]
    DialogueOnInputDrive { label: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Facing {
    Up,
    Down,
    Left,
    Right,
}

/// Discrete facing plus whether the actor moved this tick. Renders as the
/// animation key (`"left"`, `"idle-down"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Direction {
    pub(crate) facing: Facing,
    pub(crate) moving: bool,
}

impl Default for Direction {
    fn default() -> Self {
        Self {
            facing: Facing::Down,
            moving: false,
        }
    }
}

impl Direction {
    pub(crate) fn as_key(self) -> &'static str {
        match (self.moving, self.facing) {
            (true, Facing::Up) => "up",
            (true, Facing::Down) => "down",
            (true, Facing::Left) => "left",
            (true, Facing::Right) => "right",
            (false, Facing::Up) => "idle-up",
            (false, Facing::Down) => "idle-down",
            (false, Facing::Left) => "idle-left",
            (false, Facing::Right) => "idle-right",
        }
    }
}

/// What the animation driver is asked to play for one entity this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AnimationKey {
    Direction(Direction),
    Action(CombatKind),
}

impl AnimationKey {
    pub(crate) fn as_key(self) -> &'static str {
        match self {
            Self::Direction(direction) => direction.as_key(),
            Self::Action(kind) => kind.as_key(),
        }
    }
}

/// Presentation-only consumer of animation keys. Nothing flows back into the
/// simulation.
pub(crate) trait AnimationDriver {
    fn play(&mut self, entity_id: EntityId, key: AnimationKey, delta_seconds: f32);
    fn swap_sprite(&mut self, entity_id: EntityId, sprite: &str);
}

/// Read-only per-entity view handed to HUD and persistence layers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct EntitySnapshot {
    pub(crate) id: EntityId,
    pub(crate) label: String,
    pub(crate) position: Vec3,
    pub(crate) zone: String,
    pub(crate) sprite: Option<String>,
    pub(crate) direction: &'static str,
    pub(crate) health: u32,
    pub(crate) base_health: u32,
    pub(crate) blinded: bool,
    pub(crate) stunned: bool,
    pub(crate) weakened: bool,
    pub(crate) crippled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub(crate) enum GameplayEvent {
    Arrived {
        entity_id: EntityId,
        position: Vec3,
    },
    GaveUp {
        entity_id: EntityId,
    },
    PatrolTerminated {
        entity_id: EntityId,
    },
    DebuffStarted {
        entity_id: EntityId,
        debuff: DebuffKind,
    },
    DebuffEnded {
        entity_id: EntityId,
        debuff: DebuffKind,
    },
    DebuffIgnored {
        entity_id: EntityId,
        debuff: DebuffKind,
    },
    Damaged {
        entity_id: EntityId,
        amount: u32,
    },
    Died {
        entity_id: EntityId,
    },
    Revived {
        entity_id: EntityId,
    },
    StatsSwapped {
        entity_id: EntityId,
    },
    ActionStarted {
        entity_id: EntityId,
        kind: CombatKind,
    },
    ActionFinished {
        entity_id: EntityId,
        kind: CombatKind,
    },
    MeleeBroadcast {
        entity_id: EntityId,
    },
    DialogueOpened {
        entity_id: EntityId,
    },
    DialogueEnded {
        entity_id: EntityId,
    },
    DialogueExited {
        entity_id: EntityId,
    },
    DialogueClosed {
        entity_id: EntityId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GameplayEventKind {
    Navigation,
    Status,
    Combat,
    Dialogue,
}

impl GameplayEvent {
    pub(crate) fn kind(self) -> GameplayEventKind {
        match self {
            Self::Arrived { .. } | Self::GaveUp { .. } | Self::PatrolTerminated { .. } => {
                GameplayEventKind::Navigation
            }
            Self::DebuffStarted { .. }
            | Self::DebuffEnded { .. }
            | Self::DebuffIgnored { .. }
            | Self::Damaged { .. }
            | Self::Died { .. }
            | Self::Revived { .. }
            | Self::StatsSwapped { .. } => GameplayEventKind::Status,
            Self::ActionStarted { .. }
            | Self::ActionFinished { .. }
            | Self::MeleeBroadcast { .. } => GameplayEventKind::Combat,
            Self::DialogueOpened { .. }
            | Self::DialogueEnded { .. }
            | Self::DialogueExited { .. }
            | Self::DialogueClosed { .. } => GameplayEventKind::Dialogue,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct GameplayEventCounts {
    pub(crate) total: u32,
    pub(crate) navigation: u32,
    pub(crate) status: u32,
    pub(crate) combat: u32,
    pub(crate) dialogue: u32,
}

impl GameplayEventCounts {
    fn record(&mut self, kind: GameplayEventKind) {
        self.total = self.total.saturating_add(1);
        match kind {
            GameplayEventKind::Navigation => self.navigation = self.navigation.saturating_add(1),
            GameplayEventKind::Status => self.status = self.status.saturating_add(1),
            GameplayEventKind::Combat => self.combat = self.combat.saturating_add(1),
            GameplayEventKind::Dialogue => self.dialogue = self.dialogue.saturating_add(1),
        }
    }
}

/// Events emitted during the current tick, rolled into counts at tick end.
#[derive(Debug, Default)]
pub(crate) struct GameplayEventBus {
    current_tick_events: Vec<GameplayEvent>,
    last_tick_events: Vec<GameplayEvent>,
    last_tick_counts: GameplayEventCounts,
}

impl GameplayEventBus {
    pub(crate) fn emit(&mut self, event: GameplayEvent) {
        self.current_tick_events.push(event);
    }

    pub(crate) fn finish_tick_rollover(&mut self) {
        let mut counts = GameplayEventCounts::default();
        for event in &self.current_tick_events {
            counts.record(event.kind());
        }
        self.last_tick_counts = counts;
        self.last_tick_events = std::mem::take(&mut self.current_tick_events);
    }

    pub(crate) fn last_tick_counts(&self) -> GameplayEventCounts {
        self.last_tick_counts
    }

    pub(crate) fn last_tick_events(&self) -> &[GameplayEvent] {
        &self.last_tick_events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_keys_keep_facing_when_idle() {
        let moving = Direction {
            facing: Facing::Left,
            moving: true,
        };
        assert_eq!(moving.as_key(), "left");
        let idle = Direction {
            moving: false,
            ..moving
        };
        assert_eq!(idle.as_key(), "idle-left");
        assert_eq!(Direction::default().as_key(), "idle-down");
    }

    #[test]
    fn rollover_counts_events_by_kind() {
        let mut bus = GameplayEventBus::default();
        let entity_id = EntityId(3);
        bus.emit(GameplayEvent::Damaged {
            entity_id,
            amount: 1,
        });
        bus.emit(GameplayEvent::Died { entity_id });
        bus.emit(GameplayEvent::GaveUp { entity_id });
        bus.finish_tick_rollover();

        let counts = bus.last_tick_counts();
        assert_eq!(counts.total, 3);
        assert_eq!(counts.status, 2);
        assert_eq!(counts.navigation, 1);
        assert_eq!(bus.last_tick_events().len(), 3);

        bus.finish_tick_rollover();
        assert_eq!(bus.last_tick_counts(), GameplayEventCounts::default());
    }

    #[test]
    fn session_flags_reset_on_begin_and_end() {
        let mut context = SimContext::default();
        context.begin_session();
        context.paused = true;
        context.advance(0.5);
        assert!(context.is_active());
        assert_eq!(context.tick, 1);

        context.end_session();
        assert!(!context.is_active());
        assert!(!context.paused);

        context.begin_session();
        assert_eq!(context.tick, 0);
        assert!(context.elapsed_seconds.abs() < f32::EPSILON);
    }
}
