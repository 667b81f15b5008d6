use engine::{EntityId, Faction, Vec3};

use super::nav::ground_distance;

pub(crate) const TICK_INTERVAL_SECONDS: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum PatrolStep {
    MoveTo(Vec3),
    /// The walker leaves the world instead of moving on.
    Terminate,
}

/// Cyclic route walker. `None` entries are terminate markers.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PatrolCursor {
    route: Vec<Option<Vec3>>,
    cursor: usize,
    current: Option<PatrolStep>,
}

impl PatrolCursor {
    pub(crate) fn new(route: Vec<Option<Vec3>>) -> Self {
        Self::starting_at(route, 0)
    }

    pub(crate) fn starting_at(route: Vec<Option<Vec3>>, index: usize) -> Self {
        let cursor = if route.is_empty() {
            0
        } else {
            index % route.len()
        };
        Self {
            route,
            cursor,
            current: None,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.route.is_empty()
    }

    pub(crate) fn advance(&mut self) -> Option<PatrolStep> {
        let entry = *self.route.get(self.cursor)?;
        self.cursor = (self.cursor + 1) % self.route.len();
        let step = match entry {
            Some(point) => PatrolStep::MoveTo(point),
            None => PatrolStep::Terminate,
        };
        self.current = Some(step);
        Some(step)
    }

    /// Last step handed out by [`advance`](Self::advance).
    pub(crate) fn current(&self) -> Option<PatrolStep> {
        self.current
    }
}

/// Fixed-interval gate for throttled actions. A false predicate leaves the
/// gate primed so it is re-checked on the next tick. Only the time since the
/// last fire is kept, so precision does not decay over long sessions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TickGate {
    interval: f32,
    since_fire: f32,
}

impl Default for TickGate {
    fn default() -> Self {
        Self::new(TICK_INTERVAL_SECONDS)
    }
}

impl TickGate {
    pub(crate) fn new(interval: f32) -> Self {
        Self {
            interval,
            since_fire: 0.0,
        }
    }

    pub(crate) fn tick(&mut self, delta_seconds: f32, predicate: impl FnOnce() -> bool) -> bool {
        if self.since_fire < self.interval {
            self.since_fire += delta_seconds;
        }
        if self.since_fire < self.interval || !predicate() {
            return false;
        }
        self.since_fire = 0.0;
        true
    }

    #[cfg(test)]
    pub(crate) fn since_fire(&self) -> f32 {
        self.since_fire
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TargetCandidate {
    pub(crate) id: EntityId,
    pub(crate) position: Vec3,
    pub(crate) faction: Faction,
    pub(crate) unconscious: bool,
}

/// Closest conscious candidate of `faction` within `range`; ties go to the
/// lower entity id.
pub(crate) fn nearest_target(
    self_id: EntityId,
    position: Vec3,
    faction: Faction,
    range: f32,
    candidates: &[TargetCandidate],
) -> Option<TargetCandidate> {
    candidates
        .iter()
        .filter(|candidate| {
            candidate.id != self_id && candidate.faction == faction && !candidate.unconscious
        })
        .map(|candidate| (ground_distance(position, candidate.position), *candidate))
        .filter(|(distance, _)| *distance <= range)
        .min_by(|(a_distance, a), (b_distance, b)| {
            a_distance
                .total_cmp(b_distance)
                .then_with(|| a.id.cmp(&b.id))
        })
        .map(|(_, candidate)| candidate)
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct Decision {
    pub(crate) nav_target: Option<Vec3>,
    pub(crate) attack: bool,
    pub(crate) terminate: bool,
}

impl Decision {
    fn from_step(step: Option<PatrolStep>) -> Self {
        match step {
            Some(PatrolStep::MoveTo(point)) => Self {
                nav_target: Some(point),
                ..Self::default()
            },
            Some(PatrolStep::Terminate) => Self {
                terminate: true,
                ..Self::default()
            },
            None => Self::default(),
        }
    }
}

pub(crate) struct OrchestratorInput<'a> {
    pub(crate) self_id: EntityId,
    pub(crate) position: Vec3,
    pub(crate) reach: f32,
    pub(crate) farsight: f32,
    pub(crate) delta_seconds: f32,
    pub(crate) candidates: &'a [TargetCandidate],
}

#[derive(Debug, Clone)]
pub(crate) struct Orchestrator {
    patrol: Option<PatrolCursor>,
    gate: TickGate,
    pursue: Option<Faction>,
    pursuing: Option<EntityId>,
}

impl Orchestrator {
    pub(crate) fn new(patrol: Option<PatrolCursor>, pursue: Option<Faction>) -> Self {
        Self {
            patrol: patrol.filter(|cursor| !cursor.is_empty()),
            gate: TickGate::default(),
            pursue,
            pursuing: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn pursuing(&self) -> Option<EntityId> {
        self.pursuing
    }

    /// First patrol leg.
    pub(crate) fn start(&mut self) -> Decision {
        Decision::from_step(self.patrol.as_mut().and_then(PatrolCursor::advance))
    }

    /// Called when the controller reports arrival.
    pub(crate) fn on_arrival(&mut self) -> Decision {
        if self.pursuing.is_some() {
            return Decision::default();
        }
        Decision::from_step(self.patrol.as_mut().and_then(PatrolCursor::advance))
    }

    /// Re-issues the current patrol leg without advancing.
    pub(crate) fn resume(&self) -> Decision {
        Decision::from_step(self.patrol.as_ref().and_then(PatrolCursor::current))
    }

    pub(crate) fn update(&mut self, input: &OrchestratorInput<'_>) -> Decision {
        let target = self.pursue.and_then(|faction| {
            nearest_target(
                input.self_id,
                input.position,
                faction,
                input.farsight,
                input.candidates,
            )
        });

        let Some(target) = target else {
            self.gate.tick(input.delta_seconds, || false);
            if self.pursuing.take().is_some() {
                return self.resume();
            }
            return Decision::default();
        };

        self.pursuing = Some(target.id);
        let distance = ground_distance(input.position, target.position);
        let attack = self
            .gate
            .tick(input.delta_seconds, || distance <= input.reach);
        Decision {
            nav_target: (distance > input.reach).then_some(target.position),
            attack,
            terminate: false,
        }
    }
}
