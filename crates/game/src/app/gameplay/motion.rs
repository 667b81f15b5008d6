use engine::{Aabb, EntityId, InputAction, InputSnapshot, Vec3};

use super::types::{Direction, Facing};

/// Waypoints closer than this on an axis do not produce intent on that axis,
/// which keeps actors from jittering around a reached coordinate.
const STEER_DEADZONE: f32 = 0.05;

/// Per-axis movement intent. Screen up is -z, right is +x.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct MoveIntent {
    pub(crate) up: bool,
    pub(crate) down: bool,
    pub(crate) left: bool,
    pub(crate) right: bool,
}

impl MoveIntent {
    pub(crate) fn from_input(input: &InputSnapshot) -> Self {
        Self {
            up: input.is_down(InputAction::MoveUp),
            down: input.is_down(InputAction::MoveDown),
            left: input.is_down(InputAction::MoveLeft),
            right: input.is_down(InputAction::MoveRight),
        }
    }

    pub(crate) fn toward(from: Vec3, to: Vec3) -> Self {
        let dx = to.x - from.x;
        let dz = to.z - from.z;
        Self {
            up: dz < -STEER_DEADZONE,
            down: dz > STEER_DEADZONE,
            left: dx < -STEER_DEADZONE,
            right: dx > STEER_DEADZONE,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct BlockedAxes {
    pub(crate) up: bool,
    pub(crate) down: bool,
    pub(crate) left: bool,
    pub(crate) right: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Obstacle {
    /// `None` for static scenery.
    pub(crate) owner: Option<EntityId>,
    pub(crate) bounds: Aabb,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct MotionStep {
    pub(crate) displacement: Vec3,
    pub(crate) blocked: BlockedAxes,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct MotionState {
    pub(crate) velocity: Vec3,
    pub(crate) direction: Direction,
    pub(crate) blocked: BlockedAxes,
}

impl MotionState {
    pub(crate) fn apply(&mut self, step: MotionStep) {
        self.velocity = step.displacement;
        self.blocked = step.blocked;
        self.direction = simple_direction(step.displacement, self.direction.facing);
    }

    pub(crate) fn halt(&mut self) {
        self.velocity = Vec3::ZERO;
        self.direction.moving = false;
    }
}

/// Marks, for every obstacle overlapping `actor`, the axis with the smaller
/// ground penetration as blocked on the side facing the obstacle.
pub(crate) fn blocked_axes(
    actor: &Aabb,
    self_id: Option<EntityId>,
    obstacles: &[Obstacle],
    margin: f32,
) -> BlockedAxes {
    let padded = actor.expanded_by(margin);
    let actor_center = actor.center();
    let mut blocked = BlockedAxes::default();

    for obstacle in obstacles {
        if self_id.is_some() && obstacle.owner == self_id {
            continue;
        }
        if !padded.intersects(&obstacle.bounds) {
            continue;
        }
        let (penetration_x, penetration_z) = padded.ground_penetration(&obstacle.bounds);
        let toward = obstacle.bounds.center() - actor_center;
        if penetration_x < penetration_z {
            if toward.x > 0.0 {
                blocked.right = true;
            } else {
                blocked.left = true;
            }
        } else if toward.z > 0.0 {
            blocked.down = true;
        } else {
            blocked.up = true;
        }
    }

    blocked
}

/// Turns intent into a displacement of length `step_length` (or zero).
/// Opposing intents cancel before normalization.
pub(crate) fn resolve_motion(
    actor: &Aabb,
    self_id: Option<EntityId>,
    intent: MoveIntent,
    step_length: f32,
    obstacles: &[Obstacle],
    margin: f32,
) -> MotionStep {
    let blocked = blocked_axes(actor, self_id, obstacles, margin);

    let mut x = axis_value(intent.right, intent.left);
    let mut z = axis_value(intent.down, intent.up);
    if (x > 0.0 && blocked.right) || (x < 0.0 && blocked.left) {
        x = 0.0;
    }
    if (z > 0.0 && blocked.down) || (z < 0.0 && blocked.up) {
        z = 0.0;
    }

    let displacement = Vec3::new(x, 0.0, z).normalize_or_zero() * step_length.max(0.0);
    MotionStep {
        displacement,
        blocked,
    }
}

fn axis_value(positive: bool, negative: bool) -> f32 {
    match (positive, negative) {
        (true, false) => 1.0,
        (false, true) => -1.0,
        _ => 0.0,
    }
}

pub(crate) fn simple_direction(velocity: Vec3, previous: Facing) -> Direction {
    if velocity.x == 0.0 && velocity.z == 0.0 {
        return Direction {
            facing: previous,
            moving: false,
        };
    }
    let facing = if velocity.x.abs() > velocity.z.abs() {
        if velocity.x > 0.0 {
            Facing::Right
        } else {
            Facing::Left
        }
    } else if velocity.z > 0.0 {
        Facing::Down
    } else {
        Facing::Up
    };
    Direction {
        facing,
        moving: true,
    }
}
