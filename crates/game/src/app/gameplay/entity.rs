use engine::{
    Aabb, ActorArchetype, ArchetypeStats, EntityId, Faction, RouteStop, Transform, Vec3,
};

use super::bus::MessageKind;
use super::combat::CombatResolver;
use super::dialogue::DialogueEngine;
use super::motion::MotionState;
use super::nav::NavigationPlanner;
use super::orchestrator::{Orchestrator, PatrolCursor};
use super::status::{DebuffKind, StatusEngine};
use super::types::{BuildError, EntitySnapshot, MeleeHitTiming};

#[derive(Debug, Clone)]
pub(crate) enum Drive {
    /// Steered by player input.
    Input,
    Navigation(NavigationPlanner),
}

#[derive(Debug, Clone)]
pub(crate) struct Controller {
    pub(crate) drive: Drive,
    pub(crate) motion: MotionState,
    base_speed: f32,
    locked: bool,
}

impl Controller {
    pub(crate) fn is_input_driven(&self) -> bool {
        matches!(self.drive, Drive::Input)
    }

    #[cfg(test)]
    pub(crate) fn planner(&self) -> Option<&NavigationPlanner> {
        match &self.drive {
            Drive::Navigation(planner) => Some(planner),
            Drive::Input => None,
        }
    }

    pub(crate) fn planner_mut(&mut self) -> Option<&mut NavigationPlanner> {
        match &mut self.drive {
            Drive::Navigation(planner) => Some(planner),
            Drive::Input => None,
        }
    }

    pub(crate) fn is_locked(&self) -> bool {
        self.locked
    }

    pub(crate) fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
        if locked {
            self.motion.halt();
        }
    }
}

pub(crate) struct Entity {
    pub(crate) id: EntityId,
    pub(crate) label: String,
    pub(crate) faction: Faction,
    pub(crate) zone: String,
    pub(crate) transform: Transform,
    pub(crate) controller: Controller,
    pub(crate) orchestrator: Option<Orchestrator>,
    pub(crate) status: Option<StatusEngine>,
    pub(crate) combat: Option<CombatResolver>,
    pub(crate) dialogue: Option<DialogueEngine>,
    pub(crate) sprite: Option<String>,
    /// Set when a patrol reaches its terminate marker; removed at tick end.
    pub(crate) terminated: bool,
}

impl Entity {
    pub(crate) fn position(&self) -> Vec3 {
        self.transform.position
    }

    pub(crate) fn speed(&self) -> f32 {
        self.status
            .as_ref()
            .map_or(self.controller.base_speed, StatusEngine::speed)
    }

    pub(crate) fn is_unconscious(&self) -> bool {
        self.status.as_ref().is_some_and(StatusEngine::is_unconscious)
    }

    pub(crate) fn bounds(&self, half_extents: Vec3) -> Aabb {
        Aabb::from_center_half_extents(self.transform.position, half_extents)
    }

    /// Message kinds this entity's modules listen to.
    pub(crate) fn subscriptions(&self) -> Vec<MessageKind> {
        let mut kinds = Vec::new();
        if self.combat.is_some() {
            kinds.push(MessageKind::MeleeDamage);
        }
        if self.orchestrator.is_some() {
            kinds.push(MessageKind::ReachDestination);
        }
        if self.controller.is_input_driven() {
            kinds.push(MessageKind::DialogueOpened);
            kinds.push(MessageKind::DialogueClosed);
        }
        kinds
    }

    pub(crate) fn snapshot(&self) -> EntitySnapshot {
        let (health, base_health) = self
            .status
            .as_ref()
            .map_or((0, 0), |status| (status.health(), status.base_health()));
        let debuff = |kind| {
            self.status
                .as_ref()
                .is_some_and(|status| status.is_active(kind))
        };
        EntitySnapshot {
            id: self.id,
            label: self.label.clone(),
            position: self.transform.position,
            zone: self.zone.clone(),
            sprite: self.sprite.clone(),
            direction: self.controller.motion.direction.as_key(),
            health,
            base_health,
            blinded: debuff(DebuffKind::Blind),
            stunned: debuff(DebuffKind::Stun),
            weakened: debuff(DebuffKind::Weaken),
            crippled: debuff(DebuffKind::Cripple),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriveKind {
    Input,
    Navigation,
}

/// Collects an entity's optional modules and checks their pairing once, at
/// construction.
pub(crate) struct EntityBuilder {
    label: String,
    faction: Faction,
    zone: String,
    position: Vec3,
    drive: DriveKind,
    speed: f32,
    reach: f32,
    farsight: f32,
    stats: Option<ArchetypeStats>,
    orchestrator: Option<Orchestrator>,
    combat: Option<MeleeHitTiming>,
    dialogue: Option<DialogueEngine>,
    sprite: Option<String>,
}

impl EntityBuilder {
    pub(crate) fn player(label: impl Into<String>) -> Self {
        Self::new(label, DriveKind::Input, Faction::Player)
    }

    pub(crate) fn npc(label: impl Into<String>) -> Self {
        Self::new(label, DriveKind::Navigation, Faction::Friendly)
    }

    fn new(label: impl Into<String>, drive: DriveKind, faction: Faction) -> Self {
        let defaults = ArchetypeStats::default();
        Self {
            label: label.into(),
            faction,
            zone: String::new(),
            position: Vec3::ZERO,
            drive,
            speed: defaults.speed,
            reach: defaults.reach,
            farsight: defaults.farsight,
            stats: None,
            orchestrator: None,
            combat: None,
            dialogue: None,
            sprite: None,
        }
    }

    /// NPC with status, combat and a behavior orchestrator taken from an
    /// archetype. Enemies pursue the player; the dialogue is attached by the
    /// caller once its loader is started.
    pub(crate) fn from_archetype(archetype: &ActorArchetype, hit_timing: MeleeHitTiming) -> Self {
        let route = archetype
            .patrol_route
            .iter()
            .map(|stop| match stop {
                RouteStop::Point(point) => Some(*point),
                RouteStop::Terminate => None,
            })
            .collect::<Vec<_>>();
        let patrol = (!route.is_empty()).then(|| PatrolCursor::new(route));
        let pursue = (archetype.faction == Faction::Enemy).then_some(Faction::Player);

        Self::npc(archetype.label.clone())
            .with_faction(archetype.faction)
            .with_status(archetype.stats)
            .with_combat(hit_timing)
            .with_orchestrator(Orchestrator::new(patrol, pursue))
    }

    pub(crate) fn with_faction(mut self, faction: Faction) -> Self {
        self.faction = faction;
        self
    }

    #[cfg(test)]
    pub(crate) fn in_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = zone.into();
        self
    }

    pub(crate) fn with_default_zone(mut self, zone: &str) -> Self {
        if self.zone.is_empty() {
            self.zone = zone.to_string();
        }
        self
    }

    pub(crate) fn at(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub(crate) fn with_status(mut self, stats: ArchetypeStats) -> Self {
        self.speed = stats.speed;
        self.reach = stats.reach;
        self.farsight = stats.farsight;
        self.stats = Some(stats);
        self
    }

    pub(crate) fn with_combat(mut self, hit_timing: MeleeHitTiming) -> Self {
        self.combat = Some(hit_timing);
        self
    }

    pub(crate) fn with_orchestrator(mut self, orchestrator: Orchestrator) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    pub(crate) fn with_dialogue(mut self, dialogue: DialogueEngine) -> Self {
        self.dialogue = Some(dialogue);
        self
    }

    pub(crate) fn with_sprite(mut self, sprite: impl Into<String>) -> Self {
        self.sprite = Some(sprite.into());
        self
    }

    pub(crate) fn build(self, id: EntityId) -> Result<Entity, BuildError> {
        if self.combat.is_some() && self.stats.is_none() {
            return Err(BuildError::CombatWithoutStatus { label: self.label });
        }
        if self.drive == DriveKind::Input {
            if self.orchestrator.is_some() {
                return Err(BuildError::OrchestratorWithoutNavigation { label: self.label });
            }
            if self.dialogue.is_some() {
                return Err(BuildError::DialogueOnInputDrive { label: self.label });
            }
        }

        let drive = match self.drive {
            DriveKind::Input => Drive::Input,
            DriveKind::Navigation => Drive::Navigation(NavigationPlanner::new(
                self.zone.clone(),
                self.position,
                self.reach,
                self.farsight,
            )),
        };

        Ok(Entity {
            id,
            label: self.label,
            faction: self.faction,
            zone: self.zone,
            transform: Transform {
                position: self.position,
            },
            controller: Controller {
                drive,
                motion: MotionState::default(),
                base_speed: self.speed,
                locked: false,
            },
            orchestrator: self.orchestrator,
            status: self.stats.as_ref().map(StatusEngine::from_stats),
            combat: self.combat.map(CombatResolver::new),
            dialogue: self.dialogue,
            sprite: self.sprite,
            terminated: false,
        })
    }
}
