use std::collections::HashMap;

use engine::{Aabb, EntityId, EntityIdAllocator, InputAction, InputSnapshot};
use tracing::{debug, info, trace, warn};

use super::bus::{Message, MessageBus};
use super::combat::{CombatEvent, MeleeDamage, Receiver};
use super::dialogue::{DialogueEngine, DialogueEvent, DialoguePresenter};
use super::entity::{Entity, EntityBuilder};
use super::forms::{stat_swap_for, BodyFormTable};
use super::motion::{resolve_motion, MoveIntent, Obstacle};
use super::nav::{ground_distance, NavEvent, PathfindingService};
use super::orchestrator::{Decision, OrchestratorInput, TargetCandidate};
use super::status::{DebuffKind, StatusEvent};
use super::types::{
    AnimationDriver, AnimationKey, BuildError, EntitySnapshot, GameplayEvent, GameplayEventBus,
    GameplayEventCounts, SimConfig, SimContext, REFERENCE_TICKS_PER_SECOND,
};

/// Broadcast handling can publish follow-up messages; this bounds the
/// rounds dispatched after a single entity update.
const MAX_DISPATCH_ROUNDS: u32 = 4;

/// Presentation collaborators borrowed for one tick.
pub(crate) struct Presenters<'a> {
    pub(crate) dialogue: &'a mut dyn DialoguePresenter,
    pub(crate) animation: &'a mut dyn AnimationDriver,
}

#[derive(Debug, Clone)]
struct ZonedCandidate {
    zone: String,
    candidate: TargetCandidate,
}

pub(crate) struct Simulation {
    config: SimConfig,
    context: SimContext,
    ids: EntityIdAllocator,
    entities: Vec<Entity>,
    scenery: Vec<(String, Aabb)>,
    pathfinder: Box<dyn PathfindingService>,
    forms: BodyFormTable,
    bus: MessageBus,
    events: GameplayEventBus,
}

impl Simulation {
    pub(crate) fn new(
        config: SimConfig,
        pathfinder: Box<dyn PathfindingService>,
        forms: BodyFormTable,
    ) -> Self {
        Self {
            config,
            context: SimContext::default(),
            ids: EntityIdAllocator::default(),
            entities: Vec::new(),
            scenery: Vec::new(),
            pathfinder,
            forms,
            bus: MessageBus::default(),
            events: GameplayEventBus::default(),
        }
    }

    pub(crate) fn config(&self) -> &SimConfig {
        &self.config
    }

    pub(crate) fn context(&self) -> &SimContext {
        &self.context
    }

    pub(crate) fn set_paused(&mut self, paused: bool) {
        self.context.paused = paused;
    }

    pub(crate) fn set_loading(&mut self, loading: bool) {
        self.context.loading = loading;
    }

    pub(crate) fn begin_session(&mut self) {
        self.context.begin_session();
        info!(entities = self.entities.len(), "session_started");
    }

    pub(crate) fn end_session(&mut self) {
        for entity in self.entities.drain(..) {
            self.bus.unsubscribe_all(entity.id);
        }
        self.scenery.clear();
        self.context.end_session();
        info!("session_ended");
    }

    pub(crate) fn add_scenery(&mut self, zone: impl Into<String>, bounds: Aabb) {
        self.scenery.push((zone.into(), bounds));
    }

    pub(crate) fn spawn(&mut self, builder: EntityBuilder) -> Result<EntityId, BuildError> {
        let id = self.ids.allocate();
        let mut entity = builder
            .with_default_zone(&self.config.default_zone)
            .build(id)?;

        for kind in entity.subscriptions() {
            self.bus.subscribe(kind, id);
        }
        if let Some(orchestrator) = entity.orchestrator.as_mut() {
            let decision = orchestrator.start();
            apply_decision(&mut entity, decision, &mut self.events);
        }

        info!(
            entity = %id,
            label = %entity.label,
            zone = %entity.zone,
            faction = entity.faction.as_token(),
            "entity_spawned"
        );
        self.entities.push(entity);
        Ok(id)
    }

    pub(crate) fn despawn(&mut self, id: EntityId) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };
        let entity = self.entities.remove(index);
        self.bus.unsubscribe_all(id);
        if entity.controller.is_input_driven() {
            self.context.lock_player = false;
        }
        info!(entity = %id, label = %entity.label, "entity_removed");
        true
    }

    pub(crate) fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.iter().find(|entity| entity.id == id)
    }

    pub(crate) fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// True while any dialogue graph is still being read in the background.
    pub(crate) fn dialogues_pending(&self) -> bool {
        self.entities.iter().any(|entity| {
            entity
                .dialogue
                .as_ref()
                .is_some_and(DialogueEngine::is_loading)
        })
    }

    pub(crate) fn player_id(&self) -> Option<EntityId> {
        self.entities
            .iter()
            .find(|entity| entity.controller.is_input_driven())
            .map(|entity| entity.id)
    }

    fn index_of(&self, id: EntityId) -> Option<usize> {
        self.entities.iter().position(|entity| entity.id == id)
    }

    pub(crate) fn apply_debuff(&mut self, id: EntityId, kind: DebuffKind, seconds: f32) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };
        let applied = self.entities[index]
            .status
            .as_mut()
            .is_some_and(|status| status.apply_debuff(kind, seconds));
        self.flush_module_events(index);
        applied
    }

    pub(crate) fn heal(&mut self, id: EntityId, amount: u32) {
        let Some(index) = self.index_of(id) else {
            return;
        };
        if let Some(status) = self.entities[index].status.as_mut() {
            status.heal(amount);
        }
        self.flush_module_events(index);
    }

    pub(crate) fn snapshots(&self) -> Vec<EntitySnapshot> {
        self.entities.iter().map(Entity::snapshot).collect()
    }

    pub(crate) fn snapshot_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.snapshots())
    }

    pub(crate) fn last_tick_events(&self) -> &[GameplayEvent] {
        self.events.last_tick_events()
    }

    pub(crate) fn last_tick_counts(&self) -> GameplayEventCounts {
        self.events.last_tick_counts()
    }

    /// One fixed step. Entities update in spawn order; each runs its
    /// controller, then status and animation, then combat, and the messages
    /// it published are dispatched before the next entity runs. Messages from
    /// loader polling and from player actions are dispatched before anything
    /// moves.
    pub(crate) fn tick(
        &mut self,
        fixed_dt_seconds: f32,
        input: &InputSnapshot,
        presenters: &mut Presenters<'_>,
    ) {
        if !self.context.is_active() {
            return;
        }
        if self.context.paused {
            self.events.finish_tick_rollover();
            return;
        }
        self.context.advance(fixed_dt_seconds);

        self.poll_dialogue_loaders(presenters);
        self.dispatch_messages();

        let obstacles = self.obstacle_snapshot();
        let candidates = self.candidate_snapshot();
        for index in 0..self.entities.len() {
            let intent = if self.entities[index].controller.is_input_driven() {
                self.handle_player_actions(index, input, presenters);
                // A dialogue opened just now must lock the player before it moves.
                self.dispatch_messages();
                self.player_intent(index, input)
            } else {
                let zone = self.entities[index].zone.clone();
                let local = candidates
                    .iter()
                    .filter(|entry| entry.zone == zone)
                    .map(|entry| entry.candidate)
                    .collect::<Vec<_>>();
                self.npc_intent(index, fixed_dt_seconds, &local)
            };
            self.integrate_motion(index, fixed_dt_seconds, intent, input, &obstacles);
            self.update_status(index, fixed_dt_seconds, presenters);
            self.update_combat(index, fixed_dt_seconds);
            self.dispatch_messages();
        }

        self.remove_terminated();
        self.events.finish_tick_rollover();
    }

    fn poll_dialogue_loaders(&mut self, presenters: &mut Presenters<'_>) {
        let player_position = self
            .player_id()
            .and_then(|id| self.entity(id))
            .map(Entity::position);
        let speak_distance = self.config.speak_distance;
        for index in 0..self.entities.len() {
            let entity = &mut self.entities[index];
            let owner = entity.id;
            let owner_position = entity.position();
            let Some(dialogue) = entity.dialogue.as_mut() else {
                continue;
            };
            dialogue.poll_loader(
                owner,
                owner_position,
                player_position,
                speak_distance,
                presenters.dialogue,
            );
            self.flush_dialogue_events(index);
        }
    }

    fn obstacle_snapshot(&self) -> HashMap<String, Vec<Obstacle>> {
        let mut snapshot: HashMap<String, Vec<Obstacle>> = HashMap::new();
        for (zone, bounds) in &self.scenery {
            snapshot.entry(zone.clone()).or_default().push(Obstacle {
                owner: None,
                bounds: *bounds,
            });
        }
        for entity in &self.entities {
            snapshot.entry(entity.zone.clone()).or_default().push(Obstacle {
                owner: Some(entity.id),
                bounds: entity.bounds(self.config.body_half_extents),
            });
        }
        snapshot
    }

    fn candidate_snapshot(&self) -> Vec<ZonedCandidate> {
        self.entities
            .iter()
            .map(|entity| ZonedCandidate {
                zone: entity.zone.clone(),
                candidate: TargetCandidate {
                    id: entity.id,
                    position: entity.position(),
                    faction: entity.faction,
                    unconscious: entity.is_unconscious(),
                },
            })
            .collect()
    }

    fn handle_player_actions(
        &mut self,
        index: usize,
        input: &InputSnapshot,
        presenters: &mut Presenters<'_>,
    ) {
        if self.entities[index].is_unconscious() {
            return;
        }

        let open_dialogue = self.entities.iter().position(|entity| {
            entity
                .dialogue
                .as_ref()
                .is_some_and(DialogueEngine::is_open)
        });
        if let Some(speaker_index) = open_dialogue {
            let speaker = &mut self.entities[speaker_index];
            let speaker_id = speaker.id;
            if let Some(dialogue) = speaker.dialogue.as_mut() {
                dialogue.handle_input(speaker_id, input, presenters.dialogue);
            }
            self.flush_dialogue_events(speaker_index);
            return;
        }

        if input.confirm_pressed() {
            self.try_open_dialogue(index, presenters);
        }
        if let Some(key) = input.body_form_key() {
            self.swap_body_form(index, key, presenters);
        }

        let entity = &mut self.entities[index];
        if let (Some(combat), Some(status)) = (entity.combat.as_mut(), entity.status.as_ref()) {
            if input.attack_pressed() {
                combat.attack(status);
            } else if input.defend_pressed() {
                combat.defend(status);
            }
        }
    }

    fn try_open_dialogue(&mut self, player_index: usize, presenters: &mut Presenters<'_>) {
        let player = &self.entities[player_index];
        let player_position = player.position();
        let zone = player.zone.clone();

        let nearest = self
            .entities
            .iter()
            .enumerate()
            .filter(|(_, entity)| {
                entity.dialogue.is_some() && entity.zone == zone && !entity.is_unconscious()
            })
            .map(|(index, entity)| (index, ground_distance(entity.position(), player_position)))
            .min_by(|(_, a), (_, b)| a.total_cmp(b));
        let Some((speaker_index, _)) = nearest else {
            debug!(zone = %zone, "dialogue_no_speaker");
            return;
        };

        let speak_distance = self.config.speak_distance;
        let speaker = &mut self.entities[speaker_index];
        let speaker_id = speaker.id;
        let speaker_position = speaker.position();
        let Some(dialogue) = speaker.dialogue.as_mut() else {
            return;
        };
        let outcome = dialogue.request_open(
            speaker_id,
            speaker_position,
            player_position,
            speak_distance,
            presenters.dialogue,
        );
        debug!(speaker = %speaker_id, outcome = ?outcome, "dialogue_open_requested");
        self.flush_dialogue_events(speaker_index);
    }

    fn swap_body_form(&mut self, index: usize, key: u8, presenters: &mut Presenters<'_>) {
        let Some(form) = self.forms.by_key(key) else {
            debug!(key, "body_form_unknown");
            return;
        };
        let swap = stat_swap_for(form);
        let sprite = form.sprite.clone();
        let def_name = form.def_name.clone();

        let entity = &mut self.entities[index];
        let Some(status) = entity.status.as_mut() else {
            warn!(entity = %entity.id, "body_form_without_status");
            return;
        };
        status.swap_stats(swap);
        presenters.animation.swap_sprite(entity.id, &sprite);
        info!(entity = %entity.id, form = %def_name, sprite = %sprite, "body_form_swapped");
        entity.sprite = Some(sprite);
        self.flush_module_events(index);
    }

    fn player_intent(&self, index: usize, input: &InputSnapshot) -> Option<MoveIntent> {
        let entity = &self.entities[index];
        let suppressed = self.context.loading
            || self.context.lock_player
            || entity.controller.is_locked()
            || entity.is_unconscious();
        (!suppressed).then(|| MoveIntent::from_input(input))
    }

    fn npc_intent(
        &mut self,
        index: usize,
        delta_seconds: f32,
        candidates: &[TargetCandidate],
    ) -> Option<MoveIntent> {
        let loading = self.context.loading;
        let Self {
            entities,
            pathfinder,
            bus,
            events,
            ..
        } = self;
        let entity = &mut entities[index];
        if loading || entity.terminated || entity.is_unconscious() || entity.controller.is_locked()
        {
            return None;
        }

        let position = entity.position();
        let thresholds = entity
            .status
            .as_ref()
            .map(|status| (status.reach(), status.farsight()));

        if let Some(orchestrator) = entity.orchestrator.as_mut() {
            let (reach, farsight) = thresholds.unwrap_or((0.0, 0.0));
            let decision = orchestrator.update(&OrchestratorInput {
                self_id: entity.id,
                position,
                reach,
                farsight,
                delta_seconds,
                candidates,
            });
            apply_decision(entity, decision, events);
            if entity.terminated {
                return None;
            }
        }

        let planner = entity.controller.planner_mut()?;
        if let Some((reach, farsight)) = thresholds {
            planner.set_thresholds(reach, farsight);
        }
        let waypoint = planner.update(position, &**pathfinder);
        let nav_events = planner.drain_events();

        for event in nav_events {
            match event {
                NavEvent::Arrived { position } => {
                    debug!(entity = %entity.id, x = position.x, z = position.z, "nav_arrived");
                    events.emit(GameplayEvent::Arrived {
                        entity_id: entity.id,
                        position,
                    });
                    bus.publish(Message::ReachDestination {
                        entity_id: entity.id,
                        position,
                    });
                }
                NavEvent::GaveUp => {
                    info!(entity = %entity.id, "nav_gave_up");
                    events.emit(GameplayEvent::GaveUp {
                        entity_id: entity.id,
                    });
                }
                NavEvent::ReturnedHome => {
                    debug!(entity = %entity.id, "nav_returned_home");
                    if let Some(orchestrator) = entity.orchestrator.as_ref() {
                        let decision = orchestrator.resume();
                        apply_decision(entity, decision, events);
                    }
                }
            }
        }

        waypoint.map(|waypoint| MoveIntent::toward(position, waypoint))
    }

    fn integrate_motion(
        &mut self,
        index: usize,
        delta_seconds: f32,
        intent: Option<MoveIntent>,
        input: &InputSnapshot,
        obstacles: &HashMap<String, Vec<Obstacle>>,
    ) {
        let half_extents = self.config.body_half_extents;
        let margin = self.config.collision_margin;
        let run_bonus = self.config.run_speed_bonus;
        let entity = &mut self.entities[index];
        let Some(intent) = intent else {
            entity.controller.motion.halt();
            return;
        };

        let mut speed = entity.speed();
        if entity.controller.is_input_driven() && input.is_down(InputAction::Run) && speed > 0.0 {
            speed += run_bonus;
        }
        let step_length = speed * delta_seconds * REFERENCE_TICKS_PER_SECOND;
        let zone_obstacles = obstacles
            .get(&entity.zone)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let step = resolve_motion(
            &entity.bounds(half_extents),
            Some(entity.id),
            intent,
            step_length,
            zone_obstacles,
            margin,
        );
        entity.transform.position += step.displacement;
        entity.controller.motion.apply(step);
    }

    fn update_status(&mut self, index: usize, delta_seconds: f32, presenters: &mut Presenters<'_>) {
        let entity = &mut self.entities[index];
        if let Some(status) = entity.status.as_mut() {
            status.update(delta_seconds);
        }
        let key = match entity.combat.as_ref().filter(|combat| combat.is_animating()) {
            Some(combat) => AnimationKey::Action(combat.kind()),
            None => AnimationKey::Direction(entity.controller.motion.direction),
        };
        presenters.animation.play(entity.id, key, delta_seconds);
        self.flush_module_events(index);
    }

    fn update_combat(&mut self, index: usize, delta_seconds: f32) {
        if let Some(combat) = self.entities[index].combat.as_mut() {
            combat.update(delta_seconds);
        }
        self.flush_module_events(index);
    }

    fn dispatch_messages(&mut self) {
        for _ in 0..MAX_DISPATCH_ROUNDS {
            if self.bus.is_idle() {
                return;
            }
            for delivery in self.bus.dispatch() {
                let Some(index) = self.index_of(delivery.recipient) else {
                    continue;
                };
                match delivery.message {
                    Message::MeleeDamage(damage) => self.deliver_melee(index, &damage),
                    Message::ReachDestination { entity_id, .. } => {
                        if entity_id == delivery.recipient {
                            self.deliver_arrival(index);
                        }
                    }
                    Message::DialogueOpened { entity_id } => {
                        self.set_player_lock(index, entity_id, true);
                    }
                    Message::DialogueClosed { entity_id } => {
                        self.set_player_lock(index, entity_id, false);
                    }
                }
            }
        }
        if !self.bus.is_idle() {
            warn!(rounds = MAX_DISPATCH_ROUNDS, "message_dispatch_deferred");
        }
    }

    fn deliver_melee(&mut self, index: usize, damage: &MeleeDamage) {
        let entity = &mut self.entities[index];
        let (Some(combat), Some(status)) = (entity.combat.as_mut(), entity.status.as_mut()) else {
            return;
        };
        let receiver = Receiver {
            id: entity.id,
            zone: &entity.zone,
            position: entity.transform.position,
            faction: entity.faction,
        };
        let lost = combat.receive(damage, receiver, status);
        if lost > 0 {
            debug!(attacker = %damage.sender, target = %entity.id, lost, "melee_hit");
        }
        self.flush_module_events(index);
    }

    fn deliver_arrival(&mut self, index: usize) {
        let Self {
            entities, events, ..
        } = self;
        let entity = &mut entities[index];
        let Some(orchestrator) = entity.orchestrator.as_mut() else {
            return;
        };
        let decision = orchestrator.on_arrival();
        apply_decision(entity, decision, events);
    }

    fn set_player_lock(&mut self, index: usize, speaker: EntityId, locked: bool) {
        let entity = &mut self.entities[index];
        if !entity.controller.is_input_driven() {
            return;
        }
        entity.controller.set_locked(locked);
        self.context.lock_player = locked;
        debug!(player = %entity.id, speaker = %speaker, locked, "player_lock_changed");
    }

    fn flush_dialogue_events(&mut self, index: usize) {
        let Self {
            entities,
            bus,
            events,
            ..
        } = self;
        let entity = &mut entities[index];
        let entity_id = entity.id;
        let Some(dialogue) = entity.dialogue.as_mut() else {
            return;
        };
        for event in dialogue.drain_events() {
            match event {
                DialogueEvent::Opened => {
                    info!(speaker = %entity_id, "dialogue_opened");
                    entity.controller.set_locked(true);
                    bus.publish(Message::DialogueOpened { entity_id });
                    events.emit(GameplayEvent::DialogueOpened { entity_id });
                }
                DialogueEvent::Ended => events.emit(GameplayEvent::DialogueEnded { entity_id }),
                DialogueEvent::Exited => events.emit(GameplayEvent::DialogueExited { entity_id }),
                DialogueEvent::Closed => {
                    info!(speaker = %entity_id, "dialogue_closed");
                    entity.controller.set_locked(false);
                    bus.publish(Message::DialogueClosed { entity_id });
                    events.emit(GameplayEvent::DialogueClosed { entity_id });
                }
            }
        }
    }

    /// Moves status and combat events into the gameplay event bus and puts
    /// strikes on the message bus.
    fn flush_module_events(&mut self, index: usize) {
        let Self {
            entities,
            bus,
            events,
            ..
        } = self;
        let entity = &mut entities[index];
        let entity_id = entity.id;

        let status_events = entity
            .status
            .as_mut()
            .map(|status| status.drain_events())
            .unwrap_or_default();
        for event in status_events {
            let event = match event {
                StatusEvent::DebuffStarted(debuff) => {
                    GameplayEvent::DebuffStarted { entity_id, debuff }
                }
                StatusEvent::DebuffEnded(debuff) => GameplayEvent::DebuffEnded { entity_id, debuff },
                StatusEvent::DebuffIgnored(debuff) => {
                    GameplayEvent::DebuffIgnored { entity_id, debuff }
                }
                StatusEvent::Damaged { amount } => GameplayEvent::Damaged { entity_id, amount },
                StatusEvent::Died => {
                    info!(entity = %entity_id, label = %entity.label, "entity_died");
                    GameplayEvent::Died { entity_id }
                }
                StatusEvent::Revived => {
                    info!(entity = %entity_id, label = %entity.label, "entity_revived");
                    GameplayEvent::Revived { entity_id }
                }
                StatusEvent::StatsSwapped(bundle) => {
                    debug!(
                        entity = %entity_id,
                        reach = bundle.reach,
                        farsight = bundle.farsight,
                        speed = bundle.speed,
                        power = bundle.power,
                        defence = bundle.defence,
                        "stats_swapped"
                    );
                    GameplayEvent::StatsSwapped { entity_id }
                }
            };
            events.emit(event);
        }

        let combat_events = entity
            .combat
            .as_mut()
            .map(|combat| combat.drain_events())
            .unwrap_or_default();
        for event in combat_events {
            match event {
                CombatEvent::Started(kind) => {
                    events.emit(GameplayEvent::ActionStarted { entity_id, kind });
                }
                CombatEvent::Strike => {
                    let Some(status) = entity.status.as_ref() else {
                        continue;
                    };
                    bus.publish(Message::MeleeDamage(MeleeDamage {
                        sender: entity_id,
                        zone: entity.zone.clone(),
                        sender_position: entity.transform.position,
                        sender_faction: entity.faction,
                        sender_reach: status.reach(),
                        sender_power: status.power(),
                        sender_unconscious: status.is_unconscious(),
                    }));
                    events.emit(GameplayEvent::MeleeBroadcast { entity_id });
                }
                CombatEvent::NextFrame { frame } => {
                    trace!(entity = %entity_id, frame, "action_frame");
                }
                CombatEvent::LastFrame(kind) => {
                    events.emit(GameplayEvent::ActionFinished { entity_id, kind });
                }
            }
        }
    }

    fn remove_terminated(&mut self) {
        let terminated = self
            .entities
            .iter()
            .filter(|entity| entity.terminated)
            .map(|entity| entity.id)
            .collect::<Vec<_>>();
        for id in terminated {
            self.despawn(id);
        }
    }
}

fn apply_decision(entity: &mut Entity, decision: Decision, events: &mut GameplayEventBus) {
    if decision.terminate {
        if !entity.terminated {
            entity.terminated = true;
            info!(entity = %entity.id, label = %entity.label, "patrol_terminated");
            events.emit(GameplayEvent::PatrolTerminated {
                entity_id: entity.id,
            });
        }
        return;
    }
    if let Some(target) = decision.nav_target {
        if let Some(planner) = entity.controller.planner_mut() {
            if planner.target() != Some(target) {
                planner.set_target(target);
            }
        }
    }
    if decision.attack {
        if let (Some(combat), Some(status)) = (entity.combat.as_mut(), entity.status.as_ref()) {
            combat.attack(status);
        }
    }
}
