use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use engine::{
    compile_def_database, Aabb, ArchetypeStats, EntityId, Faction, InputAction, InputSnapshot,
    Vec3,
};
use serde_json::json;
use tempfile::TempDir;

use super::combat::CombatKind;
use super::dialogue::{parse_dialogue_graph, DialogueEngine, DialoguePresenter, PassageView};
use super::entity::EntityBuilder;
use super::forms::BodyFormTable;
use super::nav::{GridPathfinder, WalkGrid};
use super::orchestrator::{Orchestrator, PatrolCursor};
use super::simulation::{Presenters, Simulation};
use super::status::DebuffKind;
use super::types::{
    AnimationDriver, AnimationKey, EntitySnapshot, GameplayEvent, MeleeHitTiming, SimConfig,
};

const DT: f32 = 1.0 / 60.0;
const GRID_ORIGIN: Vec3 = Vec3::new(-16.0, 0.0, -16.0);

#[derive(Default)]
struct RecordingPresenter {
    rendered: Vec<PassageView>,
    cleared: u32,
}

impl DialoguePresenter for RecordingPresenter {
    fn render(&mut self, _speaker: EntityId, view: &PassageView) {
        self.rendered.push(view.clone());
    }

    fn clear(&mut self, _speaker: EntityId) {
        self.cleared += 1;
    }
}

#[derive(Default)]
struct RecordingDriver {
    keys: HashMap<EntityId, &'static str>,
    sprites: Vec<(EntityId, String)>,
}

impl AnimationDriver for RecordingDriver {
    fn play(&mut self, entity_id: EntityId, key: AnimationKey, _delta_seconds: f32) {
        self.keys.insert(entity_id, key.as_key());
    }

    fn swap_sprite(&mut self, entity_id: EntityId, sprite: &str) {
        self.sprites.push((entity_id, sprite.to_string()));
    }
}

struct Harness {
    sim: Simulation,
    dialogue: RecordingPresenter,
    animation: RecordingDriver,
}

impl Harness {
    fn new() -> Self {
        Self::with_parts(open_grid(), BodyFormTable::default())
    }

    fn with_parts(grid: WalkGrid, forms: BodyFormTable) -> Self {
        let config = SimConfig::default();
        let pathfinder = GridPathfinder::default().with_zone(config.default_zone.clone(), grid);
        let mut sim = Simulation::new(config, Box::new(pathfinder), forms);
        sim.begin_session();
        Self {
            sim,
            dialogue: RecordingPresenter::default(),
            animation: RecordingDriver::default(),
        }
    }

    fn spawn(&mut self, builder: EntityBuilder) -> EntityId {
        self.sim.spawn(builder).expect("spawn")
    }

    fn step(&mut self, input: &InputSnapshot) -> Vec<GameplayEvent> {
        let mut presenters = Presenters {
            dialogue: &mut self.dialogue,
            animation: &mut self.animation,
        };
        self.sim.tick(DT, input, &mut presenters);
        self.sim.last_tick_events().to_vec()
    }

    fn advance(&mut self, steps: usize, input: &InputSnapshot) -> Vec<GameplayEvent> {
        (0..steps).flat_map(|_| self.step(input)).collect()
    }

    fn snapshot(&self, id: EntityId) -> EntitySnapshot {
        self.sim.entity(id).expect("entity").snapshot()
    }

    fn position(&self, id: EntityId) -> Vec3 {
        self.snapshot(id).position
    }
}

fn open_grid() -> WalkGrid {
    WalkGrid::open(32, 32, GRID_ORIGIN)
}

fn stats(health: u32, power: i32, defence: i32) -> ArchetypeStats {
    ArchetypeStats {
        health,
        power,
        defence,
        ..ArchetypeStats::default()
    }
}

fn player(position: Vec3, stats: ArchetypeStats) -> EntityBuilder {
    EntityBuilder::player("sprite")
        .with_status(stats)
        .with_combat(MeleeHitTiming::AnimationStart)
        .at(position)
}

fn walker(position: Vec3, route: Vec<Option<Vec3>>) -> EntityBuilder {
    EntityBuilder::npc("courier")
        .with_status(ArchetypeStats {
            reach: 0.3,
            ..ArchetypeStats::default()
        })
        .with_orchestrator(Orchestrator::new(Some(PatrolCursor::new(route)), None))
        .at(position)
}

fn held(actions: &[InputAction]) -> InputSnapshot {
    actions.iter().fold(InputSnapshot::empty(), |snapshot, action| {
        snapshot.with_action_down(*action, true)
    })
}

fn count(events: &[GameplayEvent], wanted: impl Fn(&GameplayEvent) -> bool) -> usize {
    events.iter().filter(|event| wanted(event)).count()
}

fn assert_close(actual: f32, expected: f32, epsilon: f32) {
    assert!(
        (actual - expected).abs() <= epsilon,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn player_walks_at_reference_speed() {
    let mut harness = Harness::new();
    let hero = harness.spawn(player(Vec3::ZERO, ArchetypeStats::default()));

    harness.advance(10, &held(&[InputAction::MoveRight]));

    let position = harness.position(hero);
    assert_close(position.x, 1.0, 1e-3);
    assert_close(position.z, 0.0, 1e-6);
    assert_eq!(harness.snapshot(hero).direction, "right");
    assert_eq!(harness.animation.keys.get(&hero), Some(&"right"));
}

#[test]
fn opposing_vertical_intents_cancel() {
    let mut harness = Harness::new();
    let hero = harness.spawn(player(Vec3::ZERO, ArchetypeStats::default()));

    harness.advance(
        5,
        &held(&[InputAction::MoveUp, InputAction::MoveDown, InputAction::MoveRight]),
    );

    let entity = harness.sim.entity(hero).expect("hero");
    assert_eq!(entity.controller.motion.velocity.z, 0.0);
    assert!(entity.controller.motion.velocity.x > 0.0);
}

#[test]
fn run_modifier_adds_speed_bonus() {
    let mut harness = Harness::new();
    let hero = harness.spawn(player(Vec3::ZERO, ArchetypeStats::default()));

    harness.step(&held(&[InputAction::MoveDown, InputAction::Run]));

    assert_close(harness.position(hero).z, 0.2, 1e-4);
}

#[test]
fn scenery_blocks_movement_toward_it() {
    let mut harness = Harness::new();
    harness.sim.add_scenery(
        "meadow",
        Aabb {
            min: Vec3::new(1.5, 0.0, -2.0),
            max: Vec3::new(2.5, 1.0, 2.0),
        },
    );
    let hero = harness.spawn(player(Vec3::ZERO, ArchetypeStats::default()));

    harness.advance(60, &held(&[InputAction::MoveRight]));

    let entity = harness.sim.entity(hero).expect("hero");
    assert!(entity.position().x < 1.15, "{:?}", entity.position());
    assert!(entity.controller.motion.blocked.right);

    harness.advance(5, &held(&[InputAction::MoveLeft]));
    assert!(harness.position(hero).x < 0.7);
}

#[test]
fn paused_and_loading_hold_the_player() {
    let mut harness = Harness::new();
    let hero = harness.spawn(player(Vec3::ZERO, ArchetypeStats::default()));
    let walk = held(&[InputAction::MoveRight]);

    harness.sim.set_paused(true);
    harness.advance(5, &walk);
    assert_eq!(harness.position(hero), Vec3::ZERO);
    assert_eq!(harness.sim.context().tick, 0);

    harness.sim.set_paused(false);
    harness.sim.set_loading(true);
    harness.advance(5, &walk);
    assert_eq!(harness.position(hero), Vec3::ZERO);
    assert_eq!(harness.sim.context().tick, 5);
}

#[test]
fn patrol_walker_arrives_and_moves_on() {
    let mut harness = Harness::new();
    let first = Vec3::new(3.0, 0.0, 0.0);
    let second = Vec3::new(3.0, 0.0, 3.0);
    let courier = harness.spawn(walker(Vec3::ZERO, vec![Some(first), Some(second)]));

    let events = harness.advance(200, &InputSnapshot::empty());

    let arrivals = events
        .iter()
        .filter_map(|event| match event {
            GameplayEvent::Arrived {
                entity_id,
                position,
            } if *entity_id == courier => Some(*position),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert!(arrivals.len() >= 2, "{arrivals:?}");
    assert_eq!(arrivals[0], first);
    assert_eq!(arrivals[1], second);
}

#[test]
fn terminate_marker_removes_the_walker() {
    let mut harness = Harness::new();
    let courier = harness.spawn(walker(Vec3::ZERO, vec![Some(Vec3::new(2.0, 0.0, 0.0)), None]));

    let events = harness.advance(120, &InputSnapshot::empty());

    assert!(harness.sim.entity(courier).is_none());
    assert_eq!(
        count(&events, |event| matches!(
            event,
            GameplayEvent::PatrolTerminated { entity_id } if *entity_id == courier
        )),
        1
    );
}

#[test]
fn unreachable_target_leaves_actor_stationary() {
    let mut grid = open_grid();
    grid.block_world_rect(Vec3::new(0.0, 0.0, -16.0), Vec3::new(0.9, 0.0, 16.0));
    let mut harness = Harness::with_parts(grid, BodyFormTable::default());
    let start = Vec3::new(-5.0, 0.0, 0.0);
    let courier = harness.spawn(walker(start, vec![Some(Vec3::new(5.0, 0.0, 0.0))]));

    harness.advance(30, &InputSnapshot::empty());

    assert_eq!(harness.position(courier), start);
    assert_eq!(harness.snapshot(courier).direction, "idle-down");
}

#[test]
fn blinded_walker_gives_up_and_heads_home() {
    let mut harness = Harness::new();
    let courier = harness.spawn(walker(Vec3::ZERO, vec![Some(Vec3::new(8.0, 0.0, 0.0))]));
    harness.advance(10, &InputSnapshot::empty());
    assert!(harness.position(courier).x > 0.5);

    assert!(harness.sim.apply_debuff(courier, DebuffKind::Blind, 5.0));
    let events = harness.step(&InputSnapshot::empty());

    assert!(events.contains(&GameplayEvent::GaveUp {
        entity_id: courier
    }));
    let planner = harness
        .sim
        .entity(courier)
        .and_then(|entity| entity.controller.planner())
        .expect("planner");
    assert!(planner.is_returning_home());
    assert_eq!(planner.target(), Some(Vec3::ZERO));

    let before = harness.position(courier).x;
    harness.advance(3, &InputSnapshot::empty());
    assert!(harness.position(courier).x < before);
}

#[test]
fn enemy_pursues_and_strikes_the_player() {
    let mut harness = Harness::new();
    let hero = harness.spawn(player(Vec3::ZERO, stats(5, 1, 1)));
    let wolf = harness.spawn(
        EntityBuilder::npc("wolf")
            .with_faction(Faction::Enemy)
            .with_status(stats(3, 2, 0))
            .with_combat(MeleeHitTiming::AnimationStart)
            .with_orchestrator(Orchestrator::new(None, Some(Faction::Player)))
            .at(Vec3::new(4.0, 0.0, 0.0)),
    );

    let events = harness.advance(130, &InputSnapshot::empty());

    assert!(harness.position(wolf).x < 2.3);
    assert!(count(&events, |event| matches!(
        event,
        GameplayEvent::MeleeBroadcast { entity_id } if *entity_id == wolf
    )) >= 1);
    let hero_snapshot = harness.snapshot(hero);
    assert!(hero_snapshot.health < 5);
    assert!(events.contains(&GameplayEvent::ActionStarted {
        entity_id: hero,
        kind: CombatKind::HitReaction,
    }));
}

#[test]
fn player_attack_damages_adjacent_enemy() {
    let mut harness = Harness::new();
    let hero = harness.spawn(player(Vec3::ZERO, stats(5, 3, 1)));
    let dummy = harness.spawn(
        EntityBuilder::npc("scarecrow")
            .with_faction(Faction::Enemy)
            .with_status(stats(5, 0, 1))
            .with_combat(MeleeHitTiming::AnimationStart)
            .at(Vec3::new(1.5, 0.0, 0.0)),
    );

    let events = harness.step(&InputSnapshot::empty().with_attack_pressed(true));

    assert_eq!(harness.snapshot(dummy).health, 3);
    assert!(events.contains(&GameplayEvent::Damaged {
        entity_id: dummy,
        amount: 2,
    }));
    assert!(events.contains(&GameplayEvent::ActionStarted {
        entity_id: dummy,
        kind: CombatKind::HitReaction,
    }));
    assert_eq!(harness.animation.keys.get(&hero), Some(&"attack"));

    let later = harness.advance(10, &InputSnapshot::empty());
    assert!(later.contains(&GameplayEvent::ActionFinished {
        entity_id: hero,
        kind: CombatKind::Attack,
    }));
}

#[test]
fn lethal_hit_knocks_out_and_blocks_debuffs() {
    let mut harness = Harness::new();
    harness.spawn(player(Vec3::ZERO, stats(5, 9, 1)));
    let dummy = harness.spawn(
        EntityBuilder::npc("scarecrow")
            .with_faction(Faction::Enemy)
            .with_status(stats(2, 0, 0))
            .with_combat(MeleeHitTiming::AnimationStart)
            .at(Vec3::new(1.0, 0.0, 0.0)),
    );

    let events = harness.step(&InputSnapshot::empty().with_attack_pressed(true));
    assert_eq!(harness.snapshot(dummy).health, 0);
    assert_eq!(
        count(&events, |event| matches!(
            event,
            GameplayEvent::Died { entity_id } if *entity_id == dummy
        )),
        1
    );

    assert!(!harness.sim.apply_debuff(dummy, DebuffKind::Stun, 2.0));
    let events = harness.step(&InputSnapshot::empty());
    assert!(events.contains(&GameplayEvent::DebuffIgnored {
        entity_id: dummy,
        debuff: DebuffKind::Stun,
    }));

    harness.sim.heal(dummy, 1);
    let events = harness.step(&InputSnapshot::empty());
    assert!(events.contains(&GameplayEvent::Revived { entity_id: dummy }));
    assert_eq!(harness.snapshot(dummy).health, 1);
}

#[test]
fn stun_freezes_player_until_it_expires() {
    let mut harness = Harness::new();
    let hero = harness.spawn(player(Vec3::ZERO, ArchetypeStats::default()));
    assert!(harness.sim.apply_debuff(hero, DebuffKind::Stun, 0.5));

    let walk = held(&[InputAction::MoveRight]);
    let mut events = harness.step(&walk);
    assert!(harness.snapshot(hero).stunned);
    assert_eq!(harness.position(hero), Vec3::ZERO);

    events.extend(harness.advance(40, &walk));
    let started = count(&events, |event| {
        matches!(event, GameplayEvent::DebuffStarted { debuff: DebuffKind::Stun, .. })
    });
    let ended = count(&events, |event| {
        matches!(event, GameplayEvent::DebuffEnded { debuff: DebuffKind::Stun, .. })
    });
    assert_eq!((started, ended), (1, 1));
    assert!(!harness.snapshot(hero).stunned);
    assert!(harness.position(hero).x > 0.0);
}

fn hermit_graph() -> DialogueEngine {
    let raw = json!({
        "START": {
            "text": "Mind the mushrooms.",
            "options": [{ "text": "I will.", "id": "END" }]
        },
        "END": { "text": "" }
    });
    let graph = parse_dialogue_graph(&raw.to_string(), Path::new("hermit.json")).expect("graph");
    DialogueEngine::ready(graph)
}

#[test]
fn dialogue_locks_player_until_it_ends() {
    let mut harness = Harness::new();
    let hero = harness.spawn(player(Vec3::ZERO, ArchetypeStats::default()));
    let hermit = harness.spawn(
        EntityBuilder::npc("hermit")
            .with_dialogue(hermit_graph())
            .at(Vec3::new(1.5, 0.0, 0.0)),
    );

    let events = harness.step(&InputSnapshot::empty().with_confirm_pressed(true));
    assert!(events.contains(&GameplayEvent::DialogueOpened { entity_id: hermit }));
    assert!(harness.sim.context().lock_player);
    assert_eq!(harness.dialogue.rendered.len(), 1);
    assert_eq!(harness.dialogue.rendered[0].passage_id, "START");

    let start = harness.position(hero);
    harness.advance(5, &held(&[InputAction::MoveDown]));
    assert_eq!(harness.position(hero), start);

    let events = harness.step(&InputSnapshot::empty().with_confirm_pressed(true));
    assert!(events.contains(&GameplayEvent::DialogueEnded { entity_id: hermit }));
    assert!(events.contains(&GameplayEvent::DialogueClosed { entity_id: hermit }));
    assert!(!harness.sim.context().lock_player);
    assert_eq!(harness.dialogue.cleared, 1);

    harness.advance(5, &held(&[InputAction::MoveDown]));
    assert!(harness.position(hero).z > start.z);
}

#[test]
fn player_does_not_step_on_the_tick_dialogue_opens() {
    let mut harness = Harness::new();
    let hero = harness.spawn(player(Vec3::ZERO, ArchetypeStats::default()));
    harness.spawn(
        EntityBuilder::npc("hermit")
            .with_dialogue(hermit_graph())
            .at(Vec3::new(1.5, 0.0, 0.0)),
    );

    let talk_and_walk = held(&[InputAction::MoveDown]).with_confirm_pressed(true);
    harness.step(&talk_and_walk);

    assert!(harness.sim.context().lock_player);
    assert_eq!(harness.position(hero), Vec3::ZERO);
}

#[test]
fn queued_dialogue_is_dropped_once_player_walks_away() {
    let mut harness = Harness::new();
    let hero = harness.spawn(player(Vec3::ZERO, ArchetypeStats::default()));
    let (sender, receiver) = mpsc::channel();
    let hermit = harness.spawn(
        EntityBuilder::npc("hermit")
            .with_dialogue(DialogueEngine::loading(PathBuf::from("hermit.json"), receiver))
            .at(Vec3::new(1.5, 0.0, 0.0)),
    );

    harness.step(&InputSnapshot::empty().with_confirm_pressed(true));
    harness.advance(120, &held(&[InputAction::MoveDown]));
    assert!(harness.position(hero).z > 10.0);

    let raw = json!({ "START": { "text": "Mind the mushrooms." } }).to_string();
    sender
        .send(parse_dialogue_graph(&raw, Path::new("hermit.json")))
        .expect("send");
    let events = harness.step(&InputSnapshot::empty());

    assert!(!events.contains(&GameplayEvent::DialogueOpened { entity_id: hermit }));
    assert!(!harness.sim.context().lock_player);
    assert!(harness.dialogue.rendered.is_empty());
}

#[test]
fn dialogue_needs_speak_distance() {
    let mut harness = Harness::new();
    harness.spawn(player(Vec3::ZERO, ArchetypeStats::default()));
    harness.spawn(
        EntityBuilder::npc("hermit")
            .with_dialogue(hermit_graph())
            .at(Vec3::new(5.0, 0.0, 0.0)),
    );

    let events = harness.step(&InputSnapshot::empty().with_confirm_pressed(true));

    assert!(!events
        .iter()
        .any(|event| matches!(event, GameplayEvent::DialogueOpened { .. })));
    assert!(harness.dialogue.rendered.is_empty());
    assert!(!harness.sim.context().lock_player);
}

#[test]
fn body_form_key_swaps_stats_and_sprite() {
    let temp = TempDir::new().expect("temp");
    fs::write(
        temp.path().join("forms.xml"),
        r#"<Defs>
            <BodyFormDef>
                <defName>Mink</defName>
                <key>2</key>
                <sprite>mink</sprite>
                <speed>0.2</speed>
                <farsight>15</farsight>
            </BodyFormDef>
        </Defs>"#,
    )
    .expect("write forms");
    let defs = compile_def_database(temp.path()).expect("compile");
    let mut harness = Harness::with_parts(open_grid(), BodyFormTable::from_database(&defs));
    let hero = harness.spawn(player(Vec3::ZERO, ArchetypeStats::default()));

    let events = harness.step(&InputSnapshot::empty().with_body_form_key(Some(2)));
    assert!(events.contains(&GameplayEvent::StatsSwapped { entity_id: hero }));
    assert_eq!(harness.animation.sprites, vec![(hero, "mink".to_string())]);
    let entity = harness.sim.entity(hero).expect("hero");
    assert_eq!(entity.sprite.as_deref(), Some("mink"));
    assert_eq!(entity.status.as_ref().map(|status| status.farsight()), Some(15.0));

    harness.step(&held(&[InputAction::MoveRight]));
    assert_close(harness.position(hero).x, 0.2, 1e-4);

    harness.step(&InputSnapshot::empty().with_body_form_key(Some(9)));
    assert_eq!(harness.animation.sprites.len(), 1);
}

#[test]
fn snapshot_export_lists_every_entity() {
    let mut harness = Harness::new();
    harness.spawn(player(Vec3::ZERO, ArchetypeStats::default()));
    harness.spawn(walker(Vec3::new(3.0, 0.0, 3.0), Vec::new()));
    harness.step(&InputSnapshot::empty());

    let json = harness.sim.snapshot_json().expect("json");
    let value: serde_json::Value = serde_json::from_str(&json).expect("parse");
    let entries = value.as_array().expect("array");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["zone"], "meadow");
    assert_eq!(entries[0]["direction"], "idle-down");
    assert_eq!(entries[1]["health"], 2);
    assert_eq!(entries[1]["blinded"], false);
}

#[test]
fn despawn_and_session_end_clear_entities() {
    let mut harness = Harness::new();
    let hero = harness.spawn(player(Vec3::ZERO, ArchetypeStats::default()));
    harness.spawn(walker(Vec3::new(3.0, 0.0, 3.0), Vec::new()));

    assert!(harness.sim.despawn(hero));
    assert!(!harness.sim.despawn(hero));
    assert_eq!(harness.sim.player_id(), None);

    harness.sim.end_session();
    assert_eq!(harness.sim.entity_count(), 0);
    assert!(!harness.sim.context().is_active());
    harness.step(&InputSnapshot::empty());
    assert_eq!(harness.sim.context().tick, 0);
}

#[test]
fn event_counts_roll_over_each_tick() {
    let mut harness = Harness::new();
    let hero = harness.spawn(player(Vec3::ZERO, ArchetypeStats::default()));
    harness.sim.apply_debuff(hero, DebuffKind::Weaken, 1.0);

    harness.step(&InputSnapshot::empty());
    assert_eq!(harness.sim.last_tick_counts().status, 1);

    harness.step(&InputSnapshot::empty());
    assert_eq!(harness.sim.last_tick_counts().total, 0);
}
