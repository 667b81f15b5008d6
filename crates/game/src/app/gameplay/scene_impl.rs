use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use engine::{
    Aabb, ArchetypeStats, DefDatabase, EntityId, InputSnapshot, Scene, SceneCommand, Vec3,
};
use tracing::{debug, info, trace, warn};

use super::dialogue::{spawn_dialogue_load, DialogueEngine, DialoguePresenter, PassageView};
use super::entity::EntityBuilder;
use super::forms::BodyFormTable;
use super::nav::{GridPathfinder, WalkGrid};
use super::simulation::{Presenters, Simulation};
use super::status::DebuffKind;
use super::types::{AnimationDriver, AnimationKey, SimConfig};

const PLAYER_DEF: &str = "Player";
const PLAYER_SPRITE: &str = "forest-sprite";
const MEADOW_SIZE: u32 = 32;
const MEADOW_ORIGIN: Vec3 = Vec3::new(-16.0, 0.0, -16.0);
const POND_MIN: Vec3 = Vec3::new(-4.0, 0.0, -9.0);
const POND_MAX: Vec3 = Vec3::new(1.0, 1.0, -6.0);

/// Which archetype stands where when the meadow loads.
const PLACEMENTS: &[(&str, Vec3)] = &[
    ("Hermit", Vec3::new(2.0, 0.0, 0.0)),
    ("Wolf", Vec3::new(9.0, 0.0, 7.0)),
    ("Courier", Vec3::new(-10.0, 0.0, 3.0)),
];

#[derive(Debug, Clone, Copy)]
enum HazardEffect {
    Debuff(DebuffKind, f32),
    Heal(u32),
}

/// Ground patches that act on whoever steps onto them.
#[derive(Debug, Clone, Copy)]
struct Hazard {
    name: &'static str,
    area: Aabb,
    effect: HazardEffect,
}

const HAZARDS: &[Hazard] = &[
    Hazard {
        name: "thorn_strip",
        area: Aabb {
            min: Vec3::new(4.0, 0.0, -16.0),
            max: Vec3::new(5.0, 1.0, 16.0),
        },
        effect: HazardEffect::Debuff(DebuffKind::Cripple, 3.0),
    },
    Hazard {
        name: "spring",
        area: Aabb {
            min: Vec3::new(7.0, 0.0, -16.0),
            max: Vec3::new(8.0, 1.0, 16.0),
        },
        effect: HazardEffect::Heal(1),
    },
];

/// Logs passages instead of drawing them.
#[derive(Debug, Default)]
pub(crate) struct LogDialoguePresenter {
    shown: u32,
}

impl DialoguePresenter for LogDialoguePresenter {
    fn render(&mut self, speaker: EntityId, view: &PassageView) {
        self.shown = self.shown.saturating_add(1);
        info!(
            speaker = %speaker,
            passage = %view.passage_id,
            text = %view.text,
            options = ?view.options,
            focus = ?view.focus,
            "dialogue_passage_shown"
        );
    }

    fn clear(&mut self, speaker: EntityId) {
        debug!(speaker = %speaker, "dialogue_cleared");
    }
}

/// Remembers the last key per entity and logs only changes.
#[derive(Debug, Default)]
pub(crate) struct LogAnimationDriver {
    current: HashMap<EntityId, &'static str>,
}

impl AnimationDriver for LogAnimationDriver {
    fn play(&mut self, entity_id: EntityId, key: AnimationKey, _delta_seconds: f32) {
        let key = key.as_key();
        if self.current.insert(entity_id, key) != Some(key) {
            debug!(entity = %entity_id, key, "animation_changed");
        }
    }

    fn swap_sprite(&mut self, entity_id: EntityId, sprite: &str) {
        info!(entity = %entity_id, sprite, "sprite_swapped");
    }
}

pub(crate) struct FeywildScene {
    simulation: Simulation,
    defs: DefDatabase,
    dialogue_dir: PathBuf,
    dialogue_presenter: LogDialoguePresenter,
    animation: LogAnimationDriver,
    /// (entity, hazard index) pairs currently standing inside a hazard.
    inside_hazards: HashSet<(EntityId, usize)>,
}

impl FeywildScene {
    pub(crate) fn new(defs: DefDatabase, dialogue_dir: PathBuf, config: SimConfig) -> Self {
        let zone = config.default_zone.clone();
        let mut grid = WalkGrid::open(MEADOW_SIZE, MEADOW_SIZE, MEADOW_ORIGIN);
        grid.block_world_rect(POND_MIN, POND_MAX);
        let pathfinder = GridPathfinder::default().with_zone(zone, grid);
        let forms = BodyFormTable::from_database(&defs);

        Self {
            simulation: Simulation::new(config, Box::new(pathfinder), forms),
            defs,
            dialogue_dir,
            dialogue_presenter: LogDialoguePresenter::default(),
            animation: LogAnimationDriver::default(),
            inside_hazards: HashSet::new(),
        }
    }

    pub(crate) fn simulation(&self) -> &Simulation {
        &self.simulation
    }

    fn toggle_pause(&mut self) {
        let paused = !self.simulation.context().paused;
        self.simulation.set_paused(paused);
        info!(paused, "pause_toggled");
    }

    /// Hazards act on entry only; standing still inside one does nothing more.
    fn apply_hazards(&mut self) {
        let zone = &self.simulation.config().default_zone;
        let mut inside = HashSet::new();
        let mut entered = Vec::new();
        for snapshot in self.simulation.snapshots() {
            if &snapshot.zone != zone {
                continue;
            }
            let point = Aabb::from_center_half_extents(snapshot.position, Vec3::ZERO);
            for (index, hazard) in HAZARDS.iter().enumerate() {
                if !hazard.area.intersects(&point) {
                    continue;
                }
                let key = (snapshot.id, index);
                if !self.inside_hazards.contains(&key) {
                    entered.push(key);
                }
                inside.insert(key);
            }
        }
        self.inside_hazards = inside;

        for (entity_id, index) in entered {
            let hazard = HAZARDS[index];
            info!(entity = %entity_id, hazard = hazard.name, "hazard_entered");
            match hazard.effect {
                HazardEffect::Debuff(kind, seconds) => {
                    self.simulation.apply_debuff(entity_id, kind, seconds);
                }
                HazardEffect::Heal(amount) => self.simulation.heal(entity_id, amount),
            }
        }
    }

    fn spawn_player(&mut self) {
        let (label, stats) = match self.defs.actor_def_by_name(PLAYER_DEF) {
            Some(def) => (def.label.clone(), def.stats),
            None => {
                warn!(def = PLAYER_DEF, "player_def_missing");
                ("player".to_string(), ArchetypeStats::default())
            }
        };
        let builder = EntityBuilder::player(label)
            .with_status(stats)
            .with_combat(self.simulation.config().melee_hit_timing)
            .with_sprite(PLAYER_SPRITE)
            .at(Vec3::ZERO);
        if let Err(error) = self.simulation.spawn(builder) {
            warn!(error = %error, "player_spawn_failed");
        }
    }

    fn spawn_placements(&mut self) {
        let hit_timing = self.simulation.config().melee_hit_timing;
        for (def_name, position) in PLACEMENTS {
            let Some(def) = self.defs.actor_def_by_name(def_name) else {
                warn!(def = def_name, "placement_def_missing");
                continue;
            };
            let mut builder = EntityBuilder::from_archetype(def, hit_timing).at(*position);
            if let Some(file) = &def.dialogue_file {
                let path = self.dialogue_dir.join(file);
                builder = builder.with_dialogue(DialogueEngine::loading(
                    path.clone(),
                    spawn_dialogue_load(path),
                ));
            }
            if let Err(error) = self.simulation.spawn(builder) {
                warn!(def = def_name, error = %error, "placement_spawn_failed");
            }
        }
    }
}

impl Scene for FeywildScene {
    fn load(&mut self) {
        self.simulation.begin_session();
        let zone = self.simulation.config().default_zone.clone();
        self.simulation.add_scenery(
            zone.clone(),
            Aabb {
                min: POND_MIN,
                max: POND_MAX,
            },
        );
        self.spawn_player();
        self.spawn_placements();
        info!(
            zone = %zone,
            entity_count = self.simulation.entity_count(),
            body_forms = self.defs.body_forms().len(),
            "scene_loaded"
        );
    }

    fn update(&mut self, fixed_dt_seconds: f32, input: &InputSnapshot) -> SceneCommand {
        if input.quit_requested() {
            return SceneCommand::Quit;
        }
        if input.pause_pressed() {
            self.toggle_pause();
        }
        let pending = self.simulation.dialogues_pending();
        if pending != self.simulation.context().loading {
            debug!(pending, "dialogue_loading_changed");
            self.simulation.set_loading(pending);
        }
        let mut presenters = Presenters {
            dialogue: &mut self.dialogue_presenter,
            animation: &mut self.animation,
        };
        self.simulation
            .tick(fixed_dt_seconds, input, &mut presenters);
        if !self.simulation.context().paused {
            self.apply_hazards();
        }

        let counts = self.simulation.last_tick_counts();
        if counts.total > 0 {
            debug!(
                tick = self.simulation.context().tick,
                total = counts.total,
                navigation = counts.navigation,
                status = counts.status,
                combat = counts.combat,
                dialogue = counts.dialogue,
                "gameplay_events"
            );
            for event in self.simulation.last_tick_events() {
                match serde_json::to_string(event) {
                    Ok(json) => trace!(event = %json, "gameplay_event"),
                    Err(error) => warn!(error = %error, "gameplay_event_encode_failed"),
                }
            }
        }
        SceneCommand::None
    }

    fn unload(&mut self) {
        match self.simulation.snapshot_json() {
            Ok(json) => info!(snapshot = %json, "final_snapshot"),
            Err(error) => warn!(error = %error, "snapshot_export_failed"),
        }
        self.simulation.end_session();
        self.inside_hazards.clear();
        info!(passages_shown = self.dialogue_presenter.shown, "scene_unloaded");
    }

    fn debug_title(&self) -> Option<String> {
        let player = self
            .simulation
            .player_id()
            .and_then(|id| self.simulation.entity(id))
            .map(|entity| entity.snapshot());
        Some(match player {
            Some(snapshot) => format!(
                "feywild | hp {}/{} | {:.1},{:.1} | {}",
                snapshot.health,
                snapshot.base_health,
                snapshot.position.x,
                snapshot.position.z,
                snapshot.direction
            ),
            None => "feywild | no player".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use engine::{compile_def_database, InputAction};
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn write_content(root: &TempDir) -> (DefDatabase, PathBuf) {
        let base = root.path().join("base");
        let dialogue = root.path().join("dialogue");
        fs::create_dir_all(&base).expect("base dir");
        fs::create_dir_all(&dialogue).expect("dialogue dir");
        fs::write(
            base.join("actors.xml"),
            r#"<Defs>
                <ActorDef><defName>Player</defName><label>sprite</label><faction>player</faction><health>4</health></ActorDef>
                <ActorDef><defName>Hermit</defName><label>hermit</label><dialogue>hermit.json</dialogue></ActorDef>
            </Defs>"#,
        )
        .expect("actors");
        fs::write(
            dialogue.join("hermit.json"),
            json!({ "START": { "text": "Quiet, please." } }).to_string(),
        )
        .expect("dialogue");
        (compile_def_database(&base).expect("compile"), dialogue)
    }

    #[test]
    fn load_spawns_player_and_known_placements() {
        let temp = TempDir::new().expect("temp");
        let (defs, dialogue_dir) = write_content(&temp);
        let mut scene = FeywildScene::new(defs, dialogue_dir, SimConfig::default());
        scene.load();

        assert_eq!(scene.simulation().entity_count(), 2);
        let player = scene
            .simulation()
            .player_id()
            .and_then(|id| scene.simulation().entity(id))
            .expect("player");
        assert_eq!(player.snapshot().base_health, 4);
        assert_eq!(player.sprite.as_deref(), Some(PLAYER_SPRITE));
        assert!(scene.debug_title().is_some_and(|title| title.contains("hp 4/4")));

        scene.unload();
        assert_eq!(scene.simulation().entity_count(), 0);
    }

    #[test]
    fn update_ticks_and_quits_on_request() {
        let temp = TempDir::new().expect("temp");
        let (defs, dialogue_dir) = write_content(&temp);
        let mut scene = FeywildScene::new(defs, dialogue_dir, SimConfig::default());
        scene.load();

        let walk = InputSnapshot::empty().with_action_down(InputAction::MoveRight, true);
        for _ in 0..3 {
            assert_eq!(scene.update(1.0 / 60.0, &walk), SceneCommand::None);
        }
        assert_eq!(scene.simulation().context().tick, 3);

        let quit = InputSnapshot::empty().with_action_down(InputAction::Quit, true);
        assert_eq!(scene.update(1.0 / 60.0, &quit), SceneCommand::Quit);
    }

    #[test]
    fn hermit_dialogue_opens_once_loaded() {
        let temp = TempDir::new().expect("temp");
        let (defs, dialogue_dir) = write_content(&temp);
        let mut scene = FeywildScene::new(defs, dialogue_dir, SimConfig::default());
        scene.load();

        let confirm = InputSnapshot::empty().with_confirm_pressed(true);
        scene.update(1.0 / 60.0, &confirm);
        for _ in 0..200 {
            if scene.dialogue_presenter.shown > 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
            scene.update(1.0 / 60.0, &InputSnapshot::empty());
        }
        assert_eq!(scene.dialogue_presenter.shown, 1);
    }

    fn player_position(scene: &FeywildScene) -> Vec3 {
        scene
            .simulation()
            .player_id()
            .and_then(|id| scene.simulation().entity(id))
            .map(|entity| entity.position())
            .expect("player")
    }

    #[test]
    fn pause_edge_toggles_the_simulation() {
        let temp = TempDir::new().expect("temp");
        let (defs, dialogue_dir) = write_content(&temp);
        let mut scene = FeywildScene::new(defs, dialogue_dir, SimConfig::default());
        scene.load();

        let pause = InputSnapshot::empty().with_pause_pressed(true);
        scene.update(1.0 / 60.0, &pause);
        assert!(scene.simulation().context().paused);
        let walk = InputSnapshot::empty().with_action_down(InputAction::MoveRight, true);
        scene.update(1.0 / 60.0, &walk);
        assert_eq!(scene.simulation().context().tick, 0);
        assert_eq!(player_position(&scene), Vec3::ZERO);

        scene.update(1.0 / 60.0, &pause);
        assert!(!scene.simulation().context().paused);
        assert_eq!(scene.simulation().context().tick, 1);
    }

    #[test]
    fn thorns_cripple_on_entry_and_clear_on_exit() {
        let temp = TempDir::new().expect("temp");
        let (defs, dialogue_dir) = write_content(&temp);
        let mut scene = FeywildScene::new(defs, dialogue_dir, SimConfig::default());
        scene.load();
        let player = scene.simulation().player_id().expect("player");

        // Step clear of the hermit's row before heading east.
        let down = InputSnapshot::empty().with_action_down(InputAction::MoveDown, true);
        while player_position(&scene).z < 2.0 {
            scene.update(1.0 / 60.0, &down);
            assert!(scene.simulation().context().tick < 100);
        }

        let right = InputSnapshot::empty().with_action_down(InputAction::MoveRight, true);
        while player_position(&scene).x < 4.5 {
            scene.update(1.0 / 60.0, &right);
            assert!(scene.simulation().context().tick < 200);
        }
        assert!(scene.inside_hazards.contains(&(player, 0)));
        let crippled = scene.simulation().entity(player).expect("player").snapshot();
        assert!(crippled.crippled);

        while player_position(&scene).x < 7.5 {
            scene.update(1.0 / 60.0, &right);
            assert!(scene.simulation().context().tick < 300);
        }
        assert!(!scene.inside_hazards.contains(&(player, 0)));
        assert!(scene.inside_hazards.contains(&(player, 1)));
        let healed = scene.simulation().entity(player).expect("player").snapshot();
        assert_eq!(healed.health, healed.base_health);

        scene.unload();
        assert!(scene.inside_hazards.is_empty());
    }
}
