use std::collections::HashMap;

use crate::app::{Faction, Vec3};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActorDefId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BodyFormId(pub u32);

/// Stat block shared by actor archetypes. Defaults match an unremarkable
/// villager.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArchetypeStats {
    pub health: u32,
    pub power: i32,
    pub defence: i32,
    pub speed: f32,
    pub reach: f32,
    pub farsight: f32,
}

impl Default for ArchetypeStats {
    fn default() -> Self {
        Self {
            health: 2,
            power: 1,
            defence: 1,
            speed: 0.1,
            reach: 2.25,
            farsight: 10.0,
        }
    }
}

/// One entry of a patrol route; `Terminate` removes the walker from the
/// world when reached.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RouteStop {
    Point(Vec3),
    Terminate,
}

#[derive(Debug, Clone)]
pub struct ActorArchetype {
    pub id: ActorDefId,
    pub def_name: String,
    pub label: String,
    pub faction: Faction,
    pub stats: ArchetypeStats,
    pub dialogue_file: Option<String>,
    pub patrol_route: Vec<RouteStop>,
}

#[derive(Debug, Clone)]
pub struct BodyForm {
    pub id: BodyFormId,
    pub def_name: String,
    pub key: u8,
    pub sprite: String,
    pub reach: f32,
    pub farsight: f32,
    pub speed: f32,
    pub power: i32,
    pub defence: i32,
}

#[derive(Debug, Default, Clone)]
pub struct DefDatabase {
    actor_defs: Vec<ActorArchetype>,
    actor_ids_by_name: HashMap<String, ActorDefId>,
    body_forms: Vec<BodyForm>,
    body_form_ids_by_key: HashMap<u8, BodyFormId>,
}

impl DefDatabase {
    pub(crate) fn from_defs(
        mut actor_defs: Vec<ActorArchetype>,
        mut body_forms: Vec<BodyForm>,
    ) -> Self {
        let mut actor_ids_by_name = HashMap::with_capacity(actor_defs.len());
        for (idx, def) in actor_defs.iter_mut().enumerate() {
            let id = ActorDefId(idx as u32);
            def.id = id;
            actor_ids_by_name.insert(def.def_name.clone(), id);
        }
        let mut body_form_ids_by_key = HashMap::with_capacity(body_forms.len());
        for (idx, form) in body_forms.iter_mut().enumerate() {
            let id = BodyFormId(idx as u32);
            form.id = id;
            body_form_ids_by_key.insert(form.key, id);
        }
        Self {
            actor_defs,
            actor_ids_by_name,
            body_forms,
            body_form_ids_by_key,
        }
    }

    pub fn actor_def_id_by_name(&self, name: &str) -> Option<ActorDefId> {
        self.actor_ids_by_name.get(name).copied()
    }

    pub fn actor_def(&self, id: ActorDefId) -> Option<&ActorArchetype> {
        self.actor_defs.get(id.0 as usize)
    }

    pub fn actor_def_by_name(&self, name: &str) -> Option<&ActorArchetype> {
        self.actor_def_id_by_name(name)
            .and_then(|id| self.actor_def(id))
    }

    pub fn actor_defs(&self) -> &[ActorArchetype] {
        &self.actor_defs
    }

    pub fn body_form_by_key(&self, key: u8) -> Option<&BodyForm> {
        self.body_form_ids_by_key
            .get(&key)
            .and_then(|id| self.body_forms.get(id.0 as usize))
    }

    pub fn body_forms(&self) -> &[BodyForm] {
        &self.body_forms
    }
}
