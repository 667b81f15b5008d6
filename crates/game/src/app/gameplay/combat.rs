use engine::{EntityId, Faction, Vec3};
use serde::Serialize;
use tracing::debug;

use super::nav::ground_distance;
use super::status::StatusEngine;
use super::types::MeleeHitTiming;

pub(crate) const ACTION_TOTAL_SECONDS: f32 = 0.075;
pub(crate) const ACTION_FRAMES: u32 = 4;
const FRAME_EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum CombatKind {
    Attack,
    Defend,
    HitReaction,
}

impl CombatKind {
    pub(crate) fn as_key(self) -> &'static str {
        match self {
            CombatKind::Attack => "attack",
            CombatKind::Defend => "defend",
            CombatKind::HitReaction => "ouch",
        }
    }
}

/// Broadcast payload of a swing.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MeleeDamage {
    pub(crate) sender: EntityId,
    pub(crate) zone: String,
    pub(crate) sender_position: Vec3,
    pub(crate) sender_faction: Faction,
    pub(crate) sender_reach: f32,
    pub(crate) sender_power: i32,
    pub(crate) sender_unconscious: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CombatEvent {
    Started(CombatKind),
    /// The swing reaches other actors now; the owner broadcasts it.
    Strike,
    NextFrame { frame: u32 },
    LastFrame(CombatKind),
}

/// The receiver's side of a melee hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Receiver<'a> {
    pub(crate) id: EntityId,
    pub(crate) zone: &'a str,
    pub(crate) position: Vec3,
    pub(crate) faction: Faction,
}

#[derive(Debug, Clone)]
pub(crate) struct CombatResolver {
    animating: bool,
    kind: CombatKind,
    elapsed: f32,
    total: f32,
    slice: f32,
    frames_emitted: u32,
    hit_timing: MeleeHitTiming,
    strike_pending: bool,
    events: Vec<CombatEvent>,
}

impl CombatResolver {
    pub(crate) fn new(hit_timing: MeleeHitTiming) -> Self {
        Self {
            animating: false,
            kind: CombatKind::Attack,
            elapsed: 0.0,
            total: ACTION_TOTAL_SECONDS,
            slice: ACTION_TOTAL_SECONDS / ACTION_FRAMES as f32,
            frames_emitted: 0,
            hit_timing,
            strike_pending: false,
            events: Vec::new(),
        }
    }

    pub(crate) fn is_animating(&self) -> bool {
        self.animating
    }

    pub(crate) fn kind(&self) -> CombatKind {
        self.kind
    }

    #[cfg(test)]
    pub(crate) fn elapsed(&self) -> f32 {
        self.elapsed
    }

    pub(crate) fn is_defending(&self) -> bool {
        self.animating && self.kind == CombatKind::Defend
    }

    fn is_attacking(&self) -> bool {
        self.animating && self.kind == CombatKind::Attack
    }

    pub(crate) fn drain_events(&mut self) -> Vec<CombatEvent> {
        std::mem::take(&mut self.events)
    }

    pub(crate) fn attack(&mut self, status: &StatusEngine) -> bool {
        if status.is_unconscious() {
            debug!("attack_while_unconscious");
            return false;
        }
        self.start(CombatKind::Attack);
        match self.hit_timing {
            MeleeHitTiming::AnimationStart | MeleeHitTiming::ImpactFrame(0) => {
                self.events.push(CombatEvent::Strike);
            }
            MeleeHitTiming::ImpactFrame(_) => self.strike_pending = true,
        }
        true
    }

    pub(crate) fn defend(&mut self, status: &StatusEngine) -> bool {
        if status.is_unconscious() {
            debug!("defend_while_unconscious");
            return false;
        }
        self.start(CombatKind::Defend);
        true
    }

    fn start(&mut self, kind: CombatKind) {
        self.animating = true;
        self.kind = kind;
        self.elapsed = 0.0;
        self.frames_emitted = 0;
        self.strike_pending = false;
        self.events.push(CombatEvent::Started(kind));
    }

    /// Resolves an incoming swing against `receiver`. Returns the health lost.
    pub(crate) fn receive(
        &mut self,
        message: &MeleeDamage,
        receiver: Receiver<'_>,
        status: &mut StatusEngine,
    ) -> u32 {
        if message.sender == receiver.id || message.zone != receiver.zone {
            return 0;
        }
        let within_reach =
            ground_distance(message.sender_position, receiver.position) <= message.sender_reach;
        if !within_reach || status.is_unconscious() || message.sender_unconscious {
            return 0;
        }

        let mut lost = 0;
        if message.sender_faction != receiver.faction {
            let power = if self.is_defending() {
                message.sender_power - 1
            } else {
                message.sender_power
            };
            lost = status.damage(power);
        }
        if !self.is_attacking() && !self.is_defending() {
            self.start(CombatKind::HitReaction);
        }
        lost
    }

    pub(crate) fn update(&mut self, delta_seconds: f32) {
        if !self.animating {
            return;
        }
        self.elapsed += delta_seconds;

        let reached = (((self.elapsed + FRAME_EPSILON) / self.slice).floor() as u32)
            .min(ACTION_FRAMES);
        while self.frames_emitted < reached {
            self.frames_emitted += 1;
            let frame = self.frames_emitted;
            if self.strike_pending && self.hit_timing == MeleeHitTiming::ImpactFrame(frame) {
                self.strike_pending = false;
                self.events.push(CombatEvent::Strike);
            }
            if frame < ACTION_FRAMES {
                self.events.push(CombatEvent::NextFrame { frame });
            }
        }

        if self.elapsed + FRAME_EPSILON >= self.total {
            if self.strike_pending {
                self.strike_pending = false;
                self.events.push(CombatEvent::Strike);
            }
            self.animating = false;
            self.events.push(CombatEvent::LastFrame(self.kind));
        }
    }
}

#[cfg(test)]
mod tests {
    use engine::ArchetypeStats;

    use super::*;

    fn status(power: i32, defence: i32, reach: f32) -> StatusEngine {
        StatusEngine::from_stats(&ArchetypeStats {
            health: 5,
            power,
            defence,
            reach,
            ..ArchetypeStats::default()
        })
    }

    fn swing(sender: u64, power: i32, reach: f32, faction: Faction) -> MeleeDamage {
        MeleeDamage {
            sender: EntityId(sender),
            zone: "meadow".to_string(),
            sender_position: Vec3::ZERO,
            sender_faction: faction,
            sender_reach: reach,
            sender_power: power,
            sender_unconscious: false,
        }
    }

    fn receiver(position: Vec3) -> Receiver<'static> {
        Receiver {
            id: EntityId(2),
            zone: "meadow",
            position,
            faction: Faction::Enemy,
        }
    }

    #[test]
    fn hit_within_reach_across_factions_deals_power_minus_defence() {
        let mut defender_status = status(1, 1, 2.0);
        let mut defender = CombatResolver::new(MeleeHitTiming::AnimationStart);
        let lost = defender.receive(
            &swing(1, 2, 2.0, Faction::Player),
            receiver(Vec3::new(1.5, 0.0, 0.0)),
            &mut defender_status,
        );
        assert_eq!(lost, 1);
        assert_eq!(defender_status.health(), 4);
        assert_eq!(defender.kind(), CombatKind::HitReaction);
        assert!(defender.is_animating());
    }

    #[test]
    fn defending_absorbs_one_point() {
        let mut defender_status = status(1, 1, 2.0);
        let mut defender = CombatResolver::new(MeleeHitTiming::AnimationStart);
        assert!(defender.defend(&defender_status));
        let lost = defender.receive(
            &swing(1, 2, 2.0, Faction::Player),
            receiver(Vec3::new(1.5, 0.0, 0.0)),
            &mut defender_status,
        );
        assert_eq!(lost, 0);
        assert_eq!(defender_status.health(), 5);
        assert_eq!(defender.kind(), CombatKind::Defend);
    }

    #[test]
    fn out_of_reach_self_and_unconscious_senders_are_ignored() {
        let mut defender_status = status(1, 0, 2.0);
        let mut defender = CombatResolver::new(MeleeHitTiming::AnimationStart);

        let far = defender.receive(
            &swing(1, 2, 2.0, Faction::Player),
            receiver(Vec3::new(3.0, 0.0, 0.0)),
            &mut defender_status,
        );
        let own = defender.receive(
            &swing(2, 2, 2.0, Faction::Player),
            receiver(Vec3::ZERO),
            &mut defender_status,
        );
        let mut knocked_out = swing(1, 2, 2.0, Faction::Player);
        knocked_out.sender_unconscious = true;
        let limp = defender.receive(&knocked_out, receiver(Vec3::ZERO), &mut defender_status);

        assert_eq!((far, own, limp), (0, 0, 0));
        assert_eq!(defender_status.health(), 5);
        assert!(!defender.is_animating());
    }

    #[test]
    fn same_faction_flinches_without_damage() {
        let mut defender_status = status(1, 0, 2.0);
        let mut defender = CombatResolver::new(MeleeHitTiming::AnimationStart);
        let lost = defender.receive(
            &swing(1, 3, 2.0, Faction::Enemy),
            receiver(Vec3::new(1.0, 0.0, 0.0)),
            &mut defender_status,
        );
        assert_eq!(lost, 0);
        assert_eq!(defender.kind(), CombatKind::HitReaction);
    }

    #[test]
    fn attack_strikes_at_start_and_emits_frames_then_last_frame_once() {
        let attacker_status = status(2, 1, 2.0);
        let mut attacker = CombatResolver::new(MeleeHitTiming::AnimationStart);
        assert!(attacker.attack(&attacker_status));
        assert_eq!(
            attacker.drain_events(),
            vec![CombatEvent::Started(CombatKind::Attack), CombatEvent::Strike]
        );

        attacker.update(0.01);
        assert!(attacker.drain_events().is_empty());
        attacker.update(0.03);
        assert_eq!(
            attacker.drain_events(),
            vec![
                CombatEvent::NextFrame { frame: 1 },
                CombatEvent::NextFrame { frame: 2 },
            ]
        );
        attacker.update(0.05);
        assert_eq!(
            attacker.drain_events(),
            vec![
                CombatEvent::NextFrame { frame: 3 },
                CombatEvent::LastFrame(CombatKind::Attack),
            ]
        );
        assert!(!attacker.is_animating());
        attacker.update(0.05);
        assert!(attacker.drain_events().is_empty());
    }

    #[test]
    fn impact_frame_timing_defers_strike() {
        let attacker_status = status(2, 1, 2.0);
        let mut attacker = CombatResolver::new(MeleeHitTiming::ImpactFrame(2));
        attacker.attack(&attacker_status);
        assert_eq!(
            attacker.drain_events(),
            vec![CombatEvent::Started(CombatKind::Attack)]
        );
        attacker.update(0.02);
        assert!(!attacker.drain_events().contains(&CombatEvent::Strike));
        attacker.update(0.02);
        assert!(attacker.drain_events().contains(&CombatEvent::Strike));
    }

    #[test]
    fn unconscious_actor_cannot_act() {
        let mut knocked_out = status(1, 0, 2.0);
        knocked_out.damage(10);
        let mut resolver = CombatResolver::new(MeleeHitTiming::AnimationStart);
        assert!(!resolver.attack(&knocked_out));
        assert!(!resolver.defend(&knocked_out));
        assert!(resolver.drain_events().is_empty());
    }

    #[test]
    fn animating_implies_elapsed_below_total() {
        let attacker_status = status(1, 0, 2.0);
        let mut resolver = CombatResolver::new(MeleeHitTiming::AnimationStart);
        resolver.defend(&attacker_status);
        for _ in 0..10 {
            resolver.update(1.0 / 60.0);
            if resolver.is_animating() {
                assert!(resolver.elapsed() < ACTION_TOTAL_SECONDS);
            }
        }
        assert!(!resolver.is_animating());
    }
}
