use engine::ArchetypeStats;
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum DebuffKind {
    Blind,
    Stun,
    Weaken,
    Cripple,
}

impl DebuffKind {
    pub(crate) const ALL: [DebuffKind; 4] = [
        DebuffKind::Blind,
        DebuffKind::Stun,
        DebuffKind::Weaken,
        DebuffKind::Cripple,
    ];

    const fn index(self) -> usize {
        match self {
            DebuffKind::Blind => 0,
            DebuffKind::Stun => 1,
            DebuffKind::Weaken => 2,
            DebuffKind::Cripple => 3,
        }
    }

    pub(crate) fn as_token(self) -> &'static str {
        match self {
            DebuffKind::Blind => "blind",
            DebuffKind::Stun => "stun",
            DebuffKind::Weaken => "weaken",
            DebuffKind::Cripple => "cripple",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct DebuffRecord {
    pub(crate) active: bool,
    pub(crate) seconds_remaining: f32,
}

/// Partial stat overwrite. Health and faction are never swapped.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct StatSwap {
    pub(crate) reach: Option<f32>,
    pub(crate) farsight: Option<f32>,
    pub(crate) speed: Option<f32>,
    pub(crate) power: Option<i32>,
    pub(crate) defence: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub(crate) struct StatBundle {
    pub(crate) reach: f32,
    pub(crate) farsight: f32,
    pub(crate) speed: f32,
    pub(crate) power: i32,
    pub(crate) defence: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum StatusEvent {
    DebuffStarted(DebuffKind),
    DebuffEnded(DebuffKind),
    DebuffIgnored(DebuffKind),
    Damaged { amount: u32 },
    Died,
    Revived,
    StatsSwapped(StatBundle),
}

#[derive(Debug, Clone)]
pub(crate) struct StatusEngine {
    health: u32,
    base_health: u32,
    power: i32,
    base_power: i32,
    defence: i32,
    base_defence: i32,
    speed: f32,
    base_speed: f32,
    farsight: f32,
    base_farsight: f32,
    reach: f32,
    base_reach: f32,
    unconscious: bool,
    debuffs: [DebuffRecord; 4],
    events: Vec<StatusEvent>,
}

impl StatusEngine {
    pub(crate) fn from_stats(stats: &ArchetypeStats) -> Self {
        Self {
            health: stats.health,
            base_health: stats.health,
            power: stats.power,
            base_power: stats.power,
            defence: stats.defence,
            base_defence: stats.defence,
            speed: stats.speed,
            base_speed: stats.speed,
            farsight: stats.farsight,
            base_farsight: stats.farsight,
            reach: stats.reach,
            base_reach: stats.reach,
            unconscious: false,
            debuffs: [DebuffRecord::default(); 4],
            events: Vec::new(),
        }
    }

    pub(crate) fn health(&self) -> u32 {
        self.health
    }

    pub(crate) fn base_health(&self) -> u32 {
        self.base_health
    }

    pub(crate) fn power(&self) -> i32 {
        self.power
    }

    #[cfg(test)]
    pub(crate) fn defence(&self) -> i32 {
        self.defence
    }

    pub(crate) fn speed(&self) -> f32 {
        self.speed
    }

    pub(crate) fn farsight(&self) -> f32 {
        self.farsight
    }

    pub(crate) fn reach(&self) -> f32 {
        self.reach
    }

    pub(crate) fn is_unconscious(&self) -> bool {
        self.unconscious
    }

    pub(crate) fn debuff(&self, kind: DebuffKind) -> DebuffRecord {
        self.debuffs[kind.index()]
    }

    pub(crate) fn is_active(&self, kind: DebuffKind) -> bool {
        self.debuff(kind).active
    }

    pub(crate) fn bundle(&self) -> StatBundle {
        StatBundle {
            reach: self.reach,
            farsight: self.farsight,
            speed: self.speed,
            power: self.power,
            defence: self.defence,
        }
    }

    pub(crate) fn drain_events(&mut self) -> Vec<StatusEvent> {
        std::mem::take(&mut self.events)
    }

    /// Starts (or refreshes) a debuff. Returns whether it took effect.
    pub(crate) fn apply_debuff(&mut self, kind: DebuffKind, seconds: f32) -> bool {
        if self.unconscious {
            warn!(debuff = kind.as_token(), "debuff_no_effect");
            self.events.push(StatusEvent::DebuffIgnored(kind));
            return false;
        }
        if !seconds.is_finite() || seconds <= 0.0 {
            debug!(debuff = kind.as_token(), seconds, "debuff_zero_duration");
            return false;
        }

        let record = &mut self.debuffs[kind.index()];
        let was_active = record.active;
        record.active = true;
        record.seconds_remaining = seconds;
        if !was_active {
            self.refresh_modifier(kind);
            self.events.push(StatusEvent::DebuffStarted(kind));
        }
        true
    }

    pub(crate) fn update(&mut self, delta_seconds: f32) {
        for kind in DebuffKind::ALL {
            let record = &mut self.debuffs[kind.index()];
            if !record.active {
                continue;
            }
            record.seconds_remaining -= delta_seconds;
            if record.seconds_remaining > 0.0 {
                continue;
            }
            record.seconds_remaining = 0.0;
            record.active = false;
            self.refresh_modifier(kind);
            self.events.push(StatusEvent::DebuffEnded(kind));
        }
    }

    /// Applies `incoming_power` against defence and returns the health lost.
    pub(crate) fn damage(&mut self, incoming_power: i32) -> u32 {
        let effective = incoming_power.saturating_sub(self.defence).max(0) as u32;
        self.health = self.health.saturating_sub(effective);
        self.events.push(StatusEvent::Damaged { amount: effective });
        if self.health == 0 && !self.unconscious {
            self.unconscious = true;
            self.events.push(StatusEvent::Died);
        }
        effective
    }

    pub(crate) fn heal(&mut self, amount: u32) {
        self.health = self.health.saturating_add(amount).min(self.base_health);
        if self.unconscious && self.health > 0 {
            self.unconscious = false;
            self.events.push(StatusEvent::Revived);
        }
    }

    pub(crate) fn swap_stats(&mut self, swap: StatSwap) {
        if let Some(reach) = swap.reach {
            self.base_reach = reach;
            self.reach = reach;
        }
        if let Some(farsight) = swap.farsight {
            self.base_farsight = farsight;
            self.farsight = farsight;
        }
        if let Some(speed) = swap.speed {
            self.base_speed = speed;
            self.speed = speed;
        }
        if let Some(power) = swap.power {
            self.base_power = power;
            self.power = power;
        }
        if let Some(defence) = swap.defence {
            self.base_defence = defence;
            self.defence = defence;
        }
        // Active values are overwritten outright; a running debuff only
        // touches them again when it ends.
        self.events.push(StatusEvent::StatsSwapped(self.bundle()));
    }

    fn refresh_modifier(&mut self, kind: DebuffKind) {
        let active = self.debuffs[kind.index()].active;
        match kind {
            DebuffKind::Blind => {
                self.farsight = if active { 0.0 } else { self.base_farsight };
            }
            DebuffKind::Stun => {
                self.speed = if active { 0.0 } else { self.base_speed };
            }
            DebuffKind::Weaken => {
                self.defence = if active {
                    (self.base_defence - 1).max(0)
                } else {
                    self.base_defence
                };
            }
            DebuffKind::Cripple => {
                self.power = if active {
                    (self.base_power - 1).max(0)
                } else {
                    self.base_power
                };
            }
        }
    }
}
