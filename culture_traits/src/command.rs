//! Fleet pump command: one table of 48 wire slots per tick.
//!
//! Three pump racks of 16 slots each. Rack 0 carries media, rack 1 drug A
//! (or efflux on chemostat rigs) and rack 2 drug B. The final slot of rack 2
//! is wired to the shared drain pump, which leaves vials 0..15 usable.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const SLOTS_PER_RACK: usize = 16;
pub const RACKS: usize = 3;
pub const WIRE_SLOTS: usize = SLOTS_PER_RACK * RACKS;
/// Wire index of the shared drain/suction pump.
pub const DRAIN_SLOT: usize = WIRE_SLOTS - 1;
/// Vials that can be actuated (ids `0..MAX_VIALS`).
pub const MAX_VIALS: usize = SLOTS_PER_RACK - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Media,
    DrugA,
    DrugB,
}

impl Channel {
    /// Chemostat rigs drive efflux from the drug A rack.
    pub const EFFLUX: Self = Self::DrugA;
    pub const ALL: [Self; RACKS] = [Self::Media, Self::DrugA, Self::DrugB];

    #[inline]
    pub const fn rack(self) -> usize {
        match self {
            Self::Media => 0,
            Self::DrugA => 1,
            Self::DrugB => 2,
        }
    }

    /// Wire index of `(self, vial)`; `None` for vials past the usable range.
    #[inline]
    pub const fn wire_index(self, vial: usize) -> Option<usize> {
        if vial < MAX_VIALS {
            Some(self.rack() * SLOTS_PER_RACK + vial)
        } else {
            None
        }
    }
}

/// Value of one wire slot.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Slot {
    /// Leave the pump as it is (`--`).
    #[default]
    NoOp,
    /// Run once for this many seconds.
    Run(f64),
    /// Pump `bolus_s` seconds every `period_s` seconds.
    Recurring { bolus_s: f64, period_s: u64 },
    /// Explicitly stopped.
    Stopped,
}

impl Slot {
    #[inline]
    pub fn is_noop(&self) -> bool {
        matches!(self, Self::NoOp)
    }

    /// Seconds of pumping this slot asks for in one activation.
    pub fn seconds(&self) -> f64 {
        match *self {
            Self::Run(s) => s,
            Self::Recurring { bolus_s, .. } => bolus_s,
            Self::NoOp | Self::Stopped => 0.0,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NoOp => f.write_str("--"),
            Self::Run(s) => write!(f, "{s:.2}"),
            Self::Recurring { bolus_s, period_s } => write!(f, "{bolus_s:.2}|{period_s}"),
            Self::Stopped => f.write_str("0|0"),
        }
    }
}

/// Whether the device should run the table once or keep repeating it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Immediate,
    Recurring,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PumpCommand {
    pub kind: CommandKind,
    slots: [Slot; WIRE_SLOTS],
}

impl PumpCommand {
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            slots: [Slot::NoOp; WIRE_SLOTS],
        }
    }

    /// Every pump explicitly stopped, sent when an experiment ends.
    pub fn stop_all() -> Self {
        Self {
            kind: CommandKind::Immediate,
            slots: [Slot::Stopped; WIRE_SLOTS],
        }
    }

    /// Every pump, drain included, run once for `seconds`. Used to fill lines.
    pub fn prime(seconds: f64) -> Self {
        Self {
            kind: CommandKind::Immediate,
            slots: [Slot::Run(seconds); WIRE_SLOTS],
        }
    }

    /// Set the slot of `(channel, vial)`. Returns false when the vial has no slot.
    pub fn set(&mut self, channel: Channel, vial: usize, slot: Slot) -> bool {
        match channel.wire_index(vial) {
            Some(i) => {
                self.slots[i] = slot;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, channel: Channel, vial: usize) -> Slot {
        channel
            .wire_index(vial)
            .map_or(Slot::NoOp, |i| self.slots[i])
    }

    pub fn set_drain(&mut self, slot: Slot) {
        self.slots[DRAIN_SLOT] = slot;
    }

    pub fn drain(&self) -> Slot {
        self.slots[DRAIN_SLOT]
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// True when every slot, drain included, is a no-op.
    pub fn is_noop(&self) -> bool {
        self.slots.iter().all(Slot::is_noop)
    }

    /// Slots that actually drive a pump, as `(wire index, slot)`.
    pub fn active(&self) -> impl Iterator<Item = (usize, Slot)> + '_ {
        self.slots
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, s)| !s.is_noop())
    }

    /// Text values in wire order. One-shot tables render a stop as `0`.
    pub fn wire_values(&self) -> Vec<String> {
        self.slots
            .iter()
            .map(|s| match (self.kind, s) {
                (CommandKind::Immediate, Slot::Stopped) => "0".to_string(),
                _ => s.to_string(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_vial_slot_is_reserved_for_drain() {
        assert_eq!(Channel::Media.wire_index(14), Some(14));
        assert_eq!(Channel::DrugB.wire_index(14), Some(46));
        assert_eq!(Channel::DrugB.wire_index(15), None);
        let mut cmd = PumpCommand::new(CommandKind::Immediate);
        assert!(!cmd.set(Channel::Media, 15, Slot::Run(1.0)));
        assert!(cmd.is_noop());
    }

    #[test]
    fn renders_wire_values() {
        let mut cmd = PumpCommand::new(CommandKind::Recurring);
        cmd.set(Channel::Media, 0, Slot::Recurring { bolus_s: 1.234, period_s: 600 });
        cmd.set(Channel::EFFLUX, 1, Slot::Stopped);
        cmd.set_drain(Slot::Run(7.5));
        let v = cmd.wire_values();
        assert_eq!(v.len(), WIRE_SLOTS);
        assert_eq!(v[0], "1.23|600");
        assert_eq!(v[17], "0|0");
        assert_eq!(v[2], "--");
        assert_eq!(v[DRAIN_SLOT], "7.50");
    }

    #[test]
    fn stop_all_renders_plain_zeros() {
        let v = PumpCommand::stop_all().wire_values();
        assert!(v.iter().all(|s| s == "0"));
    }
}
