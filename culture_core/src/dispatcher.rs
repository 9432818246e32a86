//! Fleet actuation: fold every vial's decision into one pump command.

use crate::laws::{ControlLaw, VialDecision};
use culture_traits::{Channel, PumpCommand, Slot};

/// Result of assembling one tick's command.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Something changes on the device; send it.
    Emit(PumpCommand),
    /// Every slot is a no-op.
    Idle,
    /// Recurring schedule identical to the one already running.
    Unchanged,
}

/// Assembles one [`PumpCommand`] per tick and remembers the standing
/// recurring schedule so an identical one is not re-sent.
#[derive(Debug, Default)]
pub struct Dispatcher {
    last_recurring: Option<PumpCommand>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the command for `decisions`, given as `(vial, decision)`.
    pub fn assemble<'a>(
        &self,
        law: &dyn ControlLaw,
        decisions: impl IntoIterator<Item = (usize, &'a VialDecision)>,
    ) -> Dispatch {
        let mut cmd = PumpCommand::new(law.command_kind());
        let mut all: Vec<(Channel, Slot)> = Vec::new();
        for (vial, d) in decisions {
            for &(channel, slot) in &d.slots {
                if cmd.set(channel, vial, slot) {
                    all.push((channel, slot));
                } else {
                    tracing::warn!(vial, ?channel, "vial has no pump slot; action dropped");
                }
            }
        }
        cmd.set_drain(law.drain(&all));

        if cmd.is_noop() {
            return Dispatch::Idle;
        }
        if self.last_recurring.as_ref() == Some(&cmd) {
            return Dispatch::Unchanged;
        }
        Dispatch::Emit(cmd)
    }

    /// Record that `cmd` reached the device.
    pub fn sent(&mut self, cmd: &PumpCommand) {
        if cmd.kind == culture_traits::CommandKind::Recurring {
            self.last_recurring = Some(cmd.clone());
        }
    }

    /// Forget the standing schedule, e.g. after a stop-all.
    pub fn reset(&mut self) {
        self.last_recurring = None;
    }
}
