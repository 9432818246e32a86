//! Collaborator boundaries shared by the controller, the simulator and the CLI.
//!
//! The core never talks to a device or a disk directly. It pulls telemetry
//! through [`TelemetrySource`], persists per-vial history through
//! [`StateStore`] and hands one fleet command per tick to [`CommandSink`].
//! Implementations report failures as boxed errors; the core maps them.

pub mod clock;
pub mod command;
pub mod record;

pub use clock::{Clock, MonotonicClock};
pub use command::{Channel, CommandKind, PumpCommand, Slot};
pub use record::{DoseCourse, LogChannel, MorbidoPhase, Record, RecordBody, TimedSchedule};

/// One calibrated reading per vial slot, indexed by vial id.
///
/// Non-finite values mark a vial whose sensor produced nothing usable this
/// tick; the frame itself is still complete.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TelemetryFrame {
    pub od: Vec<f64>,
    pub temp_c: Vec<f64>,
}

impl TelemetryFrame {
    /// OD for `vial`, or `None` when missing or non-finite.
    #[inline]
    pub fn od(&self, vial: usize) -> Option<f64> {
        self.od.get(vial).copied().filter(|v| v.is_finite())
    }

    #[inline]
    pub fn temp_c(&self, vial: usize) -> Option<f64> {
        self.temp_c.get(vial).copied().filter(|v| v.is_finite())
    }
}

pub trait TelemetrySource {
    /// Block for the next frame. `Ok(None)` signals an incomplete broadcast
    /// that must not drive any actuation.
    fn read_frame(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<Option<TelemetryFrame>, Box<dyn std::error::Error + Send + Sync>>;
}

pub trait StateStore {
    /// Append one record; durable before returning.
    fn append(&mut self, record: &Record) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Append every record of a tick. Stores that can make the batch atomic
    /// should override this.
    fn append_batch(
        &mut self,
        records: &[Record],
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        for r in records {
            self.append(r)?;
        }
        Ok(())
    }

    /// Last `n` records of `(vial, channel)` in write order.
    fn read_last(
        &self,
        vial: usize,
        channel: LogChannel,
        n: usize,
    ) -> Result<Vec<Record>, Box<dyn std::error::Error + Send + Sync>>;

    /// Every record of `(vial, channel)` stamped strictly after `after_h`.
    fn read_since(
        &self,
        vial: usize,
        channel: LogChannel,
        after_h: f64,
    ) -> Result<Vec<Record>, Box<dyn std::error::Error + Send + Sync>> {
        let mut all = self.read_last(vial, channel, usize::MAX)?;
        all.retain(|r| r.at_h > after_h);
        Ok(all)
    }
}

pub trait CommandSink {
    fn send(&mut self, cmd: &PumpCommand) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

impl<T: TelemetrySource + ?Sized> TelemetrySource for Box<T> {
    fn read_frame(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<Option<TelemetryFrame>, Box<dyn std::error::Error + Send + Sync>> {
        (**self).read_frame(timeout)
    }
}

impl<T: CommandSink + ?Sized> CommandSink for Box<T> {
    fn send(&mut self, cmd: &PumpCommand) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).send(cmd)
    }
}
