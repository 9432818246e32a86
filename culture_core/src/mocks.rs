//! Test and helper mocks for culture_core

use culture_traits::{
    CommandSink, LogChannel, PumpCommand, Record, StateStore, TelemetryFrame, TelemetrySource,
};
use std::collections::VecDeque;
use std::time::Duration;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// In-memory state store. Flip `fail_append` / `fail_read` to simulate a
/// broken disk.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    records: Vec<Record>,
    pub fail_append: bool,
    pub fail_read: bool,
}

impl MemoryStore {
    /// Seed a record without going through the failure switches.
    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn count(&self, vial: usize, channel: LogChannel) -> usize {
        self.records
            .iter()
            .filter(|r| r.vial == vial && r.channel() == channel)
            .count()
    }
}

impl StateStore for MemoryStore {
    fn append(&mut self, record: &Record) -> Result<(), BoxError> {
        if self.fail_append {
            return Err(Box::new(std::io::Error::other("memory store: append refused")));
        }
        self.records.push(record.clone());
        Ok(())
    }

    fn append_batch(&mut self, records: &[Record]) -> Result<(), BoxError> {
        if self.fail_append {
            return Err(Box::new(std::io::Error::other("memory store: append refused")));
        }
        self.records.extend_from_slice(records);
        Ok(())
    }

    fn read_last(&self, vial: usize, channel: LogChannel, n: usize) -> Result<Vec<Record>, BoxError> {
        if self.fail_read {
            return Err(Box::new(std::io::Error::other("memory store: read refused")));
        }
        let matching: Vec<&Record> = self
            .records
            .iter()
            .filter(|r| r.vial == vial && r.channel() == channel)
            .collect();
        let skip = matching.len().saturating_sub(n);
        Ok(matching.into_iter().skip(skip).cloned().collect())
    }
}

/// Command sink that keeps everything it was handed.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    pub sent: Vec<PumpCommand>,
    pub fail: bool,
}

impl CommandSink for RecordingSink {
    fn send(&mut self, cmd: &PumpCommand) -> Result<(), BoxError> {
        if self.fail {
            return Err(Box::new(std::io::Error::other("sink: link down")));
        }
        self.sent.push(cmd.clone());
        Ok(())
    }
}

/// Telemetry source replaying a fixed script. Once exhausted it behaves
/// like a silent device and times out.
#[derive(Debug, Default)]
pub struct ScriptedTelemetry {
    script: VecDeque<Result<Option<TelemetryFrame>, String>>,
}

impl ScriptedTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Complete frame with the given ODs and a constant temperature.
    #[must_use]
    pub fn frame(mut self, od: &[f64]) -> Self {
        self.script.push_back(Ok(Some(TelemetryFrame {
            od: od.to_vec(),
            temp_c: vec![37.0; od.len()],
        })));
        self
    }

    #[must_use]
    pub fn incomplete(mut self) -> Self {
        self.script.push_back(Ok(None));
        self
    }

    #[must_use]
    pub fn failure(mut self, msg: &str) -> Self {
        self.script.push_back(Err(msg.to_owned()));
        self
    }
}

impl TelemetrySource for ScriptedTelemetry {
    fn read_frame(&mut self, timeout: Duration) -> Result<Option<TelemetryFrame>, BoxError> {
        match self.script.pop_front() {
            Some(Ok(frame)) => Ok(frame),
            Some(Err(msg)) => Err(Box::new(std::io::Error::other(msg))),
            None => {
                std::thread::sleep(timeout.min(Duration::from_millis(5)));
                Err(Box::new(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "telemetry timeout",
                )))
            }
        }
    }
}
