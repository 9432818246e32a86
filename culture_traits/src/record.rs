//! Per-vial journal records.
//!
//! Every record is stamped with experiment time in hours and belongs to
//! exactly one [`LogChannel`]. Stores key on `(vial, channel)`.

use crate::command::Channel;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogChannel {
    Od,
    Pump,
    Setpoint,
    GrowthRate,
    Morbido,
    Chemostat,
}

impl LogChannel {
    pub const ALL: [Self; 6] = [
        Self::Od,
        Self::Pump,
        Self::Setpoint,
        Self::GrowthRate,
        Self::Morbido,
        Self::Chemostat,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Od => "od",
            Self::Pump => "pump",
            Self::Setpoint => "setpoint",
            Self::GrowthRate => "growth_rate",
            Self::Morbido => "morbido",
            Self::Chemostat => "chemostat",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MorbidoPhase {
    #[default]
    Idle,
    Media,
    DoseA,
    DoseB,
}

impl MorbidoPhase {
    /// Pump rack driven in this phase, if any.
    pub const fn channel(self) -> Option<Channel> {
        match self {
            Self::Idle => None,
            Self::Media => Some(Channel::Media),
            Self::DoseA => Some(Channel::DrugA),
            Self::DoseB => Some(Channel::DrugB),
        }
    }
}

/// Progress of one drug's recurring dosing course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DoseCourse {
    /// Courses started so far.
    pub courses: u32,
    /// Dosing cycles left in the course currently running.
    pub remaining: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimedSchedule {
    pub a: DoseCourse,
    pub b: DoseCourse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordBody {
    /// Calibrated reading. Non-finite values are stored as null.
    Od {
        od: Option<f64>,
        temp_c: Option<f64>,
    },
    /// Pump event with the smoothed OD that triggered it.
    Pump { channel: Channel, seconds: f64, od: f64 },
    /// Turbidostat setpoint change and the growth-curve count at that point.
    Setpoint { od: f64, curves: u32 },
    GrowthRate { per_hour: f64 },
    Morbido {
        p: f64,
        i: f64,
        d: f64,
        score: f64,
        drug_a: f64,
        drug_b: f64,
        phase: MorbidoPhase,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schedule: Option<TimedSchedule>,
    },
    /// Chemostat schedule change.
    Chemostat { phase: u32, period_s: u64, bolus_s: f64 },
}

impl RecordBody {
    pub const fn channel(&self) -> LogChannel {
        match self {
            Self::Od { .. } => LogChannel::Od,
            Self::Pump { .. } => LogChannel::Pump,
            Self::Setpoint { .. } => LogChannel::Setpoint,
            Self::GrowthRate { .. } => LogChannel::GrowthRate,
            Self::Morbido { .. } => LogChannel::Morbido,
            Self::Chemostat { .. } => LogChannel::Chemostat,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub vial: usize,
    pub at_h: f64,
    pub body: RecordBody,
}

impl Record {
    pub fn new(vial: usize, at_h: f64, body: RecordBody) -> Self {
        Self { vial, at_h, body }
    }

    #[inline]
    pub const fn channel(&self) -> LogChannel {
        self.body.channel()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn od_record_keeps_missing_reading_as_null() {
        let r = Record::new(3, 1.5, RecordBody::Od { od: None, temp_c: Some(30.0) });
        let s = serde_json::to_string(&r).unwrap();
        assert!(s.contains("\"kind\":\"od\""));
        assert!(s.contains("\"od\":null"));
        let back: Record = serde_json::from_str(&s).unwrap();
        assert_eq!(back, r);
        assert_eq!(back.channel(), LogChannel::Od);
    }

    #[test]
    fn morbido_record_without_schedule_parses() {
        let s = r#"{"vial":0,"at_h":2.0,"body":{"kind":"morbido","p":0.1,"i":0.2,"d":0.0,"score":1.0,"drug_a":0.5,"drug_b":0.0,"phase":"dose_a"}}"#;
        let r: Record = serde_json::from_str(s).unwrap();
        match r.body {
            RecordBody::Morbido { phase, schedule, .. } => {
                assert_eq!(phase, MorbidoPhase::DoseA);
                assert!(schedule.is_none());
            }
            other => panic!("unexpected body {other:?}"),
        }
    }
}
