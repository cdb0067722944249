use serde::{Deserialize, Serialize};
use std::fmt;

use super::schema::RecordSchema;
use super::traits::Record;
use super::{analog_input, analog_output, clock, counter, timer, valve};
use super::{AnalogInput, AnalogOutput, Clock, Counter, Timer, Valve};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    AnalogInput,
    AnalogOutput,
    Valve,
    Counter,
    Timer,
    Clock,
}

impl RecordKind {
    pub const ALL: [RecordKind; 6] = [
        RecordKind::AnalogInput,
        RecordKind::AnalogOutput,
        RecordKind::Valve,
        RecordKind::Counter,
        RecordKind::Timer,
        RecordKind::Clock,
    ];

    pub fn schema(self) -> &'static RecordSchema {
        match self {
            RecordKind::AnalogInput => &analog_input::SCHEMA,
            RecordKind::AnalogOutput => &analog_output::SCHEMA,
            RecordKind::Valve => &valve::SCHEMA,
            RecordKind::Counter => &counter::SCHEMA,
            RecordKind::Timer => &timer::SCHEMA,
            RecordKind::Clock => &clock::SCHEMA,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.schema().type_name)
    }
}

/// Builds a detached record of `kind` at the configured offset string.
pub fn create_record(kind: RecordKind, name: &str, offset: &str) -> Box<dyn Record> {
    match kind {
        RecordKind::AnalogInput => Box::new(AnalogInput::new(name, offset)),
        RecordKind::AnalogOutput => Box::new(AnalogOutput::new(name, offset)),
        RecordKind::Valve => Box::new(Valve::new(name, offset)),
        RecordKind::Counter => Box::new(Counter::new(name, offset)),
        RecordKind::Timer => Box::new(Timer::new(name, offset)),
        RecordKind::Clock => Box::new(Clock::new(name, offset)),
    }
}
