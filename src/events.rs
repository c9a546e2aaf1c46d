//! Functions for reading the per-run event files of the mixed gambles task.
//!
//! Each event file is a whitespace-delimited table (usually tabs) with a header row, then one row per trial:
//! `onset, duration, gain, loss, RT, participant_response`. A [`SessionModel`] describes,
//! as data, which conditions a pipeline builds from those trials, and turns each file into
//! a [`ConditionBunch`] of parallel onset/duration/amplitude vectors.

use log::debug;
use serde::Serialize;

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{NarpsError, Result};
use crate::util::table_rows;

/// Number of columns every event row must provide.
pub const EVENT_COLUMNS: usize = 6;


/// The participant's decision for one trial, derived from the response string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
    NoResponse,
}

impl Decision {
    /// "weakly_accept" and "strongly_accept" both accept; "NoResp" is no response.
    pub fn from_response(response: &str) -> Decision {
        if response.contains("accept") {
            Decision::Accept
        } else if response.contains("reject") {
            Decision::Reject
        } else {
            Decision::NoResponse
        }
    }

    /// +1 for accept, -1 for reject, 0 otherwise.
    pub fn polarity(&self) -> f64 {
        match self {
            Decision::Accept => 1.0,
            Decision::Reject => -1.0,
            Decision::NoResponse => 0.0,
        }
    }
}


/// One trial of an event file.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub onset: f64,
    pub duration: f64,
    pub gain: f64,
    pub loss: f64,
    pub reaction_time: f64,
    pub decision: Decision,
}

impl EventRecord {

    /// Build a record from the fields of one data row. `line` is only used for error reporting.
    pub fn from_fields<T: AsRef<str>>(fields: &[T], line: u64) -> Result<EventRecord> {
        if fields.len() < EVENT_COLUMNS {
            return Err(NarpsError::MalformedEventRow(line, EVENT_COLUMNS, fields.len()));
        }
        let number = |idx: usize| -> Result<f64> {
            let field = fields[idx].as_ref();
            field.parse::<f64>().map_err(|_| NarpsError::InvalidNumber(line, field.to_string()))
        };

        Ok(EventRecord {
            onset: number(0)?,
            duration: number(1)?,
            gain: number(2)?,
            loss: number(3)?,
            reaction_time: number(4)?,
            decision: Decision::from_response(fields[5].as_ref()),
        })
    }
}


/// Read all trials of an event file, in file order. The first line is always skipped as header.
pub fn read_events<P: AsRef<Path>>(path: P) -> Result<Vec<EventRecord>> {
    let file = File::open(path)?;
    events_from_reader(file)
}


/// Read all trials from an event table. Fields may be separated by tabs or spaces.
pub fn events_from_reader<S: Read>(input: S) -> Result<Vec<EventRecord>> {
    table_rows(BufReader::new(input))?
        .into_iter()
        .map(|(line, fields)| EventRecord::from_fields(fields.as_slice(), line))
        .collect()
}


/// Where the onset of a condition is placed relative to the trial.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum OnsetRule {
    TrialStart,
    /// Trial start plus reaction time, i.e. the button press.
    Response,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum DurationRule {
    /// The duration column of the event file.
    Event,
    ReactionTime,
    Fixed(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum AmplitudeRule {
    Constant(f64),
    Gain,
    Loss,
    /// +1 accept, -1 reject, 0 no response.
    Polarity,
}

/// Which trials contribute to a condition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum TrialSelection {
    All,
    Accepted,
    Rejected,
}

/// How one condition of a first level model is built from the trials.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConditionRule {
    pub name: &'static str,
    pub onset: OnsetRule,
    pub duration: DurationRule,
    pub amplitude: AmplitudeRule,
    pub selection: TrialSelection,
}

impl ConditionRule {
    fn selects(&self, event: &EventRecord) -> bool {
        match self.selection {
            TrialSelection::All => true,
            TrialSelection::Accepted => event.decision == Decision::Accept,
            TrialSelection::Rejected => event.decision == Decision::Reject,
        }
    }

    fn onset(&self, event: &EventRecord) -> f64 {
        match self.onset {
            OnsetRule::TrialStart => event.onset,
            OnsetRule::Response => event.onset + event.reaction_time,
        }
    }

    fn duration(&self, event: &EventRecord) -> f64 {
        match self.duration {
            DurationRule::Event => event.duration,
            DurationRule::ReactionTime => event.reaction_time,
            DurationRule::Fixed(value) => value,
        }
    }

    fn amplitude(&self, event: &EventRecord) -> f64 {
        match self.amplitude {
            AmplitudeRule::Constant(value) => value,
            AmplitudeRule::Gain => event.gain,
            AmplitudeRule::Loss => event.loss,
            AmplitudeRule::Polarity => event.decision.polarity(),
        }
    }
}


/// Onsets, durations and amplitudes of one condition, index-aligned.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Condition {
    pub name: String,
    pub onsets: Vec<f64>,
    pub durations: Vec<f64>,
    pub amplitudes: Vec<f64>,
}

impl Condition {
    pub fn len(&self) -> usize {
        self.onsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.onsets.is_empty()
    }
}


/// The conditions of one run, in model order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConditionBunch {
    pub conditions: Vec<Condition>,
}

impl ConditionBunch {
    /// Get the condition names, in model order.
    pub fn names(&self) -> Vec<&str> {
        self.conditions.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn condition(&self, name: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.name == name)
    }

    pub fn onsets(&self) -> Vec<Vec<f64>> {
        self.conditions.iter().map(|c| c.onsets.clone()).collect()
    }

    pub fn durations(&self) -> Vec<Vec<f64>> {
        self.conditions.iter().map(|c| c.durations.clone()).collect()
    }

    pub fn amplitudes(&self) -> Vec<Vec<f64>> {
        self.conditions.iter().map(|c| c.amplitudes.clone()).collect()
    }
}


/// The conditions a pipeline models for each run, as an ordered table of rules.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SessionModel {
    pub conditions: &'static [ConditionRule],
}

impl SessionModel {

    /// Build the conditions for a list of trials.
    pub fn bunch(&self, events: &[EventRecord]) -> ConditionBunch {
        let conditions = self
            .conditions
            .iter()
            .map(|rule| {
                let mut condition = Condition {
                    name: rule.name.to_string(),
                    ..Condition::default()
                };
                for event in events.iter().filter(|e| rule.selects(e)) {
                    condition.onsets.push(rule.onset(event));
                    condition.durations.push(rule.duration(event));
                    condition.amplitudes.push(rule.amplitude(event));
                }
                condition
            })
            .collect();
        ConditionBunch { conditions }
    }

    /// Read an event file and build its conditions.
    pub fn bunch_from_file<P: AsRef<Path>>(&self, path: P) -> Result<ConditionBunch> {
        let events = read_events(&path)?;
        debug!("Read {} trials from {}", events.len(), path.as_ref().display());
        Ok(self.bunch(&events))
    }

    /// One [`ConditionBunch`] per event file, in the order the files are given.
    pub fn session_information<P: AsRef<Path>>(&self, event_files: &[P]) -> Result<Vec<ConditionBunch>> {
        event_files.iter().map(|f| self.bunch_from_file(f)).collect()
    }
}


/// event/gain/loss/response with parametric gain and loss lasting the reaction time.
pub const PARAMETRIC_RESPONSE_MODEL: SessionModel = SessionModel {
    conditions: &[
        ConditionRule {
            name: "event",
            onset: OnsetRule::TrialStart,
            duration: DurationRule::Event,
            amplitude: AmplitudeRule::Constant(1.0),
            selection: TrialSelection::All,
        },
        ConditionRule {
            name: "gain",
            onset: OnsetRule::TrialStart,
            duration: DurationRule::ReactionTime,
            amplitude: AmplitudeRule::Gain,
            selection: TrialSelection::All,
        },
        ConditionRule {
            name: "loss",
            onset: OnsetRule::TrialStart,
            duration: DurationRule::ReactionTime,
            amplitude: AmplitudeRule::Loss,
            selection: TrialSelection::All,
        },
        ConditionRule {
            name: "response",
            onset: OnsetRule::TrialStart,
            duration: DurationRule::Event,
            amplitude: AmplitudeRule::Polarity,
            selection: TrialSelection::All,
        },
    ],
};

/// Parametric gain and loss over the whole trial, without an event regressor.
pub const GAIN_LOSS_MODEL: SessionModel = SessionModel {
    conditions: &[
        ConditionRule {
            name: "gain",
            onset: OnsetRule::TrialStart,
            duration: DurationRule::Event,
            amplitude: AmplitudeRule::Gain,
            selection: TrialSelection::All,
        },
        ConditionRule {
            name: "loss",
            onset: OnsetRule::TrialStart,
            duration: DurationRule::Event,
            amplitude: AmplitudeRule::Loss,
            selection: TrialSelection::All,
        },
    ],
};
