//! Defines the records the engine produces while it runs.
//!
//! A `RunReport` is the resolved-instant trace of one run: every instant in
//! the order it was resolved, and within it every fired event in the order
//! it fired. Two runs with the same seed and the same stimuli produce equal
//! reports.

use crate::common::{Priority, Time};

/// The life-cycle state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No run has been prepared yet.
    Idle,
    /// The driving loop is resolving instants.
    Running,
    /// A run is prepared or suspended; scheduled state is intact.
    Paused,
    /// The entity tree has been torn down.
    Stopped,
}

/// One scheduled event fired during an instant.
#[derive(Debug, Clone, PartialEq)]
pub struct FiredEvent {
    pub priority: Priority,
    /// Dotted path of the owning entity, if the action had an owner.
    pub owner: Option<String>,
}

/// Everything fired at one simulated date.
#[derive(Debug, Clone, PartialEq)]
pub struct InstantRecord {
    pub date: Time,
    pub fired: Vec<FiredEvent>,
}

/// The resolved-instant trace of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// The seed the random source was reseeded with.
    pub seed: u64,
    pub instants: Vec<InstantRecord>,
    /// Clock value when the run stopped.
    pub end_time: Time,
}

impl RunReport {
    pub(crate) fn new(seed: u64, start: Time) -> Self {
        Self {
            seed,
            instants: Vec::new(),
            end_time: start,
        }
    }

    /// Total number of events fired over the run.
    pub fn fired_count(&self) -> usize {
        self.instants.iter().map(|i| i.fired.len()).sum()
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new(0, 0.0)
    }
}
