//! The core engine that drives a simulation run.
//!
//! The `Simulator` owns every piece of mutable state: the clock, the
//! schedule, the random source, the trace stack, and the arenas holding
//! actions, entities and channels. Model code receives `&mut Simulator` in
//! every hook and body, so all mutation flows through one owner.
//!
//! A run resolves one instant at a time. Each instant is run to quiescence
//! before the schedule is consulted again: every event filed at the date is
//! fired in descending priority order (FIFO among equals), along with all
//! the synchronous resolutions it cascades into. The entries of a pass are
//! fixed when it begins: zero-delay actions started during the cascade land
//! on the same date but open a new instant, resolved by the next step.

use crate::action::channel::Channel;
use crate::action::{ActionKind, ActionNode};
use crate::clock::{Advance, Clock};
use crate::common::{ActionId, ChannelId, EntityId, EventId, Time, Value};
use crate::components::{Container, EntityNode};
use crate::config::SimConfig;
use crate::error::{SimError, SimResult};
use crate::events::{EngineState, FiredEvent, InstantRecord, RunReport};
use crate::schedule::Schedule;
use crate::stack::{Activation, Stack};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use slotmap::SlotMap;
use tracing::{debug, info, trace};

/// The discrete-event simulation engine.
pub struct Simulator {
    pub(crate) config: SimConfig,
    pub(crate) clock: Clock,
    pub(crate) schedule: Schedule<ActionId>,
    pub(crate) stack: Stack,
    pub(crate) rng: ChaCha8Rng,
    pub(crate) actions: SlotMap<ActionId, ActionNode>,
    pub(crate) entities: SlotMap<EntityId, EntityNode>,
    pub(crate) channels: SlotMap<ChannelId, Channel>,
    pub(crate) graveyard: Vec<ActionId>,
    pub(crate) root: EntityId,
    state: EngineState,
    report: RunReport,
    busy: bool,
    teardown_pending: bool,
}

impl Simulator {
    /// Creates a simulator with an empty root process.
    pub fn new(config: SimConfig) -> Self {
        let clock = Clock::new(config.start_time)
            .with_maximum(config.max_time)
            .with_granularity(config.granularity)
            .with_realtime_scale(config.realtime_scale);
        let seed = config.seed.unwrap_or_else(rand::random);
        let mut entities = SlotMap::with_key();
        let root = entities.insert(EntityNode::new("root", Box::new(Container)));

        Self {
            stack: Stack::new(config.trace),
            report: RunReport::new(seed, config.start_time),
            rng: ChaCha8Rng::seed_from_u64(seed),
            clock,
            schedule: Schedule::new(),
            actions: SlotMap::with_key(),
            entities,
            channels: SlotMap::with_key(),
            graveyard: Vec::new(),
            root,
            state: EngineState::Idle,
            busy: false,
            teardown_pending: false,
            config,
        }
    }

    /// Current simulated time.
    #[inline]
    pub fn now(&self) -> Time {
        self.clock.now()
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// The seeded random source. Model code draws from it for reproducible runs.
    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut Stack {
        &mut self.stack
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Number of scheduled events not yet fired.
    pub fn pending_events(&self) -> usize {
        self.schedule.len()
    }

    /// Number of distinct future dates with events. Zero means quiescent.
    pub fn pending_dates(&self) -> usize {
        self.schedule.pending_dates()
    }

    /// The resolved-instant trace of the current (or last) run.
    pub fn report(&self) -> &RunReport {
        &self.report
    }

    /// Prepares a fresh run without resolving anything.
    ///
    /// Reseeds the random source (explicit seed, else the configured seed,
    /// else entropy), drops every action and pending event, rewinds the
    /// whole entity tree and starts it. `duration` caps the run relative to
    /// the start time; the configured ceiling still applies.
    pub fn begin(&mut self, duration: Option<Time>, seed: Option<u64>) -> SimResult<()> {
        if let Some(d) = duration {
            if !d.is_finite() || d < 0.0 {
                return Err(SimError::InvalidDuration(d));
            }
        }
        if matches!(self.state, EngineState::Running | EngineState::Paused) {
            self.finish()?;
        }

        let seed = seed.or(self.config.seed).unwrap_or_else(rand::random);
        self.rng = ChaCha8Rng::seed_from_u64(seed);

        self.schedule.clear();
        self.clear_channels();
        for (_, node) in self.entities.iter_mut() {
            node.thread = Default::default();
        }
        self.actions.clear();
        self.graveyard.clear();

        let start = self.config.start_time;
        self.clock.reset(start);
        let limit = duration.map(|d| start + d);
        let maximum = match (self.config.max_time, limit) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.clock.set_maximum(maximum);
        self.report = RunReport::new(seed, start);
        self.teardown_pending = false;

        info!("run starting at t={} (seed {})", start, seed);
        let root = self.root;
        self.rewind(root)?;
        self.busy = true;
        let outcome = self.start_entity(root);
        self.busy = false;
        self.sweep();
        self.state = EngineState::Paused;
        outcome?;
        if self.teardown_pending {
            self.finish()?;
        }
        Ok(())
    }

    /// Resolves instants until the run finishes, is paused, or is stopped.
    pub fn run(&mut self) -> SimResult<()> {
        match self.state {
            EngineState::Idle => self.begin(None, None)?,
            EngineState::Stopped => return Ok(()),
            _ => {}
        }
        if self.state == EngineState::Stopped {
            return Ok(());
        }
        self.state = EngineState::Running;
        while self.state == EngineState::Running {
            self.step()?;
        }
        Ok(())
    }

    /// Seeds, rewinds, starts and runs the whole tree, then stops it.
    ///
    /// The run ends when the schedule empties or the clock reaches
    /// `duration` past the start time.
    pub fn single_run(&mut self, duration: Option<Time>, seed: Option<u64>) -> SimResult<RunReport> {
        self.begin(duration, seed)?;
        self.run()?;
        if self.state != EngineState::Stopped {
            self.finish()?;
        }
        Ok(self.report.clone())
    }

    /// Resolves exactly one instant.
    ///
    /// Returns `false` once the run is over: the schedule emptied, the next
    /// date lies past the ceiling, or a stop was requested.
    pub fn step(&mut self) -> SimResult<bool> {
        match self.state {
            EngineState::Idle => self.begin(None, None)?,
            EngineState::Stopped => return Ok(false),
            _ => {}
        }
        if self.state == EngineState::Stopped {
            return Ok(false);
        }
        let date = match self.schedule.advance() {
            Ok(date) => date,
            Err(SimError::EmptySchedule) => {
                debug!("schedule exhausted at t={}", self.now());
                self.finish()?;
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        if self.clock.advance_to(date)? == Advance::Truncated {
            debug!("next instant t={} lies past the ceiling", date);
            self.finish()?;
            return Ok(false);
        }
        self.resolve_instant(date)?;
        if self.teardown_pending {
            self.finish()?;
            return Ok(false);
        }
        Ok(self.state != EngineState::Stopped)
    }

    /// Resolves every instant due at or before `until`, then moves the clock there.
    pub fn leap(&mut self, until: Time) -> SimResult<()> {
        if self.state == EngineState::Idle {
            self.begin(None, None)?;
        }
        if until < self.now() {
            return Err(SimError::InvalidAdvance {
                requested: until,
                current: self.now(),
            });
        }
        while self.state != EngineState::Stopped {
            match self.schedule.peek_date() {
                Some(date) if date <= until => {
                    self.step()?;
                }
                _ => break,
            }
        }
        if self.state != EngineState::Stopped
            && self.clock.advance_to(until)? == Advance::Truncated
        {
            self.finish()?;
        }
        Ok(())
    }

    /// Leaves the driving loop after the current instant. Scheduled state is kept.
    pub fn pause(&mut self) {
        if self.state == EngineState::Running {
            debug!("pausing at t={}", self.now());
            self.state = EngineState::Paused;
        }
    }

    /// Tears the entity tree down.
    ///
    /// Called from inside a cascade, the teardown happens once the current
    /// instant has run to quiescence.
    pub fn stop(&mut self) -> SimResult<()> {
        if self.busy {
            self.teardown_pending = true;
            return Ok(());
        }
        self.finish()
    }

    fn finish(&mut self) -> SimResult<()> {
        self.teardown_pending = false;
        if matches!(self.state, EngineState::Idle | EngineState::Stopped) {
            self.state = EngineState::Stopped;
            return Ok(());
        }
        let root = self.root;
        self.busy = true;
        let outcome = self.stop_entity(root);
        self.busy = false;
        self.sweep();
        self.teardown_pending = false;
        self.state = EngineState::Stopped;
        self.report.end_time = self.now();
        info!(
            "run stopped at t={} after {} instants",
            self.now(),
            self.report.instants.len()
        );
        outcome
    }

    fn resolve_instant(&mut self, date: Time) -> SimResult<()> {
        self.stack.mark_instant(date);
        debug!(
            "instant t={} ({} events)",
            date,
            self.schedule.instant(date).map_or(0, |i| i.len())
        );
        let mut record = InstantRecord {
            date,
            fired: Vec::new(),
        };
        self.busy = true;
        let outcome = self.fire_all(date, &mut record);
        self.busy = false;
        self.sweep();
        self.report.instants.push(record);
        outcome
    }

    /// Fires the entries filed at `date` when the pass begins.
    fn fire_all(&mut self, date: Time, record: &mut InstantRecord) -> SimResult<()> {
        for (event, priority, action) in self.schedule.take_filed(date) {
            let owner = self
                .actions
                .get(action)
                .and_then(|n| n.owner)
                .and_then(|o| self.path(o).ok());
            if self.fire(action, event)? {
                record.fired.push(FiredEvent { priority, owner });
            }
        }
        Ok(())
    }

    /// Resolves the delay behind `event`. Returns `false` for a stale entry.
    fn fire(&mut self, action: ActionId, event: EventId) -> SimResult<bool> {
        // Cancelled (or restarted) earlier in the pass.
        match self.actions.get_mut(action).map(|n| &mut n.kind) {
            Some(ActionKind::Delay { event: slot, .. }) if *slot == Some(event) => *slot = None,
            _ => {
                trace!("skipping stale event for {:?}", action);
                return Ok(false);
            }
        }
        if !self.is_active(action) {
            trace!("skipping inactive {:?}", action);
            return Ok(false);
        }
        self.trace_push(Activation::Fire, action);
        let outcome = self.resolve(action, true, Value::none());
        self.stack.pop();
        outcome.map(|_| true)
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new(SimConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_simulator_is_idle() {
        let sim = Simulator::default();
        assert_eq!(sim.state(), EngineState::Idle);
        assert_eq!(sim.now(), 0.0);
        assert_eq!(sim.pending_events(), 0);
        assert_eq!(sim.entity_count(), 1);
    }

    #[test]
    fn test_empty_run_stops_immediately() {
        let mut sim = Simulator::default();
        let report = sim.single_run(Some(10.0), Some(1)).unwrap();
        assert_eq!(sim.state(), EngineState::Stopped);
        assert!(report.instants.is_empty());
        assert_eq!(report.seed, 1);
    }

    #[test]
    fn test_begin_rejects_negative_duration() {
        let mut sim = Simulator::default();
        assert!(matches!(
            sim.begin(Some(-1.0), None),
            Err(SimError::InvalidDuration(_))
        ));
    }

    #[test]
    fn test_configured_start_time() {
        let config = SimConfig {
            start_time: 50.0,
            ..SimConfig::default()
        };
        let mut sim = Simulator::new(config);
        sim.begin(Some(5.0), None).unwrap();
        assert_eq!(sim.now(), 50.0);
        assert_eq!(sim.clock().maximum(), Some(55.0));
    }
}
