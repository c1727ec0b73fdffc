//! The action algebra.
//!
//! An action is the unit of suspension: it is started, may stay pending
//! across instants, and eventually succeeds, fails, or is cancelled. Actions
//! live in an arena owned by the [`Simulator`] and are addressed by
//! [`ActionId`]. Combinators own their operands and react to their
//! resolution; chains drive a resumable [`Body`] that yields one child
//! action at a time.
//!
//! This module holds the node types and the constructors. The lifecycle
//! (start, cancel, resolve) lives in `algebra`, chain driving in `chain`,
//! and publish-subscribe in `channel`.

pub mod algebra;
pub mod chain;
pub mod channel;

pub use chain::{Body, Resume, Step};

use crate::common::{ActionId, ChannelId, EntityId, EventId, Phase, Priority, Status, Time, Value};
use crate::engine::Simulator;
use crate::error::{SimError, SimResult};
use chain::ChainState;

/// Anything that can stand in for an action.
///
/// A bare number becomes a `Delay`, a body becomes a one-shot `Chain`, and
/// an existing handle passes through unchanged.
pub enum Act {
    Action(ActionId),
    Delay(Time),
    Body(Box<dyn Body>),
}

impl From<ActionId> for Act {
    fn from(id: ActionId) -> Self {
        Act::Action(id)
    }
}

impl From<f64> for Act {
    fn from(duration: f64) -> Self {
        Act::Delay(duration)
    }
}

impl From<u32> for Act {
    fn from(duration: u32) -> Self {
        Act::Delay(duration as f64)
    }
}

impl From<Box<dyn Body>> for Act {
    fn from(body: Box<dyn Body>) -> Self {
        Act::Body(body)
    }
}

impl Act {
    /// Wraps a closure body so it can be yielded or passed to a combinator.
    pub fn body<F>(body: F) -> Self
    where
        F: FnMut(&mut Simulator, Resume) -> SimResult<Step> + 'static,
    {
        Act::Body(Box::new(body))
    }
}

/// A side-effecting callback attached to a `Callback` combinator.
pub type Hook = Box<dyn FnMut(&mut Simulator, &Value) -> SimResult<()>>;

/// Hooks run around the resolution of a `Callback` operand.
#[derive(Default)]
pub struct Hooks {
    pub(crate) on_start: Option<Hook>,
    pub(crate) on_succeed: Option<Hook>,
    pub(crate) on_fail: Option<Hook>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_start(
        mut self,
        hook: impl FnMut(&mut Simulator, &Value) -> SimResult<()> + 'static,
    ) -> Self {
        self.on_start = Some(Box::new(hook));
        self
    }

    pub fn on_succeed(
        mut self,
        hook: impl FnMut(&mut Simulator, &Value) -> SimResult<()> + 'static,
    ) -> Self {
        self.on_succeed = Some(Box::new(hook));
        self
    }

    pub fn on_fail(
        mut self,
        hook: impl FnMut(&mut Simulator, &Value) -> SimResult<()> + 'static,
    ) -> Self {
        self.on_fail = Some(Box::new(hook));
        self
    }
}

/// Operand bookkeeping shared by `Sequence`, `And`, `Or` and `Xor`.
///
/// Pending, succeeded and failed operands are tracked separately so a
/// verdict never needs to rescan every operand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally {
    pub pending: Vec<ActionId>,
    pub succeeded: Vec<ActionId>,
    pub failed: Vec<ActionId>,
}

impl Tally {
    pub(crate) fn reset(&mut self, operands: &[ActionId]) {
        self.pending = operands.to_vec();
        self.succeeded.clear();
        self.failed.clear();
    }

    /// Moves `child` out of the pending set. Returns `false` if it was not pending.
    pub(crate) fn settle(&mut self, child: ActionId, ok: bool) -> bool {
        match self.pending.iter().position(|p| *p == child) {
            Some(pos) => {
                self.pending.remove(pos);
                if ok {
                    self.succeeded.push(child);
                } else {
                    self.failed.push(child);
                }
                true
            }
            None => false,
        }
    }
}

/// Resolution policy of a multary combinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Every operand must succeed; the first failure fails the whole.
    All,
    /// The first success succeeds the whole; only all-failures fail it.
    Any,
    /// Succeeds iff exactly one operand succeeds.
    One,
}

impl Mode {
    /// The verdict reached by `tally`, if any. `None` means keep waiting.
    pub(crate) fn verdict(self, tally: &Tally, last_ok: bool) -> Option<bool> {
        match self {
            Mode::All if !last_ok => Some(false),
            Mode::All => tally.pending.is_empty().then_some(true),
            Mode::Any if last_ok => Some(true),
            Mode::Any => tally.pending.is_empty().then_some(false),
            Mode::One if tally.succeeded.len() > 1 => Some(false),
            Mode::One => tally
                .pending
                .is_empty()
                .then_some(tally.succeeded.len() == 1),
        }
    }

    /// Verdict for a combinator with no operands at all.
    pub(crate) fn vacuous(self) -> bool {
        matches!(self, Mode::All)
    }

    fn label(self) -> &'static str {
        match self {
            Mode::All => "And",
            Mode::Any => "Or",
            Mode::One => "Xor",
        }
    }
}

pub(crate) enum ActionKind {
    Delay {
        duration: Time,
        priority: Priority,
        event: Option<EventId>,
    },
    Request,
    Chain(ChainState),
    Sequence {
        operands: Vec<ActionId>,
        cursor: usize,
        tally: Tally,
    },
    Multary {
        mode: Mode,
        operands: Vec<ActionId>,
        tally: Tally,
    },
    Not {
        operand: ActionId,
    },
    Repeat {
        operand: ActionId,
        times: Option<u32>,
        count: u32,
        driving: bool,
        rerun: bool,
    },
    Unless {
        escape: ActionId,
        main: ActionId,
    },
    Callback {
        operand: ActionId,
        hooks: Hooks,
    },
    Listener {
        channel: ChannelId,
        topic: Option<String>,
        priority: Priority,
    },
    Signal {
        channel: ChannelId,
        topic: String,
        payload: Value,
        woken: usize,
    },
    Observer {
        target: ActionId,
    },
}

impl ActionKind {
    /// The actions this node owns.
    pub(crate) fn children(&self) -> Vec<ActionId> {
        match self {
            ActionKind::Chain(state) => state.current.into_iter().collect(),
            ActionKind::Sequence { operands, .. } | ActionKind::Multary { operands, .. } => {
                operands.clone()
            }
            ActionKind::Not { operand }
            | ActionKind::Repeat { operand, .. }
            | ActionKind::Callback { operand, .. } => vec![*operand],
            ActionKind::Unless { escape, main } => vec![*escape, *main],
            _ => Vec::new(),
        }
    }

    pub(crate) fn label(&self) -> String {
        match self {
            ActionKind::Delay { duration, .. } => format!("Delay({})", duration),
            ActionKind::Request => "Request".to_string(),
            ActionKind::Chain(_) => "Chain".to_string(),
            ActionKind::Sequence { operands, .. } => format!("Sequence[{}]", operands.len()),
            ActionKind::Multary { mode, operands, .. } => {
                format!("{}[{}]", mode.label(), operands.len())
            }
            ActionKind::Not { .. } => "Not".to_string(),
            ActionKind::Repeat { times: Some(n), .. } => format!("Repeat({})", n),
            ActionKind::Repeat { times: None, .. } => "Repeat(forever)".to_string(),
            ActionKind::Unless { .. } => "Unless".to_string(),
            ActionKind::Callback { .. } => "Callback".to_string(),
            ActionKind::Listener { topic: Some(t), .. } => format!("Listener({})", t),
            ActionKind::Listener { topic: None, .. } => "Listener(*)".to_string(),
            ActionKind::Signal { topic, .. } => format!("Signal({})", topic),
            ActionKind::Observer { .. } => "Observer".to_string(),
        }
    }
}

/// One action in the arena.
pub(crate) struct ActionNode {
    pub(crate) status: Status,
    pub(crate) phase: Phase,
    pub(crate) owner: Option<EntityId>,
    pub(crate) parent: Option<ActionId>,
    pub(crate) observers: Vec<ActionId>,
    pub(crate) value: Value,
    pub(crate) kind: ActionKind,
}

impl ActionNode {
    fn new(kind: ActionKind) -> Self {
        Self {
            status: Status::Pending,
            phase: Phase::Undeployed,
            owner: None,
            parent: None,
            observers: Vec::new(),
            value: Value::none(),
            kind,
        }
    }
}

// Constructors.
impl Simulator {
    fn insert_action(&mut self, kind: ActionKind) -> ActionId {
        self.actions.insert(ActionNode::new(kind))
    }

    /// Lifts the operands, inserts a combinator node and adopts them.
    ///
    /// Every operand must be free: no parent, and not listed twice. On
    /// error the operands lifted here are handed to the sweeper.
    fn compose(
        &mut self,
        acts: Vec<Act>,
        kind: impl FnOnce(&[ActionId]) -> ActionKind,
    ) -> SimResult<ActionId> {
        let mut operands = Vec::with_capacity(acts.len());
        let mut fresh = Vec::new();
        for act in acts {
            let lifted = match act {
                Act::Action(id) => self.node(id).map(|_| id),
                other => self.lift(other).map(|id| {
                    fresh.push(id);
                    id
                }),
            };
            let checked = lifted.and_then(|id| {
                if self.node(id)?.parent.is_some() || operands.contains(&id) {
                    Err(SimError::AlreadyLinked(id))
                } else {
                    Ok(id)
                }
            });
            match checked {
                Ok(id) => operands.push(id),
                Err(e) => {
                    self.graveyard.extend(fresh);
                    return Err(e);
                }
            }
        }
        let id = self.insert_action(kind(&operands));
        for operand in &operands {
            self.link(*operand, id)?;
        }
        Ok(id)
    }

    /// Converts anything action-like into an action handle.
    pub fn lift(&mut self, act: impl Into<Act>) -> SimResult<ActionId> {
        match act.into() {
            Act::Action(id) => self.node(id).map(|_| id),
            Act::Delay(duration) => self.delay(duration),
            Act::Body(body) => Ok(self.insert_action(ActionKind::Chain(ChainState::once(body)))),
        }
    }

    /// An action that succeeds once `duration` of simulated time has elapsed.
    pub fn delay(&mut self, duration: Time) -> SimResult<ActionId> {
        self.delay_with_priority(duration, 0)
    }

    /// A delay whose event resolves ahead of lower priorities in its instant.
    pub fn delay_with_priority(&mut self, duration: Time, priority: Priority) -> SimResult<ActionId> {
        if !duration.is_finite() || duration < 0.0 {
            return Err(SimError::InvalidDuration(duration));
        }
        Ok(self.insert_action(ActionKind::Delay {
            duration,
            priority,
            event: None,
        }))
    }

    /// An action resolved only by an explicit `succeed`/`fail` call.
    pub fn request(&mut self) -> ActionId {
        self.insert_action(ActionKind::Request)
    }

    /// A one-shot chain driving the closure `body`.
    pub fn chain<F>(&mut self, body: F) -> ActionId
    where
        F: FnMut(&mut Simulator, Resume) -> SimResult<Step> + 'static,
    {
        self.chain_body(Box::new(body))
    }

    /// A one-shot chain driving an arbitrary body.
    pub fn chain_body(&mut self, body: Box<dyn Body>) -> ActionId {
        self.insert_action(ActionKind::Chain(ChainState::once(body)))
    }

    /// A restartable chain: every start builds a fresh body from `factory`.
    pub fn chain_with<B, F>(&mut self, mut factory: F) -> ActionId
    where
        B: FnMut(&mut Simulator, Resume) -> SimResult<Step> + 'static,
        F: FnMut() -> B + 'static,
    {
        let factory = move || -> Box<dyn Body> { Box::new(factory()) };
        self.insert_action(ActionKind::Chain(ChainState::restartable(Box::new(factory))))
    }

    /// Runs the operands one at a time, in order.
    pub fn sequence(&mut self, acts: impl IntoIterator<Item = Act>) -> SimResult<ActionId> {
        self.compose(acts.into_iter().collect(), |ops| ActionKind::Sequence {
            operands: ops.to_vec(),
            cursor: 0,
            tally: Tally::default(),
        })
    }

    /// Runs the operands concurrently under the given policy.
    pub fn multary(&mut self, mode: Mode, acts: impl IntoIterator<Item = Act>) -> SimResult<ActionId> {
        self.compose(acts.into_iter().collect(), |ops| ActionKind::Multary {
            mode,
            operands: ops.to_vec(),
            tally: Tally::default(),
        })
    }

    pub fn all(&mut self, acts: impl IntoIterator<Item = Act>) -> SimResult<ActionId> {
        self.multary(Mode::All, acts)
    }

    pub fn any(&mut self, acts: impl IntoIterator<Item = Act>) -> SimResult<ActionId> {
        self.multary(Mode::Any, acts)
    }

    pub fn one(&mut self, acts: impl IntoIterator<Item = Act>) -> SimResult<ActionId> {
        self.multary(Mode::One, acts)
    }

    pub fn and(&mut self, a: impl Into<Act>, b: impl Into<Act>) -> SimResult<ActionId> {
        self.multary(Mode::All, [a.into(), b.into()])
    }

    pub fn or(&mut self, a: impl Into<Act>, b: impl Into<Act>) -> SimResult<ActionId> {
        self.multary(Mode::Any, [a.into(), b.into()])
    }

    pub fn xor(&mut self, a: impl Into<Act>, b: impl Into<Act>) -> SimResult<ActionId> {
        self.multary(Mode::One, [a.into(), b.into()])
    }

    /// Inverts the outcome of `operand`.
    pub fn not(&mut self, operand: impl Into<Act>) -> SimResult<ActionId> {
        self.compose(vec![operand.into()], |ops| ActionKind::Not { operand: ops[0] })
    }

    /// Re-deploys `operand` after each success until it has succeeded `times` times.
    ///
    /// With `times` of zero the repeat succeeds as soon as it starts.
    pub fn repeat(&mut self, operand: impl Into<Act>, times: u32) -> SimResult<ActionId> {
        self.repeat_inner(operand.into(), Some(times))
    }

    /// Re-deploys `operand` after each success, until it fails or is cancelled.
    pub fn forever(&mut self, operand: impl Into<Act>) -> SimResult<ActionId> {
        self.repeat_inner(operand.into(), None)
    }

    fn repeat_inner(&mut self, operand: Act, times: Option<u32>) -> SimResult<ActionId> {
        self.compose(vec![operand], |ops| ActionKind::Repeat {
            operand: ops[0],
            times,
            count: 0,
            driving: false,
            rerun: false,
        })
    }

    /// Races `escape` against `main`.
    ///
    /// If `main` resolves first the whole mirrors it and `escape` is
    /// cancelled. If `escape` resolves first the whole fails (reneges) and
    /// `main` is cancelled.
    pub fn unless(&mut self, escape: impl Into<Act>, main: impl Into<Act>) -> SimResult<ActionId> {
        self.compose(vec![escape.into(), main.into()], |ops| ActionKind::Unless {
            escape: ops[0],
            main: ops[1],
        })
    }

    /// Runs `hooks` around the resolution of `operand` without altering it.
    pub fn callback(&mut self, operand: impl Into<Act>, hooks: Hooks) -> SimResult<ActionId> {
        self.compose(vec![operand.into()], |ops| ActionKind::Callback {
            operand: ops[0],
            hooks,
        })
    }

    /// An action that mirrors the eventual resolution of `target`.
    pub fn observe(&mut self, target: ActionId) -> SimResult<ActionId> {
        self.node(target)?;
        Ok(self.insert_action(ActionKind::Observer { target }))
    }
}
