//! Chains: actions driven by a resumable body.
//!
//! A body is an explicit state machine. Each time it is resumed it either
//! yields the next child action to wait on, or terminates. The chain
//! becomes the parent of whichever child is current and resumes the body
//! with that child's outcome once it resolves.
//!
//! Children that resolve synchronously while the chain is starting them are
//! queued and handled by the same driving loop, so a long run of instant
//! children never deepens the call stack.

use super::{Act, ActionKind};
use crate::common::{ActionId, Value};
use crate::engine::Simulator;
use crate::error::{SimError, SimResult};

/// What a body is resumed with.
#[derive(Debug, Clone)]
pub enum Resume {
    /// First resumption after the chain starts.
    Start,
    /// The last yielded child succeeded with this value.
    Succeeded(Value),
    /// The last yielded child failed with this value.
    Failed(Value),
}

impl Resume {
    pub(crate) fn from_outcome(ok: bool, value: Value) -> Self {
        if ok {
            Resume::Succeeded(value)
        } else {
            Resume::Failed(value)
        }
    }

    /// The child's value, if this resumption follows a child.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Resume::Start => None,
            Resume::Succeeded(v) | Resume::Failed(v) => Some(v),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Resume::Failed(_))
    }
}

/// What a body does next.
pub enum Step {
    /// Suspend on this action.
    Yield(Act),
    /// Fall through: the chain succeeds with no value.
    Done,
    /// Terminate the chain as succeeded with a final result.
    Succeed(Value),
    /// Terminate the chain as failed.
    Fail(Value),
}

impl Step {
    /// Shorthand for `Step::Yield(act.into())`.
    pub fn wait(act: impl Into<Act>) -> Self {
        Step::Yield(act.into())
    }
}

/// The logic a chain drives.
pub trait Body {
    fn resume(&mut self, sim: &mut Simulator, input: Resume) -> SimResult<Step>;
}

impl<F> Body for F
where
    F: FnMut(&mut Simulator, Resume) -> SimResult<Step>,
{
    fn resume(&mut self, sim: &mut Simulator, input: Resume) -> SimResult<Step> {
        (self)(sim, input)
    }
}

type BodyFactory = Box<dyn FnMut() -> Box<dyn Body>>;

pub(crate) struct ChainState {
    factory: Option<BodyFactory>,
    body: Option<Box<dyn Body>>,
    spent: bool,
    pub(crate) current: Option<ActionId>,
    driving: bool,
    pub(crate) queued: Option<Resume>,
}

impl ChainState {
    pub(crate) fn once(body: Box<dyn Body>) -> Self {
        Self {
            factory: None,
            body: Some(body),
            spent: false,
            current: None,
            driving: false,
            queued: None,
        }
    }

    pub(crate) fn restartable(factory: BodyFactory) -> Self {
        Self {
            factory: Some(factory),
            body: None,
            spent: false,
            current: None,
            driving: false,
            queued: None,
        }
    }

    /// Prepares the body for a new deployment.
    ///
    /// The previous child stays in `current` until the body yields a
    /// different one, so re-yielding it is allowed.
    pub(crate) fn rewind(&mut self, id: ActionId) -> SimResult<()> {
        self.driving = false;
        self.queued = None;
        match self.factory.as_mut() {
            Some(factory) => self.body = Some(factory()),
            None if self.spent => return Err(SimError::NotRestartable(id)),
            None => {}
        }
        self.spent = true;
        Ok(())
    }

    /// Queues a child outcome if the driving loop is active.
    ///
    /// Returns the outcome back when the caller has to drive the body itself.
    pub(crate) fn offer(&mut self, outcome: Resume) -> Option<Resume> {
        if self.driving {
            self.queued = Some(outcome);
            None
        } else {
            Some(outcome)
        }
    }
}

impl Simulator {
    fn chain_state(&mut self, id: ActionId) -> SimResult<&mut ChainState> {
        match &mut self.node_mut(id)?.kind {
            ActionKind::Chain(state) => Ok(state),
            _ => Err(SimError::UnknownAction(id)),
        }
    }

    /// Resumes the body of chain `id` and keeps it running until it
    /// suspends on a pending child or terminates.
    pub(crate) fn drive_chain(&mut self, id: ActionId, input: Resume) -> SimResult<()> {
        self.chain_state(id)?.driving = true;
        let outcome = self.drive_loop(id, input);
        if let Ok(state) = self.chain_state(id) {
            state.driving = false;
            state.queued = None;
        }
        outcome
    }

    fn drive_loop(&mut self, id: ActionId, mut input: Resume) -> SimResult<()> {
        loop {
            let mut body = match self.chain_state(id)?.body.take() {
                Some(body) => body,
                None => return Ok(()),
            };
            let step = body.resume(self, input);
            self.chain_state(id)?.body = Some(body);
            let step = step?;
            if !self.is_active(id) {
                // The body's side effects cancelled or resolved this chain.
                return Ok(());
            }
            match step {
                Step::Yield(act) => {
                    let child = self.lift(act)?;
                    let previous = self.chain_state(id)?.current;
                    if previous != Some(child) {
                        self.link(child, id)?;
                        if let Some(previous) = previous {
                            self.release(previous)?;
                        }
                    }
                    if let Some(owner) = self.node(id)?.owner {
                        self.bind(child, owner)?;
                    }
                    self.chain_state(id)?.current = Some(child);
                    self.start(child)?;
                    if !self.is_active(id) {
                        return Ok(());
                    }
                    match self.chain_state(id)?.queued.take() {
                        Some(next) => input = next,
                        None => return Ok(()),
                    }
                }
                Step::Done => return self.resolve(id, true, Value::none()),
                Step::Succeed(value) => return self.resolve(id, true, value),
                Step::Fail(value) => return self.resolve(id, false, value),
            }
        }
    }
}
