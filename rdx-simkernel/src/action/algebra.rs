//! The action lifecycle: start, cancel, resolve, and the combinator rules.
//!
//! Resolution is synchronous and depth-first. Resolving an action first
//! retracts whatever it still has deployed, then notifies its parent, then
//! its observers. Each parent reacts to exactly one child notice per call.

use super::chain::Resume;
use super::{ActionKind, ActionNode, Hook, Tally};
use crate::common::{ActionId, EntityId, Phase, Status, Value};
use crate::engine::Simulator;
use crate::error::{SimError, SimResult};
use crate::stack::Activation;
use tracing::trace;

/// What a node does when it deploys, decided while the arena is borrowed.
enum Deploy {
    Schedule { duration: f64, priority: i32 },
    Idle,
    Chain,
    Sequence(Option<ActionId>),
    Concurrent(Vec<ActionId>, bool),
    Operand(ActionId),
    Settled(bool),
    Repeat,
    Race(ActionId, ActionId),
    Callback(ActionId),
    Listen,
    Signal,
    Observe(ActionId),
}

/// How a parent reacts to a child notice.
enum Reaction {
    Nothing,
    Drive(Resume),
    Start(ActionId),
    Resolve(bool, Value),
    ResolveWith(bool, ActionId),
    Rerun,
    Hook(Option<Hook>, bool, Value),
}

// Inspection.
impl Simulator {
    pub(crate) fn node(&self, id: ActionId) -> SimResult<&ActionNode> {
        self.actions.get(id).ok_or(SimError::UnknownAction(id))
    }

    pub(crate) fn node_mut(&mut self, id: ActionId) -> SimResult<&mut ActionNode> {
        self.actions.get_mut(id).ok_or(SimError::UnknownAction(id))
    }

    /// Completion status of an action.
    pub fn status(&self, id: ActionId) -> SimResult<Status> {
        self.node(id).map(|n| n.status)
    }

    /// Deployment phase of an action.
    pub fn phase(&self, id: ActionId) -> SimResult<Phase> {
        self.node(id).map(|n| n.phase)
    }

    /// The value an action resolved with (empty while pending).
    pub fn value(&self, id: ActionId) -> SimResult<Value> {
        self.node(id).map(|n| n.value.clone())
    }

    pub fn owner(&self, id: ActionId) -> SimResult<Option<EntityId>> {
        self.node(id).map(|n| n.owner)
    }

    pub fn parent(&self, id: ActionId) -> SimResult<Option<ActionId>> {
        self.node(id).map(|n| n.parent)
    }

    /// Operand bookkeeping of a `Sequence`, `And`, `Or` or `Xor`.
    pub fn tally(&self, id: ActionId) -> Option<&Tally> {
        match &self.actions.get(id)?.kind {
            ActionKind::Sequence { tally, .. } | ActionKind::Multary { tally, .. } => Some(tally),
            _ => None,
        }
    }

    /// Returns `true` if the action is pending and deployed (or deploying).
    pub fn is_active(&self, id: ActionId) -> bool {
        self.actions
            .get(id)
            .map_or(false, |n| n.status == Status::Pending && n.phase != Phase::Undeployed)
    }

    /// Number of live actions in the arena.
    pub fn action_count(&self) -> usize {
        self.actions.len()
    }

    pub(crate) fn describe(&self, id: ActionId) -> String {
        match self.actions.get(id) {
            Some(node) => node.kind.label(),
            None => format!("<swept {:?}>", id),
        }
    }

    pub(crate) fn trace_push(&mut self, kind: Activation, id: ActionId) {
        if !self.stack.is_enabled() {
            return;
        }
        let label = self.describe(id);
        let owner = self
            .actions
            .get(id)
            .and_then(|n| n.owner)
            .and_then(|o| self.path(o).ok());
        self.stack.push(kind, &label, owner.as_deref());
    }
}

// Lifecycle.
impl Simulator {
    /// Attaches an owner, recursively into owned children.
    pub fn bind(&mut self, id: ActionId, owner: EntityId) -> SimResult<()> {
        let node = self.node_mut(id)?;
        match node.owner {
            Some(current) if current != owner => {
                return Err(SimError::OwnerConflict { action: id, owner: current })
            }
            Some(_) => {}
            None => node.owner = Some(owner),
        }
        for child in node.kind.children() {
            self.bind(child, owner)?;
        }
        Ok(())
    }

    /// Attaches a parent without resolving anything.
    pub fn link(&mut self, id: ActionId, parent: ActionId) -> SimResult<()> {
        self.node(parent)?;
        let node = self.node_mut(id)?;
        match node.parent {
            Some(current) if current != parent => Err(SimError::AlreadyLinked(id)),
            _ => {
                node.parent = Some(parent);
                Ok(())
            }
        }
    }

    /// Deploys an action.
    ///
    /// A no-op if the action is already pending and deployed. Otherwise
    /// transient state is reset and the deployment effect runs; the action
    /// ends up deployed unless it resolved synchronously.
    pub fn start(&mut self, id: ActionId) -> SimResult<()> {
        let node = self.node(id)?;
        if node.status == Status::Pending && node.phase != Phase::Undeployed {
            return Ok(());
        }
        self.reset_transient(id)?;
        self.node_mut(id)?.phase = Phase::Deploying;
        self.trace_push(Activation::Start, id);
        trace!("start {}", self.describe(id));
        let outcome = self.deploy(id);
        self.stack.pop();
        outcome?;
        if let Some(node) = self.actions.get_mut(id) {
            if node.status == Status::Pending && node.phase == Phase::Deploying {
                node.phase = Phase::Deployed;
            }
        }
        Ok(())
    }

    /// Retracts a deployed action. Its status stays pending.
    pub fn cancel(&mut self, id: ActionId) -> SimResult<()> {
        let node = self.node_mut(id)?;
        if node.phase == Phase::Undeployed {
            return Ok(());
        }
        node.phase = Phase::Undeployed;
        self.trace_push(Activation::Cancel, id);
        trace!("cancel {}", self.describe(id));
        let outcome = self.retract(id);
        self.stack.pop();
        outcome
    }

    /// Resolves an action as succeeded.
    ///
    /// Only a deployed, pending action can resolve. A cancelled or never
    /// started action fails with `NotDeployed`, a resolved one with
    /// `AlreadyResolved`.
    pub fn succeed(&mut self, id: ActionId, value: Value) -> SimResult<()> {
        self.resolve(id, true, value)
    }

    /// Resolves an action as failed.
    pub fn fail(&mut self, id: ActionId, value: Value) -> SimResult<()> {
        self.resolve(id, false, value)
    }

    pub(crate) fn resolve(&mut self, id: ActionId, ok: bool, value: Value) -> SimResult<()> {
        let node = self.node_mut(id)?;
        if node.status != Status::Pending {
            return Err(SimError::AlreadyResolved(id));
        }
        if node.phase == Phase::Undeployed {
            return Err(SimError::NotDeployed(id));
        }
        node.status = if ok { Status::Succeeded } else { Status::Failed };
        node.value = value.clone();
        node.phase = Phase::Undeployed;
        let parent = node.parent;
        let observers = std::mem::take(&mut node.observers);

        self.trace_push(if ok { Activation::Succeed } else { Activation::Fail }, id);
        let outcome = self.notify(id, parent, observers, ok, value);
        self.stack.pop();
        outcome
    }

    fn notify(
        &mut self,
        id: ActionId,
        parent: Option<ActionId>,
        observers: Vec<ActionId>,
        ok: bool,
        value: Value,
    ) -> SimResult<()> {
        self.retract(id)?;
        if let Some(parent) = parent {
            self.child_resolved(parent, id, ok, value.clone())?;
        }
        for observer in observers {
            if self.is_active(observer) {
                self.resolve(observer, ok, value.clone())?;
            }
        }
        Ok(())
    }

    /// Cancels an action and hands it to the sweeper.
    pub(crate) fn release(&mut self, id: ActionId) -> SimResult<()> {
        if self.actions.contains_key(id) {
            self.cancel(id)?;
            self.graveyard.push(id);
        }
        Ok(())
    }

    /// Drops released actions and everything they own.
    pub(crate) fn sweep(&mut self) {
        while let Some(id) = self.graveyard.pop() {
            if let Some(node) = self.actions.remove(id) {
                self.graveyard.extend(node.kind.children());
            }
        }
    }

    fn reset_transient(&mut self, id: ActionId) -> SimResult<()> {
        let node = self.node_mut(id)?;
        node.status = Status::Pending;
        node.value = Value::none();
        match &mut node.kind {
            ActionKind::Chain(state) => state.rewind(id)?,
            ActionKind::Sequence { operands, cursor, tally } => {
                *cursor = 0;
                tally.reset(operands);
            }
            ActionKind::Multary { operands, tally, .. } => tally.reset(operands),
            ActionKind::Repeat { count, driving, rerun, .. } => {
                *count = 0;
                *driving = false;
                *rerun = false;
            }
            ActionKind::Signal { woken, .. } => *woken = 0,
            _ => {}
        }
        Ok(())
    }

    fn deploy(&mut self, id: ActionId) -> SimResult<()> {
        let plan = match &self.node(id)?.kind {
            ActionKind::Delay { duration, priority, .. } => Deploy::Schedule {
                duration: *duration,
                priority: *priority,
            },
            ActionKind::Request => Deploy::Idle,
            ActionKind::Chain(_) => Deploy::Chain,
            ActionKind::Sequence { operands, .. } => Deploy::Sequence(operands.first().copied()),
            ActionKind::Multary { mode, operands, .. } => {
                Deploy::Concurrent(operands.clone(), mode.vacuous())
            }
            ActionKind::Not { operand } => Deploy::Operand(*operand),
            ActionKind::Repeat { times: Some(0), .. } => Deploy::Settled(true),
            ActionKind::Repeat { .. } => Deploy::Repeat,
            ActionKind::Unless { escape, main } => Deploy::Race(*escape, *main),
            ActionKind::Callback { operand, .. } => Deploy::Callback(*operand),
            ActionKind::Listener { .. } => Deploy::Listen,
            ActionKind::Signal { .. } => Deploy::Signal,
            ActionKind::Observer { target } => Deploy::Observe(*target),
        };

        match plan {
            Deploy::Schedule { duration, priority } => {
                let now = self.clock.now();
                let date = self.clock.convert(now + duration).max(now);
                let event = self.schedule.insert(id, date, priority);
                if let ActionKind::Delay { event: slot, .. } = &mut self.node_mut(id)?.kind {
                    *slot = Some(event);
                }
                Ok(())
            }
            Deploy::Idle => Ok(()),
            Deploy::Chain => self.drive_chain(id, Resume::Start),
            Deploy::Sequence(Some(first)) => self.start(first),
            Deploy::Sequence(None) => self.resolve(id, true, Value::none()),
            Deploy::Concurrent(operands, vacuous) => {
                if operands.is_empty() {
                    return self.resolve(id, vacuous, Value::none());
                }
                for operand in operands {
                    if !self.is_active(id) {
                        break;
                    }
                    self.start(operand)?;
                }
                Ok(())
            }
            Deploy::Operand(operand) => self.start(operand),
            Deploy::Settled(ok) => self.resolve(id, ok, Value::none()),
            Deploy::Repeat => self.drive_repeat(id),
            Deploy::Race(escape, main) => {
                self.start(escape)?;
                if self.is_active(id) {
                    self.start(main)?;
                }
                Ok(())
            }
            Deploy::Callback(operand) => {
                self.run_hook(id, HookSlot::Start, &Value::none())?;
                if self.is_active(id) {
                    self.start(operand)?;
                }
                Ok(())
            }
            Deploy::Listen => self.subscribe(id),
            Deploy::Signal => self.emit_signal(id),
            Deploy::Observe(target) => {
                let target_node = self.node(target)?;
                let status = target_node.status;
                let value = target_node.value.clone();
                match status {
                    Status::Pending => {
                        self.node_mut(target)?.observers.push(id);
                        Ok(())
                    }
                    Status::Succeeded => self.resolve(id, true, value),
                    Status::Failed => self.resolve(id, false, value),
                }
            }
        }
    }

    /// Undoes whatever the deployment registered and cancels owned children.
    fn retract(&mut self, id: ActionId) -> SimResult<()> {
        let node = self.node_mut(id)?;
        let mut event = None;
        let mut listener = false;
        let mut observed = None;
        match &mut node.kind {
            ActionKind::Delay { event: slot, .. } => event = slot.take(),
            ActionKind::Listener { .. } => listener = true,
            ActionKind::Observer { target } => observed = Some(*target),
            ActionKind::Chain(state) => state.queued = None,
            ActionKind::Repeat { rerun, .. } => *rerun = false,
            _ => {}
        }
        let children = node.kind.children();

        if let Some(event) = event {
            self.schedule.remove(event);
        }
        if listener {
            self.unsubscribe(id);
        }
        if let Some(target) = observed {
            if let Some(target) = self.actions.get_mut(target) {
                target.observers.retain(|o| *o != id);
            }
        }
        for child in children {
            if self.actions.contains_key(child) {
                self.cancel(child)?;
            }
        }
        Ok(())
    }

    fn child_resolved(
        &mut self,
        parent: ActionId,
        child: ActionId,
        ok: bool,
        value: Value,
    ) -> SimResult<()> {
        if !self.is_active(parent) {
            // Stale notice: the parent was already cancelled or resolved.
            return Ok(());
        }
        let foreign = SimError::ForeignChild { parent, child };
        let node = self.node_mut(parent)?;
        let reaction = match &mut node.kind {
            ActionKind::Chain(state) => {
                if state.current != Some(child) {
                    return Err(foreign);
                }
                match state.offer(Resume::from_outcome(ok, value)) {
                    Some(resume) => Reaction::Drive(resume),
                    None => Reaction::Nothing,
                }
            }
            ActionKind::Sequence { operands, cursor, tally } => {
                if operands.get(*cursor) != Some(&child) || !tally.settle(child, ok) {
                    return Err(foreign);
                }
                if !ok {
                    Reaction::Resolve(false, value)
                } else {
                    *cursor += 1;
                    match operands.get(*cursor) {
                        Some(next) => Reaction::Start(*next),
                        None => Reaction::Resolve(true, value),
                    }
                }
            }
            ActionKind::Multary { mode, tally, .. } => {
                if !tally.settle(child, ok) {
                    return Err(foreign);
                }
                match mode.verdict(tally, ok) {
                    None => Reaction::Nothing,
                    Some(true) if !ok => match tally.succeeded.first() {
                        Some(winner) => Reaction::ResolveWith(true, *winner),
                        None => Reaction::Resolve(true, value),
                    },
                    Some(verdict) => Reaction::Resolve(verdict, value),
                }
            }
            ActionKind::Not { operand } if *operand == child => Reaction::Resolve(!ok, value),
            ActionKind::Repeat { operand, times, count, driving, rerun } if *operand == child => {
                if !ok {
                    Reaction::Resolve(false, value)
                } else {
                    *count += 1;
                    if times.map_or(false, |n| *count >= n) {
                        Reaction::Resolve(true, value)
                    } else if *driving {
                        *rerun = true;
                        Reaction::Nothing
                    } else {
                        Reaction::Rerun
                    }
                }
            }
            ActionKind::Unless { escape, main } => {
                if *main == child {
                    Reaction::Resolve(ok, value)
                } else if *escape == child {
                    Reaction::Resolve(false, value)
                } else {
                    return Err(foreign);
                }
            }
            ActionKind::Callback { operand, hooks } if *operand == child => {
                let hook = if ok { hooks.on_succeed.take() } else { hooks.on_fail.take() };
                Reaction::Hook(hook, ok, value)
            }
            _ => return Err(foreign),
        };

        match reaction {
            Reaction::Nothing => Ok(()),
            Reaction::Drive(resume) => self.drive_chain(parent, resume),
            Reaction::Start(next) => self.start(next),
            Reaction::Resolve(verdict, value) => self.resolve(parent, verdict, value),
            Reaction::ResolveWith(verdict, source) => {
                let value = self.node(source)?.value.clone();
                self.resolve(parent, verdict, value)
            }
            Reaction::Rerun => self.drive_repeat(parent),
            Reaction::Hook(hook, ok, value) => {
                if let Some(mut hook) = hook {
                    let outcome = hook(self, &value);
                    self.restore_hook(parent, hook, if ok { HookSlot::Succeed } else { HookSlot::Fail });
                    outcome?;
                }
                if self.is_active(parent) {
                    self.resolve(parent, ok, value)?;
                }
                Ok(())
            }
        }
    }

    /// Restarts a `Repeat` operand until it suspends or the repeat resolves.
    fn drive_repeat(&mut self, id: ActionId) -> SimResult<()> {
        let operand = match &mut self.node_mut(id)?.kind {
            ActionKind::Repeat { operand, driving, .. } => {
                *driving = true;
                *operand
            }
            _ => return Err(SimError::UnknownAction(id)),
        };
        let outcome = loop {
            if let Err(e) = self.start(operand) {
                break Err(e);
            }
            if !self.is_active(id) {
                break Ok(());
            }
            let again = match &mut self.node_mut(id)?.kind {
                ActionKind::Repeat { rerun, .. } => std::mem::take(rerun),
                _ => false,
            };
            if !again {
                break Ok(());
            }
        };
        if let Some(node) = self.actions.get_mut(id) {
            if let ActionKind::Repeat { driving, .. } = &mut node.kind {
                *driving = false;
            }
        }
        outcome
    }

    fn run_hook(&mut self, id: ActionId, slot: HookSlot, value: &Value) -> SimResult<()> {
        let hook = match &mut self.node_mut(id)?.kind {
            ActionKind::Callback { hooks, .. } => match slot {
                HookSlot::Start => hooks.on_start.take(),
                HookSlot::Succeed => hooks.on_succeed.take(),
                HookSlot::Fail => hooks.on_fail.take(),
            },
            _ => None,
        };
        if let Some(mut hook) = hook {
            let outcome = hook(self, value);
            self.restore_hook(id, hook, slot);
            outcome?;
        }
        Ok(())
    }

    fn restore_hook(&mut self, id: ActionId, hook: Hook, slot: HookSlot) {
        if let Some(node) = self.actions.get_mut(id) {
            if let ActionKind::Callback { hooks, .. } = &mut node.kind {
                let target = match slot {
                    HookSlot::Start => &mut hooks.on_start,
                    HookSlot::Succeed => &mut hooks.on_succeed,
                    HookSlot::Fail => &mut hooks.on_fail,
                };
                *target = Some(hook);
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum HookSlot {
    Start,
    Succeed,
    Fail,
}
