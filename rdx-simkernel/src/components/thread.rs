//! Thread behaviour: one root action at a time, guarded start/stop.

use super::{EntityNode, HookKind, Thread};
use crate::action::Act;
use crate::common::{ActionId, EntityId};
use crate::engine::Simulator;
use crate::error::{SimError, SimResult};
use crate::stack::Activation;
use tracing::trace;

impl Simulator {
    pub(crate) fn entity_node(&self, entity: EntityId) -> SimResult<&EntityNode> {
        self.entities.get(entity).ok_or(SimError::UnknownEntity(entity))
    }

    pub(crate) fn entity_node_mut(&mut self, entity: EntityId) -> SimResult<&mut EntityNode> {
        self.entities
            .get_mut(entity)
            .ok_or(SimError::UnknownEntity(entity))
    }

    /// The thread state of an entity.
    pub fn thread(&self, entity: EntityId) -> SimResult<&Thread> {
        self.entity_node(entity).map(|n| &n.thread)
    }

    pub fn is_running(&self, entity: EntityId) -> bool {
        self.entities
            .get(entity)
            .map_or(false, |n| n.thread.running)
    }

    /// The entity's current root action, if any.
    pub fn root_action(&self, entity: EntityId) -> Option<ActionId> {
        self.entities.get(entity).and_then(|n| n.thread.root)
    }

    /// Makes `act` the entity's root action, replacing the previous one.
    ///
    /// Fails with `IdleExecution` if the entity is not running, and with
    /// `InvalidRoot` if the action already has a parent.
    pub fn execute(&mut self, entity: EntityId, act: impl Into<Act>) -> SimResult<ActionId> {
        if !self.entity_node(entity)?.thread.running {
            return Err(SimError::IdleExecution(entity));
        }
        let action = self.lift(act)?;
        if self.node(action)?.parent.is_some() {
            return Err(SimError::InvalidRoot(action));
        }
        let previous = self.entity_node_mut(entity)?.thread.root.take();
        if let Some(previous) = previous {
            if previous != action {
                self.release(previous)?;
            }
        }
        self.bind(action, entity)?;
        self.entity_node_mut(entity)?.thread.root = Some(action);

        self.trace_push(Activation::Execute, action);
        let outcome = self.start(action);
        self.stack.pop();
        outcome.map(|_| action)
    }

    /// Starts the thread with its `initialize` hook.
    pub fn start_thread(&mut self, entity: EntityId) -> SimResult<()> {
        self.start_thread_with(entity, |sim, me| sim.call_hook(me, HookKind::Initialize))
    }

    /// Starts the thread with a custom start function.
    ///
    /// A no-op if the thread is already running or mid-transition. If the
    /// function returns an action, it becomes the thread's root.
    pub fn start_thread_with<F>(&mut self, entity: EntityId, start_fnc: F) -> SimResult<()>
    where
        F: FnOnce(&mut Simulator, EntityId) -> SimResult<Option<Act>>,
    {
        let thread = &mut self.entity_node_mut(entity)?.thread;
        if thread.running || thread.locked {
            return Ok(());
        }
        thread.locked = true;
        thread.running = true;
        let previous = thread.root.take();
        trace!("thread {:?} starting", entity);

        let outcome = self.run_transition(entity, previous, start_fnc);
        if let Some(node) = self.entities.get_mut(entity) {
            node.thread.locked = false;
        }
        outcome
    }

    /// Stops the thread with its `finalize` hook.
    pub fn stop_thread(&mut self, entity: EntityId) -> SimResult<()> {
        self.stop_thread_with(entity, |sim, me| sim.call_hook(me, HookKind::Finalize))
    }

    /// Stops the thread with a custom stop function.
    ///
    /// The root action is cancelled before `stop_fnc` runs. An action
    /// returned by `stop_fnc` is executed while the thread is still
    /// running, then cancelled along with the thread going idle.
    pub fn stop_thread_with<F>(&mut self, entity: EntityId, stop_fnc: F) -> SimResult<()>
    where
        F: FnOnce(&mut Simulator, EntityId) -> SimResult<Option<Act>>,
    {
        let thread = &mut self.entity_node_mut(entity)?.thread;
        if !thread.running || thread.locked {
            return Ok(());
        }
        thread.locked = true;
        let previous = thread.root.take();
        trace!("thread {:?} stopping", entity);

        let outcome = self.run_transition(entity, previous, stop_fnc);
        let last = match self.entities.get_mut(entity) {
            Some(node) => {
                node.thread.running = false;
                node.thread.locked = false;
                node.thread.root.take()
            }
            None => None,
        };
        if let Some(last) = last {
            self.release(last)?;
        }
        outcome
    }

    fn run_transition<F>(
        &mut self,
        entity: EntityId,
        previous: Option<ActionId>,
        transition: F,
    ) -> SimResult<()>
    where
        F: FnOnce(&mut Simulator, EntityId) -> SimResult<Option<Act>>,
    {
        if let Some(previous) = previous {
            self.release(previous)?;
        }
        if let Some(act) = transition(self, entity)? {
            self.execute(entity, act)?;
        }
        Ok(())
    }
}
