//! Contains the schedulable entities that bind model logic to the action algebra.
//!
//! An entity is composed of two parts: a `Thread` (the behaviour state
//! machine that runs one root action at a time) and a `Component` (its
//! place in the named hierarchy, with members and start/stop priorities).
//! The `Simulator` manages all entities in an arena; model code supplies a
//! `Behavior` with its `reset`, `initialize` and `finalize` hooks.

pub mod process;
pub mod thread;

use crate::action::Act;
use crate::common::{ActionId, EntityId, Priority};
use crate::engine::Simulator;
use crate::error::SimResult;

/// Model logic attached to an entity.
///
/// Every hook has a no-op default, so a pure container needs no code at all.
pub trait Behavior {
    /// Clears all per-run state. Called by `rewind` before a fresh run.
    fn reset(&mut self, _sim: &mut Simulator, _me: EntityId) -> SimResult<()> {
        Ok(())
    }

    /// Called when the entity starts. A returned action becomes its root.
    fn initialize(&mut self, _sim: &mut Simulator, _me: EntityId) -> SimResult<Option<Act>> {
        Ok(None)
    }

    /// Called when the entity stops. A returned action is executed before
    /// the entity goes idle, so only actions that resolve instantly matter.
    fn finalize(&mut self, _sim: &mut Simulator, _me: EntityId) -> SimResult<Option<Act>> {
        Ok(None)
    }
}

/// A behaviour with no logic of its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct Container;

impl Behavior for Container {}

/// Behaviour state machine of an entity.
#[derive(Debug, Default, Clone)]
pub struct Thread {
    pub(crate) running: bool,
    pub(crate) locked: bool,
    pub(crate) root: Option<ActionId>,
}

impl Thread {
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Returns `true` while a start or stop transition is in progress.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn root(&self) -> Option<ActionId> {
        self.root
    }
}

/// Position of an entity in the named hierarchy.
#[derive(Debug, Clone)]
pub struct Component {
    pub(crate) name: String,
    pub(crate) parent: Option<EntityId>,
    pub(crate) members: Vec<EntityId>,
    pub(crate) initialize_priority: Priority,
    pub(crate) finalize_priority: Priority,
}

impl Component {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parent: None,
            members: Vec::new(),
            initialize_priority: 0,
            finalize_priority: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<EntityId> {
        self.parent
    }

    pub fn members(&self) -> &[EntityId] {
        &self.members
    }

    pub fn initialize_priority(&self) -> Priority {
        self.initialize_priority
    }

    pub fn finalize_priority(&self) -> Priority {
        self.finalize_priority
    }
}

pub(crate) struct EntityNode {
    pub(crate) thread: Thread,
    pub(crate) component: Component,
    pub(crate) behavior: Option<Box<dyn Behavior>>,
}

impl EntityNode {
    pub(crate) fn new(name: &str, behavior: Box<dyn Behavior>) -> Self {
        Self {
            thread: Thread::default(),
            component: Component::new(name),
            behavior: Some(behavior),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum HookKind {
    Reset,
    Initialize,
    Finalize,
}

impl Simulator {
    /// Invokes a behaviour hook. The behaviour is taken out of its node for
    /// the duration of the call, so a hook may freely use the simulator.
    pub(crate) fn call_hook(&mut self, entity: EntityId, kind: HookKind) -> SimResult<Option<Act>> {
        let mut behavior = match self.entity_node_mut(entity)?.behavior.take() {
            Some(behavior) => behavior,
            None => return Ok(None),
        };
        let outcome = match kind {
            HookKind::Reset => behavior.reset(self, entity).map(|_| None),
            HookKind::Initialize => behavior.initialize(self, entity),
            HookKind::Finalize => behavior.finalize(self, entity),
        };
        if let Some(node) = self.entities.get_mut(entity) {
            node.behavior = Some(behavior);
        }
        outcome
    }
}
