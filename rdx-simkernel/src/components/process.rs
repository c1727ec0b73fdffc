//! Process behaviour: named hierarchical composition of entities.
//!
//! Starting a process starts its members in two groups around itself. The
//! positive group (priority > 0) goes first, highest priority first; the
//! rest goes after the process itself, lowest priority first. Members of
//! equal priority are shuffled with the simulator's random source before
//! the stable sort, so no model outcome depends on declaration order.

use super::{Behavior, Component, EntityNode, HookKind};
use crate::common::{EntityId, Priority};
use crate::engine::Simulator;
use crate::error::{SimError, SimResult};
use crate::stack::Activation;
use rand::seq::SliceRandom;
use tracing::debug;

/// Which priority drives a group ordering.
#[derive(Debug, Clone, Copy)]
enum Transition {
    Start,
    Stop,
}

impl Simulator {
    /// Creates an entity that is not yet part of the tree.
    pub fn create_entity(&mut self, name: &str, behavior: impl Behavior + 'static) -> EntityId {
        self.entities
            .insert(EntityNode::new(name, Box::new(behavior)))
    }

    /// Creates an entity as a member of the root process.
    pub fn spawn(&mut self, name: &str, behavior: impl Behavior + 'static) -> SimResult<EntityId> {
        let root = self.root;
        self.spawn_in(root, name, behavior)
    }

    /// Creates an entity as a member of `parent`.
    pub fn spawn_in(
        &mut self,
        parent: EntityId,
        name: &str,
        behavior: impl Behavior + 'static,
    ) -> SimResult<EntityId> {
        self.entity_node(parent)?;
        let child = self.create_entity(name, behavior);
        self.attach(parent, child)?;
        Ok(child)
    }

    /// Makes `child` a member of `parent`, detaching it from any previous parent.
    pub fn attach(&mut self, parent: EntityId, child: EntityId) -> SimResult<()> {
        self.entity_node(child)?;
        let mut cursor = Some(parent);
        while let Some(ancestor) = cursor {
            if ancestor == child {
                return Err(SimError::InvalidAttach { parent, child });
            }
            cursor = self.entity_node(ancestor)?.component.parent;
        }
        if let Some(previous) = self.entity_node(child)?.component.parent {
            if previous == parent {
                return Ok(());
            }
            self.entity_node_mut(previous)?
                .component
                .members
                .retain(|m| *m != child);
        }
        self.entity_node_mut(parent)?.component.members.push(child);
        self.entity_node_mut(child)?.component.parent = Some(parent);
        Ok(())
    }

    /// The root process every run starts from.
    pub fn root_entity(&self) -> EntityId {
        self.root
    }

    pub fn component(&self, entity: EntityId) -> SimResult<&Component> {
        self.entity_node(entity).map(|n| &n.component)
    }

    pub fn name(&self, entity: EntityId) -> SimResult<&str> {
        self.component(entity).map(|c| c.name.as_str())
    }

    pub fn members(&self, entity: EntityId) -> SimResult<&[EntityId]> {
        self.component(entity).map(|c| c.members.as_slice())
    }

    pub fn parent_of(&self, entity: EntityId) -> SimResult<Option<EntityId>> {
        self.component(entity).map(|c| c.parent)
    }

    /// Dotted name from the top of the tree, e.g. `root.bank.teller`.
    pub fn path(&self, entity: EntityId) -> SimResult<String> {
        let mut names = Vec::new();
        let mut cursor = Some(entity);
        while let Some(current) = cursor {
            let component = self.component(current)?;
            names.push(component.name.as_str());
            cursor = component.parent;
        }
        names.reverse();
        Ok(names.join("."))
    }

    pub fn set_initialize_priority(&mut self, entity: EntityId, priority: Priority) -> SimResult<()> {
        self.entity_node_mut(entity)?.component.initialize_priority = priority;
        Ok(())
    }

    pub fn set_finalize_priority(&mut self, entity: EntityId, priority: Priority) -> SimResult<()> {
        self.entity_node_mut(entity)?.component.finalize_priority = priority;
        Ok(())
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Starts an entity and, around it, all of its members.
    pub fn start_entity(&mut self, entity: EntityId) -> SimResult<()> {
        let (first, last) = self.grouped_members(entity, Transition::Start)?;
        for member in first {
            self.start_entity(member)?;
        }
        self.start_thread(entity)?;
        for member in last {
            self.start_entity(member)?;
        }
        Ok(())
    }

    /// Stops an entity and, around it, all of its members.
    pub fn stop_entity(&mut self, entity: EntityId) -> SimResult<()> {
        let (first, last) = self.grouped_members(entity, Transition::Stop)?;
        for member in first {
            self.stop_entity(member)?;
        }
        self.stop_thread(entity)?;
        for member in last {
            self.stop_entity(member)?;
        }
        Ok(())
    }

    /// Resets an idle entity and its whole subtree for a fresh run.
    ///
    /// The entity's own `reset` hook runs before any member is rewound.
    pub fn rewind(&mut self, entity: EntityId) -> SimResult<()> {
        let node = self.entity_node_mut(entity)?;
        if node.thread.running {
            return Err(SimError::RewindWhileRunning(entity));
        }
        let stale = node.thread.root.take();
        if let Some(stale) = stale {
            self.release(stale)?;
        }
        self.call_hook(entity, HookKind::Reset)?;
        let members = self.members(entity)?.to_vec();
        for member in members {
            self.rewind(member)?;
        }
        Ok(())
    }

    /// Starts `entity` during a run, as a member of the root if it has no
    /// parent yet. `who` is the entity the launch is attributed to.
    pub fn launch(&mut self, entity: EntityId, who: Option<EntityId>) -> SimResult<()> {
        if entity != self.root && self.parent_of(entity)?.is_none() {
            let root = self.root;
            self.attach(root, entity)?;
        }
        if self.stack.is_enabled() {
            let subject = self.path(entity)?;
            let by = match who {
                Some(who) => Some(self.path(who)?),
                None => None,
            };
            self.stack.push(Activation::Launch, &subject, by.as_deref());
        }
        debug!("launching {}", self.path(entity)?);
        let outcome = self.start_entity(entity);
        if self.stack.is_enabled() {
            self.stack.pop();
        }
        outcome
    }

    /// Splits the members into the group handled before the entity itself
    /// and the group handled after it, each in resolution order.
    fn grouped_members(
        &mut self,
        entity: EntityId,
        transition: Transition,
    ) -> SimResult<(Vec<EntityId>, Vec<EntityId>)> {
        let mut members: Vec<(Priority, EntityId)> = Vec::new();
        for member in self.members(entity)? {
            let component = self.component(*member)?;
            let priority = match transition {
                Transition::Start => component.initialize_priority,
                Transition::Stop => component.finalize_priority,
            };
            members.push((priority, *member));
        }
        // Drawn afresh on every transition, so the stop order of equal
        // priorities is independent of their start order.
        members.shuffle(&mut self.rng);

        let (mut first, mut last): (Vec<_>, Vec<_>) = members.into_iter().partition(|(p, _)| *p > 0);
        first.sort_by(|a, b| b.0.cmp(&a.0));
        last.sort_by(|a, b| a.0.cmp(&b.0));
        Ok((
            first.into_iter().map(|(_, m)| m).collect(),
            last.into_iter().map(|(_, m)| m).collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::Container;

    #[test]
    fn test_paths_follow_the_tree() {
        let mut sim = Simulator::default();
        let bank = sim.spawn("bank", Container).unwrap();
        let teller = sim.spawn_in(bank, "teller", Container).unwrap();
        assert_eq!(sim.path(teller).unwrap(), "root.bank.teller");
        assert_eq!(sim.members(bank).unwrap(), &[teller]);
        assert_eq!(sim.parent_of(teller).unwrap(), Some(bank));
    }

    #[test]
    fn test_attach_moves_between_parents() {
        let mut sim = Simulator::default();
        let a = sim.spawn("a", Container).unwrap();
        let b = sim.spawn("b", Container).unwrap();
        let x = sim.spawn_in(a, "x", Container).unwrap();
        sim.attach(b, x).unwrap();
        assert!(sim.members(a).unwrap().is_empty());
        assert_eq!(sim.path(x).unwrap(), "root.b.x");
    }

    #[test]
    fn test_attach_rejects_cycles() {
        let mut sim = Simulator::default();
        let a = sim.spawn("a", Container).unwrap();
        let b = sim.spawn_in(a, "b", Container).unwrap();
        let err = sim.attach(b, a).unwrap_err();
        assert!(matches!(err, SimError::InvalidAttach { .. }));
    }

    #[test]
    fn test_rewind_refuses_running_entity() {
        let mut sim = Simulator::default();
        let a = sim.spawn("a", Container).unwrap();
        sim.start_thread(a).unwrap();
        assert!(matches!(sim.rewind(a), Err(SimError::RewindWhileRunning(_))));
        sim.stop_thread(a).unwrap();
        assert!(sim.rewind(a).is_ok());
    }

    #[test]
    fn test_launch_attaches_orphans_to_root() {
        let mut sim = Simulator::default();
        let loose = sim.create_entity("loose", Container);
        sim.launch(loose, None).unwrap();
        assert_eq!(sim.parent_of(loose).unwrap(), Some(sim.root_entity()));
        assert!(sim.is_running(loose));
    }
}
