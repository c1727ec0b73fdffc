//! Contains common, primitive types shared by every part of the kernel.
//!
//! This module defines the handle types used to identify actions, entities,
//! scheduled events and channels, plus the type-erased `Value` that actions
//! resolve with. Using distinct key types keeps an `ActionId` from ever being
//! passed where an `EntityId` is expected.

use slotmap::new_key_type;
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// Simulated time. Logical units, no relation to wall-clock time.
pub type Time = f64;

/// Tie-break priority. Higher values resolve first within an instant.
pub type Priority = i32;

new_key_type! {
    /// Uniquely identifies an action living in the simulator's action arena.
    ///
    /// Handles are never reused for a different action: once an action is
    /// swept, lookups through a stale handle fail with `UnknownAction`.
    pub struct ActionId;

    /// Uniquely identifies a schedulable entity (thread, process, component).
    pub struct EntityId;

    /// Identifies one `(priority, event)` entry filed in the schedule.
    pub struct EventId;

    /// Identifies a publish-subscribe channel.
    pub struct ChannelId;
}

/// The payload an action resolves with.
///
/// Cloning a `Value` is cheap: the payload is reference counted and shared.
/// Consumers downcast with [`Value::get`].
#[derive(Clone, Default)]
pub struct Value(Option<Rc<dyn Any>>);

impl Value {
    /// The empty value.
    pub fn none() -> Self {
        Value(None)
    }

    /// Wraps an arbitrary payload.
    pub fn new<T: Any>(payload: T) -> Self {
        Value(Some(Rc::new(payload)))
    }

    /// Returns `true` if no payload is carried.
    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    /// Borrows the payload as `T`, if it is one.
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.0.as_ref().and_then(|rc| rc.downcast_ref::<T>())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            None => write!(f, "Value(None)"),
            Some(_) => write!(f, "Value(..)"),
        }
    }
}

/// Completion status of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Pending,
    Succeeded,
    Failed,
}

/// Deployment phase of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Undeployed,
    Deploying,
    Deployed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_downcast() {
        let v = Value::new(42u32);
        assert_eq!(v.get::<u32>(), Some(&42));
        assert!(v.get::<String>().is_none());
        assert!(!v.is_none());
    }

    #[test]
    fn test_value_none() {
        let v = Value::none();
        assert!(v.is_none());
        assert!(v.get::<u32>().is_none());
        assert_eq!(format!("{:?}", v), "Value(None)");
    }

    #[test]
    fn test_value_clone_shares_payload() {
        let v = Value::new(String::from("shared"));
        let w = v.clone();
        assert_eq!(w.get::<String>().map(String::as_str), Some("shared"));
    }
}
