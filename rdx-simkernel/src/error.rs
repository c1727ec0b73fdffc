//! Structured error types for the simulation kernel.
//!
//! All fallible public APIs return `SimResult<T>`. Most variants are
//! protocol violations: programming errors in model code that surface
//! immediately and are never silently recovered. `EmptySchedule` is the one
//! condition the engine recovers from on its own, by ending the run.

use crate::common::{ActionId, ChannelId, EntityId, Time};
use thiserror::Error;

/// The top-level error type for the kernel.
#[derive(Error, Debug)]
pub enum SimError {
    // --- Protocol violations ---
    /// `execute` was called on an entity that is not running.
    #[error("cannot execute on idle entity {0:?}")]
    IdleExecution(EntityId),

    /// An action that already has a parent was used as a root action.
    #[error("action {0:?} already has a parent and cannot become a root")]
    InvalidRoot(ActionId),

    /// An action was adopted by a second parent.
    #[error("action {0:?} is already linked to a parent")]
    AlreadyLinked(ActionId),

    /// A combinator or chain received a resolution notice from an action
    /// that is not one of its operands.
    #[error("action {parent:?} received a resolution notice from foreign child {child:?}")]
    ForeignChild { parent: ActionId, child: ActionId },

    /// `succeed`/`fail` was called on an action that is already resolved.
    #[error("action {0:?} is already resolved")]
    AlreadyResolved(ActionId),

    /// `succeed`/`fail` was called on an action that was never started or
    /// has been cancelled.
    #[error("action {0:?} is not deployed")]
    NotDeployed(ActionId),

    /// An action was bound to a second owner.
    #[error("action {action:?} is already owned by {owner:?}")]
    OwnerConflict { action: ActionId, owner: EntityId },

    /// A one-shot chain was started again after its body ran.
    #[error("one-shot chain {0:?} cannot be restarted")]
    NotRestartable(ActionId),

    /// `rewind` was called while the entity is running.
    #[error("cannot rewind running entity {0:?}")]
    RewindWhileRunning(EntityId),

    /// An entity was attached under itself or one of its own members.
    #[error("cannot attach entity {child:?} under {parent:?}")]
    InvalidAttach { parent: EntityId, child: EntityId },

    /// A stale or foreign action handle was used.
    #[error("unknown action {0:?}")]
    UnknownAction(ActionId),

    /// A stale or foreign entity handle was used.
    #[error("unknown entity {0:?}")]
    UnknownEntity(EntityId),

    /// A stale or foreign channel handle was used.
    #[error("unknown channel {0:?}")]
    UnknownChannel(ChannelId),

    /// A delay was given a negative or non-finite duration.
    #[error("invalid delay duration {0}")]
    InvalidDuration(Time),

    // --- Clock / schedule ---
    /// The clock was asked to move backwards.
    #[error("cannot advance clock to {requested} when current time is {current}")]
    InvalidAdvance { requested: Time, current: Time },

    /// The schedule holds no future events.
    #[error("schedule has no pending events")]
    EmptySchedule,

    // --- Configuration ---
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl SimError {
    /// Returns `true` for errors caused by misuse of the kernel protocol.
    pub fn is_protocol_violation(&self) -> bool {
        !matches!(
            self,
            SimError::InvalidAdvance { .. } | SimError::EmptySchedule | SimError::Config(_)
        )
    }
}

/// Convenience alias for `Result<T, SimError>`.
pub type SimResult<T> = Result<T, SimError>;
