//! # Leadership Types
//!
//! The event published on every leadership transition and the lifecycle state of a coordinator.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};

/// Leadership transition signal.
///
/// Consumers tell "became leader" from "lost leadership" purely by the order in which these
/// arrive; a single coordinator always publishes them alternately, starting with `IsLeader`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeadershipEvent {
    IsLeader,
    IsNotLeader,
}

impl LeadershipEvent {
    pub fn is_leader(self) -> bool {
        matches!(self, LeadershipEvent::IsLeader)
    }
}

impl From<bool> for LeadershipEvent {
    fn from(is_leader: bool) -> Self {
        if is_leader {
            LeadershipEvent::IsLeader
        } else {
            LeadershipEvent::IsNotLeader
        }
    }
}

impl std::fmt::Display for LeadershipEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LeadershipEvent::IsLeader => write!(f, "LEADER"),
            LeadershipEvent::IsNotLeader => write!(f, "NOT_LEADER"),
        }
    }
}

/// Lifecycle of a coordinator. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CoordinatorState {
    Uninitialized = 0,
    Started = 1,
    Stopped = 2,
}

impl CoordinatorState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => CoordinatorState::Uninitialized,
            1 => CoordinatorState::Started,
            _ => CoordinatorState::Stopped,
        }
    }
}

impl std::fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordinatorState::Uninitialized => write!(f, "UNINITIALIZED"),
            CoordinatorState::Started => write!(f, "STARTED"),
            CoordinatorState::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// [`CoordinatorState`] stored in an atomic, changed only through compare-and-swap.
#[derive(Debug)]
pub struct AtomicCoordinatorState(AtomicU8);

impl AtomicCoordinatorState {
    pub fn new() -> Self {
        Self(AtomicU8::new(CoordinatorState::Uninitialized as u8))
    }

    pub fn load(&self) -> CoordinatorState {
        CoordinatorState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves from `from` to `to`. On failure returns the state actually observed.
    pub fn transition(
        &self,
        from: CoordinatorState,
        to: CoordinatorState,
    ) -> Result<(), CoordinatorState> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(CoordinatorState::from_u8)
    }
}

impl Default for AtomicCoordinatorState {
    fn default() -> Self {
        Self::new()
    }
}
