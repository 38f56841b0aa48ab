//! Optional task operations ("capabilities").
//!
//! Every task must be able to start. Stopping and terminating are optional:
//! a task type declares which of them it really implements through
//! [`Task::capabilities`](crate::core::Task::capabilities), a per-type table
//! that callers consult before invoking the operation. The default trait
//! methods for undeclared operations only report [`TaskError::NotCapable`].
//!
//! `start` is deliberately not a [`Capability`] variant, so it can never be
//! declared optional.
//!
//! [`TaskError::NotCapable`]: crate::core::TaskError::NotCapable

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// An optional operation a task may implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Graceful stop.
    Stop,
    /// Stop at all costs.
    Terminate,
}

impl Capability {
    /// The single-member set for this operation.
    #[must_use]
    pub const fn flag(self) -> CapabilitySet {
        match self {
            Self::Stop => CapabilitySet::STOP,
            Self::Terminate => CapabilitySet::TERMINATE,
        }
    }

    /// Operation name as used in logs and errors.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Terminate => "terminate",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Set of capabilities implemented by a task type.
    ///
    /// | Flag | Operation |
    /// |------|-----------|
    /// | [`STOP`](Self::STOP) | [`Task::stop`](crate::core::Task::stop) |
    /// | [`TERMINATE`](Self::TERMINATE) | [`Task::terminate`](crate::core::Task::terminate) |
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct CapabilitySet: u8 {
        /// Graceful stop.
        const STOP      = 0b01;
        /// Stop at all costs.
        const TERMINATE = 0b10;
    }
}

impl CapabilitySet {
    /// No optional operations.
    pub const EMPTY: Self = Self::empty();
    /// Both `stop` and `terminate`.
    pub const ALL: Self = Self::STOP.union(Self::TERMINATE);

    /// Check membership of a single operation.
    #[must_use]
    pub const fn supports(self, capability: Capability) -> bool {
        self.contains(capability.flag())
    }

    /// The operations in this set.
    pub fn capabilities(self) -> impl Iterator<Item = Capability> {
        [Capability::Stop, Capability::Terminate]
            .into_iter()
            .filter(move |c| self.supports(*c))
    }
}

impl From<Capability> for CapabilitySet {
    fn from(capability: Capability) -> Self {
        capability.flag()
    }
}

/// Check whether `task` implements `capability`, without invoking it.
pub fn is_capable<T>(task: &T, capability: Capability) -> bool
where
    T: crate::core::Task + ?Sized,
{
    task.capabilities().supports(capability)
}
