//! Schedule sources: producers of schedule records.

use std::fmt;
use std::sync::LazyLock;

use tracing::debug;

use crate::core::error::BusError;
use crate::core::record::SharedRecord;
use crate::core::signal::{Emitter, Payload, Signal, SignalSet, SignalSource, SourceId};

/// A source requests a run by emitting this with the record.
pub static TASK_SCHEDULED: LazyLock<Signal> =
    LazyLock::new(|| Signal::typed::<SharedRecord>("task_scheduled"));

/// Signals every schedule source declares.
pub static SCHEDULE_SOURCE_SIGNALS: LazyLock<SignalSet> =
    LazyLock::new(|| SignalSet::declare(&[&*TASK_SCHEDULED]));

/// Anything that emits [`TASK_SCHEDULED`].
pub trait ScheduleSource: SignalSource {
    /// Identity used to match subscriptions.
    fn source_id(&self) -> &SourceId {
        self.emitter().source_id()
    }
}

/// A source driven by explicit calls.
pub struct ManualScheduleSource {
    emitter: Emitter,
}

impl Default for ManualScheduleSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualScheduleSource {
    /// New source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            emitter: Emitter::new("manual_schedule_source", &SCHEDULE_SOURCE_SIGNALS),
        }
    }

    /// Emit `record` to every subscribed scheduler.
    ///
    /// # Errors
    ///
    /// Only on bus misuse, which cannot happen for a well-formed record.
    pub fn schedule(&self, record: SharedRecord) -> Result<(), BusError> {
        debug!(source = %self.emitter.source_id(), record_id = %record.id(), "record scheduled");
        self.emitter.emit(&TASK_SCHEDULED, Payload::new(record))
    }
}

impl SignalSource for ManualScheduleSource {
    fn emitter(&self) -> &Emitter {
        &self.emitter
    }
}

impl ScheduleSource for ManualScheduleSource {}

impl fmt::Debug for ManualScheduleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualScheduleSource")
            .field("source", self.emitter.source_id())
            .finish()
    }
}
