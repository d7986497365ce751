//! # Nightwatch Core
//!
//! Core types and plumbing shared by every Nightwatch crate:
//!
//! - **Event model**: [`Event`], [`FieldValue`], [`EventState`] — the canonical
//!   unit produced by detectors, plus [`FusedSignal`] channel updates and
//!   [`Alert`] records.
//! - **Event bus**: [`EventBus`] — in-process, topic-based, lossy-with-policy
//!   broker connecting detectors, fusion, the alert engine and the notifier.
//! - **Clocks**: [`Clock`] — monotonic time for internal bookkeeping, wall time
//!   for stored records, substitutable in tests via [`ManualClock`].
//! - **Control surface**: [`ControlRequest`] and the [`StreamEnvelope`] framing
//!   used by external consumers of the local stream endpoint.

#![forbid(unsafe_code)]

pub mod alert;
pub mod bus;
pub mod clock;
pub mod envelope;
pub mod error;
pub mod event;
pub mod health;

pub use alert::{Alert, Severity};
pub use bus::{BusCounters, EventBus, Subscription};
pub use clock::{Clock, ManualClock, SystemClock};
pub use envelope::{ControlRequest, StreamEnvelope};
pub use error::{CoreError, CoreResult};
pub use event::{Event, EventState, FieldValue, FusedSignal, SequenceGuard};
pub use health::{ComponentStatus, HealthSnapshot, SystemStatus};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default per-subscriber inbox depth on the event bus.
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Default maximum age before a signal is excluded from fusion, in seconds.
pub const DEFAULT_SIGNAL_MAX_AGE: f64 = 5.0;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::alert::{Alert, Severity};
    pub use crate::bus::{EventBus, Subscription};
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::envelope::{ControlRequest, StreamEnvelope};
    pub use crate::error::{CoreError, CoreResult};
    pub use crate::event::{Event, EventState, FieldValue, FusedSignal};
    pub use crate::health::{ComponentStatus, HealthSnapshot, SystemStatus};
}
