//! Contract of the device under test.
//!
//! The engine only ever sees a device through these calls. Expected negative
//! answers are values of [`Outcome`], never errors or panics.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::combination::{Combination, StreamTemplate};
use crate::space::DeviceCapabilities;

/// Tagged result of a device call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Supported(T),
    NotSupported,
    /// The call did not finish within its budget.
    TimedOut,
    /// Any other failure, with a diagnostic message.
    Error(String),
}

impl<T> Outcome<T> {
    #[must_use]
    pub const fn is_supported(&self) -> bool {
        matches!(self, Self::Supported(_))
    }

    /// Drop the payload, keeping the tag.
    #[must_use]
    pub fn tag(&self) -> Outcome<()> {
        match self {
            Self::Supported(_) => Outcome::Supported(()),
            Self::NotSupported => Outcome::NotSupported,
            Self::TimedOut => Outcome::TimedOut,
            Self::Error(msg) => Outcome::Error(msg.clone()),
        }
    }
}

impl<T> fmt::Display for Outcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Supported(_) => f.write_str("supported"),
            Self::NotSupported => f.write_str("not supported"),
            Self::TimedOut => f.write_str("timed out"),
            Self::Error(msg) => write!(f, "error: {msg}"),
        }
    }
}

/// Characteristics returned by an established session.
///
/// The key set is carried through opaquely; validating it is a separate concern.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Characteristics {
    pub keys: Vec<String>,
}

/// An established (expensive) session on the device.
///
/// Implementations must release their resources in `Drop` as well, so a
/// session is torn down even when the engine unwinds.
pub trait DeviceSession {
    fn characteristics(&self) -> &Characteristics;

    /// Tear the session down. Calling it more than once must be harmless.
    fn close(&mut self) -> Result<(), String>;
}

/// A device exposing a cheap capability query and an expensive ground truth.
pub trait DeviceUnderTest: Sync {
    type Session: DeviceSession;

    fn id(&self) -> &str;

    /// Axis domains and per-format tables. Read once per run.
    fn capabilities(&self) -> Result<DeviceCapabilities, String>;

    /// Stream combination templates the device claims are queryable. Read once per run.
    fn queryable_templates(&self) -> Vec<StreamTemplate>;

    /// Cheap query. Must not establish real resources.
    fn is_config_supported(&self, combination: &Combination) -> Outcome<()>;

    /// Same query with outputs whose targets are attached later.
    ///
    /// `None` when the device has no such query.
    fn is_deferred_config_supported(&self, _combination: &Combination) -> Option<Outcome<()>> {
        None
    }

    /// Establish a session for `combination` and describe it.
    ///
    /// `budget` is the time the caller is willing to wait; devices should
    /// return [`Outcome::TimedOut`] rather than exceed it.
    fn establish_and_describe(
        &self,
        combination: &Combination,
        budget: Duration,
    ) -> Outcome<Self::Session>;
}
