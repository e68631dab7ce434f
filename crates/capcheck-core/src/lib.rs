//! Capability/session consistency verification engine.
//!
//! A device answers a cheap "would this configuration work?" query and can
//! also establish a real session for the same configuration. This crate
//! enumerates the device's configuration space, checks that both answers
//! agree for every combination, and checks monotonicity between enhanced and
//! baseline variants of the same configuration.
//!
//! - [`space`]: per-device axis domains and size/duration tables
//! - [`enumerate`]: pruned, lazy walk over the combination space
//! - [`key`]: canonical feature keys
//! - [`oracle`]: cheap query vs. ground truth, per combination
//! - [`monotonic`]: downgrade laws over the completed support map
//! - [`engine`]: per-device orchestration and multi-device verification

#![forbid(unsafe_code)]

pub mod collector;
pub mod combination;
pub mod device;
pub mod engine;
pub mod enumerate;
pub mod error;
pub mod key;
pub mod monotonic;
pub mod oracle;
pub mod space;

pub use collector::{Collector, Taxonomy, TaxonomyCounts, Violation, ViolationKind};
pub use combination::{Combination, ResolvedStream, StreamDescriptor, StreamTemplate};
pub use device::{Characteristics, DeviceSession, DeviceUnderTest, Outcome};
pub use engine::{DeviceRun, Engine, EngineConfig, EnumerationPlan, verify_devices};
pub use enumerate::{EnumerationStats, Enumerator, PruningPolicy};
pub use error::{ConfigError, EngineError, SpaceError};
pub use key::{FeatureKey, KeyedCombination, canonicalize, canonicalize_keyed};
pub use monotonic::MonotonicityMode;
pub use oracle::{CheckEvent, CheckStatus, ConsistencyOracle, SupportMap, SupportRecord};
pub use space::{
    ConfigSpace, DeviceCapabilities, FpsRange, RangeProfile, Size, SizeBound, SizeEntry,
    StabilizationMode, StreamFormat,
};
