//! Stream descriptors, device templates, and resolved combinations.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::space::{FpsRange, RangeProfile, Size, SizeBound, StabilizationMode, StreamFormat};

/// A stream request: a format plus a device-relative size class.
///
/// Serialized as `["private", "s1080p"]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "(StreamFormat, SizeBound)", into = "(StreamFormat, SizeBound)")]
pub struct StreamDescriptor {
    pub format: StreamFormat,
    pub bound: SizeBound,
}

impl StreamDescriptor {
    #[must_use]
    pub const fn new(format: StreamFormat, bound: SizeBound) -> Self {
        Self { format, bound }
    }
}

impl From<(StreamFormat, SizeBound)> for StreamDescriptor {
    fn from((format, bound): (StreamFormat, SizeBound)) -> Self {
        Self { format, bound }
    }
}

impl From<StreamDescriptor> for (StreamFormat, SizeBound) {
    fn from(d: StreamDescriptor) -> Self {
        (d.format, d.bound)
    }
}

impl fmt::Display for StreamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.format, self.bound)
    }
}

/// Device-reported queryable stream combination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamTemplate {
    pub streams: Vec<StreamDescriptor>,
}

impl StreamTemplate {
    #[must_use]
    pub fn new(streams: impl Into<Vec<StreamDescriptor>>) -> Self {
        Self {
            streams: streams.into(),
        }
    }
}

impl fmt::Display for StreamTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_stream_list(f, self.streams.iter())
    }
}

/// A stream after size resolution and profile-dependent format substitution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedStream {
    pub descriptor: StreamDescriptor,
    /// Format handed to the device (e.g. P010 for YUV under HDR).
    pub effective_format: StreamFormat,
    pub size: Size,
}

/// One point of the configuration space under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Combination {
    pub template_index: usize,
    pub streams: Vec<ResolvedStream>,
    pub range_profile: RangeProfile,
    pub stabilization: StabilizationMode,
    pub fps_range: FpsRange,
    /// Largest specified minimum frame duration across the streams.
    pub min_frame_duration: Duration,
}

impl Combination {
    /// Same combination with a different stabilization mode.
    #[must_use]
    pub fn with_stabilization(&self, mode: StabilizationMode) -> Self {
        Self {
            stabilization: mode,
            ..self.clone()
        }
    }

    pub fn descriptors(&self) -> impl Iterator<Item = StreamDescriptor> + '_ {
        self.streams.iter().map(|s| s.descriptor)
    }

    #[must_use]
    pub fn contains_format(&self, format: StreamFormat) -> bool {
        self.streams
            .iter()
            .any(|s| s.descriptor.format == format || s.effective_format == format)
    }
}

impl fmt::Display for Combination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_stream_list(f, self.streams.iter().map(|s| &s.descriptor))?;
        write!(
            f,
            ", profile {}, stabilization {}, fps {}",
            self.range_profile, self.stabilization, self.fps_range
        )
    }
}

fn write_stream_list<'a>(
    f: &mut fmt::Formatter<'_>,
    streams: impl Iterator<Item = &'a StreamDescriptor>,
) -> fmt::Result {
    f.write_str("[")?;
    for (i, s) in streams.enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{s}")?;
    }
    f.write_str("]")
}
