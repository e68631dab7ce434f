//! Configuration space model.
//!
//! Holds the finite axis domains a device reports (stream formats with their
//! size/duration tables, range profiles, stabilization modes, frame-rate
//! ranges) and resolves size-class bounds against the device's own tables.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SpaceError;

// ---------------------------------------------------------------------------
// Axis values
// ---------------------------------------------------------------------------

/// Named configuration dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    StreamFormats,
    RangeProfiles,
    StabilizationModes,
    FpsRanges,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::StreamFormats => "stream-format",
            Self::RangeProfiles => "range-profile",
            Self::StabilizationModes => "stabilization-mode",
            Self::FpsRanges => "fps-range",
        })
    }
}

/// Output stream format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamFormat {
    Private,
    Yuv,
    Jpeg,
    /// Enhanced still codec; `Jpeg` is its baseline counterpart.
    JpegR,
    /// 10-bit YUV, configured in place of `Yuv` under a non-baseline profile.
    YcbcrP010,
}

impl StreamFormat {
    pub const ALL: &'static [StreamFormat] = &[
        StreamFormat::Private,
        StreamFormat::Yuv,
        StreamFormat::Jpeg,
        StreamFormat::JpegR,
        StreamFormat::YcbcrP010,
    ];

    /// Baseline counterpart of an enhanced codec, `None` for baseline formats.
    #[must_use]
    pub const fn baseline_counterpart(self) -> Option<StreamFormat> {
        match self {
            Self::JpegR => Some(Self::Jpeg),
            _ => None,
        }
    }

    /// Enhanced codec whose baseline is `self`.
    #[must_use]
    pub const fn enhanced_counterpart(self) -> Option<StreamFormat> {
        match self {
            Self::Jpeg => Some(Self::JpegR),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_enhanced_codec(self) -> bool {
        self.baseline_counterpart().is_some()
    }

    /// Optional formats count as declared (with no sizes) when a device omits them.
    #[must_use]
    pub const fn is_optional(self) -> bool {
        matches!(self, Self::JpegR | Self::YcbcrP010)
    }

    /// Format actually configured for a stream under `profile`.
    #[must_use]
    pub fn effective_for(self, profile: RangeProfile) -> StreamFormat {
        if self == Self::Yuv && !profile.is_baseline() {
            Self::YcbcrP010
        } else {
            self
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Private => "PRIV",
            Self::Yuv => "YUV",
            Self::Jpeg => "JPEG",
            Self::JpegR => "JPEG_R",
            Self::YcbcrP010 => "P010",
        }
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Size class of a stream, resolved per device and format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeBound {
    Vga,
    S720p,
    S1080p,
    S1440p,
    S2160p,
    Preview,
    Record,
    Maximum,
    #[serde(rename = "maximum_16_9")]
    Maximum16x9,
}

/// Largest size a `Preview` bound may resolve to.
pub const PREVIEW_BOUND: Size = Size::new(1920, 1080);
/// Largest size a `Record` bound may resolve to.
pub const RECORD_BOUND: Size = Size::new(3840, 2160);

impl SizeBound {
    /// Absolute size for fixed classes; `None` for device-relative classes.
    #[must_use]
    pub const fn fixed_size(self) -> Option<Size> {
        match self {
            Self::Vga => Some(Size::new(640, 480)),
            Self::S720p => Some(Size::new(1280, 720)),
            Self::S1080p => Some(Size::new(1920, 1080)),
            Self::S1440p => Some(Size::new(1920, 1440)),
            Self::S2160p => Some(Size::new(3840, 2160)),
            Self::Preview | Self::Record | Self::Maximum | Self::Maximum16x9 => None,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Vga => "VGA",
            Self::S720p => "720p",
            Self::S1080p => "1080p",
            Self::S1440p => "1440p",
            Self::S2160p => "2160p",
            Self::Preview => "PREVIEW",
            Self::Record => "RECORD",
            Self::Maximum => "MAX",
            Self::Maximum16x9 => "MAX_16_9",
        }
    }
}

impl fmt::Display for SizeBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Extended dynamic range profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeProfile {
    /// Baseline (standard dynamic range).
    Standard,
    /// Enhanced HDR profile exercised alongside the baseline.
    Hlg10,
    Hdr10,
    Hdr10Plus,
    DolbyVision10b,
}

impl RangeProfile {
    pub const BASELINE: RangeProfile = RangeProfile::Standard;

    #[must_use]
    pub const fn is_baseline(self) -> bool {
        matches!(self, Self::Standard)
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Standard => "STANDARD",
            Self::Hlg10 => "HLG10",
            Self::Hdr10 => "HDR10",
            Self::Hdr10Plus => "HDR10_PLUS",
            Self::DolbyVision10b => "DOLBY_VISION_10B",
        }
    }
}

impl fmt::Display for RangeProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Video stabilization mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StabilizationMode {
    Off,
    /// Fully on; not exercised by default.
    On,
    PreviewStabilization,
}

impl StabilizationMode {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::On => "ON",
            Self::PreviewStabilization => "PREVIEW_STABILIZATION",
        }
    }
}

impl fmt::Display for StabilizationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Target frame-rate range in frames per second, serialized as `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "(u32, u32)", into = "(u32, u32)")]
pub struct FpsRange {
    pub min: u32,
    pub max: u32,
}

impl FpsRange {
    #[must_use]
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    #[must_use]
    pub const fn is_fixed(self) -> bool {
        self.min == self.max
    }
}

impl From<(u32, u32)> for FpsRange {
    fn from((min, max): (u32, u32)) -> Self {
        Self { min, max }
    }
}

impl From<FpsRange> for (u32, u32) {
    fn from(range: FpsRange) -> Self {
        (range.min, range.max)
    }
}

impl fmt::Display for FpsRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// Pixel dimensions, serialized as `[width, height]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "(u32, u32)", into = "(u32, u32)")]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    #[must_use]
    pub const fn area(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    #[must_use]
    pub const fn fits_within(self, bound: Size) -> bool {
        self.width <= bound.width && self.height <= bound.height
    }

    #[must_use]
    pub const fn is_16_9(self) -> bool {
        self.width as u64 * 9 == self.height as u64 * 16
    }
}

impl From<(u32, u32)> for Size {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

impl From<Size> for (u32, u32) {
    fn from(size: Size) -> Self {
        (size.width, size.height)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ---------------------------------------------------------------------------
// Device-reported capabilities
// ---------------------------------------------------------------------------

/// One supported output size and its minimum frame duration, if the device specifies one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeEntry {
    pub size: Size,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_frame_duration_ns: Option<u64>,
}

impl SizeEntry {
    #[must_use]
    pub const fn new(size: Size, min_frame_duration_ns: Option<u64>) -> Self {
        Self {
            size,
            min_frame_duration_ns,
        }
    }
}

/// Raw axis domains as reported by a device, read once per run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub formats: BTreeMap<StreamFormat, Vec<SizeEntry>>,
    pub range_profiles: Vec<RangeProfile>,
    pub stabilization_modes: Vec<StabilizationMode>,
    pub fps_ranges: Vec<FpsRange>,
}

// ---------------------------------------------------------------------------
// Configuration space
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct FormatTable {
    /// Supported sizes, largest area first.
    sizes: Vec<Size>,
    durations: BTreeMap<Size, Duration>,
}

impl FormatTable {
    fn from_entries(entries: &[SizeEntry]) -> Self {
        let mut sizes: Vec<Size> = entries.iter().map(|e| e.size).collect();
        sizes.sort_by(|a, b| b.area().cmp(&a.area()).then_with(|| b.width.cmp(&a.width)));
        sizes.dedup();
        let durations = entries
            .iter()
            .filter_map(|e| {
                e.min_frame_duration_ns
                    .map(|ns| (e.size, Duration::from_nanos(ns)))
            })
            .collect();
        Self { sizes, durations }
    }

    fn largest_matching(&self, pred: impl Fn(Size) -> bool) -> Option<Size> {
        self.sizes.iter().copied().find(|s| pred(*s))
    }
}

/// Immutable per-device view of every axis domain.
#[derive(Debug, Clone)]
pub struct ConfigSpace {
    formats: BTreeMap<StreamFormat, FormatTable>,
    range_profiles: Vec<RangeProfile>,
    stabilization_modes: Vec<StabilizationMode>,
    fps_ranges: Vec<FpsRange>,
}

impl ConfigSpace {
    /// Build the space, rejecting devices with an empty required axis.
    pub fn new(caps: &DeviceCapabilities) -> Result<Self, SpaceError> {
        if caps.formats.values().all(Vec::is_empty) {
            return Err(SpaceError::UnsupportedDevice {
                axis: Axis::StreamFormats,
            });
        }
        if caps.range_profiles.is_empty() {
            return Err(SpaceError::UnsupportedDevice {
                axis: Axis::RangeProfiles,
            });
        }
        if caps.stabilization_modes.is_empty() {
            return Err(SpaceError::UnsupportedDevice {
                axis: Axis::StabilizationModes,
            });
        }
        if caps.fps_ranges.is_empty() {
            return Err(SpaceError::UnsupportedDevice {
                axis: Axis::FpsRanges,
            });
        }

        let formats = caps
            .formats
            .iter()
            .map(|(format, entries)| (*format, FormatTable::from_entries(entries)))
            .collect();

        Ok(Self {
            formats,
            range_profiles: dedup_preserving_order(&caps.range_profiles),
            stabilization_modes: dedup_preserving_order(&caps.stabilization_modes),
            fps_ranges: dedup_preserving_order(&caps.fps_ranges),
        })
    }

    #[must_use]
    pub fn range_profiles(&self) -> &[RangeProfile] {
        &self.range_profiles
    }

    #[must_use]
    pub fn stabilization_modes(&self) -> &[StabilizationMode] {
        &self.stabilization_modes
    }

    #[must_use]
    pub fn fps_ranges(&self) -> &[FpsRange] {
        &self.fps_ranges
    }

    #[must_use]
    pub fn supports_stabilization(&self, mode: StabilizationMode) -> bool {
        self.stabilization_modes.contains(&mode)
    }

    /// Whether `format` is declared (optional formats always are).
    #[must_use]
    pub fn declares(&self, format: StreamFormat) -> bool {
        format.is_optional() || self.formats.contains_key(&format)
    }

    /// Resolve a size-class bound against the device's sizes for `format`.
    ///
    /// `Ok(None)` means no supported size satisfies the bound.
    pub fn resolve_size(
        &self,
        format: StreamFormat,
        bound: SizeBound,
    ) -> Result<Option<Size>, SpaceError> {
        let Some(table) = self.formats.get(&format) else {
            if format.is_optional() {
                return Ok(None);
            }
            return Err(SpaceError::UnknownFormat(format));
        };

        let resolved = match bound {
            SizeBound::Preview => table.largest_matching(|s| s.fits_within(PREVIEW_BOUND)),
            SizeBound::Record => table.largest_matching(|s| s.fits_within(RECORD_BOUND)),
            SizeBound::Maximum => table.sizes.first().copied(),
            SizeBound::Maximum16x9 => table.largest_matching(Size::is_16_9),
            fixed => fixed
                .fixed_size()
                .filter(|target| table.sizes.contains(target)),
        };
        Ok(resolved)
    }

    /// Minimum frame duration for `format` at `size`; `None` when unspecified.
    #[must_use]
    pub fn min_frame_duration(&self, format: StreamFormat, size: Size) -> Option<Duration> {
        self.formats
            .get(&format)
            .and_then(|table| table.durations.get(&size).copied())
    }
}

fn dedup_preserving_order<T: Copy + PartialEq>(values: &[T]) -> Vec<T> {
    let mut out = Vec::with_capacity(values.len());
    for v in values {
        if !out.contains(v) {
            out.push(*v);
        }
    }
    out
}
