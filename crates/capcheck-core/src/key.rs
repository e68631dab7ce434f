//! Canonical feature keys.
//!
//! A key identifies a combination up to configuration equivalence: stream
//! order is normalized and enhanced codecs are folded onto their baseline
//! counterpart, with the enhanced-ness kept as a separate flag. Downgrade
//! lookups for the monotonicity laws are plain key rewrites.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::combination::{Combination, StreamDescriptor};
use crate::space::{FpsRange, RangeProfile, StabilizationMode};

/// Equivalence-reduced identity of a combination.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FeatureKey {
    streams: Vec<StreamDescriptor>,
    enhanced_codec: bool,
    range_profile: RangeProfile,
    stabilization: StabilizationMode,
    fps_range: FpsRange,
}

/// Descriptor-level combination rebuilt from a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedCombination {
    pub streams: Vec<StreamDescriptor>,
    pub range_profile: RangeProfile,
    pub stabilization: StabilizationMode,
    pub fps_range: FpsRange,
}

/// Canonicalize a resolved combination.
///
/// Returns the key plus the enhanced-codec and non-baseline-profile flags.
#[must_use]
pub fn canonicalize(combination: &Combination) -> (FeatureKey, bool, bool) {
    canonicalize_parts(
        combination.descriptors(),
        combination.range_profile,
        combination.stabilization,
        combination.fps_range,
    )
}

/// Canonicalize a descriptor-level combination.
#[must_use]
pub fn canonicalize_keyed(combination: &KeyedCombination) -> (FeatureKey, bool, bool) {
    canonicalize_parts(
        combination.streams.iter().copied(),
        combination.range_profile,
        combination.stabilization,
        combination.fps_range,
    )
}

fn canonicalize_parts(
    descriptors: impl Iterator<Item = StreamDescriptor>,
    range_profile: RangeProfile,
    stabilization: StabilizationMode,
    fps_range: FpsRange,
) -> (FeatureKey, bool, bool) {
    let mut enhanced_codec = false;
    let mut streams: Vec<StreamDescriptor> = descriptors
        .map(|d| match d.format.baseline_counterpart() {
            Some(baseline) => {
                enhanced_codec = true;
                StreamDescriptor::new(baseline, d.bound)
            }
            None => d,
        })
        .collect();
    streams.sort();

    let non_baseline = !range_profile.is_baseline();
    let key = FeatureKey {
        streams,
        enhanced_codec,
        range_profile,
        stabilization,
        fps_range,
    };
    (key, enhanced_codec, non_baseline)
}

impl FeatureKey {
    #[must_use]
    pub fn canonical_streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    #[must_use]
    pub const fn is_enhanced_variant(&self) -> bool {
        self.enhanced_codec
    }

    #[must_use]
    pub const fn range_profile(&self) -> RangeProfile {
        self.range_profile
    }

    #[must_use]
    pub const fn stabilization(&self) -> StabilizationMode {
        self.stabilization
    }

    #[must_use]
    pub const fn fps_range(&self) -> FpsRange {
        self.fps_range
    }

    /// Same key with the enhanced-codec flag forced.
    #[must_use]
    pub fn with_enhanced_codec(&self, enhanced: bool) -> Self {
        Self {
            enhanced_codec: enhanced,
            ..self.clone()
        }
    }

    /// Same key with a different range profile.
    #[must_use]
    pub fn with_range_profile(&self, profile: RangeProfile) -> Self {
        Self {
            range_profile: profile,
            ..self.clone()
        }
    }

    /// Rebuild a descriptor-level combination that canonicalizes back to `self`.
    ///
    /// With the enhanced flag set, the first stream that has an enhanced
    /// counterpart is upgraded.
    #[must_use]
    pub fn reconstruct(&self) -> KeyedCombination {
        let mut streams = self.streams.clone();
        if self.enhanced_codec
            && let Some(slot) = streams
                .iter_mut()
                .find(|d| d.format.enhanced_counterpart().is_some())
            && let Some(enhanced) = slot.format.enhanced_counterpart()
        {
            slot.format = enhanced;
        }
        KeyedCombination {
            streams,
            range_profile: self.range_profile,
            stabilization: self.stabilization,
            fps_range: self.fps_range,
        }
    }

    /// Short stable digest of the key, for log correlation.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let digest = blake3::hash(self.to_string().as_bytes());
        digest.to_hex()[..16].to_string()
    }
}

impl fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("streams [")?;
        for (i, s) in self.streams.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{s}")?;
        }
        write!(
            f,
            "], enhanced_codec {}, profile {}, stabilization {}, fps {}",
            self.enhanced_codec, self.range_profile, self.stabilization, self.fps_range
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::{SizeBound, StreamFormat};

    fn keyed(streams: &[(StreamFormat, SizeBound)], profile: RangeProfile) -> KeyedCombination {
        KeyedCombination {
            streams: streams
                .iter()
                .map(|&(f, b)| StreamDescriptor::new(f, b))
                .collect(),
            range_profile: profile,
            stabilization: StabilizationMode::Off,
            fps_range: FpsRange::new(30, 30),
        }
    }

    #[test]
    fn stream_order_is_not_significant() {
        let a = keyed(
            &[
                (StreamFormat::Jpeg, SizeBound::Maximum),
                (StreamFormat::Private, SizeBound::S1080p),
            ],
            RangeProfile::Standard,
        );
        let b = keyed(
            &[
                (StreamFormat::Private, SizeBound::S1080p),
                (StreamFormat::Jpeg, SizeBound::Maximum),
            ],
            RangeProfile::Standard,
        );
        assert_eq!(canonicalize_keyed(&a).0, canonicalize_keyed(&b).0);
    }

    #[test]
    fn enhanced_codec_folds_to_baseline_with_flag() {
        let enhanced = keyed(
            &[
                (StreamFormat::Private, SizeBound::S1080p),
                (StreamFormat::JpegR, SizeBound::Maximum),
            ],
            RangeProfile::Hlg10,
        );
        let baseline = keyed(
            &[
                (StreamFormat::Private, SizeBound::S1080p),
                (StreamFormat::Jpeg, SizeBound::Maximum),
            ],
            RangeProfile::Hlg10,
        );
        let (ek, is_enhanced, non_baseline) = canonicalize_keyed(&enhanced);
        let (bk, base_enhanced, _) = canonicalize_keyed(&baseline);
        assert!(is_enhanced);
        assert!(non_baseline);
        assert!(!base_enhanced);
        assert_ne!(ek, bk);
        assert_eq!(ek.with_enhanced_codec(false), bk);
        assert_eq!(ek.canonical_streams(), bk.canonical_streams());
    }

    #[test]
    fn range_downgrade_targets_baseline_key() {
        let hdr = keyed(&[(StreamFormat::Yuv, SizeBound::Preview)], RangeProfile::Hlg10);
        let sdr = keyed(
            &[(StreamFormat::Yuv, SizeBound::Preview)],
            RangeProfile::Standard,
        );
        let (hk, _, non_baseline) = canonicalize_keyed(&hdr);
        let (sk, _, sdr_non_baseline) = canonicalize_keyed(&sdr);
        assert!(non_baseline);
        assert!(!sdr_non_baseline);
        assert_eq!(hk.with_range_profile(RangeProfile::BASELINE), sk);
    }

    #[test]
    fn canonicalization_is_idempotent_through_reconstruction() {
        let c = keyed(
            &[
                (StreamFormat::Yuv, SizeBound::Maximum),
                (StreamFormat::JpegR, SizeBound::Maximum16x9),
                (StreamFormat::Private, SizeBound::Preview),
            ],
            RangeProfile::Hlg10,
        );
        let (key, _, _) = canonicalize_keyed(&c);
        let rebuilt = key.reconstruct();
        assert!(rebuilt.streams.contains(&StreamDescriptor::new(
            StreamFormat::JpegR,
            SizeBound::Maximum16x9
        )));
        assert_eq!(canonicalize_keyed(&rebuilt).0, key);
    }

    #[test]
    fn fingerprint_is_stable_and_distinguishes_variants() {
        let c = keyed(&[(StreamFormat::JpegR, SizeBound::Maximum)], RangeProfile::Standard);
        let (key, _, _) = canonicalize_keyed(&c);
        assert_eq!(key.fingerprint(), key.clone().fingerprint());
        assert_eq!(key.fingerprint().len(), 16);
        assert_ne!(
            key.fingerprint(),
            key.with_enhanced_codec(false).fingerprint()
        );
    }
}
