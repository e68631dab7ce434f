//! Monotonicity laws over a completed support map.
//!
//! Two downgrades are checked: enhanced codec to its baseline codec, and any
//! non-baseline range profile to the baseline profile. Every other axis of
//! the key is held fixed.

use serde::{Deserialize, Serialize};

use crate::collector::{Collector, Violation, ViolationKind};
use crate::key::FeatureKey;
use crate::oracle::{SupportMap, support_label};
use crate::space::RangeProfile;

/// How strictly an upgraded variant is tied to its downgrade.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonotonicityMode {
    /// Upgraded supported implies downgraded supported.
    #[default]
    Implication,
    /// Upgraded and downgraded must answer the same, either way.
    Equivalence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Downgrade {
    Codec,
    RangeProfile,
}

impl Downgrade {
    const fn label(self) -> &'static str {
        match self {
            Self::Codec => "baseline-codec",
            Self::RangeProfile => "baseline-range-profile",
        }
    }

    fn apply(self, key: &FeatureKey) -> Option<FeatureKey> {
        match self {
            Self::Codec if key.is_enhanced_variant() => Some(key.with_enhanced_codec(false)),
            Self::RangeProfile if !key.range_profile().is_baseline() => {
                Some(key.with_range_profile(RangeProfile::BASELINE))
            }
            _ => None,
        }
    }
}

/// Check every record in `records`, appending violations to `collector`.
///
/// Returns the number of downgrade pairs examined.
pub fn check(records: &SupportMap, mode: MonotonicityMode, collector: &mut Collector) -> usize {
    let mut examined = 0;
    for (key, record) in records {
        if mode == MonotonicityMode::Implication && !record.supported {
            continue;
        }
        for downgrade in [Downgrade::Codec, Downgrade::RangeProfile] {
            let Some(lower) = downgrade.apply(key) else {
                continue;
            };
            examined += 1;
            match records.get(&lower) {
                None => collector.add(Violation::new(
                    ViolationKind::MonotonicityGap,
                    format!(
                        "{} variant was never evaluated: {lower}",
                        downgrade.label()
                    ),
                    key.to_string(),
                    "evaluated",
                    "absent",
                )),
                Some(lower_record) if lower_record.supported != record.supported => {
                    // In implication mode only a supported upgrade reaches here.
                    collector.add(Violation::new(
                        ViolationKind::MonotonicityBroken,
                        format!(
                            "{} variant answers differently: {lower}",
                            downgrade.label()
                        ),
                        key.to_string(),
                        support_label(record.supported),
                        support_label(lower_record.supported),
                    ));
                }
                Some(_) => {}
            }
        }
    }
    examined
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combination::StreamDescriptor;
    use crate::key::{KeyedCombination, canonicalize_keyed};
    use crate::oracle::SupportRecord;
    use crate::space::{FpsRange, SizeBound, StabilizationMode, StreamFormat};

    fn key(last: StreamFormat, profile: RangeProfile) -> FeatureKey {
        let combination = KeyedCombination {
            streams: vec![
                StreamDescriptor::new(StreamFormat::Private, SizeBound::S1080p),
                StreamDescriptor::new(last, SizeBound::Maximum),
            ],
            range_profile: profile,
            stabilization: StabilizationMode::Off,
            fps_range: FpsRange::new(30, 30),
        };
        canonicalize_keyed(&combination).0
    }

    fn map(entries: &[(FeatureKey, bool)]) -> SupportMap {
        entries
            .iter()
            .map(|(k, s)| {
                (
                    k.clone(),
                    SupportRecord {
                        key: k.clone(),
                        supported: *s,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn supported_enhanced_with_unsupported_baseline_is_broken() {
        let records = map(&[
            (key(StreamFormat::JpegR, RangeProfile::Standard), true),
            (key(StreamFormat::Jpeg, RangeProfile::Standard), false),
        ]);
        let mut c = Collector::new();
        assert_eq!(check(&records, MonotonicityMode::Implication, &mut c), 1);
        assert_eq!(c.len(), 1);
        assert_eq!(c.all()[0].kind, ViolationKind::MonotonicityBroken);
        assert!(c.all()[0].description.starts_with("baseline-codec"));
    }

    #[test]
    fn missing_baseline_profile_is_a_gap() {
        let records = map(&[(key(StreamFormat::Jpeg, RangeProfile::Hlg10), true)]);
        let mut c = Collector::new();
        check(&records, MonotonicityMode::Implication, &mut c);
        assert_eq!(c.count_kind(ViolationKind::MonotonicityGap), 1);
        assert!(c.all()[0].description.contains("profile STANDARD"));
    }

    #[test]
    fn unsupported_upgrade_implies_nothing() {
        let records = map(&[
            (key(StreamFormat::JpegR, RangeProfile::Hlg10), false),
            (key(StreamFormat::Jpeg, RangeProfile::Hlg10), true),
            (key(StreamFormat::Jpeg, RangeProfile::Standard), true),
        ]);
        let mut c = Collector::new();
        check(&records, MonotonicityMode::Implication, &mut c);
        assert!(c.is_empty());
    }

    #[test]
    fn equivalence_flags_upgrade_unsupported_while_baseline_supported() {
        let records = map(&[
            (key(StreamFormat::JpegR, RangeProfile::Standard), false),
            (key(StreamFormat::Jpeg, RangeProfile::Standard), true),
        ]);
        let mut c = Collector::new();
        check(&records, MonotonicityMode::Equivalence, &mut c);
        assert_eq!(c.count_kind(ViolationKind::MonotonicityBroken), 1);
        assert_eq!(c.all()[0].expected, "not supported");
        assert_eq!(c.all()[0].actual, "supported");
    }

    #[test]
    fn enhanced_hdr_key_checks_both_downgrades() {
        let records = map(&[
            (key(StreamFormat::JpegR, RangeProfile::Hlg10), true),
            (key(StreamFormat::Jpeg, RangeProfile::Hlg10), true),
            (key(StreamFormat::JpegR, RangeProfile::Standard), true),
            (key(StreamFormat::Jpeg, RangeProfile::Standard), true),
        ]);
        let mut c = Collector::new();
        // JpegR/HLG10: 2, Jpeg/HLG10: 1, JpegR/STANDARD: 1.
        assert_eq!(check(&records, MonotonicityMode::Implication, &mut c), 4);
        assert!(c.is_empty());
    }
}
