//! Soft-assertion collector for violations.
//!
//! Nothing here fails fast: every inconsistency found during a run is
//! appended and surfaced at the end.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Top-level error taxonomy a violation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Taxonomy {
    Consistency,
    Monotonicity,
    Device,
}

impl fmt::Display for Taxonomy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Consistency => "consistency",
            Self::Monotonicity => "monotonicity",
            Self::Device => "device",
        })
    }
}

/// Fine-grained violation tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Cheap query and ground truth disagree.
    QueryMismatch,
    /// Support differs between stabilization off and preview stabilization.
    StabilizationMismatch,
    /// Deferred-output query disagrees with the complete query.
    DeferredQueryMismatch,
    /// Two combinations with the same key got different answers.
    DuplicateKeyMismatch,
    /// Downgraded variant was never evaluated.
    MonotonicityGap,
    /// Downgraded variant was evaluated and is unsupported.
    MonotonicityBroken,
    /// A device call failed or panicked.
    DeviceError,
    /// The ground-truth call exceeded its budget.
    Timeout,
    /// Closing an established session failed.
    SessionTeardown,
}

impl ViolationKind {
    #[must_use]
    pub const fn taxonomy(self) -> Taxonomy {
        match self {
            Self::QueryMismatch
            | Self::StabilizationMismatch
            | Self::DeferredQueryMismatch
            | Self::DuplicateKeyMismatch => Taxonomy::Consistency,
            Self::MonotonicityGap | Self::MonotonicityBroken => Taxonomy::Monotonicity,
            Self::DeviceError | Self::Timeout | Self::SessionTeardown => Taxonomy::Device,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::QueryMismatch => "query_mismatch",
            Self::StabilizationMismatch => "stabilization_mismatch",
            Self::DeferredQueryMismatch => "deferred_query_mismatch",
            Self::DuplicateKeyMismatch => "duplicate_key_mismatch",
            Self::MonotonicityGap => "monotonicity_gap",
            Self::MonotonicityBroken => "monotonicity_broken",
            Self::DeviceError => "device_error",
            Self::Timeout => "timeout",
            Self::SessionTeardown => "session_teardown",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded inconsistency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub description: String,
    pub combination: String,
    pub expected: String,
    pub actual: String,
}

impl Violation {
    #[must_use]
    pub fn new(
        kind: ViolationKind,
        description: impl Into<String>,
        combination: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            description: description.into(),
            combination: combination.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    #[must_use]
    pub const fn taxonomy(&self) -> Taxonomy {
        self.kind.taxonomy()
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}/{}] {}: {} (expected {}, actual {})",
            self.taxonomy(),
            self.kind,
            self.combination,
            self.description,
            self.expected,
            self.actual
        )
    }
}

/// Counts of violations per taxonomy kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomyCounts {
    pub consistency: usize,
    pub monotonicity: usize,
    pub device: usize,
}

impl TaxonomyCounts {
    #[must_use]
    pub fn tally<'a>(violations: impl IntoIterator<Item = &'a Violation>) -> Self {
        let mut counts = Self::default();
        for v in violations {
            match v.taxonomy() {
                Taxonomy::Consistency => counts.consistency += 1,
                Taxonomy::Monotonicity => counts.monotonicity += 1,
                Taxonomy::Device => counts.device += 1,
            }
        }
        counts
    }

    #[must_use]
    pub const fn total(&self) -> usize {
        self.consistency + self.monotonicity + self.device
    }
}

/// Accumulates violations for a whole run.
#[derive(Debug, Clone, Default)]
pub struct Collector {
    violations: Vec<Violation>,
}

impl Collector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, violation: Violation) {
        self.violations.push(violation);
    }

    #[must_use]
    pub fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }

    /// Violations in insertion order.
    #[must_use]
    pub fn all(&self) -> &[Violation] {
        &self.violations
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.violations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    #[must_use]
    pub fn count_kind(&self, kind: ViolationKind) -> usize {
        self.violations.iter().filter(|v| v.kind == kind).count()
    }

    #[must_use]
    pub fn counts(&self) -> TaxonomyCounts {
        TaxonomyCounts::tally(&self.violations)
    }

    #[must_use]
    pub fn into_violations(self) -> Vec<Violation> {
        self.violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_keeps_every_violation_in_order() {
        let mut c = Collector::new();
        assert!(!c.has_violations());
        c.add(Violation::new(
            ViolationKind::Timeout,
            "hung",
            "combo-a",
            "answer",
            "timeout",
        ));
        c.add(Violation::new(
            ViolationKind::MonotonicityGap,
            "missing",
            "combo-b",
            "present",
            "absent",
        ));
        c.add(Violation::new(
            ViolationKind::QueryMismatch,
            "mismatch",
            "combo-c",
            "true",
            "false",
        ));
        assert!(c.has_violations());
        let names: Vec<&str> = c.all().iter().map(|v| v.combination.as_str()).collect();
        assert_eq!(names, ["combo-a", "combo-b", "combo-c"]);
        assert_eq!(
            c.counts(),
            TaxonomyCounts {
                consistency: 1,
                monotonicity: 1,
                device: 1
            }
        );
        assert_eq!(c.counts().total(), 3);
    }

    #[test]
    fn kinds_map_onto_taxonomy() {
        assert_eq!(ViolationKind::SessionTeardown.taxonomy(), Taxonomy::Device);
        assert_eq!(
            ViolationKind::DeferredQueryMismatch.taxonomy(),
            Taxonomy::Consistency
        );
        assert_eq!(
            ViolationKind::MonotonicityBroken.taxonomy(),
            Taxonomy::Monotonicity
        );
    }

    #[test]
    fn violation_serializes_with_snake_case_kind() {
        let v = Violation::new(ViolationKind::QueryMismatch, "d", "c", "e", "a");
        let json: serde_json::Value = serde_json::to_value(&v).unwrap();
        assert_eq!(json["kind"], "query_mismatch");
        assert_eq!(json["expected"], "e");
    }
}
