//! Per-device orchestration and parallel multi-device verification.

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::collector::{Collector, TaxonomyCounts, Violation, ViolationKind};
use crate::combination::{Combination, StreamTemplate};
use crate::device::DeviceUnderTest;
use crate::enumerate::{EnumerationStats, Enumerator, PruningPolicy};
use crate::error::{ConfigError, EngineError};
use crate::monotonic::{self, MonotonicityMode};
use crate::oracle::{
    CheckEvent, ConsistencyOracle, OracleSettings, SupportMap, panic_diagnostic, support_label,
};
use crate::space::{ConfigSpace, DeviceCapabilities, StabilizationMode};

/// Run configuration. Every field has a default, so `{}` is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pruning: PruningPolicy,
    pub ground_truth_timeout_ms: u64,
    pub stabilization_cross_check: bool,
    pub deferred_query_check: bool,
    pub monotonicity: MonotonicityMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pruning: PruningPolicy::default(),
            ground_truth_timeout_ms: 3000,
            stabilization_cross_check: true,
            deferred_query_check: true,
            monotonicity: MonotonicityMode::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON config.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Reject values under which no combination could ever pass.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ground_truth_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "ground_truth_timeout_ms",
                reason: String::from("must be at least 1"),
            });
        }
        self.pruning.validate()
    }

    #[must_use]
    pub fn oracle_settings(&self) -> OracleSettings {
        // An enumerated preview-stabilization tuple gets its own ground truth.
        let stabilized_excluded = self
            .pruning
            .excluded_stabilization
            .contains(&StabilizationMode::PreviewStabilization);
        OracleSettings {
            ground_truth_budget: Duration::from_millis(self.ground_truth_timeout_ms),
            stabilization_cross_check: self.stabilization_cross_check,
            stabilized_ground_truth: stabilized_excluded,
            deferred_query_check: self.deferred_query_check,
        }
    }
}

/// Everything one device's run produced.
#[derive(Debug, Clone)]
pub struct DeviceRun {
    pub device_id: String,
    pub records: SupportMap,
    pub violations: Vec<Violation>,
    pub stats: EnumerationStats,
    pub events: Vec<CheckEvent>,
    /// Combinations whose key was already recorded with the same answer.
    pub duplicates: usize,
    /// Downgrade pairs examined by the monotonicity checker.
    pub monotonicity_pairs: usize,
}

impl DeviceRun {
    #[must_use]
    pub fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }

    #[must_use]
    pub fn counts(&self) -> TaxonomyCounts {
        TaxonomyCounts::tally(&self.violations)
    }

    #[must_use]
    pub fn supported_count(&self) -> usize {
        self.records.values().filter(|r| r.supported).count()
    }
}

/// Dry-run output: what a run would check, without touching the device.
#[derive(Debug, Clone)]
pub struct EnumerationPlan {
    pub combinations: Vec<Combination>,
    pub stats: EnumerationStats,
}

/// Verification engine for one device at a time.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Enumerate the combinations a run over `capabilities` would check.
    pub fn plan(
        &self,
        capabilities: &DeviceCapabilities,
        templates: &[StreamTemplate],
    ) -> Result<EnumerationPlan, EngineError> {
        let space = ConfigSpace::new(capabilities)?;
        let mut enumerator = Enumerator::new(&space, templates, &self.config.pruning)?;
        let combinations: Vec<Combination> = enumerator.by_ref().collect();
        Ok(EnumerationPlan {
            combinations,
            stats: *enumerator.stats(),
        })
    }

    /// Verify one device end to end.
    ///
    /// Only setup problems are errors; everything found while checking
    /// combinations ends up in [`DeviceRun::violations`].
    pub fn run<D: DeviceUnderTest>(&self, device: &D) -> Result<DeviceRun, EngineError> {
        let capabilities = panic::catch_unwind(AssertUnwindSafe(|| device.capabilities()))
            .map_err(|payload| panic_diagnostic(payload.as_ref()))
            .and_then(|caps| caps)
            .map_err(EngineError::CapabilitiesUnavailable)?;
        let templates = panic::catch_unwind(AssertUnwindSafe(|| device.queryable_templates()))
            .map_err(|payload| {
                EngineError::CapabilitiesUnavailable(panic_diagnostic(payload.as_ref()))
            })?;

        let space = ConfigSpace::new(&capabilities)?;
        let mut enumerator = Enumerator::new(&space, &templates, &self.config.pruning)?;
        let oracle = ConsistencyOracle::new(
            device,
            self.config.oracle_settings(),
            space.supports_stabilization(StabilizationMode::PreviewStabilization),
        );

        let mut collector = Collector::new();
        let mut records = SupportMap::new();
        let mut events = Vec::new();
        let mut duplicates = 0;

        for combination in enumerator.by_ref() {
            let result = oracle.check(&combination, &mut collector);
            events.push(result.event);
            let Some(record) = result.record else {
                continue;
            };
            match records.get(&record.key) {
                Some(existing) if existing.supported != record.supported => {
                    collector.add(Violation::new(
                        ViolationKind::DuplicateKeyMismatch,
                        format!(
                            "configuration-equivalent combination answered differently: {}",
                            record.key
                        ),
                        combination.to_string(),
                        support_label(existing.supported),
                        support_label(record.supported),
                    ));
                }
                Some(_) => duplicates += 1,
                None => {
                    records.insert(record.key.clone(), record);
                }
            }
        }
        let stats = *enumerator.stats();

        let monotonicity_pairs =
            monotonic::check(&records, self.config.monotonicity, &mut collector);

        Ok(DeviceRun {
            device_id: device.id().to_string(),
            records,
            violations: collector.into_violations(),
            stats,
            events,
            duplicates,
            monotonicity_pairs,
        })
    }
}

/// Verify each device on its own scoped thread.
///
/// Results come back in input order, paired with the device id. A failing
/// device never affects the others.
pub fn verify_devices<D: DeviceUnderTest>(
    config: &EngineConfig,
    devices: &[D],
) -> Vec<(String, Result<DeviceRun, EngineError>)> {
    thread::scope(|scope| {
        let handles: Vec<_> = devices
            .iter()
            .map(|device| {
                let engine = Engine::new(config.clone());
                scope.spawn(move || engine.run(device))
            })
            .collect();
        handles
            .into_iter()
            .zip(devices)
            .map(|(handle, device)| {
                let result = handle.join().unwrap_or_else(|payload| {
                    Err(EngineError::Aborted(panic_diagnostic(payload.as_ref())))
                });
                (device.id().to_string(), result)
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_config_is_all_defaults() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.ground_truth_timeout_ms, 3000);
        assert_eq!(config.monotonicity, MonotonicityMode::Implication);
        assert_eq!(config.pruning.fps_upper_bounds, vec![30, 60]);
    }

    #[test]
    fn partial_json_config_overrides_only_named_fields() {
        let config = EngineConfig::from_json(
            r#"{"monotonicity": "equivalence", "pruning": {"fps_upper_bounds": [30]}}"#,
        )
        .unwrap();
        assert_eq!(config.monotonicity, MonotonicityMode::Equivalence);
        assert_eq!(config.pruning.fps_upper_bounds, vec![30]);
        assert!((config.pruning.frame_duration_tolerance - 1.01).abs() < f64::EPSILON);
        assert!(config.deferred_query_check);
    }

    #[test]
    fn oracle_settings_follow_config() {
        let config = EngineConfig {
            ground_truth_timeout_ms: 250,
            stabilization_cross_check: false,
            ..EngineConfig::default()
        };
        let settings = config.oracle_settings();
        assert_eq!(settings.ground_truth_budget, Duration::from_millis(250));
        assert!(!settings.stabilization_cross_check);
        assert!(!settings.stabilized_ground_truth);
    }

    #[test]
    fn excluded_preview_stabilization_keeps_its_ground_truth() {
        let mut config = EngineConfig::default();
        config
            .pruning
            .excluded_stabilization
            .push(StabilizationMode::PreviewStabilization);
        assert!(config.oracle_settings().stabilized_ground_truth);
    }

    #[test]
    fn json_config_that_prunes_everything_is_rejected() {
        for json in [
            r#"{"pruning": {"frame_duration_tolerance": 0}}"#,
            r#"{"pruning": {"frame_duration_tolerance": -1.5}}"#,
            r#"{"pruning": {"range_profiles": []}}"#,
            r#"{"pruning": {"fps_upper_bounds": []}}"#,
            r#"{"ground_truth_timeout_ms": 0}"#,
        ] {
            let err = EngineConfig::from_json(json).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { .. }), "{json}: {err}");
        }
        let err = EngineConfig::from_json(r#"{"pruning": {"range_profiles": []}}"#).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid pruning.range_profiles: must not be empty"
        );
    }

    #[test]
    fn config_file_is_validated_on_load() {
        let dir = std::env::temp_dir().join(format!("capcheck-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("zero-tolerance.json");
        std::fs::write(&path, r#"{"pruning": {"frame_duration_tolerance": 0.0}}"#).unwrap();
        let err = EngineConfig::from_file(&path).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "pruning.frame_duration_tolerance",
                ..
            }
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_config_file_is_an_io_error() {
        let err = EngineConfig::from_file(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
