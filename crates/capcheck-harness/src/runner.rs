//! Multi-device verification runs over device profiles.

use std::time::Instant;

use capcheck_core::{
    CheckEvent, CheckStatus, DeviceRun, EngineConfig, EngineError, EnumerationStats,
    TaxonomyCounts, Violation, verify_devices,
};
use serde::{Deserialize, Serialize};

use crate::fixtures::DeviceProfile;
use crate::profile_device::{LedgerSnapshot, ProfileDevice};
use crate::structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};

/// Exit code when every device verified cleanly.
pub const EXIT_CLEAN: i32 = 0;
/// Exit code when at least one violation was found.
pub const EXIT_VIOLATIONS: i32 = 1;
/// Exit code when a device could not be verified at all.
pub const EXIT_ERROR: i32 = 2;

/// Result of verifying one device profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub device_id: String,
    /// Set when the engine could not verify the device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub stats: EnumerationStats,
    /// Distinct feature keys recorded.
    pub records: usize,
    pub supported: usize,
    pub duplicates: usize,
    pub monotonicity_pairs: usize,
    pub counts: TaxonomyCounts,
    pub violations: Vec<Violation>,
    pub ledger: LedgerSnapshot,
}

impl DeviceSummary {
    fn from_run(run: &DeviceRun, ledger: LedgerSnapshot) -> Self {
        Self {
            device_id: run.device_id.clone(),
            error: None,
            stats: run.stats,
            records: run.records.len(),
            supported: run.supported_count(),
            duplicates: run.duplicates,
            monotonicity_pairs: run.monotonicity_pairs,
            counts: run.counts(),
            violations: run.violations.clone(),
            ledger,
        }
    }

    fn from_error(device_id: String, err: &EngineError, ledger: LedgerSnapshot) -> Self {
        Self {
            device_id,
            error: Some(err.to_string()),
            stats: EnumerationStats::default(),
            records: 0,
            supported: 0,
            duplicates: 0,
            monotonicity_pairs: 0,
            counts: TaxonomyCounts::default(),
            violations: Vec::new(),
            ledger,
        }
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        self.error.is_none() && self.violations.is_empty()
    }
}

/// Exit code for a set of device summaries. Engine errors outrank violations.
#[must_use]
pub fn exit_code(summaries: &[DeviceSummary]) -> i32 {
    if summaries.iter().any(|s| s.error.is_some()) {
        EXIT_ERROR
    } else if summaries.iter().any(|s| !s.violations.is_empty()) {
        EXIT_VIOLATIONS
    } else {
        EXIT_CLEAN
    }
}

/// Runs device profiles through the engine.
pub struct TestRunner {
    /// Name of the verification campaign.
    pub campaign: String,
    pub config: EngineConfig,
}

struct DeviceOutcome {
    summary: DeviceSummary,
    events: Vec<CheckEvent>,
}

impl TestRunner {
    #[must_use]
    pub fn new(campaign: impl Into<String>, config: EngineConfig) -> Self {
        Self {
            campaign: campaign.into(),
            config,
        }
    }

    /// Verify every profile, one thread per device. Summaries keep input order.
    #[must_use]
    pub fn run(&self, profiles: &[DeviceProfile]) -> Vec<DeviceSummary> {
        self.execute(profiles)
            .into_iter()
            .map(|outcome| outcome.summary)
            .collect()
    }

    /// Like [`TestRunner::run`], also writing one JSONL record per check,
    /// violation and device to `log`.
    pub fn run_logged(
        &self,
        profiles: &[DeviceProfile],
        log: &mut LogEmitter,
    ) -> std::io::Result<Vec<DeviceSummary>> {
        log.emit_entry(
            LogEntry::new("", LogLevel::Info, "run_start").with_details(serde_json::json!({
                "devices": profiles.len(),
                "config": &self.config,
            })),
        )?;
        let started = Instant::now();
        let outcomes = self.execute(profiles);
        let elapsed = started.elapsed();

        for outcome in &outcomes {
            log_device(log, outcome)?;
        }

        let summaries: Vec<DeviceSummary> = outcomes.into_iter().map(|o| o.summary).collect();
        let code = exit_code(&summaries);
        let level = if code == EXIT_CLEAN {
            LogLevel::Info
        } else {
            LogLevel::Warn
        };
        log.emit_entry(
            LogEntry::new("", level, "run_end")
                .with_exit_code(code)
                .with_duration_ms(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
                .with_details(serde_json::json!({
                    "devices": summaries.len(),
                    "passed": summaries.iter().filter(|s| s.passed()).count(),
                })),
        )?;
        log.flush()?;
        Ok(summaries)
    }

    fn execute(&self, profiles: &[DeviceProfile]) -> Vec<DeviceOutcome> {
        let devices: Vec<ProfileDevice> =
            profiles.iter().cloned().map(ProfileDevice::new).collect();
        verify_devices(&self.config, &devices)
            .into_iter()
            .zip(&devices)
            .map(|((device_id, result), device)| match result {
                Ok(run) => DeviceOutcome {
                    summary: DeviceSummary::from_run(&run, device.ledger()),
                    events: run.events,
                },
                Err(err) => DeviceOutcome {
                    summary: DeviceSummary::from_error(device_id, &err, device.ledger()),
                    events: Vec::new(),
                },
            })
            .collect()
    }
}

fn log_device(log: &mut LogEmitter, outcome: &DeviceOutcome) -> std::io::Result<()> {
    let summary = &outcome.summary;
    for event in &outcome.events {
        let level = match event.status {
            CheckStatus::Pass => LogLevel::Debug,
            CheckStatus::Fail => LogLevel::Warn,
            CheckStatus::Error | CheckStatus::Timeout => LogLevel::Error,
        };
        log.emit_entry(
            LogEntry::new("", level, "combination_checked")
                .with_device(&summary.device_id)
                .with_combination(&event.combination, &event.fingerprint)
                .with_outcome(Outcome::from(event.status))
                .with_latency_ns(u64::try_from(event.elapsed.as_nanos()).unwrap_or(u64::MAX))
                .with_details(serde_json::json!({
                    "query_supported": event.query_supported,
                    "characteristics_keys": event.characteristics_keys,
                    "violations": &event.violations,
                })),
        )?;
    }

    for violation in &summary.violations {
        log.emit_entry(
            LogEntry::new("", LogLevel::Warn, "violation")
                .with_device(&summary.device_id)
                .with_violation_kind(violation.kind)
                .with_outcome(Outcome::Fail)
                .with_details(serde_json::json!({
                    "description": &violation.description,
                    "combination": &violation.combination,
                    "expected": &violation.expected,
                    "actual": &violation.actual,
                })),
        )?;
    }

    let entry = match &summary.error {
        Some(err) => LogEntry::new("", LogLevel::Error, "device_error")
            .with_device(&summary.device_id)
            .with_outcome(Outcome::Error)
            .with_details(serde_json::json!({ "error": err })),
        None => LogEntry::new("", LogLevel::Info, "device_summary")
            .with_device(&summary.device_id)
            .with_outcome(if summary.passed() {
                Outcome::Pass
            } else {
                Outcome::Fail
            })
            .with_details(serde_json::json!({
                "stats": summary.stats,
                "records": summary.records,
                "supported": summary.supported,
                "duplicates": summary.duplicates,
                "counts": summary.counts,
                "sessions": summary.ledger,
            })),
    };
    log.emit_entry(entry)
}
