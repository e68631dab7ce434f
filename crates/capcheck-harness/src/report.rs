//! Report generation for verification runs.

use std::fmt::Write as _;

use capcheck_core::{Taxonomy, TaxonomyCounts, Violation};
use serde::{Deserialize, Serialize};

use crate::runner::DeviceSummary;

/// Aggregate over all devices of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Devices run.
    pub total: usize,
    /// Devices verified without violations.
    pub passed: usize,
    /// Devices verified with at least one violation.
    pub failed: usize,
    /// Devices the engine could not verify.
    pub errored: usize,
    pub counts: TaxonomyCounts,
    /// Per-device results, ordered by device id.
    pub devices: Vec<DeviceSummary>,
}

impl RunSummary {
    #[must_use]
    pub fn from_summaries(mut devices: Vec<DeviceSummary>) -> Self {
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        let total = devices.len();
        let errored = devices.iter().filter(|d| d.error.is_some()).count();
        let passed = devices.iter().filter(|d| d.passed()).count();
        let counts = TaxonomyCounts::tally(devices.iter().flat_map(|d| &d.violations));
        Self {
            total,
            passed,
            failed: total - passed - errored,
            errored,
            counts,
            devices,
        }
    }

    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.passed == self.total
    }

    /// Every violation with its device id, grouped by taxonomy then kind.
    /// Within a kind, devices are in id order and violations in the order found.
    #[must_use]
    pub fn grouped_violations(&self) -> Vec<(&str, &Violation)> {
        let mut all: Vec<(&str, &Violation)> = self
            .devices
            .iter()
            .flat_map(|d| d.violations.iter().map(|v| (d.device_id.as_str(), v)))
            .collect();
        all.sort_by_key(|(device, v)| (v.taxonomy(), v.kind, *device));
        all
    }
}

/// A verification report over one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub title: String,
    pub campaign: String,
    /// Timestamp (UTC).
    pub timestamp: String,
    pub summary: RunSummary,
}

fn cell(text: &str) -> String {
    text.replace('|', "\\|")
}

impl ConsistencyReport {
    /// Render the report as markdown.
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let s = &self.summary;
        let mut out = String::new();
        let _ = writeln!(out, "# {}\n", self.title);
        let _ = writeln!(out, "- Campaign: {}", self.campaign);
        let _ = writeln!(out, "- Timestamp: {}", self.timestamp);
        let _ = writeln!(out, "- Devices: {}", s.total);
        let _ = writeln!(out, "- Passed: {}", s.passed);
        let _ = writeln!(out, "- Failed: {}", s.failed);
        let _ = writeln!(out, "- Errored: {}", s.errored);
        let _ = writeln!(
            out,
            "- Violations: {} (consistency {}, monotonicity {}, device {})\n",
            s.counts.total(),
            s.counts.consistency,
            s.counts.monotonicity,
            s.counts.device
        );

        out.push_str("| Device | Checked | Skipped | Keys | Supported | Violations | Status |\n");
        out.push_str("|--------|---------|---------|------|-----------|------------|--------|\n");
        for d in &s.devices {
            let status = match (&d.error, d.passed()) {
                (Some(_), _) => "ERROR",
                (None, true) => "PASS",
                (None, false) => "FAIL",
            };
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} | {} | {} |",
                cell(&d.device_id),
                d.stats.yielded,
                d.stats.skipped(),
                d.records,
                d.supported,
                d.violations.len(),
                status
            );
        }

        let errors: Vec<&DeviceSummary> =
            s.devices.iter().filter(|d| d.error.is_some()).collect();
        if !errors.is_empty() {
            out.push_str("\n## Engine errors\n\n");
            for d in errors {
                let _ = writeln!(
                    out,
                    "- {}: {}",
                    d.device_id,
                    d.error.as_deref().unwrap_or_default()
                );
            }
        }

        let grouped = s.grouped_violations();
        let mut current: Option<Taxonomy> = None;
        for (device, v) in grouped {
            if current != Some(v.taxonomy()) {
                current = Some(v.taxonomy());
                let _ = writeln!(out, "\n## {} violations\n", v.taxonomy());
                out.push_str("| Device | Kind | Combination | Expected | Actual | Description |\n");
                out.push_str("|--------|------|-------------|----------|--------|-------------|\n");
            }
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} | {} |",
                cell(device),
                v.kind,
                cell(&v.combination),
                cell(&v.expected),
                cell(&v.actual),
                cell(&v.description)
            );
        }
        out
    }

    /// Render the report as JSON.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
    }
}
