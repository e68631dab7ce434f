//! Consistency oracle: cheap query vs. expensive ground truth, per combination.
//!
//! Every device call is isolated: failures and panics become violations and
//! the enumeration carries on. Sessions opened here are always closed before
//! `check` returns.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::collector::{Collector, Taxonomy, Violation, ViolationKind};
use crate::combination::Combination;
use crate::device::{DeviceSession, DeviceUnderTest, Outcome};
use crate::key::{FeatureKey, canonicalize};
use crate::space::StabilizationMode;

/// Default budget for one ground-truth call.
pub const DEFAULT_GROUND_TRUTH_BUDGET: Duration = Duration::from_millis(3000);

/// Cheap-query answer recorded for one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportRecord {
    pub key: FeatureKey,
    pub supported: bool,
}

/// Completed support map, keyed by canonical feature key.
pub type SupportMap = BTreeMap<FeatureKey, SupportRecord>;

/// Knobs of the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OracleSettings {
    pub ground_truth_budget: Duration,
    pub stabilization_cross_check: bool,
    /// Also establish the preview-stabilization variant during the cross-check,
    /// and report its query failures there.
    ///
    /// Only needed when that variant is never enumerated on its own; otherwise
    /// its own check already makes and reports those calls.
    pub stabilized_ground_truth: bool,
    pub deferred_query_check: bool,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            ground_truth_budget: DEFAULT_GROUND_TRUTH_BUDGET,
            stabilization_cross_check: true,
            stabilized_ground_truth: false,
            deferred_query_check: true,
        }
    }
}

/// Overall status of one check, for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Fail,
    Error,
    Timeout,
}

/// Diagnostic trace of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckEvent {
    pub combination: String,
    pub fingerprint: String,
    pub status: CheckStatus,
    pub query_supported: Option<bool>,
    pub violations: Vec<ViolationKind>,
    pub characteristics_keys: Option<usize>,
    pub elapsed: Duration,
}

/// Result of checking one combination.
#[derive(Debug, Clone)]
pub struct CheckResult {
    /// `None` when the cheap query failed or the ground truth timed out.
    pub record: Option<SupportRecord>,
    pub event: CheckEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Agrees,
    Disagrees,
    TimedOut,
    Failed,
}

/// Cross-checks one device's query API against its ground truth.
pub struct ConsistencyOracle<'d, D: DeviceUnderTest> {
    device: &'d D,
    settings: OracleSettings,
    preview_stabilization: bool,
}

impl<'d, D: DeviceUnderTest> ConsistencyOracle<'d, D> {
    /// `preview_stabilization` says whether the device supports that mode.
    #[must_use]
    pub fn new(device: &'d D, settings: OracleSettings, preview_stabilization: bool) -> Self {
        Self {
            device,
            settings,
            preview_stabilization,
        }
    }

    /// Check `combination`, appending any violations to `collector`.
    pub fn check(&self, combination: &Combination, collector: &mut Collector) -> CheckResult {
        let started = Instant::now();
        let before = collector.len();
        let description = combination.to_string();
        let (key, _, _) = canonicalize(combination);
        let fingerprint = key.fingerprint();

        let query_supported = match self.query(combination) {
            Outcome::Supported(()) => Some(true),
            Outcome::NotSupported => Some(false),
            Outcome::TimedOut => {
                collector.add(device_failure(
                    "is_config_supported",
                    &description,
                    "query timed out",
                ));
                None
            }
            Outcome::Error(msg) => {
                collector.add(device_failure("is_config_supported", &description, &msg));
                None
            }
        };

        let Some(supported) = query_supported else {
            return CheckResult {
                record: None,
                event: self.event(
                    description,
                    fingerprint,
                    None,
                    None,
                    collector,
                    before,
                    started,
                    false,
                ),
            };
        };

        let (verdict, characteristics_keys) =
            self.ground_truth(combination, &description, supported, collector);
        let timed_out = verdict == Verdict::TimedOut;

        if self.settings.deferred_query_check {
            self.check_deferred(combination, &description, supported, collector);
        }

        if self.settings.stabilization_cross_check
            && self.preview_stabilization
            && combination.stabilization == StabilizationMode::Off
        {
            self.check_stabilization(combination, supported, collector);
        }

        let record = (!timed_out).then(|| SupportRecord {
            key,
            supported,
        });
        CheckResult {
            record,
            event: self.event(
                description,
                fingerprint,
                Some(supported),
                characteristics_keys,
                collector,
                before,
                started,
                timed_out,
            ),
        }
    }

    fn query(&self, combination: &Combination) -> Outcome<()> {
        guarded(|| self.device.is_config_supported(combination))
    }

    /// Run the ground truth and compare it with the cheap answer.
    fn ground_truth(
        &self,
        combination: &Combination,
        description: &str,
        query_supported: bool,
        collector: &mut Collector,
    ) -> (Verdict, Option<usize>) {
        let budget = self.settings.ground_truth_budget;
        let started = Instant::now();
        let outcome = guarded(|| self.device.establish_and_describe(combination, budget));
        let elapsed = started.elapsed();

        let (established, characteristics_keys) = match outcome {
            Outcome::Supported(session) => {
                let mut session = ScopedSession::new(session);
                let keys = session.characteristics_len();
                if let Err(msg) = session.close() {
                    collector.add(Violation::new(
                        ViolationKind::SessionTeardown,
                        format!("closing the established session failed: {msg}"),
                        description,
                        "clean teardown",
                        msg,
                    ));
                }
                (Outcome::Supported(()), keys)
            }
            other => (other.tag(), None),
        };

        if elapsed > budget && !matches!(established, Outcome::TimedOut) {
            collector.add(timeout(description, budget, elapsed, &established));
            return (Verdict::TimedOut, characteristics_keys);
        }

        let verdict = match established {
            Outcome::Supported(()) if query_supported => Verdict::Agrees,
            Outcome::Supported(()) => {
                collector.add(Violation::new(
                    ViolationKind::QueryMismatch,
                    "query says unsupported, ground truth disagrees",
                    description,
                    "not supported",
                    "supported",
                ));
                Verdict::Disagrees
            }
            Outcome::NotSupported if query_supported => {
                collector.add(Violation::new(
                    ViolationKind::QueryMismatch,
                    "query says supported, ground truth disagrees",
                    description,
                    "supported",
                    "not supported",
                ));
                Verdict::Disagrees
            }
            Outcome::NotSupported => Verdict::Agrees,
            Outcome::TimedOut => {
                collector.add(timeout(description, budget, elapsed, &Outcome::TimedOut));
                Verdict::TimedOut
            }
            Outcome::Error(msg) => {
                collector.add(device_failure("establish_and_describe", description, &msg));
                Verdict::Failed
            }
        };
        (verdict, characteristics_keys)
    }

    fn check_deferred(
        &self,
        combination: &Combination,
        description: &str,
        query_supported: bool,
        collector: &mut Collector,
    ) {
        let deferred = match panic::catch_unwind(AssertUnwindSafe(|| {
            self.device.is_deferred_config_supported(combination)
        })) {
            Ok(None) => return,
            Ok(Some(outcome)) => outcome,
            Err(payload) => Outcome::Error(panic_diagnostic(payload.as_ref())),
        };
        match deferred {
            Outcome::Supported(()) | Outcome::NotSupported => {
                let deferred_supported = deferred.is_supported();
                if deferred_supported != query_supported {
                    collector.add(Violation::new(
                        ViolationKind::DeferredQueryMismatch,
                        "deferred-output query disagrees with the complete query",
                        description,
                        support_label(query_supported),
                        support_label(deferred_supported),
                    ));
                }
            }
            Outcome::TimedOut => collector.add(device_failure(
                "is_deferred_config_supported",
                description,
                "query timed out",
            )),
            Outcome::Error(msg) => collector.add(device_failure(
                "is_deferred_config_supported",
                description,
                &msg,
            )),
        }
    }

    /// Repeat the query with preview stabilization forced on.
    fn check_stabilization(
        &self,
        combination: &Combination,
        off_supported: bool,
        collector: &mut Collector,
    ) {
        let stabilized = combination.with_stabilization(StabilizationMode::PreviewStabilization);
        let description = stabilized.to_string();
        let standalone = self.settings.stabilized_ground_truth;
        let on_supported = match self.query(&stabilized) {
            Outcome::Supported(()) => true,
            Outcome::NotSupported => false,
            Outcome::TimedOut => {
                if standalone {
                    collector.add(device_failure(
                        "is_config_supported",
                        &description,
                        "query timed out",
                    ));
                }
                return;
            }
            Outcome::Error(msg) => {
                if standalone {
                    collector.add(device_failure("is_config_supported", &description, &msg));
                }
                return;
            }
        };
        if on_supported != off_supported {
            collector.add(Violation::new(
                ViolationKind::StabilizationMismatch,
                format!(
                    "query returns {off_supported} with stabilization off but {on_supported} with preview stabilization on"
                ),
                combination.to_string(),
                support_label(off_supported),
                support_label(on_supported),
            ));
        }
        if standalone {
            self.ground_truth(&stabilized, &description, on_supported, collector);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn event(
        &self,
        combination: String,
        fingerprint: String,
        query_supported: Option<bool>,
        characteristics_keys: Option<usize>,
        collector: &Collector,
        before: usize,
        started: Instant,
        timed_out: bool,
    ) -> CheckEvent {
        let added = &collector.all()[before..];
        let status = if timed_out {
            CheckStatus::Timeout
        } else if added.iter().any(|v| v.taxonomy() == Taxonomy::Device) {
            CheckStatus::Error
        } else if added.is_empty() {
            CheckStatus::Pass
        } else {
            CheckStatus::Fail
        };
        CheckEvent {
            combination,
            fingerprint,
            status,
            query_supported,
            violations: added.iter().map(|v| v.kind).collect(),
            characteristics_keys,
            elapsed: started.elapsed(),
        }
    }
}

/// Owns an established session and guarantees it is closed exactly once.
struct ScopedSession<S: DeviceSession> {
    inner: Option<S>,
}

impl<S: DeviceSession> ScopedSession<S> {
    fn new(session: S) -> Self {
        Self {
            inner: Some(session),
        }
    }

    fn characteristics_len(&self) -> Option<usize> {
        let inner = self.inner.as_ref()?;
        panic::catch_unwind(AssertUnwindSafe(|| inner.characteristics().keys.len())).ok()
    }

    fn close(&mut self) -> Result<(), String> {
        let Some(mut session) = self.inner.take() else {
            return Ok(());
        };
        match panic::catch_unwind(AssertUnwindSafe(|| session.close())) {
            Ok(result) => result,
            Err(payload) => Err(panic_diagnostic(payload.as_ref())),
        }
    }
}

impl<S: DeviceSession> Drop for ScopedSession<S> {
    fn drop(&mut self) {
        if let Some(mut session) = self.inner.take() {
            let _ = panic::catch_unwind(AssertUnwindSafe(|| session.close()));
        }
    }
}

/// Run a device call, turning a panic into [`Outcome::Error`].
fn guarded<T>(call: impl FnOnce() -> Outcome<T>) -> Outcome<T> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(outcome) => outcome,
        Err(payload) => Outcome::Error(panic_diagnostic(payload.as_ref())),
    }
}

pub(crate) fn panic_diagnostic(payload: &(dyn Any + Send)) -> String {
    let msg = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| String::from("non-string panic payload"));
    format!("device panicked: {msg}")
}

fn device_failure(call: &str, description: &str, msg: &str) -> Violation {
    Violation::new(
        ViolationKind::DeviceError,
        format!("device call {call} failed: {msg}"),
        description,
        "supported or not supported",
        msg,
    )
}

/// `answer` is what the ground truth eventually returned, if anything.
fn timeout(
    description: &str,
    budget: Duration,
    elapsed: Duration,
    answer: &Outcome<()>,
) -> Violation {
    let answer = match answer {
        Outcome::TimedOut => String::from("no answer"),
        other => other.to_string(),
    };
    Violation::new(
        ViolationKind::Timeout,
        format!(
            "timeout: ground truth did not answer within {} ms",
            budget.as_millis()
        ),
        description,
        format!("answer within {} ms", budget.as_millis()),
        format!("{answer} after {} ms", elapsed.as_millis()),
    )
}

pub(crate) const fn support_label(supported: bool) -> &'static str {
    if supported { "supported" } else { "not supported" }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::combination::{ResolvedStream, StreamDescriptor, StreamTemplate};
    use crate::device::Characteristics;
    use crate::space::{
        DeviceCapabilities, FpsRange, RangeProfile, Size, SizeBound, StreamFormat,
    };

    struct Session {
        chars: Characteristics,
        closes: Arc<AtomicU32>,
        fail_close: bool,
    }

    impl DeviceSession for Session {
        fn characteristics(&self) -> &Characteristics {
            &self.chars
        }

        fn close(&mut self) -> Result<(), String> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                Err(String::from("release failed"))
            } else {
                Ok(())
            }
        }
    }

    struct Scripted {
        query: Outcome<()>,
        stabilized_query: Outcome<()>,
        establish: Outcome<()>,
        deferred: Option<Outcome<()>>,
        panic_on_query: bool,
        fail_close: bool,
        closes: Arc<AtomicU32>,
    }

    impl Scripted {
        fn agreeing(supported: bool) -> Self {
            let answer = if supported {
                Outcome::Supported(())
            } else {
                Outcome::NotSupported
            };
            Self {
                query: answer.clone(),
                stabilized_query: answer.clone(),
                establish: answer,
                deferred: None,
                panic_on_query: false,
                fail_close: false,
                closes: Arc::new(AtomicU32::new(0)),
            }
        }
    }

    impl DeviceUnderTest for Scripted {
        type Session = Session;

        fn id(&self) -> &str {
            "scripted"
        }

        fn capabilities(&self) -> Result<DeviceCapabilities, String> {
            Ok(DeviceCapabilities::default())
        }

        fn queryable_templates(&self) -> Vec<StreamTemplate> {
            Vec::new()
        }

        fn is_config_supported(&self, combination: &Combination) -> Outcome<()> {
            assert!(!self.panic_on_query, "query exploded");
            if combination.stabilization == StabilizationMode::PreviewStabilization {
                self.stabilized_query.clone()
            } else {
                self.query.clone()
            }
        }

        fn is_deferred_config_supported(&self, _combination: &Combination) -> Option<Outcome<()>> {
            self.deferred.clone()
        }

        fn establish_and_describe(
            &self,
            _combination: &Combination,
            _budget: Duration,
        ) -> Outcome<Self::Session> {
            match &self.establish {
                Outcome::Supported(()) => Outcome::Supported(Session {
                    chars: Characteristics {
                        keys: vec![String::from("android.control.availableModes")],
                    },
                    closes: Arc::clone(&self.closes),
                    fail_close: self.fail_close,
                }),
                Outcome::NotSupported => Outcome::NotSupported,
                Outcome::TimedOut => Outcome::TimedOut,
                Outcome::Error(msg) => Outcome::Error(msg.clone()),
            }
        }
    }

    fn combination() -> Combination {
        Combination {
            template_index: 0,
            streams: vec![ResolvedStream {
                descriptor: StreamDescriptor::new(StreamFormat::Private, SizeBound::S1080p),
                effective_format: StreamFormat::Private,
                size: Size::new(1920, 1080),
            }],
            range_profile: RangeProfile::Standard,
            stabilization: StabilizationMode::Off,
            fps_range: FpsRange::new(30, 30),
            min_frame_duration: Duration::from_millis(16),
        }
    }

    fn run(device: &Scripted, preview: bool) -> (CheckResult, Collector) {
        let mut collector = Collector::new();
        let oracle = ConsistencyOracle::new(device, OracleSettings::default(), preview);
        let result = oracle.check(&combination(), &mut collector);
        (result, collector)
    }

    #[test]
    fn agreeing_device_records_answer_and_closes_session() {
        let device = Scripted::agreeing(true);
        let (result, collector) = run(&device, false);
        assert!(collector.is_empty());
        let record = result.record.expect("record");
        assert!(record.supported);
        assert_eq!(result.event.status, CheckStatus::Pass);
        assert_eq!(result.event.characteristics_keys, Some(1));
        assert_eq!(device.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn false_positive_is_a_query_mismatch() {
        let mut device = Scripted::agreeing(true);
        device.establish = Outcome::NotSupported;
        let (result, collector) = run(&device, false);
        assert_eq!(collector.count_kind(ViolationKind::QueryMismatch), 1);
        assert_eq!(
            collector.all()[0].description,
            "query says supported, ground truth disagrees"
        );
        assert!(result.record.expect("record").supported);
        assert_eq!(result.event.status, CheckStatus::Fail);
    }

    #[test]
    fn false_negative_is_a_query_mismatch() {
        let mut device = Scripted::agreeing(false);
        device.establish = Outcome::Supported(());
        let (result, collector) = run(&device, false);
        assert_eq!(
            collector.all()[0].description,
            "query says unsupported, ground truth disagrees"
        );
        assert!(!result.record.expect("record").supported);
        assert_eq!(device.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ground_truth_timeout_omits_the_record() {
        let mut device = Scripted::agreeing(true);
        device.establish = Outcome::TimedOut;
        let (result, collector) = run(&device, false);
        assert!(result.record.is_none());
        assert_eq!(collector.count_kind(ViolationKind::Timeout), 1);
        assert!(collector.all()[0].description.starts_with("timeout"));
        assert_eq!(result.event.status, CheckStatus::Timeout);
    }

    #[test]
    fn panicking_query_is_isolated() {
        let mut device = Scripted::agreeing(true);
        device.panic_on_query = true;
        let (result, collector) = run(&device, false);
        assert!(result.record.is_none());
        assert_eq!(collector.count_kind(ViolationKind::DeviceError), 1);
        assert!(collector.all()[0].actual.contains("query exploded"));
        assert_eq!(result.event.status, CheckStatus::Error);
    }

    #[test]
    fn ground_truth_error_keeps_the_record() {
        let mut device = Scripted::agreeing(true);
        device.establish = Outcome::Error(String::from("hal died"));
        let (result, collector) = run(&device, false);
        assert!(result.record.is_some());
        assert_eq!(collector.count_kind(ViolationKind::DeviceError), 1);
    }

    #[test]
    fn failed_close_is_reported_once() {
        let mut device = Scripted::agreeing(true);
        device.fail_close = true;
        let (_, collector) = run(&device, false);
        assert_eq!(collector.count_kind(ViolationKind::SessionTeardown), 1);
        assert_eq!(device.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stabilization_cross_check_runs_only_with_support() {
        let mut device = Scripted::agreeing(true);
        device.stabilized_query = Outcome::NotSupported;
        let (_, without) = run(&device, false);
        assert!(without.is_empty());

        let (_, with) = run(&device, true);
        assert_eq!(with.len(), 1);
        assert_eq!(with.count_kind(ViolationKind::StabilizationMismatch), 1);
        assert_eq!(device.closes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stabilized_ground_truth_runs_only_when_enabled() {
        let mut device = Scripted::agreeing(true);
        device.stabilized_query = Outcome::NotSupported;
        let settings = OracleSettings {
            stabilized_ground_truth: true,
            ..OracleSettings::default()
        };
        let mut collector = Collector::new();
        ConsistencyOracle::new(&device, settings, true).check(&combination(), &mut collector);
        assert_eq!(collector.count_kind(ViolationKind::StabilizationMismatch), 1);
        // The stabilized session opens, contradicting its own query.
        assert_eq!(collector.count_kind(ViolationKind::QueryMismatch), 1);
        assert_eq!(device.closes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stabilized_query_failure_is_left_to_its_own_check() {
        let mut device = Scripted::agreeing(true);
        device.stabilized_query = Outcome::Error(String::from("hal died"));
        let (_, enumerated) = run(&device, true);
        assert!(enumerated.is_empty());

        let settings = OracleSettings {
            stabilized_ground_truth: true,
            ..OracleSettings::default()
        };
        let mut standalone = Collector::new();
        ConsistencyOracle::new(&device, settings, true).check(&combination(), &mut standalone);
        assert_eq!(standalone.count_kind(ViolationKind::DeviceError), 1);
    }

    #[test]
    fn timeout_keeps_the_late_answer() {
        let budget = Duration::from_millis(5);
        let elapsed = Duration::from_millis(50);
        let late = timeout("c", budget, elapsed, &Outcome::NotSupported);
        assert_eq!(late.kind, ViolationKind::Timeout);
        assert_eq!(late.expected, "answer within 5 ms");
        assert_eq!(late.actual, "not supported after 50 ms");

        let failed = timeout("c", budget, elapsed, &Outcome::Error(String::from("hal died")));
        assert_eq!(failed.actual, "error: hal died after 50 ms");

        let silent = timeout("c", budget, elapsed, &Outcome::TimedOut);
        assert_eq!(silent.actual, "no answer after 50 ms");
    }

    #[test]
    fn deferred_query_disagreement_is_reported() {
        let mut device = Scripted::agreeing(true);
        device.deferred = Some(Outcome::NotSupported);
        let (_, collector) = run(&device, false);
        assert_eq!(collector.count_kind(ViolationKind::DeferredQueryMismatch), 1);
        assert_eq!(collector.all()[0].expected, "supported");
    }

    #[test]
    fn panic_payloads_become_diagnostics() {
        let out: Outcome<()> = guarded(|| panic!("sensor on fire"));
        assert_eq!(
            out,
            Outcome::Error(String::from("device panicked: sensor on fire"))
        );
        let owned: Outcome<()> = guarded(|| panic!("{}", String::from("owned")));
        assert_eq!(owned, Outcome::Error(String::from("device panicked: owned")));
    }

    #[test]
    fn scoped_session_closes_exactly_once() {
        let closes = Arc::new(AtomicU32::new(0));
        let session = || Session {
            chars: Characteristics::default(),
            closes: Arc::clone(&closes),
            fail_close: false,
        };
        {
            let mut scoped = ScopedSession::new(session());
            assert_eq!(scoped.close(), Ok(()));
            assert_eq!(scoped.close(), Ok(()));
        }
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        {
            let _scoped = ScopedSession::new(session());
        }
        assert_eq!(closes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn default_settings_match_documented_values() {
        let s = OracleSettings::default();
        assert_eq!(s.ground_truth_budget, Duration::from_millis(3000));
        assert!(s.stabilization_cross_check);
        assert!(!s.stabilized_ground_truth);
        assert!(s.deferred_query_check);
    }
}
