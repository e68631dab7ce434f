//! Profile-backed stand-in for a real device.

use std::sync::Arc;
use std::time::Duration;

use capcheck_core::{
    Characteristics, Combination, DeviceCapabilities, DeviceSession, DeviceUnderTest, Outcome,
    StreamTemplate,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::fixtures::{Answer, Call, DeviceProfile};

/// Point-in-time view of a device's session accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub queries: usize,
    pub ground_truth_calls: usize,
    pub opened: usize,
    pub closed: usize,
    /// Sessions currently open.
    pub open: usize,
    /// Most sessions ever open at once.
    pub peak: usize,
}

/// Thread-safe session accounting.
#[derive(Debug, Default)]
pub struct SessionLedger {
    inner: Mutex<LedgerSnapshot>,
}

impl SessionLedger {
    fn record_query(&self) {
        self.inner.lock().queries += 1;
    }

    fn record_ground_truth(&self) {
        self.inner.lock().ground_truth_calls += 1;
    }

    fn open(&self) {
        let mut s = self.inner.lock();
        s.opened += 1;
        s.open += 1;
        s.peak = s.peak.max(s.open);
    }

    fn close(&self) {
        let mut s = self.inner.lock();
        s.closed += 1;
        s.open = s.open.saturating_sub(1);
    }

    #[must_use]
    pub fn snapshot(&self) -> LedgerSnapshot {
        *self.inner.lock()
    }
}

/// Session handed out by [`ProfileDevice`].
pub struct ProfileSession {
    ledger: Arc<SessionLedger>,
    characteristics: Characteristics,
    close_answer: Option<Answer>,
    open: bool,
}

impl DeviceSession for ProfileSession {
    fn characteristics(&self) -> &Characteristics {
        &self.characteristics
    }

    fn close(&mut self) -> Result<(), String> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.ledger.close();
        match &self.close_answer {
            Some(Answer::Error(msg)) => Err(msg.clone()),
            Some(Answer::Panic(msg)) => panic!("{msg}"),
            _ => Ok(()),
        }
    }
}

impl Drop for ProfileSession {
    fn drop(&mut self) {
        if self.open {
            self.open = false;
            self.ledger.close();
        }
    }
}

/// A [`DeviceUnderTest`] whose answers come from a [`DeviceProfile`].
///
/// Unscripted queries answer `default_supported`; unscripted deferred
/// queries and session establishment mirror the query answer.
pub struct ProfileDevice {
    profile: DeviceProfile,
    ledger: Arc<SessionLedger>,
}

impl ProfileDevice {
    #[must_use]
    pub fn new(profile: DeviceProfile) -> Self {
        Self {
            profile,
            ledger: Arc::new(SessionLedger::default()),
        }
    }

    #[must_use]
    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    #[must_use]
    pub fn ledger(&self) -> LedgerSnapshot {
        self.ledger.snapshot()
    }

    fn query_answer(&self, combination: &Combination) -> Answer {
        self.profile
            .scripted(Call::Query, combination)
            .cloned()
            .unwrap_or(if self.profile.default_supported {
                Answer::Supported
            } else {
                Answer::NotSupported
            })
    }

    fn answer_or_mirror(&self, call: Call, combination: &Combination) -> Answer {
        self.profile
            .scripted(call, combination)
            .cloned()
            .unwrap_or_else(|| self.query_answer(combination))
    }
}

fn outcome_of(answer: Answer) -> Outcome<()> {
    match answer {
        Answer::Supported => Outcome::Supported(()),
        Answer::NotSupported => Outcome::NotSupported,
        Answer::Timeout => Outcome::TimedOut,
        Answer::Error(msg) => Outcome::Error(msg),
        Answer::Panic(msg) => panic!("{msg}"),
    }
}

impl DeviceUnderTest for ProfileDevice {
    type Session = ProfileSession;

    fn id(&self) -> &str {
        &self.profile.device_id
    }

    fn capabilities(&self) -> Result<DeviceCapabilities, String> {
        Ok(self.profile.capabilities.clone())
    }

    fn queryable_templates(&self) -> Vec<StreamTemplate> {
        self.profile.templates.clone()
    }

    fn is_config_supported(&self, combination: &Combination) -> Outcome<()> {
        self.ledger.record_query();
        outcome_of(self.query_answer(combination))
    }

    fn is_deferred_config_supported(&self, combination: &Combination) -> Option<Outcome<()>> {
        let scripted = self.profile.scripted(Call::DeferredQuery, combination);
        if !self.profile.offers_deferred_query && scripted.is_none() {
            return None;
        }
        Some(outcome_of(
            self.answer_or_mirror(Call::DeferredQuery, combination),
        ))
    }

    fn establish_and_describe(
        &self,
        combination: &Combination,
        _budget: Duration,
    ) -> Outcome<ProfileSession> {
        self.ledger.record_ground_truth();
        match outcome_of(self.answer_or_mirror(Call::Establish, combination)) {
            Outcome::Supported(()) => {
                self.ledger.open();
                Outcome::Supported(ProfileSession {
                    ledger: Arc::clone(&self.ledger),
                    characteristics: Characteristics {
                        keys: self.profile.session_keys.clone(),
                    },
                    close_answer: self.profile.scripted(Call::Close, combination).cloned(),
                    open: true,
                })
            }
            Outcome::NotSupported => Outcome::NotSupported,
            Outcome::TimedOut => Outcome::TimedOut,
            Outcome::Error(msg) => Outcome::Error(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use capcheck_core::{
        FpsRange, RangeProfile, ResolvedStream, Size, SizeBound, StabilizationMode,
        StreamDescriptor, StreamFormat,
    };

    use super::*;

    fn profile(rules: &str, extra: &str) -> DeviceProfile {
        DeviceProfile::from_json(&format!(
            r#"{{
                "version": "v1",
                "device_id": "cam0",
                "capabilities": {{
                    "formats": {{"private": [{{"size": [1920, 1080], "min_frame_duration_ns": 16666666}}]}},
                    "range_profiles": ["standard"],
                    "stabilization_modes": ["off"],
                    "fps_ranges": [[30, 30]]
                }},
                "templates": [[["private", "s1080p"]]],
                "session_keys": ["control.aeMode"],
                {extra}
                "rules": {rules}
            }}"#
        ))
        .expect("valid profile")
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
            min_frame_duration: Duration::from_nanos(16_666_666),
        }
    }

    #[test]
    fn unscripted_calls_follow_default_answer() {
        let device = ProfileDevice::new(profile("[]", r#""default_supported": false,"#));
        let c = combination();
        assert_eq!(device.is_config_supported(&c), Outcome::NotSupported);
        assert!(device.is_deferred_config_supported(&c).is_none());
        assert!(matches!(
            device.establish_and_describe(&c, Duration::from_secs(1)),
            Outcome::NotSupported
        ));
        let ledger = device.ledger();
        assert_eq!(ledger.queries, 1);
        assert_eq!(ledger.ground_truth_calls, 1);
        assert_eq!(ledger.opened, 0);
    }

    #[test]
    fn establish_mirrors_scripted_query() {
        let device = ProfileDevice::new(profile(
            r#"[{"when": {"format": "private"}, "query": "timeout"}]"#,
            "",
        ));
        let c = combination();
        assert_eq!(device.is_config_supported(&c), Outcome::TimedOut);
        assert!(matches!(
            device.establish_and_describe(&c, Duration::from_secs(1)),
            Outcome::TimedOut
        ));
    }

    #[test]
    fn sessions_are_counted_and_closed_once() {
        let device = ProfileDevice::new(profile(
            r#"[{"close": {"error": "busy"}}]"#,
            r#""offers_deferred_query": true,"#,
        ));
        let c = combination();
        assert_eq!(
            device.is_deferred_config_supported(&c),
            Some(Outcome::Supported(()))
        );
        let Outcome::Supported(mut session) =
            device.establish_and_describe(&c, Duration::from_secs(1))
        else {
            panic!("expected a session");
        };
        assert_eq!(session.characteristics().keys, vec!["control.aeMode"]);
        assert_eq!(device.ledger().open, 1);
        assert_eq!(session.close(), Err(String::from("busy")));
        assert_eq!(session.close(), Ok(()));
        drop(session);
        let ledger = device.ledger();
        assert_eq!((ledger.opened, ledger.closed, ledger.open, ledger.peak), (1, 1, 0, 1));
    }

    #[test]
    fn dropped_session_is_released() {
        let device = ProfileDevice::new(profile("[]", ""));
        let outcome = device.establish_and_describe(&combination(), Duration::from_secs(1));
        assert!(outcome.is_supported());
        drop(outcome);
        assert_eq!(device.ledger().open, 0);
        assert_eq!(device.ledger().closed, 1);
    }
}
