//! Verification harness for capcheck.
//!
//! This crate provides:
//! - Device profiles: JSON descriptions of devices with scripted answers
//! - Profile devices: `DeviceUnderTest` stand-ins with session accounting
//! - Runner: multi-device verification over profiles
//! - Report generation: human-readable + machine-readable consistency reports
//! - Structured logging: JSONL records and artifact indexes

#![forbid(unsafe_code)]

pub mod fixtures;
pub mod profile_device;
pub mod report;
pub mod runner;
pub mod structured_log;

pub use fixtures::{Answer, AnswerRule, DeviceProfile, ProfileError, RuleMatch, load_profiles};
pub use profile_device::{LedgerSnapshot, ProfileDevice};
pub use report::{ConsistencyReport, RunSummary};
pub use runner::{DeviceSummary, TestRunner, exit_code};
pub use structured_log::{LogEmitter, LogEntry, LogLevel};
