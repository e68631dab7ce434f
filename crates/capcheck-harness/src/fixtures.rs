//! Device profile loading.
//!
//! A profile is a JSON description of one device: its capabilities, the
//! stream templates it claims are queryable, and scripted answers for the
//! calls the engine makes. Profiles drive [`ProfileDevice`](crate::profile_device::ProfileDevice).

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use capcheck_core::{
    Combination, DeviceCapabilities, RangeProfile, StabilizationMode, StreamFormat,
    StreamTemplate,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Only profile schema version understood by this crate.
pub const PROFILE_VERSION: &str = "v1";

/// Errors loading or validating profiles.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid profile json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("profile '{device_id}' has unsupported version '{version}' (expected v1)")]
    UnsupportedVersion { device_id: String, version: String },
    #[error("profile has an empty device_id")]
    EmptyDeviceId,
    #[error("device id '{0}' appears in more than one profile")]
    DuplicateDeviceId(String),
    #[error("no profiles found under {}", .0.display())]
    NoProfiles(PathBuf),
}

/// Scripted answer for one device call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Answer {
    Supported,
    NotSupported,
    Timeout,
    Error(String),
    /// The call panics with this message.
    Panic(String),
}

/// Conditions a combination must meet for a rule to apply. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuleMatch {
    /// Some stream uses this format, either as declared or as configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<StreamFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_profile: Option<RangeProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stabilization: Option<StabilizationMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps_max: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_index: Option<usize>,
}

impl RuleMatch {
    #[must_use]
    pub fn matches(&self, combination: &Combination) -> bool {
        self.format.is_none_or(|f| combination.contains_format(f))
            && self
                .range_profile
                .is_none_or(|p| combination.range_profile == p)
            && self
                .stabilization
                .is_none_or(|s| combination.stabilization == s)
            && self.fps_max.is_none_or(|m| combination.fps_range.max == m)
            && self
                .template_index
                .is_none_or(|t| combination.template_index == t)
    }
}

/// Scripted answers for combinations matching `when`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRule {
    #[serde(default)]
    pub when: RuleMatch,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Answer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deferred_query: Option<Answer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub establish: Option<Answer>,
    /// Applied when the session established for a matching combination is closed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close: Option<Answer>,
}

/// Which scripted call a rule answer is looked up for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Query,
    DeferredQuery,
    Establish,
    Close,
}

impl AnswerRule {
    fn answer(&self, call: Call) -> Option<&Answer> {
        match call {
            Call::Query => self.query.as_ref(),
            Call::DeferredQuery => self.deferred_query.as_ref(),
            Call::Establish => self.establish.as_ref(),
            Call::Close => self.close.as_ref(),
        }
    }
}

const fn default_supported() -> bool {
    true
}

/// JSON description of one device under test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    /// Schema version.
    pub version: String,
    pub device_id: String,
    /// UTC timestamp of capture.
    #[serde(default)]
    pub captured_at: String,
    pub capabilities: DeviceCapabilities,
    pub templates: Vec<StreamTemplate>,
    /// Query answer for combinations no rule scripts.
    #[serde(default = "default_supported")]
    pub default_supported: bool,
    /// Whether the device offers the deferred-output query at all.
    #[serde(default)]
    pub offers_deferred_query: bool,
    /// Characteristics keys reported by every established session.
    #[serde(default)]
    pub session_keys: Vec<String>,
    /// First matching rule that scripts a call wins.
    #[serde(default)]
    pub rules: Vec<AnswerRule>,
}

impl DeviceProfile {
    /// Load a profile from a JSON string and validate it.
    pub fn from_json(json: &str) -> Result<Self, ProfileError> {
        let profile: Self = serde_json::from_str(json)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load a profile from a file path.
    pub fn from_file(path: &Path) -> Result<Self, ProfileError> {
        let content = std::fs::read_to_string(path).map_err(|source| ProfileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.device_id.trim().is_empty() {
            return Err(ProfileError::EmptyDeviceId);
        }
        if self.version != PROFILE_VERSION {
            return Err(ProfileError::UnsupportedVersion {
                device_id: self.device_id.clone(),
                version: self.version.clone(),
            });
        }
        Ok(())
    }

    /// First scripted answer for `call` among the rules matching `combination`.
    #[must_use]
    pub fn scripted(&self, call: Call, combination: &Combination) -> Option<&Answer> {
        self.rules
            .iter()
            .filter(|rule| rule.when.matches(combination))
            .find_map(|rule| rule.answer(call))
    }
}

/// Load one profile file, or every `*.json` file of a directory in name order.
pub fn load_profiles(path: &Path) -> Result<Vec<DeviceProfile>, ProfileError> {
    let profiles = if path.is_dir() {
        let io_err = |source| ProfileError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut files: Vec<PathBuf> = std::fs::read_dir(path)
            .map_err(io_err)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();
        files
            .iter()
            .map(|file| DeviceProfile::from_file(file))
            .collect::<Result<Vec<_>, _>>()?
    } else {
        vec![DeviceProfile::from_file(path)?]
    };

    if profiles.is_empty() {
        return Err(ProfileError::NoProfiles(path.to_path_buf()));
    }
    let mut seen = BTreeSet::new();
    for profile in &profiles {
        if !seen.insert(profile.device_id.as_str()) {
            return Err(ProfileError::DuplicateDeviceId(profile.device_id.clone()));
        }
    }
    Ok(profiles)
}
