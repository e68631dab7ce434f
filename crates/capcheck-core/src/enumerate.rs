//! Combination enumeration with precondition pruning.
//!
//! Walks template × range profile × stabilization mode × fps range in that
//! order. Every tuple is either yielded or accounted to exactly one skip
//! bucket in [`EnumerationStats`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::combination::{Combination, ResolvedStream, StreamTemplate};
use crate::error::{ConfigError, EngineError};
use crate::space::{ConfigSpace, FpsRange, RangeProfile, StabilizationMode};

/// Default tolerance applied to `1 / fps` when pruning on frame duration.
pub const DEFAULT_FRAME_DURATION_TOLERANCE: f64 = 1.01;

/// Which parts of the space are exercised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PruningPolicy {
    /// Range profiles exercised; others are assumed covered transitively.
    pub range_profiles: Vec<RangeProfile>,
    /// Only fps ranges whose upper bound is listed here are exercised.
    pub fps_upper_bounds: Vec<u32>,
    /// A tuple is skipped when its minimum frame duration exceeds `tolerance / upper_fps` seconds.
    pub frame_duration_tolerance: f64,
    /// Stabilization modes never exercised.
    pub excluded_stabilization: Vec<StabilizationMode>,
}

impl Default for PruningPolicy {
    fn default() -> Self {
        Self {
            range_profiles: vec![RangeProfile::Standard, RangeProfile::Hlg10],
            fps_upper_bounds: vec![30, 60],
            frame_duration_tolerance: DEFAULT_FRAME_DURATION_TOLERANCE,
            excluded_stabilization: vec![StabilizationMode::On],
        }
    }
}

impl PruningPolicy {
    /// Reject policies that would prune every tuple.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: &str| ConfigError::Invalid {
            field,
            reason: reason.to_string(),
        };
        if self.range_profiles.is_empty() {
            return Err(invalid("pruning.range_profiles", "must not be empty"));
        }
        if self.fps_upper_bounds.is_empty() {
            return Err(invalid("pruning.fps_upper_bounds", "must not be empty"));
        }
        let tolerance = self.frame_duration_tolerance;
        if !tolerance.is_finite() || tolerance <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "pruning.frame_duration_tolerance",
                reason: format!("must be a positive finite number, got {tolerance}"),
            });
        }
        Ok(())
    }

    /// Whether `min_duration` cannot sustain the upper bound of `fps`.
    #[must_use]
    pub fn frame_rate_unreachable(&self, min_duration: Duration, fps: FpsRange) -> bool {
        if fps.max == 0 {
            return false;
        }
        min_duration.as_secs_f64() > self.frame_duration_tolerance / f64::from(fps.max)
    }
}

/// Per-rule accounting of the enumerated tuples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumerationStats {
    pub considered: usize,
    pub yielded: usize,
    pub skipped_range_profile: usize,
    pub excluded_stabilization: usize,
    pub skipped_fps: usize,
    pub skipped_frame_duration: usize,
    pub skipped_unresolvable: usize,
}

impl EnumerationStats {
    #[must_use]
    pub const fn skipped(&self) -> usize {
        self.skipped_range_profile
            + self.excluded_stabilization
            + self.skipped_fps
            + self.skipped_frame_duration
            + self.skipped_unresolvable
    }
}

#[derive(Debug, Clone)]
struct ResolvedTemplate {
    streams: Vec<ResolvedStream>,
    min_frame_duration: Duration,
}

/// Lazy, single-pass iterator over the combinations to check.
pub struct Enumerator<'a> {
    space: &'a ConfigSpace,
    templates: &'a [StreamTemplate],
    policy: &'a PruningPolicy,
    cursor: usize,
    total: usize,
    cache: Option<((usize, usize), Option<ResolvedTemplate>)>,
    stats: EnumerationStats,
}

impl<'a> Enumerator<'a> {
    /// Validate the templates and prepare the walk.
    pub fn new(
        space: &'a ConfigSpace,
        templates: &'a [StreamTemplate],
        policy: &'a PruningPolicy,
    ) -> Result<Self, EngineError> {
        validate_templates(space, templates)?;
        let total = templates.len()
            * space.range_profiles().len()
            * space.stabilization_modes().len()
            * space.fps_ranges().len();
        Ok(Self {
            space,
            templates,
            policy,
            cursor: 0,
            total,
            cache: None,
            stats: EnumerationStats::default(),
        })
    }

    #[must_use]
    pub fn stats(&self) -> &EnumerationStats {
        &self.stats
    }

    /// Number of raw tuples in the walk, pruned or not.
    #[must_use]
    pub const fn total_tuples(&self) -> usize {
        self.total
    }

    fn decode(&self, idx: usize) -> (usize, usize, usize, usize) {
        let n_fps = self.space.fps_ranges().len();
        let n_stab = self.space.stabilization_modes().len();
        let n_prof = self.space.range_profiles().len();
        let f = idx % n_fps;
        let s = (idx / n_fps) % n_stab;
        let p = (idx / (n_fps * n_stab)) % n_prof;
        let t = idx / (n_fps * n_stab * n_prof);
        (t, p, s, f)
    }

    fn resolution(&mut self, t: usize, p: usize) -> Option<ResolvedTemplate> {
        if let Some((at, cached)) = &self.cache
            && *at == (t, p)
        {
            return cached.clone();
        }
        let profile = self.space.range_profiles()[p];
        let resolved = resolve_template(self.space, &self.templates[t], profile);
        self.cache = Some(((t, p), resolved.clone()));
        resolved
    }
}

impl Iterator for Enumerator<'_> {
    type Item = Combination;

    fn next(&mut self) -> Option<Combination> {
        while self.cursor < self.total {
            let (t, p, s, f) = self.decode(self.cursor);
            self.cursor += 1;
            self.stats.considered += 1;

            let profile = self.space.range_profiles()[p];
            if !self.policy.range_profiles.contains(&profile) {
                self.stats.skipped_range_profile += 1;
                continue;
            }
            let stabilization = self.space.stabilization_modes()[s];
            if self.policy.excluded_stabilization.contains(&stabilization) {
                self.stats.excluded_stabilization += 1;
                continue;
            }
            let fps_range = self.space.fps_ranges()[f];
            if !self.policy.fps_upper_bounds.contains(&fps_range.max) {
                self.stats.skipped_fps += 1;
                continue;
            }
            let Some(resolved) = self.resolution(t, p) else {
                self.stats.skipped_unresolvable += 1;
                continue;
            };
            if self
                .policy
                .frame_rate_unreachable(resolved.min_frame_duration, fps_range)
            {
                self.stats.skipped_frame_duration += 1;
                continue;
            }

            self.stats.yielded += 1;
            return Some(Combination {
                template_index: t,
                streams: resolved.streams,
                range_profile: profile,
                stabilization,
                fps_range,
                min_frame_duration: resolved.min_frame_duration,
            });
        }
        None
    }
}

fn validate_templates(
    space: &ConfigSpace,
    templates: &[StreamTemplate],
) -> Result<(), EngineError> {
    for (index, template) in templates.iter().enumerate() {
        if template.streams.is_empty() {
            return Err(EngineError::MalformedTemplate {
                index,
                reason: String::from("template has no streams"),
            });
        }
        if let Some(d) = template.streams.iter().find(|d| !space.declares(d.format)) {
            return Err(EngineError::MalformedTemplate {
                index,
                reason: format!("stream {d} uses a format the device does not declare"),
            });
        }
    }
    Ok(())
}

/// Resolve every stream of `template` under `profile`.
///
/// `None` when a size is unresolvable or no stream has a specified duration.
fn resolve_template(
    space: &ConfigSpace,
    template: &StreamTemplate,
    profile: RangeProfile,
) -> Option<ResolvedTemplate> {
    let mut streams = Vec::with_capacity(template.streams.len());
    let mut min_frame_duration: Option<Duration> = None;
    for descriptor in &template.streams {
        let size = space
            .resolve_size(descriptor.format, descriptor.bound)
            .ok()
            .flatten()?;
        let effective_format = descriptor.format.effective_for(profile);
        if let Some(d) = space.min_frame_duration(effective_format, size) {
            min_frame_duration = Some(min_frame_duration.map_or(d, |cur| cur.max(d)));
        }
        streams.push(ResolvedStream {
            descriptor: *descriptor,
            effective_format,
            size,
        });
    }
    Some(ResolvedTemplate {
        streams,
        min_frame_duration: min_frame_duration?,
    })
}
