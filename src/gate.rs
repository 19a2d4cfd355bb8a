//! # Eligibility Gate
//!
//! Cost controls over a metered upstream: a kill switch, a uniform sampling
//! draw, and an ROI floor, evaluated in that fixed order so the decision is
//! deterministic for a given random draw. The gate only reads flag state.

use crate::config::FeatureFlags;
use crate::types::{Match, SubmitReason};
use parking_lot::RwLock;
use tracing::debug;

/// Outcome of a gate evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateDecision {
    pub allow: bool,
    pub reason: SubmitReason,
}

impl GateDecision {
    fn allow() -> Self {
        Self {
            allow: true,
            reason: SubmitReason::Ok,
        }
    }

    fn deny(reason: SubmitReason) -> Self {
        Self {
            allow: false,
            reason,
        }
    }
}

/// Decides whether enrichment is attempted for a match at all.
pub struct EligibilityGate {
    flags: RwLock<FeatureFlags>,
}

impl EligibilityGate {
    pub fn new(flags: FeatureFlags) -> Self {
        Self {
            flags: RwLock::new(flags),
        }
    }

    /// Swap in a freshly loaded flag document.
    pub fn reload(&self, flags: FeatureFlags) {
        *self.flags.write() = flags;
    }

    pub fn flags(&self) -> FeatureFlags {
        self.flags.read().clone()
    }

    /// Evaluate the gate for one match.
    ///
    /// A missing ROI score never denies; unscored matches pass the threshold
    /// check unconditionally.
    pub fn evaluate(&self, candidate: &Match) -> GateDecision {
        let flags = self.flags.read();

        if !flags.enabled {
            return GateDecision::deny(SubmitReason::Disabled);
        }

        if fastrand::f64() >= flags.sample_rate {
            debug!(match_id = %candidate.id, sample_rate = flags.sample_rate, "Match sampled out");
            return GateDecision::deny(SubmitReason::SampledOut);
        }

        if let (Some(score), Some(threshold)) = (candidate.roi_score, flags.min_roi_score) {
            if score < threshold {
                debug!(
                    match_id = %candidate.id,
                    roi_score = score,
                    threshold,
                    "Match below ROI threshold"
                );
                return GateDecision::deny(SubmitReason::BelowRoiThreshold);
            }
        }

        GateDecision::allow()
    }
}
