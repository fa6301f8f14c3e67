//! Job risk assessment.
//!
//! Policy (all thresholds live in [`RiskPolicy`] and are configurable):
//!
//! | signal                         | `None`  | `PolicyCheck`              | `High`        |
//! |--------------------------------|---------|----------------------------|---------------|
//! | flagged messages               | 0       | 1 ..< `flag_threshold`     | >= threshold  |
//! | low-confidence application ratio | < 0.10 | 0.10 ..< 0.30             | >= 0.30       |
//!
//! The job's level is the higher of the two per-signal levels, which keeps the result monotonic
//! in both inputs.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{Application, Confidence, Job, JobId, Thread};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    None,
    PolicyCheck,
    High,
}

impl RiskLevel {
    pub const fn label(self) -> &'static str {
        match self {
            RiskLevel::None => "none",
            RiskLevel::PolicyCheck => "policy_check",
            RiskLevel::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Tunable thresholds behind [`RiskAssessor`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskPolicy {
    /// Flagged-message count at which a job becomes `High` (T1).
    pub flag_threshold: u32,
    /// Low-confidence ratio at which a job needs a policy check.
    pub policy_check_ratio: f64,
    /// Low-confidence ratio at which a job becomes `High`.
    pub high_ratio: f64,
}

impl RiskPolicy {
    pub const DEFAULT_FLAG_THRESHOLD: u32 = 3;
    pub const DEFAULT_POLICY_CHECK_RATIO: f64 = 0.10;
    pub const DEFAULT_HIGH_RATIO: f64 = 0.30;

    pub fn new(
        flag_threshold: u32,
        policy_check_ratio: f64,
        high_ratio: f64,
    ) -> Result<Self, String> {
        if flag_threshold == 0 {
            return Err("flag threshold must be at least 1".to_string());
        }
        for (name, ratio) in [
            ("policy check ratio", policy_check_ratio),
            ("high ratio", high_ratio),
        ] {
            if !ratio.is_finite() || !(0.0..=1.0).contains(&ratio) {
                return Err(format!("{name} must be within [0, 1], got {ratio}"));
            }
        }
        if policy_check_ratio > high_ratio {
            return Err(format!(
                "policy check ratio {policy_check_ratio} exceeds high ratio {high_ratio}"
            ));
        }

        Ok(Self {
            flag_threshold,
            policy_check_ratio,
            high_ratio,
        })
    }

    pub fn level_for(&self, signals: &RiskSignals) -> RiskLevel {
        let from_flags = match signals.flagged_messages {
            0 => RiskLevel::None,
            count if count < self.flag_threshold => RiskLevel::PolicyCheck,
            _ => RiskLevel::High,
        };

        let ratio = signals.low_confidence_ratio;
        let from_ratio = if ratio >= self.high_ratio {
            RiskLevel::High
        } else if ratio >= self.policy_check_ratio {
            RiskLevel::PolicyCheck
        } else {
            RiskLevel::None
        };

        from_flags.max(from_ratio)
    }
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            flag_threshold: Self::DEFAULT_FLAG_THRESHOLD,
            policy_check_ratio: Self::DEFAULT_POLICY_CHECK_RATIO,
            high_ratio: Self::DEFAULT_HIGH_RATIO,
        }
    }
}

/// Inputs that produced an assessment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskSignals {
    pub flagged_messages: u32,
    pub low_confidence_applications: u32,
    pub total_applications: u32,
    pub low_confidence_ratio: f64,
}

impl RiskSignals {
    pub fn new(flagged_messages: u32, low_confidence_applications: u32, total_applications: u32) -> Self {
        let low_confidence_ratio = if total_applications == 0 {
            0.0
        } else {
            f64::from(low_confidence_applications) / f64::from(total_applications)
        };

        Self {
            flagged_messages,
            low_confidence_applications,
            total_applications,
            low_confidence_ratio,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub job_id: JobId,
    pub level: RiskLevel,
    pub signals: RiskSignals,
    pub assessed_at: DateTime<Utc>,
}

/// Pure assessor: reads threads and applications, writes nothing.
#[derive(Debug, Clone, Default)]
pub struct RiskAssessor {
    policy: RiskPolicy,
}

impl RiskAssessor {
    pub fn new(policy: RiskPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RiskPolicy {
        &self.policy
    }

    pub fn assess(
        &self,
        job: &Job,
        threads: &[Thread],
        applications: &[Application],
        now: DateTime<Utc>,
    ) -> RiskAssessment {
        let flagged_messages = threads
            .iter()
            .filter(|thread| thread.job_id == job.id)
            .map(Thread::flagged_count)
            .sum::<usize>();

        let (low, total) = applications
            .iter()
            .filter(|application| application.job_id == job.id)
            .fold((0u32, 0u32), |(low, total), application| {
                let low = low + u32::from(application.confidence == Confidence::Low);
                (low, total + 1)
            });

        let signals = RiskSignals::new(
            u32::try_from(flagged_messages).unwrap_or(u32::MAX),
            low,
            total,
        );

        RiskAssessment {
            job_id: job.id.clone(),
            level: self.policy.level_for(&signals),
            signals,
            assessed_at: now,
        }
    }
}
